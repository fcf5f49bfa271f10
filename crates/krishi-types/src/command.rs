//! Operator commands accepted from the dashboard or the REPL.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::plan::{MissionPlan, PlanError, WizardPayload};

/// A plan as submitted by an operator: either the typed tagged union or the
/// dashboard wizard's loose payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PlanPayload {
    Typed(MissionPlan),
    Wizard(WizardPayload),
}

impl PlanPayload {
    pub fn into_plan(self) -> Result<MissionPlan, PlanError> {
        match self {
            PlanPayload::Typed(plan) => Ok(plan),
            PlanPayload::Wizard(payload) => MissionPlan::try_from(payload),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServoName {
    Pan,
    Tilt,
    Pipe,
}

/// Every command an operator surface may issue.
///
/// The JSON form is internally tagged by `"command"`, e.g.
/// `{"command":"pause"}` or `{"command":"servo","servo":"pan","angle":90}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OperatorCommand {
    /// Open the planning wizard (IDLE → MISSION_SETUP).
    GoToWizard,
    SaveMission { plan: PlanPayload },
    StartMission,
    StopMission,
    Pause,
    Resume,
    EmergencyStop,
    SetManualMode,
    /// Leave MANUAL_CONTROL or EMERGENCY_STOPPED for IDLE.
    Reset,
    Move {
        direction: MoveDirection,
        #[serde(default)]
        speed: Option<u8>,
    },
    Servo { servo: ServoName, angle: u8 },
    Pump { tank: u8, on: bool },
}

impl OperatorCommand {
    pub fn name(&self) -> &'static str {
        match self {
            OperatorCommand::GoToWizard => "go_to_wizard",
            OperatorCommand::SaveMission { .. } => "save_mission",
            OperatorCommand::StartMission => "start_mission",
            OperatorCommand::StopMission => "stop_mission",
            OperatorCommand::Pause => "pause",
            OperatorCommand::Resume => "resume",
            OperatorCommand::EmergencyStop => "emergency_stop",
            OperatorCommand::SetManualMode => "set_manual_mode",
            OperatorCommand::Reset => "reset",
            OperatorCommand::Move { .. } => "move",
            OperatorCommand::Servo { .. } => "servo",
            OperatorCommand::Pump { .. } => "pump",
        }
    }
}
