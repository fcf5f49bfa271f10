//! `krishi-types` – the shared vocabulary of the KrishiNetra orchestrator.
//!
//! Every other crate in the workspace speaks in these types: the mission
//! lifecycle ([`MissionState`]), the tagged-union [`MissionPlan`], sensor
//! readings ([`SensorSnapshot`]), per-plant diagnoses ([`PlantRecord`]) and
//! the read-only [`StatusSnapshot`] handed to operator surfaces.
//!
//! # Modules
//!
//! - [`plan`] – mission plans, row specifications and their invariants.
//! - [`state`] – mission states, capture phases, endpoints and progress.
//! - [`sensors`] – the cached environmental/obstacle snapshot.
//! - [`diagnosis`] – detections, merged diagnoses, treatment outcomes and
//!   plant records.
//! - [`command`] – operator commands accepted from the dashboard or REPL.
//! - [`status`] – the atomically published status snapshot.
//! - [`event`] – events carried on the mission event bus.

pub mod command;
pub mod diagnosis;
pub mod event;
pub mod plan;
pub mod sensors;
pub mod state;
pub mod status;

pub use command::{MoveDirection, OperatorCommand, PlanPayload, ServoName};
pub use diagnosis::{
    AngleDetections, Detection, Dose, MergedDetections, PlantRecord, SessionTally,
    TreatmentOutcome,
};
pub use event::{AlertLevel, EventPayload, MissionEvent};
pub use plan::{
    ContinuousRow, IndividualRow, LayoutMode, MissionPlan, OperationMode, PlanError, RowSpec,
    WizardPayload, WizardRow,
};
pub use sensors::{MAX_RANGE_CM, SensorSnapshot};
pub use state::{CapturePhase, Endpoint, EndpointHealth, MissionProgress, MissionState};
pub use status::{LinkStatus, PlantLog, RECENT_PLANT_WINDOW, StatusSnapshot};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Global error type spanning transport faults, safety interlocks, plan
/// validation and persistence failures.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum KrishiError {
    #[error("Invalid mission plan: {0}")]
    InvalidPlan(String),

    #[error("Command '{command}' is not accepted in state {state}")]
    InvalidTransition { state: MissionState, command: String },

    #[error("Manual primitives are only honoured in MANUAL_CONTROL")]
    ManualModeRequired,

    #[error("Timed out waiting for {endpoint} to acknowledge {command}")]
    TransportTimeout { endpoint: Endpoint, command: String },

    #[error("Malformed reply from {endpoint}: {details}")]
    TransportProtocol { endpoint: Endpoint, details: String },

    #[error("{endpoint} endpoint unresponsive after {attempts} attempts")]
    EndpointUnresponsive { endpoint: Endpoint, attempts: u32 },

    #[error("{endpoint} rejected {command}: {reason}")]
    Rejected {
        endpoint: Endpoint,
        command: String,
        reason: String,
    },

    #[error("Command blocked by safety interlock: {0}")]
    Interlocked(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Hardware fault on {component}: {details}")]
    Hardware { component: String, details: String },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl KrishiError {
    /// `true` for faults that mean an endpoint can no longer be trusted and
    /// the mission must be emergency-stopped.
    pub fn is_escalation(&self) -> bool {
        matches!(self, KrishiError::EndpointUnresponsive { .. })
    }
}

impl From<PlanError> for KrishiError {
    fn from(err: PlanError) -> Self {
        KrishiError::InvalidPlan(err.to_string())
    }
}
