//! [`MissionController`] – the mission state machine.
//!
//! The controller is the single writer of [`MissionState`], the active
//! [`MissionPlan`] and its [`MissionProgress`].  Operator commands are
//! applied through [`MissionController::execute`]; autonomous work advances
//! one discrete step per [`MissionController::tick`]:
//!
//! ```text
//! STARTUP ──handshake──▶ IDLE ──new mission──▶ MISSION_SETUP ──save──▶ MISSION_AWAITING_START
//!                                                                             │ start
//!                        ┌──────────────────────────────────────────────────▼
//!                        │  EXECUTING_ROW ──stop reached──▶ ANALYZING ──qualifying──▶ TREATING
//!                        │        ▲                            │ healthy                 │
//!                        │        └────────────────────────────┴─────────────────────────┘
//!                        └─▶ IDLE when the last row is exhausted
//! ```
//!
//! `pause`/`resume` freeze and restore the exact state; `set_manual_mode`
//! aborts any mission; `emergency_stop` latches every endpoint until an
//! explicit `reset`.
//!
//! Faults inside a step are handled here: an unresponsive endpoint escalates
//! to EMERGENCY_STOPPED, anything else aborts the mission back to IDLE with
//! the error in the status message.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Local, Timelike, Utc};
use krishi_hal::{Camera, Detector, ImageArchive};
use krishi_kernel::CommandGate;
use krishi_link::{Command, EventBus, Indication, Topic};
use krishi_memory::{DetectionSink, SessionEnd};
use krishi_types::{
    Endpoint, EventPayload, KrishiError, MissionEvent, MissionPlan, MissionProgress, MissionState,
    MoveDirection, OperatorCommand, PlanPayload, PlantRecord, RowSpec, SensorSnapshot, ServoName,
    TreatmentOutcome,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::{CaptureSequencer, StopScan};
use crate::config::MissionConfig;
use crate::navigation::{Arrival, Navigator, RowChange, Turn};
use crate::session::{FlushOutcome, SessionAggregator};
use crate::status::StatusBoard;
use crate::treatment::TreatmentPlanner;

const SOURCE: &str = "krishi-runtime::mission";

// ─────────────────────────────────────────────────────────────────────────────
// Mission bookkeeping
// ─────────────────────────────────────────────────────────────────────────────

/// Where the current row stands between ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Cursor {
    /// Pan towards the row before the first stop.
    RowStart,
    Travel { remaining_cm: f32 },
    /// At a plant; the next step analyses it.
    Stop,
    RowChange(RowChange),
}

struct ActiveMission {
    id: String,
    plan: MissionPlan,
    progress: MissionProgress,
    cursor: Cursor,
}

/// A scanned plant waiting for its treatment step.
struct PendingPlant {
    plant_number: u32,
    row_index: usize,
    scan: StopScan,
    qualifying: Vec<String>,
    scanned_at: DateTime<Utc>,
}

/// `KR-MSN-<date>-<seconds since midnight>`.
pub fn mission_id(now: DateTime<Local>) -> String {
    format!(
        "KR-MSN-{}-{:05}",
        now.format("%Y-%m-%d"),
        now.num_seconds_from_midnight()
    )
}

/// Devices and sinks the controller drives besides the two endpoints.
pub struct Collaborators {
    pub camera: Box<dyn Camera>,
    pub detector: Arc<dyn Detector>,
    pub archive: Option<Arc<dyn ImageArchive>>,
    pub sink: Option<Arc<dyn DetectionSink>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// MissionController
// ─────────────────────────────────────────────────────────────────────────────

pub struct MissionController {
    config: MissionConfig,
    gate: Arc<CommandGate>,
    sensors: watch::Receiver<SensorSnapshot>,
    navigator: Navigator,
    sequencer: CaptureSequencer,
    planner: TreatmentPlanner,
    aggregator: SessionAggregator,
    board: StatusBoard,
    bus: EventBus,
    state: MissionState,
    paused_from: Option<MissionState>,
    mission: Option<ActiveMission>,
    pending: Option<PendingPlant>,
    message: String,
    last_flush: Option<JoinHandle<FlushOutcome>>,
}

impl MissionController {
    pub fn new(
        config: MissionConfig,
        gate: Arc<CommandGate>,
        sensors: watch::Receiver<SensorSnapshot>,
        devices: Collaborators,
        bus: EventBus,
    ) -> Self {
        let navigator = Navigator::new(config.navigation.clone(), sensors.clone());
        let mut sequencer = CaptureSequencer::new(config.capture.clone(), devices.camera, devices.detector);
        if let Some(archive) = devices.archive {
            sequencer = sequencer.with_archive(archive);
        }
        let planner = TreatmentPlanner::new(
            config.treatment.clone(),
            config.inference.confidence_threshold,
            config.inference.healthy_classes.clone(),
        );
        let aggregator = SessionAggregator::new(devices.sink, &config.telemetry);
        Self {
            config,
            gate,
            sensors,
            navigator,
            sequencer,
            planner,
            aggregator,
            board: StatusBoard::new(),
            bus,
            state: MissionState::Startup,
            paused_from: None,
            mission: None,
            pending: None,
            message: "Waiting for controllers".to_string(),
            last_flush: None,
        }
    }

    pub fn state(&self) -> MissionState {
        self.state
    }

    pub fn config(&self) -> &MissionConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<CommandGate> {
        &self.gate
    }

    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Background flush started by the most recent mission end, if any.
    pub fn take_flush(&mut self) -> Option<JoinHandle<FlushOutcome>> {
        self.last_flush.take()
    }

    // ── Publishing ──────────────────────────────────────────────────────────

    /// Publish the controller's view as a fresh snapshot.
    pub fn publish(&self) {
        let sensors = self.sensors.borrow().clone();
        let server_status = self.gate.status();
        let mission = self.mission.as_ref();
        self.board.publish(|s| {
            s.server_status = server_status;
            s.robot_status = self.state;
            s.paused_from = self.paused_from;
            s.sensors = sensors;
            s.mission_id = mission.map(|m| m.id.clone());
            s.mission_plan = mission.map(|m| m.plan.clone());
            s.mission_progress = mission.map(|m| m.progress.clone());
            s.session_tally = self.aggregator.tally().clone();
            s.plant_log = Arc::clone(self.aggregator.plant_log());
            s.mission_message = self.message.clone();
        });
    }

    fn transition(&mut self, to: MissionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(%from, %to, "mission state changed");
        self.bus.publish_to(
            Topic::Mission,
            MissionEvent::new(SOURCE, EventPayload::StateChanged { from, to }),
        );
    }

    fn reject(&self, command: &str) -> KrishiError {
        KrishiError::InvalidTransition {
            state: self.state,
            command: command.to_string(),
        }
    }

    // ── Operator commands ───────────────────────────────────────────────────

    /// Apply one operator command and publish the result.
    pub async fn execute(&mut self, command: OperatorCommand) -> Result<(), KrishiError> {
        debug!(command = command.name(), state = %self.state, "operator command");
        let result = match command {
            OperatorCommand::GoToWizard => self.new_mission(),
            OperatorCommand::SaveMission { plan } => self.save_mission(plan),
            OperatorCommand::StartMission => self.start_mission(),
            OperatorCommand::StopMission => self.stop_mission().await,
            OperatorCommand::Pause => self.pause(),
            OperatorCommand::Resume => self.resume(),
            OperatorCommand::EmergencyStop => {
                self.emergency_stop("operator emergency stop");
                Ok(())
            }
            OperatorCommand::SetManualMode => self.set_manual_mode().await,
            OperatorCommand::Reset => self.reset(),
            OperatorCommand::Move { direction, speed } => self.manual_move(direction, speed).await,
            OperatorCommand::Servo { servo, angle } => self.manual_servo(servo, angle).await,
            OperatorCommand::Pump { tank, on } => self.manual_pump(tank, on).await,
        };
        if let Err(e) = &result {
            warn!(error = %e, "operator command rejected");
        }
        self.publish();
        result
    }

    /// STARTUP → IDLE once both endpoints acknowledge a safe command.  A
    /// failure leaves the machine in STARTUP for a later retry.
    #[instrument(skip(self))]
    pub async fn handshake(&mut self) -> Result<(), KrishiError> {
        if self.state != MissionState::Startup {
            return Ok(());
        }
        // A failed attempt may have marked an endpoint unresponsive.
        self.gate.link().reset();
        match self.gate.link().handshake().await {
            Ok(()) => {
                self.message = "Ready".to_string();
                self.transition(MissionState::Idle);
                self.publish();
                Ok(())
            }
            Err(e) => {
                self.message = format!("Waiting for controllers: {e}");
                self.publish();
                Err(e)
            }
        }
    }

    /// Open the planning wizard, discarding any saved but unstarted plan.
    pub fn new_mission(&mut self) -> Result<(), KrishiError> {
        match self.state {
            MissionState::Idle | MissionState::MissionSetup | MissionState::MissionAwaitingStart => {
                self.mission = None;
                self.message = "Planning new mission".to_string();
                self.transition(MissionState::MissionSetup);
                Ok(())
            }
            _ => Err(self.reject("go_to_wizard")),
        }
    }

    /// Validate `payload` and arm it.  An invalid plan leaves the machine in
    /// MISSION_SETUP with the violated invariant as the message.
    pub fn save_mission(&mut self, payload: PlanPayload) -> Result<(), KrishiError> {
        match self.state {
            MissionState::MissionSetup => {}
            MissionState::Idle => self.transition(MissionState::MissionSetup),
            _ => return Err(self.reject("save_mission")),
        }

        let plan = match payload.into_plan().and_then(|plan| plan.validate().map(|()| plan)) {
            Ok(plan) => plan,
            Err(e) => {
                self.message = format!("Invalid plan: {e}");
                return Err(e.into());
            }
        };

        let id = mission_id(Local::now());
        info!(mission_id = %id, rows = plan.row_count(), "mission plan saved");
        self.message = format!("Mission {id} ready: {} row(s)", plan.row_count());
        self.mission = Some(ActiveMission {
            id,
            plan,
            progress: MissionProgress::default(),
            cursor: Cursor::RowStart,
        });
        self.transition(MissionState::MissionAwaitingStart);
        Ok(())
    }

    pub fn start_mission(&mut self) -> Result<(), KrishiError> {
        if self.state != MissionState::MissionAwaitingStart {
            return Err(self.reject("start_mission"));
        }
        let Some(mission) = self.mission.as_mut() else {
            return Err(self.reject("start_mission"));
        };
        let now = Utc::now();
        mission.progress.started_at = Some(now);
        self.aggregator.begin(&mission.id, now);
        self.message = format!("Mission {} running", mission.id);
        self.transition(MissionState::ExecutingRow);
        Ok(())
    }

    /// Abort the active mission, flushing what was scanned so far.
    pub async fn stop_mission(&mut self) -> Result<(), KrishiError> {
        match self.state {
            MissionState::MissionAwaitingStart => {
                self.mission = None;
                self.message = "Mission discarded".to_string();
                self.transition(MissionState::Idle);
                Ok(())
            }
            MissionState::ExecutingRow | MissionState::Analyzing | MissionState::Treating => {
                self.abort(SessionEnd::Stopped, "Mission stopped by operator".to_string())
                    .await;
                Ok(())
            }
            MissionState::Paused if self.mission.is_some() => {
                self.abort(SessionEnd::Stopped, "Mission stopped by operator".to_string())
                    .await;
                Ok(())
            }
            _ => Err(self.reject("stop_mission")),
        }
    }

    /// Freeze the machine.  Pausing while paused is a no-op.
    pub fn pause(&mut self) -> Result<(), KrishiError> {
        match self.state {
            MissionState::Paused => Ok(()),
            MissionState::EmergencyStopped | MissionState::ManualControl => Err(self.reject("pause")),
            state => {
                self.paused_from = Some(state);
                self.message = format!("Paused during {state}");
                self.transition(MissionState::Paused);
                Ok(())
            }
        }
    }

    /// Return to exactly the state `pause` froze.
    pub fn resume(&mut self) -> Result<(), KrishiError> {
        if self.state != MissionState::Paused {
            return Err(self.reject("resume"));
        }
        let Some(previous) = self.paused_from.take() else {
            return Err(self.reject("resume"));
        };
        self.message = match &self.mission {
            Some(m) if previous.is_running() => format!("Mission {} running", m.id),
            _ => "Resumed".to_string(),
        };
        self.transition(previous);
        Ok(())
    }

    /// Toggle MANUAL_CONTROL.  Entering it aborts any mission; leaving it
    /// returns to IDLE.
    pub async fn set_manual_mode(&mut self) -> Result<(), KrishiError> {
        match self.state {
            MissionState::EmergencyStopped => Err(self.reject("set_manual_mode")),
            MissionState::ManualControl => {
                self.gate.send_best_effort(Endpoint::Motion, Command::Stop).await;
                self.message = "Manual control released".to_string();
                self.transition(MissionState::Idle);
                Ok(())
            }
            _ => {
                if self.aggregator.is_active() {
                    self.finish_session(SessionEnd::ManualOverride);
                }
                self.clear_mission();
                self.gate.send_best_effort(Endpoint::Motion, Command::Stop).await;
                self.message = "Manual control".to_string();
                self.transition(MissionState::ManualControl);
                Ok(())
            }
        }
    }

    /// Latch every endpoint and enter EMERGENCY_STOPPED.  The transition
    /// commits immediately; STOP delivery happens on a detached task so a
    /// dropped step cannot cancel it.
    pub fn emergency_stop(&mut self, reason: &str) {
        self.gate.latch().trigger();
        if self.state == MissionState::EmergencyStopped {
            return;
        }
        error!(reason, state = %self.state, "emergency stop");
        if self.aggregator.is_active() {
            self.finish_session(SessionEnd::EmergencyStop);
        }
        self.clear_mission();
        self.board.set_capture_phase(None);
        self.message = format!("EMERGENCY STOP: {reason}");
        self.transition(MissionState::EmergencyStopped);
        self.bus.publish_to(
            Topic::Alerts,
            MissionEvent::new(
                SOURCE,
                EventPayload::Alert {
                    level: krishi_types::AlertLevel::Critical,
                    message: self.message.clone(),
                },
            ),
        );

        let gate = self.gate.clone();
        tokio::spawn(async move {
            gate.link().stop_all().await;
            if let Err(e) = gate
                .endpoint(Endpoint::Sensing)
                .send(&Command::Indicate(Indication::Error))
                .await
            {
                debug!(error = %e, "error indication not delivered");
            }
        });
    }

    /// React to a latch engaged elsewhere (signal handler, cockpit).
    pub fn latched(&mut self) {
        if self.state != MissionState::EmergencyStopped {
            self.emergency_stop("emergency latch engaged");
        }
        self.publish();
    }

    /// Leave EMERGENCY_STOPPED (or MANUAL_CONTROL) for IDLE.
    pub fn reset(&mut self) -> Result<(), KrishiError> {
        match self.state {
            MissionState::EmergencyStopped | MissionState::ManualControl => {
                self.gate.reset();
                self.message = "Ready".to_string();
                self.transition(MissionState::Idle);
                Ok(())
            }
            _ => Err(self.reject("reset")),
        }
    }

    // ── Manual primitives ───────────────────────────────────────────────────

    fn require_manual(&self) -> Result<(), KrishiError> {
        if self.state == MissionState::ManualControl {
            Ok(())
        } else {
            Err(KrishiError::ManualModeRequired)
        }
    }

    pub async fn manual_move(&mut self, direction: MoveDirection, speed: Option<u8>) -> Result<(), KrishiError> {
        self.require_manual()?;
        let nav = &self.config.navigation;
        let straight = i16::from(speed.unwrap_or(nav.manual_speed));
        let turn = i16::from(speed.unwrap_or(nav.manual_turn_speed));
        let command = match direction {
            MoveDirection::Forward => Command::Move { left: straight, right: straight },
            MoveDirection::Backward => Command::Move { left: -straight, right: -straight },
            MoveDirection::Left => Command::Move { left: -turn, right: turn },
            MoveDirection::Right => Command::Move { left: turn, right: -turn },
            MoveDirection::Stop => Command::Stop,
        };
        self.gate.send(Endpoint::Motion, command).await
    }

    pub async fn manual_servo(&mut self, servo: ServoName, angle: u8) -> Result<(), KrishiError> {
        self.require_manual()?;
        let command = match servo {
            ServoName::Pan => Command::Pan(angle),
            ServoName::Tilt => Command::Tilt(angle),
            ServoName::Pipe => Command::Pipe(angle),
        };
        self.gate.send(Endpoint::Sensing, command).await
    }

    pub async fn manual_pump(&mut self, tank: u8, on: bool) -> Result<(), KrishiError> {
        self.require_manual()?;
        self.gate.send(Endpoint::Motion, Command::Pump { tank, on }).await
    }

    // ── Autonomous steps ────────────────────────────────────────────────────

    /// Advance the mission by one discrete step.  A no-op outside the
    /// running states.
    pub async fn tick(&mut self) {
        let result = match self.state {
            MissionState::ExecutingRow => self.step_row().await,
            MissionState::Analyzing => self.analyze().await,
            MissionState::Treating => self.treat().await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            self.fault(e).await;
        }
        self.publish();
    }

    fn cursor(&self) -> Result<Cursor, KrishiError> {
        self.mission
            .as_ref()
            .map(|m| m.cursor)
            .ok_or_else(|| self.reject("tick"))
    }

    fn set_cursor(&mut self, cursor: Cursor) {
        if let Some(m) = self.mission.as_mut() {
            m.cursor = cursor;
        }
    }

    #[instrument(skip(self))]
    async fn step_row(&mut self) -> Result<(), KrishiError> {
        match self.cursor()? {
            Cursor::RowStart => {
                self.gate
                    .send(Endpoint::Sensing, Command::Pan(self.config.capture.pan_row))
                    .await?;
                sleep(self.config.capture.settle()).await;
                self.set_cursor(Cursor::Stop);
            }
            Cursor::Travel { remaining_cm } => {
                let travel = self.navigator.advance(&self.gate, remaining_cm).await?;
                let Some(m) = self.mission.as_mut() else {
                    return Ok(());
                };
                m.progress.distance_in_row_cm += travel.travelled_cm;
                match travel.arrival {
                    Arrival::Arrived => {
                        m.progress.blocked = false;
                        m.cursor = Cursor::Stop;
                        self.message = format!("Mission {} running", m.id);
                    }
                    Arrival::Blocked => {
                        m.progress.blocked = true;
                        m.cursor = Cursor::Travel {
                            remaining_cm: (remaining_cm - travel.travelled_cm).max(0.0),
                        };
                        self.message = "Path blocked; waiting for clearance".to_string();
                        self.publish();
                        sleep(self.config.link.poll_interval()).await;
                    }
                }
            }
            Cursor::Stop => self.transition(MissionState::Analyzing),
            Cursor::RowChange(leg) => {
                let next = self.navigator.change_row(&self.gate, leg).await?;
                let stalled = matches!(
                    (leg, next),
                    (RowChange::Cross { remaining_cm: a, .. }, RowChange::Cross { remaining_cm: b, .. }) if a == b
                );
                let Some(m) = self.mission.as_mut() else {
                    return Ok(());
                };
                m.progress.blocked = stalled;
                if next == RowChange::Done {
                    m.progress.row_index += 1;
                    m.progress.distance_in_row_cm = 0.0;
                    m.progress.stops_in_row = 0;
                    m.progress.empty_scan_streak = 0;
                    m.cursor = Cursor::RowStart;
                    info!(row = m.progress.row_index, "entered next row");
                } else {
                    m.cursor = Cursor::RowChange(next);
                }
                if stalled {
                    sleep(self.config.link.poll_interval()).await;
                }
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn analyze(&mut self) -> Result<(), KrishiError> {
        let Some(m) = self.mission.as_ref() else {
            return Err(self.reject("tick"));
        };
        let id = m.id.clone();
        let row_index = m.progress.row_index;
        let plant_number = m.progress.plants_scanned + 1;

        self.gate
            .send(Endpoint::Sensing, Command::Indicate(Indication::Working))
            .await?;
        let board = self.board.clone();
        let scan = self
            .sequencer
            .scan_stop(&self.gate, Some(&id), plant_number, move |phase| {
                board.set_capture_phase(Some(phase))
            })
            .await;
        self.board.set_capture_phase(None);
        let scan = scan?;

        let qualifying: Vec<String> = self
            .planner
            .qualifying(&scan.merged)
            .into_iter()
            .map(str::to_string)
            .collect();
        let empty = scan.merged.is_empty();
        let plant = PendingPlant {
            plant_number,
            row_index,
            scan,
            qualifying,
            scanned_at: Utc::now(),
        };

        if plant.qualifying.is_empty() {
            self.record_plant(plant, TreatmentOutcome::SkippedHealthy);
            self.transition(MissionState::ExecutingRow);
            self.after_stop(empty).await
        } else {
            info!(plant_number, classes = ?plant.qualifying, "treatment required");
            self.pending = Some(plant);
            self.transition(MissionState::Treating);
            Ok(())
        }
    }

    #[instrument(skip(self))]
    async fn treat(&mut self) -> Result<(), KrishiError> {
        let Some(plant) = self.pending.take() else {
            self.transition(MissionState::ExecutingRow);
            return Ok(());
        };
        // Gating reads the freshest cached snapshot, never a new sample.
        let snapshot = self.sensors.borrow().clone();
        let plan = self.planner.plan(&plant.scan.merged, &snapshot);
        let executed = self.planner.execute(&self.gate, plan).await;
        self.record_plant(plant, executed.outcome);
        if let Some(fault) = executed.fault {
            return Err(fault);
        }
        self.transition(MissionState::ExecutingRow);
        self.after_stop(false).await
    }

    fn record_plant(&mut self, plant: PendingPlant, outcome: TreatmentOutcome) {
        let Some(m) = self.mission.as_mut() else {
            return;
        };
        m.progress.plants_scanned += 1;
        if outcome.dispensed() {
            m.progress.plants_treated += 1;
        }
        let images: BTreeMap<_, _> = plant
            .scan
            .angles
            .iter()
            .filter_map(|a| a.image_ref.clone().map(|r| (a.phase, r)))
            .collect();
        info!(
            plant = plant.plant_number,
            outcome = outcome.label(),
            "plant recorded"
        );
        self.bus.publish_to(
            Topic::Diagnosis,
            MissionEvent::new(
                SOURCE,
                EventPayload::PlantAnalyzed {
                    plant_number: plant.plant_number,
                    classes: plant.qualifying.clone(),
                    outcome: outcome.label().to_string(),
                },
            ),
        );
        let counted: Vec<&str> = plant.qualifying.iter().map(String::as_str).collect();
        let record = PlantRecord {
            plant_number: plant.plant_number,
            row_index: plant.row_index,
            merged: plant.scan.merged.clone(),
            angles: plant.scan.angles.clone(),
            outcome,
            images,
            scanned_at: plant.scanned_at,
        };
        self.aggregator.record_plant(record, &counted);
    }

    /// Decide what follows a finished stop: the next step, a row change or
    /// mission completion.
    async fn after_stop(&mut self, empty_scan: bool) -> Result<(), KrishiError> {
        let cm_per_edge = self.navigator.cm_per_edge();
        let side_cm = self.sensors.borrow().side_or_max();
        let nav = &self.config.navigation;
        let Some(m) = self.mission.as_mut() else {
            return Ok(());
        };
        m.progress.stops_in_row += 1;
        m.progress.empty_scan_streak = if empty_scan { m.progress.empty_scan_streak + 1 } else { 0 };

        let row_index = m.progress.row_index;
        let Some(row) = m.plan.row(row_index) else {
            return Err(KrishiError::InvalidPlan(format!("row {} missing from plan", row_index + 1)));
        };
        let row_done = match row {
            RowSpec::Individual(r) => m.progress.stops_in_row >= r.plant_count,
            RowSpec::Continuous(r) => match r.row_length_cm {
                Some(length) => length - m.progress.distance_in_row_cm < cm_per_edge,
                None => {
                    side_cm > nav.end_of_row_side_cm
                        && m.progress.empty_scan_streak >= nav.end_of_row_empty_scans
                }
            },
        };
        if !row_done {
            m.cursor = Cursor::Travel {
                remaining_cm: row.step_cm(),
            };
            return Ok(());
        }

        let last_row = row_index + 1 >= m.plan.row_count();
        let inter_row_cm = m.plan.inter_row_cm().unwrap_or(0.0);
        info!(row = row_index, last_row, "row finished");
        self.gate
            .send(Endpoint::Sensing, Command::Pan(self.config.capture.pan_straight))
            .await?;
        if last_row {
            self.complete().await;
        } else {
            self.set_cursor(Cursor::RowChange(RowChange::begin(
                Turn::after_row(row_index),
                inter_row_cm,
            )));
        }
        Ok(())
    }

    async fn complete(&mut self) {
        self.gate
            .send_best_effort(Endpoint::Sensing, Command::Indicate(Indication::Success))
            .await;
        let (scanned, treated) = self
            .mission
            .as_ref()
            .map(|m| (m.progress.plants_scanned, m.progress.plants_treated))
            .unwrap_or_default();
        self.finish_session(SessionEnd::Completed);
        self.clear_mission();
        self.message = format!("Mission complete: {scanned} plants scanned, {treated} treated");
        self.transition(MissionState::Idle);
    }

    async fn abort(&mut self, end: SessionEnd, message: String) {
        self.gate.send_best_effort(Endpoint::Motion, Command::Stop).await;
        if self.aggregator.is_active() {
            self.finish_session(end);
        }
        self.clear_mission();
        self.board.set_capture_phase(None);
        self.message = message;
        self.transition(MissionState::Idle);
    }

    async fn fault(&mut self, e: KrishiError) {
        if e.is_escalation() || self.gate.latch().is_engaged() {
            self.emergency_stop(&e.to_string());
        } else {
            error!(error = %e, state = %self.state, "mission step failed; aborting");
            self.abort(SessionEnd::Stopped, format!("ERROR: {e}")).await;
        }
    }

    fn finish_session(&mut self, end: SessionEnd) {
        if let Some(handle) = self.aggregator.finish(end) {
            self.last_flush = Some(handle);
        }
    }

    fn clear_mission(&mut self) {
        self.mission = None;
        self.pending = None;
        self.paused_from = None;
    }
}
