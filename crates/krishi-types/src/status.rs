//! The read-only status snapshot published to operator surfaces.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::diagnosis::{PlantRecord, SessionTally};
use crate::plan::MissionPlan;
use crate::sensors::SensorSnapshot;
use crate::state::{CapturePhase, EndpointHealth, MissionProgress, MissionState};

/// How many plants the dashboard shows from the head of the log.
pub const RECENT_PLANT_WINDOW: usize = 3;

/// Plant records, newest first.  Shared between the aggregator and every
/// published snapshot; a publish clones the outer `Arc` only.
pub type PlantLog = Arc<VecDeque<Arc<PlantRecord>>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkStatus {
    pub motion: EndpointHealth,
    pub sensing: EndpointHealth,
}

/// A complete, immutable view of the orchestrator.  Published whole; readers
/// never see a partially updated value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Monotonic publication counter.
    pub revision: u64,
    pub server_status: LinkStatus,
    pub robot_status: MissionState,
    /// The state a pause will resume into.
    pub paused_from: Option<MissionState>,
    /// Which capture phase is in progress, when analysing.
    pub capture_phase: Option<CapturePhase>,
    pub sensors: SensorSnapshot,
    pub mission_id: Option<String>,
    pub mission_plan: Option<MissionPlan>,
    pub mission_progress: Option<MissionProgress>,
    pub session_tally: SessionTally,
    /// Newest first.
    pub plant_log: PlantLog,
    pub mission_message: String,
}

impl StatusSnapshot {
    pub fn startup() -> Self {
        Self {
            revision: 0,
            server_status: LinkStatus::default(),
            robot_status: MissionState::Startup,
            paused_from: None,
            capture_phase: None,
            sensors: SensorSnapshot::default(),
            mission_id: None,
            mission_plan: None,
            mission_progress: None,
            session_tally: SessionTally::default(),
            plant_log: PlantLog::default(),
            mission_message: "Waiting for controllers".to_string(),
        }
    }

    /// The most recently scanned plants.
    pub fn recent_plants(&self) -> impl ExactSizeIterator<Item = &PlantRecord> {
        self.plant_log.iter().take(RECENT_PLANT_WINDOW).map(|p| &**p)
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::startup()
    }
}
