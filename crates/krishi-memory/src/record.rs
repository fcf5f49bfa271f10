//! Records written to the durable sink.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use krishi_types::{CapturePhase, SessionTally};
use serde::{Deserialize, Serialize};

/// One (class, confidence) result at one angle of one plant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub mission_id: String,
    pub plant_number: u32,
    pub scan_angle: CapturePhase,
    pub disease_class: String,
    pub confidence: f32,
    pub image_ref: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    Completed,
    Stopped,
    ManualOverride,
    EmergencyStop,
}

impl SessionEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEnd::Completed => "completed",
            SessionEnd::Stopped => "stopped",
            SessionEnd::ManualOverride => "manual_override",
            SessionEnd::EmergencyStop => "emergency_stop",
        }
    }
}

/// Session-level statistics computed at mission completion or abort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub mission_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub end: SessionEnd,
    pub plants_scanned: u32,
    pub plants_treated: u32,
    pub class_totals: SessionTally,
    /// Plant count per treatment-outcome label.
    pub outcome_totals: BTreeMap<String, u32>,
}

impl SessionSummary {
    pub fn elapsed_secs(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// Explicit record that data was dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningRecord {
    pub mission_id: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
