//! Mission lifecycle, capture phases and remote endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level mission lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionState {
    Startup,
    Idle,
    MissionSetup,
    MissionAwaitingStart,
    ExecutingRow,
    Analyzing,
    Treating,
    Paused,
    ManualControl,
    EmergencyStopped,
}

impl MissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionState::Startup => "STARTUP",
            MissionState::Idle => "IDLE",
            MissionState::MissionSetup => "MISSION_SETUP",
            MissionState::MissionAwaitingStart => "MISSION_AWAITING_START",
            MissionState::ExecutingRow => "EXECUTING_ROW",
            MissionState::Analyzing => "ANALYZING",
            MissionState::Treating => "TREATING",
            MissionState::Paused => "PAUSED",
            MissionState::ManualControl => "MANUAL_CONTROL",
            MissionState::EmergencyStopped => "EMERGENCY_STOPPED",
        }
    }

    /// States in which the robot is physically working a row.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            MissionState::ExecutingRow | MissionState::Analyzing | MissionState::Treating
        )
    }
}

impl fmt::Display for MissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the three image-acquisition steps taken at every stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapturePhase {
    Top,
    Middle,
    Bottom,
}

impl CapturePhase {
    /// Acquisition order at every stop.
    pub const SEQUENCE: [CapturePhase; 3] =
        [CapturePhase::Top, CapturePhase::Middle, CapturePhase::Bottom];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapturePhase::Top => "top",
            CapturePhase::Middle => "middle",
            CapturePhase::Bottom => "bottom",
        }
    }
}

impl fmt::Display for CapturePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One addressable remote controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// Drive motors, wheel encoder, ultrasonic sensors and treatment relays.
    Motion,
    /// Pan-tilt servos, pipe servo, environment sensor, indicator and buzzer.
    Sensing,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Motion => f.write_str("motion"),
            Endpoint::Sensing => f.write_str("sensing"),
        }
    }
}

/// Connectivity as last observed by the link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointHealth {
    #[default]
    Unknown,
    Responsive,
    /// The retry bound was exceeded; cleared only by an operator reset.
    Unresponsive,
}

/// Position within the active mission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionProgress {
    /// Zero-based index of the row being worked.
    pub row_index: usize,
    /// Cumulative distance travelled in the current row, in centimetres.
    pub distance_in_row_cm: f32,
    /// Stops completed in the current row.
    pub stops_in_row: u32,
    /// Plants analysed across the whole mission.
    pub plants_scanned: u32,
    /// Plants that actually received a dispense.
    pub plants_treated: u32,
    /// Consecutive stops without any qualifying detection.
    pub empty_scan_streak: u32,
    /// Set while forward clearance is below the safety margin.
    pub blocked: bool,
    pub started_at: Option<DateTime<Utc>>,
}
