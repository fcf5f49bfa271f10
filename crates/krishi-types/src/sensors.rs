use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reported clearance when an ultrasonic sensor returns a zero-equivalent
/// reading (no echo).  A disconnected sensor therefore reads as a clear path.
pub const MAX_RANGE_CM: f32 = 400.0;

/// The most recently cached sensor readings.  Any field may be unavailable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub front_cm: Option<f32>,
    pub side_cm: Option<f32>,
    pub temperature_c: Option<f32>,
    pub humidity_pct: Option<f32>,
    /// Cumulative wheel-encoder edge count since the last `RESET_ENCODER`.
    pub encoder_edges: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SensorSnapshot {
    /// Forward clearance, treating an unavailable reading as maximum range.
    pub fn front_or_max(&self) -> f32 {
        self.front_cm.unwrap_or(MAX_RANGE_CM)
    }

    pub fn side_or_max(&self) -> f32 {
        self.side_cm.unwrap_or(MAX_RANGE_CM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_distances_read_as_max_range() {
        let snap = SensorSnapshot::default();
        assert_eq!(snap.front_or_max(), MAX_RANGE_CM);
        assert_eq!(snap.side_or_max(), MAX_RANGE_CM);
        assert!(snap.humidity_pct.is_none());
    }
}
