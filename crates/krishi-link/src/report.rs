//! Interpretation of `DATA:SENSORS` reports.
//!
//! The motion endpoint reports `F` (front cm), `S` (side cm) and `E`
//! (cumulative encoder edges); the sensing endpoint reports `T` (°C) and
//! `H` (% RH).

use std::collections::BTreeMap;

use krishi_types::MAX_RANGE_CM;

/// Literal the sensing endpoint sends when its environment sensor fails.
pub const FAILURE_MARKER: &str = "ERR";

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionReport {
    pub front_cm: Option<f32>,
    pub side_cm: Option<f32>,
    pub encoder_edges: Option<u64>,
}

impl MotionReport {
    pub fn from_data(data: &BTreeMap<String, String>) -> Self {
        Self {
            front_cm: data.get("F").and_then(|v| parse_distance(v)),
            side_cm: data.get("S").and_then(|v| parse_distance(v)),
            encoder_edges: data
                .get("E")
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|e| e.is_finite() && *e >= 0.0)
                .map(|e| e as u64),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnvReport {
    pub temperature_c: Option<f32>,
    pub humidity_pct: Option<f32>,
}

impl EnvReport {
    pub fn from_data(data: &BTreeMap<String, String>) -> Self {
        Self {
            temperature_c: data.get("T").and_then(|v| parse_env(v)),
            humidity_pct: data.get("H").and_then(|v| parse_env(v)),
        }
    }
}

/// Zero or negative readings mean "no echo" and read as maximum range.
fn parse_distance(raw: &str) -> Option<f32> {
    let value = raw.parse::<f32>().ok().filter(|v| v.is_finite())?;
    if value <= 0.0 {
        Some(MAX_RANGE_CM)
    } else {
        Some(value.min(MAX_RANGE_CM))
    }
}

fn parse_env(raw: &str) -> Option<f32> {
    if raw.eq_ignore_ascii_case(FAILURE_MARKER) {
        return None;
    }
    raw.parse::<f32>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn zero_distance_reads_as_max_range() {
        let report = MotionReport::from_data(&data(&[("F", "0"), ("S", "22.5"), ("E", "40")]));
        assert_eq!(report.front_cm, Some(MAX_RANGE_CM));
        assert_eq!(report.side_cm, Some(22.5));
        assert_eq!(report.encoder_edges, Some(40));
    }

    #[test]
    fn failure_marker_and_nan_are_unavailable() {
        let report = EnvReport::from_data(&data(&[("T", "ERR"), ("H", "nan")]));
        assert_eq!(report, EnvReport::default());

        let report = EnvReport::from_data(&data(&[("T", "31.5"), ("H", "64")]));
        assert_eq!(report.temperature_c, Some(31.5));
        assert_eq!(report.humidity_pct, Some(64.0));
    }

    #[test]
    fn missing_keys_are_unavailable() {
        assert_eq!(MotionReport::from_data(&BTreeMap::new()), MotionReport::default());
    }
}
