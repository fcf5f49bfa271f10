//! Runtime tunables.
//!
//! Every field carries a serde default, so a partial TOML table (or none at
//! all) yields the deployed robot's values.
//!
//! ```rust
//! use krishi_runtime::config::MissionConfig;
//!
//! let config = MissionConfig::default();
//! assert_eq!(config.navigation.cm_per_edge(), 1.1);
//! assert_eq!(config.treatment.base_duration_ms(), 4000);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use krishi_link::RetryPolicy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    pub link: LinkConfig,
    pub navigation: NavigationConfig,
    pub capture: CaptureConfig,
    pub inference: InferenceConfig,
    pub treatment: TreatmentConfig,
    pub telemetry: TelemetryConfig,
}

// ─────────────────────────────────────────────────────────────────────────────
// Link
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub ack_timeout_ms: u64,
    pub max_attempts: u32,
    pub poll_interval_ms: u64,
    /// How long one `get_data` poll may wait for its report.
    pub poll_timeout_ms: u64,
    /// A sensor feed with no report for this long is flagged stale.
    pub feed_deadline_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 2000,
            max_attempts: 3,
            poll_interval_ms: 200,
            poll_timeout_ms: 500,
            feed_deadline_ms: 3000,
        }
    }
}

impl LinkConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            max_attempts: self.max_attempts.max(1),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn feed_deadline(&self) -> Duration {
        Duration::from_millis(self.feed_deadline_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Navigation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    pub wheel_circumference_cm: f32,
    pub edges_per_rotation: u32,
    pub autonomous_speed: i16,
    pub manual_speed: u8,
    pub manual_turn_speed: u8,
    /// Forward clearance below which travel halts.
    pub front_safety_cm: f32,
    pub side_target_cm: f32,
    pub side_tolerance_cm: f32,
    /// Differential PWM per centimetre of side error.
    pub drift_gain: f32,
    pub max_drift_correction: i16,
    pub step_timeout_ms: u64,
    pub end_of_row_side_cm: f32,
    pub end_of_row_empty_scans: u32,
    pub pivot_ms: u64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            wheel_circumference_cm: 22.0,
            edges_per_rotation: 20,
            autonomous_speed: 210,
            manual_speed: 200,
            manual_turn_speed: 180,
            front_safety_cm: 25.0,
            side_target_cm: 20.0,
            side_tolerance_cm: 5.0,
            drift_gain: 4.0,
            max_drift_correction: 80,
            step_timeout_ms: 20_000,
            end_of_row_side_cm: 30.0,
            end_of_row_empty_scans: 3,
            pivot_ms: 1200,
        }
    }
}

impl NavigationConfig {
    pub fn cm_per_edge(&self) -> f32 {
        self.wheel_circumference_cm / self.edges_per_rotation.max(1) as f32
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capture
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub pan_straight: u8,
    /// Pan angle facing the crop row.
    pub pan_row: u8,
    pub tilt_top: u8,
    pub tilt_middle: u8,
    pub tilt_bottom: u8,
    pub settle_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            pan_straight: 90,
            pan_row: 150,
            tilt_top: 75,
            tilt_middle: 90,
            tilt_bottom: 120,
            settle_ms: 500,
        }
    }
}

impl CaptureConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inference
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub url: String,
    pub timeout_ms: u64,
    /// A merged detection must exceed this to count.
    pub confidence_threshold: f32,
    pub healthy_classes: Vec<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8500/detect".to_string(),
            timeout_ms: 5000,
            confidence_threshold: 0.55,
            healthy_classes: vec!["Healthy".to_string()],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Treatment
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentCategory {
    Nutrient,
    Pesticide,
    Water,
}

/// How a dose is released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispenseMethod {
    /// PUMP on, wait, PUMP off, timed here.
    #[default]
    Pump,
    /// One SPRAY command, timed by the endpoint.
    Spray,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentGroup {
    pub name: String,
    pub category: TreatmentCategory,
    pub tank: u8,
    pub classes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreatmentConfig {
    pub humidity_gate_pct: f32,
    pub hot_threshold_c: f32,
    pub hot_scale: f32,
    pub flow_ml_per_s: f32,
    pub base_volume_ml: f32,
    pub min_volume_ml: f32,
    pub method: DispenseMethod,
    pub groups: Vec<TreatmentGroup>,
}

impl Default for TreatmentConfig {
    fn default() -> Self {
        let group = |name: &str, category, tank, classes: &[&str]| TreatmentGroup {
            name: name.to_string(),
            category,
            tank,
            classes: classes.iter().map(|c| c.to_string()).collect(),
        };
        Self {
            humidity_gate_pct: 85.0,
            hot_threshold_c: 35.0,
            hot_scale: 0.75,
            flow_ml_per_s: 5.0,
            base_volume_ml: 20.0,
            min_volume_ml: 1.0,
            method: DispenseMethod::Pump,
            groups: vec![
                group(
                    "Fungal Disease Control",
                    TreatmentCategory::Pesticide,
                    1,
                    &["Fungal_Blight", "Rust_Mildew", "Leaf_Spot", "Rust_Scab_Rot"],
                ),
                group(
                    "Bacterial & Pest Control",
                    TreatmentCategory::Pesticide,
                    2,
                    &["Bacterial_Blight_Spot", "Viral_Curl_Mosaic", "Pest_Damage", "Wilt_Rot"],
                ),
                group(
                    "Nutrient & Growth Support",
                    TreatmentCategory::Nutrient,
                    3,
                    &["Nutrient_Deficiency", "Discoloration_Stress", "Physiological_Stress"],
                ),
            ],
        }
    }
}

impl TreatmentConfig {
    pub fn duration_ms(&self, volume_ml: f32) -> u64 {
        if self.flow_ml_per_s <= 0.0 {
            return 0;
        }
        (volume_ml / self.flow_ml_per_s * 1000.0).round().max(0.0) as u64
    }

    pub fn base_duration_ms(&self) -> u64 {
        self.duration_ms(self.base_volume_ml)
    }

    pub fn group_for(&self, class_name: &str) -> Option<&TreatmentGroup> {
        self.groups
            .iter()
            .find(|g| g.classes.iter().any(|c| c == class_name))
    }

    pub fn tanks(&self) -> Vec<u8> {
        let mut tanks: Vec<u8> = self.groups.iter().map(|g| g.tank).collect();
        tanks.sort_unstable();
        tanks.dedup();
        tanks
    }

    /// Longest dispense the verifier should ever allow.
    pub fn max_dispense_ms(&self) -> u64 {
        self.base_duration_ms().max(1)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Telemetry
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub flush_attempts: u32,
    pub flush_backoff_ms: u64,
    /// Where frames with detections are archived.
    pub image_dir: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            flush_attempts: 3,
            flush_backoff_ms: 250,
            image_dir: PathBuf::from("captures"),
        }
    }
}
