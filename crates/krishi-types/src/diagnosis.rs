//! Detections, per-plant diagnoses and treatment outcomes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::state::CapturePhase;

/// A single (class, confidence) result from the inference capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    pub class_name: String,
    /// In `0.0..=1.0`.
    pub confidence: f32,
}

impl Detection {
    pub fn new(class_name: impl Into<String>, confidence: f32) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
        }
    }
}

/// Detections acquired at one capture phase, together with the archived
/// image reference when the frame was saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngleDetections {
    pub phase: CapturePhase,
    pub detections: Vec<Detection>,
    pub image_ref: Option<String>,
}

/// Per-class maximum confidence across all capture phases of one plant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergedDetections(BTreeMap<String, f32>);

impl MergedDetections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the detections of several capture phases, keeping the highest
    /// confidence per class.
    pub fn merge<'a>(angles: impl IntoIterator<Item = &'a AngleDetections>) -> Self {
        let mut merged = Self::new();
        for angle in angles {
            merged.absorb(&angle.detections);
        }
        merged
    }

    pub fn absorb(&mut self, detections: &[Detection]) {
        for d in detections {
            let slot = self.0.entry(d.class_name.clone()).or_insert(d.confidence);
            if d.confidence > *slot {
                *slot = d.confidence;
            }
        }
    }

    pub fn get(&self, class_name: &str) -> Option<f32> {
        self.0.get(class_name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Classes above `threshold` that are not healthy, in class-name order.
    pub fn qualifying(&self, threshold: f32, healthy: &[String]) -> Vec<(&str, f32)> {
        self.iter()
            .filter(|(class, conf)| *conf > threshold && !healthy.iter().any(|h| h == class))
            .collect()
    }
}

/// One category dispensed for a plant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dose {
    /// Treatment group name, e.g. "Fungal Disease Control".
    pub category: String,
    pub tank: u8,
    pub duration_ms: u64,
}

/// What happened to a plant after diagnosis.  Every variant is recorded
/// distinctly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TreatmentOutcome {
    /// No qualifying detection; nothing dispensed.
    SkippedHealthy,
    /// Humidity above the gate, or unavailable (`None`); nothing dispensed.
    GatedHumidity { humidity_pct: Option<f32> },
    /// Hot weather: every duration scaled down.
    Reduced {
        doses: Vec<Dose>,
        /// Categories whose scaled dose did not exceed the minimum volume.
        skipped: Vec<String>,
    },
    FullDose { doses: Vec<Dose>, skipped: Vec<String> },
    /// Qualifying detections whose classes map to no treatment category.
    Unmapped { classes: Vec<String> },
    /// Dispensing stopped part-way; `doses` lists what completed.
    Interrupted { doses: Vec<Dose>, reason: String },
}

impl TreatmentOutcome {
    /// `true` when at least one category was actually dispensed.
    pub fn dispensed(&self) -> bool {
        match self {
            TreatmentOutcome::Reduced { doses, .. }
            | TreatmentOutcome::FullDose { doses, .. }
            | TreatmentOutcome::Interrupted { doses, .. } => !doses.is_empty(),
            _ => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TreatmentOutcome::SkippedHealthy => "skipped_healthy",
            TreatmentOutcome::GatedHumidity { .. } => "gated_humidity",
            TreatmentOutcome::Reduced { .. } => "reduced",
            TreatmentOutcome::FullDose { .. } => "full_dose",
            TreatmentOutcome::Unmapped { .. } => "unmapped",
            TreatmentOutcome::Interrupted { .. } => "interrupted",
        }
    }
}

/// The full record of one analysed plant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantRecord {
    /// 1-based across the whole mission.
    pub plant_number: u32,
    pub row_index: usize,
    pub merged: MergedDetections,
    /// Raw per-angle detections, kept for per-event persistence.
    pub angles: Vec<AngleDetections>,
    pub outcome: TreatmentOutcome,
    pub images: BTreeMap<CapturePhase, String>,
    pub scanned_at: DateTime<Utc>,
}

/// Cumulative detection count per class for the active mission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionTally(BTreeMap<String, u32>);

impl SessionTally {
    pub fn increment(&mut self, class_name: &str) {
        *self.0.entry(class_name.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, class_name: &str) -> u32 {
        self.0.get(class_name).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
