//! [`SessionAggregator`] – per-mission telemetry.
//!
//! Owns the [`SessionTally`] and the plant log (newest first) for the active
//! mission.  At mission end it builds one [`SessionSummary`] and one
//! [`DetectionEvent`] per (plant, angle, detection), then hands them to the
//! durable sink on a background task.  A failing sink is retried a bounded
//! number of times; if every attempt fails the data is dropped and a
//! [`WarningRecord`] is written in its place.  Returning to IDLE never waits
//! on the sink.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use krishi_memory::{DetectionEvent, DetectionSink, SessionEnd, SessionSummary, WarningRecord};
use krishi_types::{PlantLog, PlantRecord, SessionTally};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};
use tracing::{error, info, warn};

use crate::config::TelemetryConfig;

/// How the background flush ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Written { attempts: u32 },
    /// Every attempt failed; a warning record was written instead.
    Dropped,
    /// Every attempt failed and even the warning could not be written.
    Lost,
}

struct ActiveSession {
    mission_id: String,
    started_at: DateTime<Utc>,
}

pub struct SessionAggregator {
    sink: Option<Arc<dyn DetectionSink>>,
    attempts: u32,
    backoff: Duration,
    active: Option<ActiveSession>,
    tally: SessionTally,
    log: PlantLog,
}

impl SessionAggregator {
    pub fn new(sink: Option<Arc<dyn DetectionSink>>, config: &TelemetryConfig) -> Self {
        Self {
            sink,
            attempts: config.flush_attempts.max(1),
            backoff: Duration::from_millis(config.flush_backoff_ms),
            active: None,
            tally: SessionTally::default(),
            log: PlantLog::default(),
        }
    }

    /// Open a session, clearing the previous session's tally and log.
    pub fn begin(&mut self, mission_id: &str, started_at: DateTime<Utc>) {
        self.active = Some(ActiveSession {
            mission_id: mission_id.to_string(),
            started_at,
        });
        self.tally = SessionTally::default();
        self.log = PlantLog::default();
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Count `counted` classes and put `record` at the head of the log.
    pub fn record_plant(&mut self, record: PlantRecord, counted: &[&str]) {
        for class in counted {
            self.tally.increment(class);
        }
        // Copies only pointers when a published snapshot still holds the log.
        Arc::make_mut(&mut self.log).push_front(Arc::new(record));
    }

    pub fn tally(&self) -> &SessionTally {
        &self.tally
    }

    /// Newest first.
    pub fn plant_log(&self) -> &PlantLog {
        &self.log
    }

    pub fn summary(&self, end: SessionEnd, ended_at: DateTime<Utc>) -> Option<SessionSummary> {
        let active = self.active.as_ref()?;
        let mut outcome_totals = BTreeMap::new();
        for record in self.log.iter() {
            *outcome_totals.entry(record.outcome.label().to_string()).or_insert(0) += 1;
        }
        Some(SessionSummary {
            mission_id: active.mission_id.clone(),
            started_at: active.started_at,
            ended_at,
            end,
            plants_scanned: self.log.len() as u32,
            plants_treated: self.log.iter().filter(|r| r.outcome.dispensed()).count() as u32,
            class_totals: self.tally.clone(),
            outcome_totals,
        })
    }

    /// One event per individual detection, oldest plant first.
    pub fn detection_events(&self) -> Vec<DetectionEvent> {
        let Some(active) = &self.active else {
            return Vec::new();
        };
        self.log
            .iter()
            .rev()
            .flat_map(|record| {
                record.angles.iter().flat_map(move |angle| {
                    angle.detections.iter().map(move |d| DetectionEvent {
                        mission_id: active.mission_id.clone(),
                        plant_number: record.plant_number,
                        scan_angle: angle.phase,
                        disease_class: d.class_name.clone(),
                        confidence: d.confidence,
                        image_ref: angle.image_ref.clone(),
                        timestamp: record.scanned_at,
                    })
                })
            })
            .collect()
    }

    /// Close the session and flush it in the background.  The tally and log
    /// stay readable until the next [`begin`](Self::begin).
    pub fn finish(&mut self, end: SessionEnd) -> Option<JoinHandle<FlushOutcome>> {
        let summary = self.summary(end, Utc::now())?;
        let events = self.detection_events();
        self.active = None;
        info!(
            mission_id = %summary.mission_id,
            end = end.as_str(),
            plants = summary.plants_scanned,
            treated = summary.plants_treated,
            "session closed"
        );

        let Some(sink) = self.sink.clone() else {
            warn!(mission_id = %summary.mission_id, "no detection sink configured; session not persisted");
            return None;
        };
        Some(tokio::spawn(flush(sink, summary, events, self.attempts, self.backoff)))
    }
}

async fn flush(
    sink: Arc<dyn DetectionSink>,
    summary: SessionSummary,
    events: Vec<DetectionEvent>,
    attempts: u32,
    backoff: Duration,
) -> FlushOutcome {
    let summary = Arc::new(summary);
    let events = Arc::new(events);

    for attempt in 1..=attempts {
        let (s, sm, ev) = (sink.clone(), summary.clone(), events.clone());
        let result = tokio::task::spawn_blocking(move || s.write_session(&sm, &ev)).await;
        match result {
            Ok(Ok(())) => return FlushOutcome::Written { attempts: attempt },
            Ok(Err(e)) => warn!(attempt, attempts, error = %e, "session write failed"),
            Err(e) => warn!(attempt, attempts, error = %e, "session write task failed"),
        }
        if attempt < attempts {
            sleep(backoff).await;
        }
    }

    let warning = WarningRecord {
        mission_id: Some(summary.mission_id.clone()),
        message: format!(
            "session {} dropped after {attempts} failed writes ({} detection events lost)",
            summary.mission_id,
            events.len()
        ),
        timestamp: Utc::now(),
    };
    error!(mission_id = %summary.mission_id, "{}", warning.message);
    let s = sink.clone();
    match tokio::task::spawn_blocking(move || s.record_warning(&warning)).await {
        Ok(Ok(())) => FlushOutcome::Dropped,
        _ => FlushOutcome::Lost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krishi_memory::{SqliteDetectionStore, StoreError};
    use krishi_types::{AngleDetections, CapturePhase, Detection, MergedDetections, TreatmentOutcome};
    use std::sync::Mutex;

    fn record(n: u32, outcome: TreatmentOutcome, detections: Vec<Detection>) -> PlantRecord {
        let angles = vec![AngleDetections {
            phase: CapturePhase::Bottom,
            detections,
            image_ref: Some(format!("p{n}.jpg")),
        }];
        PlantRecord {
            plant_number: n,
            row_index: 0,
            merged: MergedDetections::merge(&angles),
            angles,
            outcome,
            images: BTreeMap::new(),
            scanned_at: Utc::now(),
        }
    }

    fn config() -> TelemetryConfig {
        TelemetryConfig {
            flush_backoff_ms: 1,
            ..TelemetryConfig::default()
        }
    }

    /// Fails every session write; remembers warnings.
    #[derive(Default)]
    struct BrokenSink {
        writes: Mutex<u32>,
        warnings: Mutex<Vec<String>>,
    }

    impl DetectionSink for BrokenSink {
        fn write_session(&self, _: &SessionSummary, _: &[DetectionEvent]) -> Result<(), StoreError> {
            *self.writes.lock().unwrap() += 1;
            Err(StoreError::Poisoned)
        }

        fn record_warning(&self, warning: &WarningRecord) -> Result<(), StoreError> {
            self.warnings.lock().unwrap().push(warning.message.clone());
            Ok(())
        }
    }

    #[test]
    fn log_is_newest_first_and_tally_counts() {
        let mut agg = SessionAggregator::new(None, &config());
        agg.begin("M", Utc::now());
        agg.record_plant(record(1, TreatmentOutcome::SkippedHealthy, vec![]), &[]);
        agg.record_plant(
            record(2, TreatmentOutcome::GatedHumidity { humidity_pct: Some(90.0) }, vec![
                Detection::new("Leaf_Spot", 0.9),
            ]),
            &["Leaf_Spot"],
        );
        agg.record_plant(record(3, TreatmentOutcome::SkippedHealthy, vec![]), &[]);

        let numbers: Vec<u32> = agg.plant_log().iter().map(|p| p.plant_number).collect();
        assert_eq!(numbers, vec![3, 2, 1]);
        assert_eq!(agg.tally().get("Leaf_Spot"), 1);
    }

    #[test]
    fn published_log_is_shared_not_copied() {
        let mut agg = SessionAggregator::new(None, &config());
        agg.begin("M", Utc::now());
        agg.record_plant(record(1, TreatmentOutcome::SkippedHealthy, vec![]), &[]);
        let published = Arc::clone(agg.plant_log());

        agg.record_plant(record(2, TreatmentOutcome::SkippedHealthy, vec![]), &[]);
        assert_eq!(published.len(), 1);
        assert_eq!(agg.plant_log().len(), 2);
        assert!(Arc::ptr_eq(&published[0], &agg.plant_log()[1]));

        agg.begin("N", Utc::now());
        assert!(agg.plant_log().is_empty());
        assert_eq!(published.len(), 1);
    }

    #[test]
    fn summary_counts_only_dispensed_as_treated() {
        let mut agg = SessionAggregator::new(None, &config());
        agg.begin("M", Utc::now());
        let dose = krishi_types::Dose {
            category: "Fungal Disease Control".into(),
            tank: 1,
            duration_ms: 100,
        };
        agg.record_plant(
            record(1, TreatmentOutcome::FullDose { doses: vec![dose], skipped: vec![] }, vec![]),
            &[],
        );
        agg.record_plant(record(2, TreatmentOutcome::GatedHumidity { humidity_pct: None }, vec![]), &[]);
        agg.record_plant(
            record(3, TreatmentOutcome::Reduced { doses: vec![], skipped: vec!["x".into()] }, vec![]),
            &[],
        );

        let s = agg.summary(SessionEnd::Completed, Utc::now()).unwrap();
        assert_eq!(s.plants_scanned, 3);
        assert_eq!(s.plants_treated, 1);
        assert_eq!(s.outcome_totals.get("gated_humidity"), Some(&1));
    }

    #[test]
    fn one_event_per_detection() {
        let mut agg = SessionAggregator::new(None, &config());
        agg.begin("M", Utc::now());
        agg.record_plant(
            record(1, TreatmentOutcome::SkippedHealthy, vec![
                Detection::new("Healthy", 0.9),
                Detection::new("Leaf_Spot", 0.3),
            ]),
            &[],
        );
        agg.record_plant(record(2, TreatmentOutcome::SkippedHealthy, vec![]), &[]);
        let events = agg.detection_events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.plant_number == 1 && e.scan_angle == CapturePhase::Bottom));
        assert_eq!(events[0].image_ref.as_deref(), Some("p1.jpg"));
    }

    #[tokio::test]
    async fn finish_persists_to_store() {
        let store = Arc::new(SqliteDetectionStore::open_in_memory().unwrap());
        let mut agg = SessionAggregator::new(Some(store.clone()), &config());
        agg.begin("KR-MSN-T", Utc::now());
        agg.record_plant(
            record(1, TreatmentOutcome::SkippedHealthy, vec![Detection::new("Rust_Mildew", 0.4)]),
            &[],
        );
        let outcome = agg.finish(SessionEnd::Stopped).unwrap().await.unwrap();
        assert_eq!(outcome, FlushOutcome::Written { attempts: 1 });
        assert!(!agg.is_active());
        assert_eq!(agg.plant_log().len(), 1);
        assert_eq!(store.mission_events("KR-MSN-T").unwrap().len(), 1);
        let summary = store.session_summary("KR-MSN-T").unwrap().unwrap();
        assert_eq!(summary.end, SessionEnd::Stopped);
    }

    #[tokio::test]
    async fn failing_sink_is_retried_then_warned() {
        let sink = Arc::new(BrokenSink::default());
        let mut agg = SessionAggregator::new(Some(sink.clone()), &config());
        agg.begin("M", Utc::now());
        let outcome = agg.finish(SessionEnd::Completed).unwrap().await.unwrap();
        assert_eq!(outcome, FlushOutcome::Dropped);
        assert_eq!(*sink.writes.lock().unwrap(), 3);
        assert_eq!(sink.warnings.lock().unwrap().len(), 1);
    }

    #[test]
    fn finish_without_session_is_noop() {
        let mut agg = SessionAggregator::new(None, &config());
        assert!(agg.finish(SessionEnd::Completed).is_none());
    }
}
