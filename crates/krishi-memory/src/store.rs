//! SQLite detection store.
//!
//! # Storage layout
//!
//! | table | one row per |
//! |---|---|
//! | `detections` | detection event: mission, plant, angle, class, confidence, image |
//! | `session_summaries` | finished or aborted mission |
//! | `warnings` | dropped write or other explicit data-loss notice |
//!
//! `detections` is indexed on `(mission_id, timestamp)` for session-scoped
//! retrieval.
//!
//! # Example
//!
//! ```rust
//! use krishi_memory::{DetectionSink, SqliteDetectionStore, WarningRecord};
//!
//! let store = SqliteDetectionStore::open_in_memory().unwrap();
//! store
//!     .record_warning(&WarningRecord {
//!         mission_id: None,
//!         message: "example".into(),
//!         timestamp: chrono::Utc::now(),
//!     })
//!     .unwrap();
//! assert_eq!(store.warnings().unwrap().len(), 1);
//! ```

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use thiserror::Error;
use tracing::debug;

use crate::record::{DetectionEvent, SessionSummary, WarningRecord};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid stored timestamp '{0}'")]
    Timestamp(String),
    #[error("store connection poisoned")]
    Poisoned,
}

// ─────────────────────────────────────────────────────────────────────────────
// Sink trait
// ─────────────────────────────────────────────────────────────────────────────

/// Where session telemetry goes at mission end.
pub trait DetectionSink: Send + Sync {
    /// Persist one summary and all of its detection events atomically.
    fn write_session(
        &self,
        summary: &SessionSummary,
        events: &[DetectionEvent],
    ) -> Result<(), StoreError>;

    fn record_warning(&self, warning: &WarningRecord) -> Result<(), StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteDetectionStore
// ─────────────────────────────────────────────────────────────────────────────

pub struct SqliteDetectionStore {
    conn: Mutex<Connection>,
    healthy_class: String,
}

/// Fixed-width UTC timestamps so text ordering is time ordering.
pub(crate) fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::Timestamp(raw.to_string()))
}

impl SqliteDetectionStore {
    /// Open (or create) a database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Class name that analytics treat as "no disease".  Defaults to
    /// `Healthy`.
    pub fn with_healthy_class(mut self, class: impl Into<String>) -> Self {
        self.healthy_class = class.into();
        self
    }

    pub(crate) fn healthy_class(&self) -> &str {
        &self.healthy_class
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS detections (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                mission_id      TEXT    NOT NULL,
                plant_number    INTEGER NOT NULL,
                scan_angle      TEXT    NOT NULL CHECK (scan_angle IN ('top', 'middle', 'bottom')),
                stress_detected TEXT    NOT NULL,
                confidence      REAL    NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
                image_path      TEXT,
                timestamp       TEXT    NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_detections_mission_time
                ON detections (mission_id, timestamp);
            CREATE TABLE IF NOT EXISTS session_summaries (
                mission_id     TEXT    NOT NULL PRIMARY KEY,
                started_at     TEXT    NOT NULL,
                ended_at       TEXT    NOT NULL,
                end_reason     TEXT    NOT NULL,
                plants_scanned INTEGER NOT NULL,
                plants_treated INTEGER NOT NULL,
                elapsed_secs   REAL    NOT NULL,
                class_totals   TEXT    NOT NULL,
                outcome_totals TEXT    NOT NULL
            );
            CREATE TABLE IF NOT EXISTS warnings (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                mission_id TEXT,
                message    TEXT NOT NULL,
                timestamp  TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            healthy_class: "Healthy".to_string(),
        })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Detection events of one mission, oldest first.
    pub fn mission_events(&self, mission_id: &str) -> Result<Vec<DetectionEvent>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT plant_number, scan_angle, stress_detected, confidence, image_path, timestamp
             FROM detections WHERE mission_id = ?1
             ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![mission_id], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (plant_number, angle, class, confidence, image_ref, at) = row?;
            let scan_angle = serde_json::from_value(serde_json::Value::String(angle))?;
            events.push(DetectionEvent {
                mission_id: mission_id.to_string(),
                plant_number,
                scan_angle,
                disease_class: class,
                confidence: confidence as f32,
                image_ref,
                timestamp: parse_ts(&at)?,
            });
        }
        Ok(events)
    }

    pub fn session_summary(&self, mission_id: &str) -> Result<Option<SessionSummary>, StoreError> {
        use rusqlite::OptionalExtension;
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT started_at, ended_at, end_reason, plants_scanned, plants_treated,
                        class_totals, outcome_totals
                 FROM session_summaries WHERE mission_id = ?1",
                params![mission_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((started, ended, end, scanned, treated, classes, outcomes)) = row else {
            return Ok(None);
        };
        Ok(Some(SessionSummary {
            mission_id: mission_id.to_string(),
            started_at: parse_ts(&started)?,
            ended_at: parse_ts(&ended)?,
            end: serde_json::from_value(serde_json::Value::String(end))?,
            plants_scanned: scanned,
            plants_treated: treated,
            class_totals: serde_json::from_str(&classes)?,
            outcome_totals: serde_json::from_str(&outcomes)?,
        }))
    }

    pub fn warnings(&self) -> Result<Vec<WarningRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT mission_id, message, timestamp FROM warnings ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (mission_id, message, at) = row?;
            out.push(WarningRecord {
                mission_id,
                message,
                timestamp: parse_ts(&at)?,
            });
        }
        Ok(out)
    }
}

impl DetectionSink for SqliteDetectionStore {
    fn write_session(
        &self,
        summary: &SessionSummary,
        events: &[DetectionEvent],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO session_summaries
                 (mission_id, started_at, ended_at, end_reason, plants_scanned,
                  plants_treated, elapsed_secs, class_totals, outcome_totals)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                summary.mission_id,
                ts(&summary.started_at),
                ts(&summary.ended_at),
                summary.end.as_str(),
                summary.plants_scanned,
                summary.plants_treated,
                summary.elapsed_secs(),
                serde_json::to_string(&summary.class_totals)?,
                serde_json::to_string(&summary.outcome_totals)?,
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO detections
                     (mission_id, plant_number, scan_angle, stress_detected, confidence,
                      image_path, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for e in events {
                stmt.execute(params![
                    e.mission_id,
                    e.plant_number,
                    e.scan_angle.as_str(),
                    e.disease_class,
                    f64::from(e.confidence.clamp(0.0, 1.0)),
                    e.image_ref,
                    ts(&e.timestamp),
                ])?;
            }
        }
        tx.commit()?;
        debug!(mission_id = %summary.mission_id, events = events.len(), "session persisted");
        Ok(())
    }

    fn record_warning(&self, warning: &WarningRecord) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO warnings (mission_id, message, timestamp) VALUES (?1, ?2, ?3)",
            params![warning.mission_id, warning.message, ts(&warning.timestamp)],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SessionEnd;
    use chrono::Duration;
    use krishi_types::{CapturePhase, SessionTally};
    use std::collections::BTreeMap;

    fn event(mission: &str, plant: u32, class: &str, at: DateTime<Utc>) -> DetectionEvent {
        DetectionEvent {
            mission_id: mission.to_string(),
            plant_number: plant,
            scan_angle: CapturePhase::Middle,
            disease_class: class.to_string(),
            confidence: 0.8,
            image_ref: None,
            timestamp: at,
        }
    }

    fn summary(mission: &str, scanned: u32, at: DateTime<Utc>) -> SessionSummary {
        let mut tally = SessionTally::default();
        tally.increment("Leaf_Spot");
        SessionSummary {
            mission_id: mission.to_string(),
            started_at: at,
            ended_at: at + Duration::seconds(90),
            end: SessionEnd::Completed,
            plants_scanned: scanned,
            plants_treated: 1,
            class_totals: tally,
            outcome_totals: BTreeMap::from([("full_dose".to_string(), 1)]),
        }
    }

    #[test]
    fn session_roundtrip() {
        let store = SqliteDetectionStore::open_in_memory().unwrap();
        let t0 = Utc::now();
        let events = vec![
            event("KR-MSN-A", 1, "Leaf_Spot", t0),
            DetectionEvent {
                scan_angle: CapturePhase::Bottom,
                image_ref: Some("msn_A_p1_bottom_Leaf_Spot_000000.jpg".into()),
                ..event("KR-MSN-A", 1, "Leaf_Spot", t0 + Duration::seconds(1))
            },
        ];
        store.write_session(&summary("KR-MSN-A", 3, t0), &events).unwrap();

        let back = store.mission_events("KR-MSN-A").unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].scan_angle, CapturePhase::Bottom);
        assert!(back[1].image_ref.is_some());

        let s = store.session_summary("KR-MSN-A").unwrap().unwrap();
        assert_eq!(s.plants_scanned, 3);
        assert_eq!(s.class_totals.get("Leaf_Spot"), 1);
        assert_eq!(s.elapsed_secs(), 90.0);
        assert!(store.session_summary("missing").unwrap().is_none());
    }

    #[test]
    fn events_are_mission_scoped() {
        let store = SqliteDetectionStore::open_in_memory().unwrap();
        let t0 = Utc::now();
        store
            .write_session(&summary("A", 1, t0), &[event("A", 1, "Wilt_Rot", t0)])
            .unwrap();
        store
            .write_session(&summary("B", 1, t0), &[event("B", 1, "Pest_Damage", t0)])
            .unwrap();
        let a = store.mission_events("A").unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].disease_class, "Wilt_Rot");
    }

    #[test]
    fn warnings_are_recorded() {
        let store = SqliteDetectionStore::open_in_memory().unwrap();
        store
            .record_warning(&WarningRecord {
                mission_id: Some("A".into()),
                message: "dropped 4 events".into(),
                timestamp: Utc::now(),
            })
            .unwrap();
        let w = store.warnings().unwrap();
        assert_eq!(w[0].message, "dropped 4 events");
    }

    #[test]
    fn file_backed_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("krishi.db");
        let t0 = Utc::now();
        {
            let store = SqliteDetectionStore::open(&path).unwrap();
            store
                .write_session(&summary("A", 2, t0), &[event("A", 2, "Rust_Mildew", t0)])
                .unwrap();
        }
        let store = SqliteDetectionStore::open(&path).unwrap();
        assert_eq!(store.mission_events("A").unwrap().len(), 1);
    }
}
