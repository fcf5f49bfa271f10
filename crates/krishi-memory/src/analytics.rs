//! Read-side queries over the detection store.
//!
//! A "diseased" plant is one with at least one detection whose class is not
//! the store's healthy class.  The health index is the healthy share of
//! scanned plants as a percentage, rounded to one decimal.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::store::{SqliteDetectionStore, StoreError, parse_ts};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassCount {
    pub class_name: String,
    pub count: u32,
}

/// Non-healthy detection count for one (plant, class) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantClassCount {
    pub plant_number: u32,
    pub class_name: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionAnalytics {
    pub mission_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub plants_scanned: u32,
    pub diseased_plants: u32,
    /// All classes, most frequent first.
    pub class_counts: Vec<ClassCount>,
    pub plant_breakdown: Vec<PlantClassCount>,
    pub health_index: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHealth {
    pub mission_id: String,
    /// `YYYY-MM-DD` of the mission's first detection.
    pub date: String,
    pub healthy_plants: u32,
    pub diseased_plants: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallAnalytics {
    pub total_missions: u32,
    pub total_plants_scanned: u32,
    /// Non-healthy detection events across all missions.
    pub total_detections: u32,
    pub health_index: f64,
    /// e.g. `Rust Mildew (40%)`, or `N/A` with no disease on record.
    pub most_frequent_disease: String,
    pub class_counts: Vec<ClassCount>,
    pub sessions: Vec<SessionHealth>,
}

fn health_index(plants: u32, diseased: u32) -> f64 {
    if plants == 0 {
        return 100.0;
    }
    let healthy = plants.saturating_sub(diseased) as f64;
    (healthy / plants as f64 * 1000.0).round() / 10.0
}

impl SqliteDetectionStore {
    /// Mission with the most recent detection, optionally skipping one
    /// (typically the mission currently running).
    pub fn latest_mission_id(&self, exclude: Option<&str>) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        let id = conn
            .query_row(
                "SELECT mission_id FROM detections
                 WHERE (?1 IS NULL OR mission_id != ?1)
                 GROUP BY mission_id ORDER BY MAX(timestamp) DESC LIMIT 1",
                params![exclude],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn mission_analytics(&self, mission_id: &str) -> Result<MissionAnalytics, StoreError> {
        let summary = self.session_summary(mission_id)?;
        let healthy = self.healthy_class().to_string();
        let conn = self.conn()?;

        let (first, last, distinct_plants) = conn.query_row(
            "SELECT MIN(timestamp), MAX(timestamp), COUNT(DISTINCT plant_number)
             FROM detections WHERE mission_id = ?1",
            params![mission_id],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, u32>(2)?,
                ))
            },
        )?;

        let diseased_plants = conn.query_row(
            "SELECT COUNT(DISTINCT plant_number) FROM detections
             WHERE mission_id = ?1 AND stress_detected != ?2",
            params![mission_id, healthy],
            |row| row.get::<_, u32>(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT stress_detected, COUNT(*) AS n FROM detections
             WHERE mission_id = ?1 GROUP BY stress_detected ORDER BY n DESC, stress_detected",
        )?;
        let class_counts = stmt
            .query_map(params![mission_id], |row| {
                Ok(ClassCount {
                    class_name: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT plant_number, stress_detected, COUNT(*) FROM detections
             WHERE mission_id = ?1 AND stress_detected != ?2
             GROUP BY plant_number, stress_detected ORDER BY plant_number, stress_detected",
        )?;
        let plant_breakdown = stmt
            .query_map(params![mission_id, healthy], |row| {
                Ok(PlantClassCount {
                    plant_number: row.get(0)?,
                    class_name: row.get(1)?,
                    count: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        // Plants with no detection at all leave no rows, so the summary's
        // count wins when one exists.
        let plants_scanned = summary
            .as_ref()
            .map(|s| s.plants_scanned.max(distinct_plants))
            .unwrap_or(distinct_plants);
        let started_at = match (&summary, first) {
            (Some(s), _) => Some(s.started_at),
            (None, Some(raw)) => Some(parse_ts(&raw)?),
            (None, None) => None,
        };
        let ended_at = match (&summary, last) {
            (Some(s), _) => Some(s.ended_at),
            (None, Some(raw)) => Some(parse_ts(&raw)?),
            (None, None) => None,
        };

        Ok(MissionAnalytics {
            mission_id: mission_id.to_string(),
            started_at,
            ended_at,
            plants_scanned,
            diseased_plants,
            class_counts,
            plant_breakdown,
            health_index: health_index(plants_scanned, diseased_plants),
        })
    }

    pub fn overall_analytics(&self) -> Result<OverallAnalytics, StoreError> {
        let healthy = self.healthy_class().to_string();
        let conn = self.conn()?;

        let (total_missions, total_plants_scanned, total_detections) = conn.query_row(
            "SELECT COUNT(DISTINCT mission_id),
                    COUNT(DISTINCT mission_id || '-' || plant_number),
                    COALESCE(SUM(CASE WHEN stress_detected != ?1 THEN 1 ELSE 0 END), 0)
             FROM detections",
            params![healthy],
            |row| Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?, row.get::<_, u32>(2)?)),
        )?;

        let diseased = conn.query_row(
            "SELECT COUNT(DISTINCT mission_id || '-' || plant_number) FROM detections
             WHERE stress_detected != ?1",
            params![healthy],
            |row| row.get::<_, u32>(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT stress_detected, COUNT(*) AS n FROM detections
             GROUP BY stress_detected ORDER BY n DESC, stress_detected",
        )?;
        let class_counts = stmt
            .query_map([], |row| {
                Ok(ClassCount {
                    class_name: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "WITH plants AS (
                 SELECT mission_id, plant_number, MIN(DATE(timestamp)) AS day
                 FROM detections GROUP BY mission_id, plant_number
             ),
             sick AS (
                 SELECT DISTINCT mission_id, plant_number FROM detections
                 WHERE stress_detected != ?1
             )
             SELECT p.mission_id, MIN(p.day),
                    COUNT(p.plant_number) - COUNT(s.plant_number),
                    COUNT(s.plant_number)
             FROM plants p
             LEFT JOIN sick s ON p.mission_id = s.mission_id AND p.plant_number = s.plant_number
             GROUP BY p.mission_id ORDER BY MIN(p.day), p.mission_id",
        )?;
        let sessions = stmt
            .query_map(params![healthy], |row| {
                Ok(SessionHealth {
                    mission_id: row.get(0)?,
                    date: row.get(1)?,
                    healthy_plants: row.get(2)?,
                    diseased_plants: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let disease: Vec<&ClassCount> =
            class_counts.iter().filter(|c| c.class_name != healthy).collect();
        let disease_total: u32 = disease.iter().map(|c| c.count).sum();
        let most_frequent_disease = match disease.first() {
            Some(top) if disease_total > 0 => format!(
                "{} ({:.0}%)",
                top.class_name.replace('_', " "),
                top.count as f64 / disease_total as f64 * 100.0
            ),
            _ => "N/A".to_string(),
        };

        Ok(OverallAnalytics {
            total_missions,
            total_plants_scanned,
            total_detections,
            health_index: health_index(total_plants_scanned, diseased),
            most_frequent_disease,
            class_counts,
            sessions,
        })
    }
}
