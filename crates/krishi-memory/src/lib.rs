//! `krishi-memory` – Durable Session Sink
//!
//! Everything that outlives a mission lands here: raw detection events, one
//! summary per session, and explicit warnings whenever data had to be
//! dropped.
//!
//! # Modules
//!
//! - [`record`] – row types written by the session aggregator.
//! - [`store`] – [`DetectionSink`] trait and the SQLite-backed
//!   [`SqliteDetectionStore`].
//! - [`analytics`] – per-mission and cross-mission queries (health index,
//!   class frequencies, latest mission).

pub mod analytics;
pub mod record;
pub mod store;

pub use analytics::{
    ClassCount, MissionAnalytics, OverallAnalytics, PlantClassCount, SessionHealth,
};
pub use record::{DetectionEvent, SessionEnd, SessionSummary, WarningRecord};
pub use store::{DetectionSink, SqliteDetectionStore, StoreError};
