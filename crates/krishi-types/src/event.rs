//! Events routed over the mission event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::{Endpoint, EndpointHealth, MissionState};

/// A discrete, timestamped occurrence in the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. "krishi-runtime::runner"
    pub source: String,
    pub payload: EventPayload,
}

impl MissionEvent {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    StateChanged {
        from: MissionState,
        to: MissionState,
    },
    PlantAnalyzed {
        plant_number: u32,
        classes: Vec<String>,
        outcome: String,
    },
    EndpointHealth {
        endpoint: Endpoint,
        health: EndpointHealth,
    },
    Alert {
        level: AlertLevel,
        message: String,
    },
}
