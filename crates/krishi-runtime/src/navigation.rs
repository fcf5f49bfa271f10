//! [`Navigator`] – open-loop dead-reckoning with reactive obstacle handling.
//!
//! Distance comes from the cached encoder edge count times a fixed
//! centimetres-per-edge constant.  A planned distance is converted to whole
//! edges rounding *down*, so a remainder smaller than one edge is accepted as
//! "arrived" instead of overshooting by an extra edge.
//!
//! While travelling the navigator watches the sensor snapshot:
//!
//! - forward clearance below the safety margin stops the wheels and returns
//!   [`Arrival::Blocked`] with the distance covered so far;
//! - side clearance outside the tolerance band re-issues `MOVE` with a
//!   differential proportional to the drift.
//!
//! Row changes are split into legs ([`RowChange`]) so the mission can pause
//! between them.

use chrono::{DateTime, Utc};
use krishi_hal::DriftCorrector;
use krishi_kernel::CommandGate;
use krishi_link::Command;
use krishi_types::{Endpoint, KrishiError, SensorSnapshot};
use tokio::sync::watch;
use tokio::time::{Duration, Instant, sleep, timeout_at};
use tracing::{debug, info, instrument, warn};

use crate::config::NavigationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    Arrived,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Travel {
    pub travelled_cm: f32,
    pub arrival: Arrival,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    Left,
    Right,
}

impl Turn {
    /// Serpentine: leaving an even row turns right, an odd row turns left.
    pub fn after_row(row_index: usize) -> Self {
        if row_index % 2 == 0 { Turn::Right } else { Turn::Left }
    }
}

/// One leg of the move between two rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowChange {
    PivotOut { turn: Turn, inter_row_cm: f32 },
    Cross { turn: Turn, remaining_cm: f32 },
    PivotIn { turn: Turn },
    Done,
}

impl RowChange {
    pub fn begin(turn: Turn, inter_row_cm: f32) -> Self {
        RowChange::PivotOut { turn, inter_row_cm }
    }
}

pub struct Navigator {
    config: NavigationConfig,
    drift: DriftCorrector,
    sensors: watch::Receiver<SensorSnapshot>,
}

impl Navigator {
    pub fn new(config: NavigationConfig, sensors: watch::Receiver<SensorSnapshot>) -> Self {
        let drift = DriftCorrector::new(
            config.side_target_cm,
            config.side_tolerance_cm,
            config.drift_gain,
            config.max_drift_correction,
        );
        Self {
            config,
            drift,
            sensors,
        }
    }

    pub fn cm_per_edge(&self) -> f32 {
        self.config.cm_per_edge()
    }

    /// Whole edges needed for `distance_cm`, rounded down.
    pub fn edges_for(&self, distance_cm: f32) -> u64 {
        if !distance_cm.is_finite() || distance_cm <= 0.0 {
            return 0;
        }
        (distance_cm / self.cm_per_edge()).floor() as u64
    }

    /// Differential to apply for the side reading in `snapshot`, if any.
    pub fn drift_correction(&self, snapshot: &SensorSnapshot) -> Option<i16> {
        snapshot.side_cm.and_then(|side| self.drift.correction(side))
    }

    fn is_blocked(&self, snapshot: &SensorSnapshot) -> bool {
        snapshot.front_or_max() < self.config.front_safety_cm
    }

    /// Drive forward `distance_cm`, or until the path is blocked.
    #[instrument(skip(self, gate))]
    pub async fn advance(&mut self, gate: &CommandGate, distance_cm: f32) -> Result<Travel, KrishiError> {
        let target = self.edges_for(distance_cm);
        if target == 0 {
            return Ok(Travel {
                travelled_cm: 0.0,
                arrival: Arrival::Arrived,
            });
        }
        if self.is_blocked(&self.sensors.borrow()) {
            return Ok(Travel {
                travelled_cm: 0.0,
                arrival: Arrival::Blocked,
            });
        }

        gate.send(Endpoint::Motion, Command::ResetEncoder).await?;
        let reset_at: DateTime<Utc> = Utc::now();
        drop(self.sensors.borrow_and_update());

        let base = self.config.autonomous_speed;
        gate.send(Endpoint::Motion, Command::Move { left: base, right: base }).await?;
        let mut applied = 0i16;
        let mut edges = 0u64;
        let deadline = Instant::now() + Duration::from_millis(self.config.step_timeout_ms);

        let arrival = loop {
            match timeout_at(deadline, self.sensors.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    gate.send_best_effort(Endpoint::Motion, Command::Stop).await;
                    return Err(KrishiError::Hardware {
                        component: "navigation".into(),
                        details: "sensor feed closed".into(),
                    });
                }
                Err(_) => {
                    gate.send_best_effort(Endpoint::Motion, Command::Stop).await;
                    return Err(KrishiError::Hardware {
                        component: "navigation".into(),
                        details: format!("step timed out after {edges}/{target} edges"),
                    });
                }
            }
            let snapshot = self.sensors.borrow_and_update().clone();
            if snapshot.updated_at.is_none_or(|at| at <= reset_at) {
                continue;
            }
            let Some(now) = snapshot.encoder_edges else {
                continue;
            };
            edges = now;
            if edges >= target {
                break Arrival::Arrived;
            }
            if self.is_blocked(&snapshot) {
                warn!(front_cm = snapshot.front_or_max(), edges, "path blocked");
                break Arrival::Blocked;
            }
            let wanted = self.drift_correction(&snapshot).unwrap_or(0);
            if wanted != applied {
                let (left, right) = self.drift.wheel_pair(base, wanted);
                debug!(side_cm = ?snapshot.side_cm, correction = wanted, "drift correction");
                gate.send(Endpoint::Motion, Command::Move { left, right }).await?;
                applied = wanted;
            }
        };

        gate.send(Endpoint::Motion, Command::Stop).await?;
        let travelled_cm = edges as f32 * self.cm_per_edge();
        info!(travelled_cm, ?arrival, "step finished");
        Ok(Travel {
            travelled_cm,
            arrival,
        })
    }

    /// Timed spin in place.
    pub async fn pivot(&mut self, gate: &CommandGate, turn: Turn) -> Result<(), KrishiError> {
        let speed = i16::from(self.config.manual_turn_speed);
        let (left, right) = match turn {
            Turn::Right => (speed, -speed),
            Turn::Left => (-speed, speed),
        };
        gate.send(Endpoint::Motion, Command::Move { left, right }).await?;
        sleep(Duration::from_millis(self.config.pivot_ms)).await;
        gate.send(Endpoint::Motion, Command::Stop).await
    }

    /// Run one leg of a row change and return the next one.  A blocked
    /// crossing returns the same leg with the remaining distance.
    pub async fn change_row(&mut self, gate: &CommandGate, leg: RowChange) -> Result<RowChange, KrishiError> {
        match leg {
            RowChange::PivotOut { turn, inter_row_cm } => {
                self.pivot(gate, turn).await?;
                Ok(RowChange::Cross {
                    turn,
                    remaining_cm: inter_row_cm,
                })
            }
            RowChange::Cross { turn, remaining_cm } => {
                let travel = self.advance(gate, remaining_cm).await?;
                match travel.arrival {
                    Arrival::Arrived => Ok(RowChange::PivotIn { turn }),
                    Arrival::Blocked => Ok(RowChange::Cross {
                        turn,
                        remaining_cm: (remaining_cm - travel.travelled_cm).max(0.0),
                    }),
                }
            }
            RowChange::PivotIn { turn } => {
                self.pivot(gate, turn).await?;
                Ok(RowChange::Done)
            }
            RowChange::Done => Ok(RowChange::Done),
        }
    }
}
