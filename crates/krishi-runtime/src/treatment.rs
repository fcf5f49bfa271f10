//! [`TreatmentPlanner`] – environmental gating, dose computation and relay
//! sequencing.
//!
//! Planning is a pure function of a plant's merged detections and the
//! sensor snapshot read immediately before dispensing:
//!
//! 1. no detection above the confidence threshold (ignoring healthy classes)
//!    → skipped-healthy;
//! 2. humidity above the gate, or never read → gated, nothing dispensed;
//! 3. each qualifying class maps to a treatment group; the base volume is
//!    scaled down when the temperature is above the hot threshold (or
//!    unknown), and a scaled volume at or under the minimum is skipped.
//!
//! Groups are dispensed one at a time: nutrient first, then pesticide tanks
//! in ascending order, then water.

use std::collections::BTreeSet;
use std::sync::Arc;

use krishi_kernel::CommandGate;
use krishi_link::Command;
use krishi_types::{Dose, Endpoint, KrishiError, MergedDetections, SensorSnapshot, TreatmentOutcome};
use tokio::time::{Duration, sleep};
use tracing::{info, instrument, warn};

use crate::config::{DispenseMethod, TreatmentConfig};

/// What the planner decided for one plant.
#[derive(Debug, Clone, PartialEq)]
pub enum TreatmentPlan {
    /// Nothing to dispense; the outcome is final.
    Settled(TreatmentOutcome),
    Dispense {
        doses: Vec<Dose>,
        /// Groups whose scaled dose did not exceed the minimum volume.
        skipped: Vec<String>,
        reduced: bool,
    },
}

/// Outcome of [`TreatmentPlanner::execute`] plus the fault that cut it
/// short, if any.
#[derive(Debug)]
pub struct Executed {
    pub outcome: TreatmentOutcome,
    pub fault: Option<KrishiError>,
}

pub struct TreatmentPlanner {
    config: TreatmentConfig,
    threshold: f32,
    healthy: Arc<[String]>,
}

impl TreatmentPlanner {
    pub fn new(config: TreatmentConfig, threshold: f32, healthy: Vec<String>) -> Self {
        Self {
            config,
            threshold,
            healthy: healthy.into(),
        }
    }

    /// Classes of `merged` that warrant treatment.
    pub fn qualifying<'a>(&self, merged: &'a MergedDetections) -> Vec<&'a str> {
        merged
            .qualifying(self.threshold, &self.healthy)
            .into_iter()
            .map(|(class, _)| class)
            .collect()
    }

    pub fn plan(&self, merged: &MergedDetections, snapshot: &SensorSnapshot) -> TreatmentPlan {
        let qualifying = self.qualifying(merged);
        if qualifying.is_empty() {
            return TreatmentPlan::Settled(TreatmentOutcome::SkippedHealthy);
        }

        match snapshot.humidity_pct {
            Some(h) if h <= self.config.humidity_gate_pct => {}
            humidity_pct => {
                info!(?humidity_pct, "humidity gate closed; nothing dispensed");
                return TreatmentPlan::Settled(TreatmentOutcome::GatedHumidity { humidity_pct });
            }
        }

        let mut groups = BTreeSet::new();
        let mut unmapped = Vec::new();
        for class in &qualifying {
            match self.config.group_for(class) {
                Some(group) => {
                    groups.insert((group.category, group.tank, group.name.clone()));
                }
                None => unmapped.push(class.to_string()),
            }
        }
        if !unmapped.is_empty() {
            warn!(?unmapped, "detections without a treatment group");
        }
        if groups.is_empty() {
            return TreatmentPlan::Settled(TreatmentOutcome::Unmapped { classes: unmapped });
        }

        let reduced = snapshot
            .temperature_c
            .is_none_or(|t| t > self.config.hot_threshold_c);
        let scale = if reduced { self.config.hot_scale } else { 1.0 };
        let volume = self.config.base_volume_ml * scale;

        let mut doses = Vec::new();
        let mut skipped = Vec::new();
        for (_, tank, name) in groups {
            if volume <= self.config.min_volume_ml {
                skipped.push(name);
            } else {
                doses.push(Dose {
                    category: name,
                    tank,
                    duration_ms: self.config.duration_ms(volume),
                });
            }
        }
        TreatmentPlan::Dispense {
            doses,
            skipped,
            reduced,
        }
    }

    /// Dispense `plan` one group at a time.
    #[instrument(skip(self, gate))]
    pub async fn execute(&self, gate: &CommandGate, plan: TreatmentPlan) -> Executed {
        let (doses, skipped, reduced) = match plan {
            TreatmentPlan::Settled(outcome) => return Executed { outcome, fault: None },
            TreatmentPlan::Dispense {
                doses,
                skipped,
                reduced,
            } => (doses, skipped, reduced),
        };

        let mut done = Vec::with_capacity(doses.len());
        for dose in doses {
            info!(group = %dose.category, tank = dose.tank, duration_ms = dose.duration_ms, "dispensing");
            if let Err(e) = self.dispense(gate, &dose).await {
                if self.config.method == DispenseMethod::Pump {
                    gate.send_best_effort(Endpoint::Motion, Command::Pump { tank: dose.tank, on: false })
                        .await;
                }
                return Executed {
                    outcome: TreatmentOutcome::Interrupted {
                        doses: done,
                        reason: e.to_string(),
                    },
                    fault: Some(e),
                };
            }
            done.push(dose);
        }

        let outcome = if reduced {
            TreatmentOutcome::Reduced { doses: done, skipped }
        } else {
            TreatmentOutcome::FullDose { doses: done, skipped }
        };
        Executed { outcome, fault: None }
    }

    async fn dispense(&self, gate: &CommandGate, dose: &Dose) -> Result<(), KrishiError> {
        match self.config.method {
            DispenseMethod::Pump => {
                gate.send(Endpoint::Motion, Command::Pump { tank: dose.tank, on: true }).await?;
                sleep(Duration::from_millis(dose.duration_ms)).await;
                gate.send(Endpoint::Motion, Command::Pump { tank: dose.tank, on: false }).await
            }
            DispenseMethod::Spray => {
                gate.send(
                    Endpoint::Motion,
                    Command::Spray {
                        tank: dose.tank,
                        duration_ms: dose.duration_ms,
                    },
                )
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TreatmentCategory, TreatmentGroup};
    use krishi_hal::SimRobot;
    use krishi_kernel::{EmergencyLatch, StateVerifier};
    use krishi_link::{EndpointLink, Link, RetryPolicy};
    use krishi_types::{AngleDetections, CapturePhase, Detection};

    fn merged(pairs: &[(&str, f32)]) -> MergedDetections {
        MergedDetections::merge(&[AngleDetections {
            phase: CapturePhase::Top,
            detections: pairs.iter().map(|(c, p)| Detection::new(*c, *p)).collect(),
            image_ref: None,
        }])
    }

    fn weather(temperature_c: Option<f32>, humidity_pct: Option<f32>) -> SensorSnapshot {
        SensorSnapshot {
            temperature_c,
            humidity_pct,
            ..SensorSnapshot::default()
        }
    }

    fn planner(config: TreatmentConfig) -> TreatmentPlanner {
        TreatmentPlanner::new(config, 0.55, vec!["Healthy".into()])
    }

    fn two_second_base() -> TreatmentConfig {
        TreatmentConfig {
            base_volume_ml: 10.0,
            ..TreatmentConfig::default()
        }
    }

    fn gate(robot: &SimRobot) -> CommandGate {
        let policy = RetryPolicy {
            ack_timeout: Duration::from_millis(50),
            max_attempts: 3,
        };
        let link = Link::new(
            EndpointLink::new(Endpoint::Motion, robot.motion_transport(), policy),
            EndpointLink::new(Endpoint::Sensing, robot.sensing_transport(), policy),
        );
        CommandGate::new(Arc::new(link), StateVerifier::new(), EmergencyLatch::new())
    }

    #[test]
    fn healthy_or_weak_detections_skip() {
        let p = planner(TreatmentConfig::default());
        let plan = p.plan(&merged(&[("Healthy", 0.99), ("Leaf_Spot", 0.5)]), &weather(Some(25.0), Some(50.0)));
        assert_eq!(plan, TreatmentPlan::Settled(TreatmentOutcome::SkippedHealthy));
    }

    #[test]
    fn high_humidity_gates_everything() {
        let p = planner(TreatmentConfig::default());
        let plan = p.plan(
            &merged(&[("Rust_Mildew", 0.9), ("Nutrient_Deficiency", 0.8)]),
            &weather(Some(25.0), Some(90.0)),
        );
        assert_eq!(
            plan,
            TreatmentPlan::Settled(TreatmentOutcome::GatedHumidity { humidity_pct: Some(90.0) })
        );
    }

    #[test]
    fn unknown_humidity_takes_conservative_branch() {
        let p = planner(TreatmentConfig::default());
        let plan = p.plan(&merged(&[("Rust_Mildew", 0.9)]), &weather(Some(25.0), None));
        assert!(matches!(
            plan,
            TreatmentPlan::Settled(TreatmentOutcome::GatedHumidity { humidity_pct: None })
        ));
    }

    #[test]
    fn heat_scales_duration() {
        let p = planner(two_second_base());
        let plan = p.plan(&merged(&[("Rust_Mildew", 0.9)]), &weather(Some(38.0), Some(50.0)));
        let TreatmentPlan::Dispense { doses, reduced, .. } = plan else {
            panic!("expected a dispense plan");
        };
        assert!(reduced);
        assert_eq!(doses.len(), 1);
        assert_eq!(doses[0].duration_ms, 1500);
        assert_eq!(doses[0].tank, 1);
    }

    #[test]
    fn unknown_temperature_is_reduced() {
        let p = planner(two_second_base());
        let TreatmentPlan::Dispense { doses, reduced, .. } =
            p.plan(&merged(&[("Rust_Mildew", 0.9)]), &weather(None, Some(50.0)))
        else {
            panic!("expected a dispense plan");
        };
        assert!(reduced);
        assert_eq!(doses[0].duration_ms, 1500);
    }

    #[test]
    fn threshold_temperature_is_full_dose() {
        let p = planner(two_second_base());
        let TreatmentPlan::Dispense { doses, reduced, .. } =
            p.plan(&merged(&[("Rust_Mildew", 0.9)]), &weather(Some(35.0), Some(50.0)))
        else {
            panic!("expected a dispense plan");
        };
        assert!(!reduced);
        assert_eq!(doses[0].duration_ms, 2000);
    }

    #[test]
    fn mild_weather_is_full_dose() {
        let p = planner(two_second_base());
        let TreatmentPlan::Dispense { doses, reduced, .. } =
            p.plan(&merged(&[("Wilt_Rot", 0.7)]), &weather(Some(30.0), Some(85.0)))
        else {
            panic!("expected a dispense plan");
        };
        assert!(!reduced);
        assert_eq!(doses[0].duration_ms, 2000);
    }

    #[test]
    fn nutrient_goes_first_then_pesticides_by_tank_then_water() {
        let mut config = TreatmentConfig::default();
        config.groups.push(TreatmentGroup {
            name: "Rinse".into(),
            category: TreatmentCategory::Water,
            tank: 0,
            classes: vec!["Dust".into()],
        });
        let p = planner(config);
        let TreatmentPlan::Dispense { doses, .. } = p.plan(
            &merged(&[
                ("Dust", 0.9),
                ("Pest_Damage", 0.9),
                ("Rust_Mildew", 0.9),
                ("Physiological_Stress", 0.9),
            ]),
            &weather(Some(25.0), Some(40.0)),
        ) else {
            panic!("expected a dispense plan");
        };
        let tanks: Vec<u8> = doses.iter().map(|d| d.tank).collect();
        assert_eq!(tanks, vec![3, 1, 2, 0]);
    }

    #[test]
    fn dose_below_minimum_is_skipped() {
        let config = TreatmentConfig {
            base_volume_ml: 1.2,
            ..TreatmentConfig::default()
        };
        let p = planner(config);
        let TreatmentPlan::Dispense { doses, skipped, .. } =
            p.plan(&merged(&[("Leaf_Spot", 0.9)]), &weather(Some(40.0), Some(40.0)))
        else {
            panic!("expected a dispense plan");
        };
        assert!(doses.is_empty());
        assert_eq!(skipped, vec!["Fungal Disease Control".to_string()]);

        let p = planner(TreatmentConfig {
            base_volume_ml: 1.0,
            ..TreatmentConfig::default()
        });
        let TreatmentPlan::Dispense { doses, skipped, reduced } =
            p.plan(&merged(&[("Leaf_Spot", 0.9)]), &weather(Some(25.0), Some(40.0)))
        else {
            panic!("expected a dispense plan");
        };
        assert!(!reduced);
        assert!(doses.is_empty());
        assert_eq!(skipped.len(), 1);
    }

    #[test]
    fn unmapped_classes_are_recorded() {
        let p = planner(TreatmentConfig::default());
        let plan = p.plan(&merged(&[("Frost_Burn", 0.9)]), &weather(Some(25.0), Some(40.0)));
        assert_eq!(
            plan,
            TreatmentPlan::Settled(TreatmentOutcome::Unmapped {
                classes: vec!["Frost_Burn".into()]
            })
        );
    }

    #[tokio::test]
    async fn pump_method_opens_and_closes_relay() {
        let robot = SimRobot::new();
        let gate = gate(&robot);
        let config = TreatmentConfig {
            base_volume_ml: 0.05,
            min_volume_ml: 0.0,
            ..TreatmentConfig::default()
        };
        let p = planner(config);
        let plan = p.plan(&merged(&[("Leaf_Spot", 0.9)]), &weather(Some(25.0), Some(40.0)));
        let executed = p.execute(&gate, plan).await;
        assert!(executed.fault.is_none());
        assert_eq!(executed.outcome.label(), "full_dose");
        assert!(executed.outcome.dispensed());
        assert_eq!(
            robot.frames(Endpoint::Motion),
            vec!["<PUMP:1:1>".to_string(), "<PUMP:1:0>".to_string()]
        );
        assert!(robot.world().open_tanks.is_empty());
    }

    #[tokio::test]
    async fn spray_method_uses_endpoint_timing() {
        let robot = SimRobot::new();
        let gate = gate(&robot);
        let config = TreatmentConfig {
            method: DispenseMethod::Spray,
            ..two_second_base()
        };
        let p = planner(config);
        let plan = p.plan(&merged(&[("Leaf_Spot", 0.9)]), &weather(Some(38.0), Some(40.0)));
        let executed = p.execute(&gate, plan).await;
        assert_eq!(executed.outcome.label(), "reduced");
        assert_eq!(robot.frames(Endpoint::Motion), vec!["<SPRAY:1:1500>".to_string()]);
    }

    #[tokio::test]
    async fn failure_mid_sequence_is_interrupted() {
        let robot = SimRobot::new();
        robot.update(|w| w.motion_silent = true);
        let gate = gate(&robot);
        let p = planner(TreatmentConfig {
            method: DispenseMethod::Spray,
            base_volume_ml: 0.05,
            min_volume_ml: 0.0,
            ..TreatmentConfig::default()
        });
        let plan = p.plan(&merged(&[("Leaf_Spot", 0.9)]), &weather(Some(25.0), Some(40.0)));
        let executed = p.execute(&gate, plan).await;
        assert_eq!(executed.outcome.label(), "interrupted");
        assert!(executed.fault.is_some_and(|e| e.is_escalation()));
    }
}
