//! [`StateVerifier`] – physical range checks on outbound commands.
//!
//! Before a [`Command`] is written to an endpoint it passes through
//! [`StateVerifier::verify`].  Every registered [`Rule`] is evaluated in
//! order; the first violation returns [`KrishiError::Hardware`] and the
//! command is **not** sent.
//!
//! Built-in rules:
//! - [`WheelSpeedRule`] – `MOVE` speeds within `-max..=max` per side.
//! - [`ServoRangeRule`] – `PAN`/`TILT`/`PIPE` angles within the servo range.
//! - [`TankRule`] – `PUMP`/`SPRAY` only address installed tanks, and a spray
//!   never exceeds the longest allowed duration.

use krishi_link::Command;
use krishi_types::KrishiError;
use tracing::warn;

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single physical invariant that a command must satisfy.
pub trait Rule: Send + Sync {
    /// Human-readable name used in fault messages.
    fn name(&self) -> &str;

    fn check(&self, command: &Command) -> Result<(), KrishiError>;
}

// ────────────────────────────────────────────────────────────────────────────
// StateVerifier
// ────────────────────────────────────────────────────────────────────────────

/// Rule engine evaluated before every endpoint write.
///
/// # Example
///
/// ```
/// use krishi_kernel::state_verifier::{StateVerifier, WheelSpeedRule};
/// use krishi_link::Command;
///
/// let mut verifier = StateVerifier::new();
/// verifier.add_rule(Box::new(WheelSpeedRule { max: 255 }));
///
/// assert!(verifier.verify(&Command::Move { left: 200, right: -200 }).is_ok());
/// assert!(verifier.verify(&Command::Move { left: 300, right: 0 }).is_err());
/// ```
#[derive(Default)]
pub struct StateVerifier {
    rules: Vec<Box<dyn Rule>>,
}

impl StateVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard rule set for the two-endpoint robot with `tanks`
    /// installed.
    pub fn standard(tanks: Vec<u8>, max_spray_ms: u64) -> Self {
        let mut verifier = Self::new();
        verifier.add_rule(Box::new(WheelSpeedRule { max: 255 }));
        verifier.add_rule(Box::new(ServoRangeRule { min: 0, max: 180 }));
        verifier.add_rule(Box::new(TankRule {
            tanks,
            max_spray_ms,
        }));
        verifier
    }

    /// Register a new [`Rule`].  Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    /// Append every rule of `other`, preserving order.
    pub fn extend(&mut self, other: StateVerifier) {
        self.rules.extend(other.rules);
    }

    pub fn verify(&self, command: &Command) -> Result<(), KrishiError> {
        for rule in &self.rules {
            if let Err(e) = rule.check(command) {
                warn!(rule = rule.name(), %command, error = %e, "command rejected");
                return Err(e);
            }
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

pub struct WheelSpeedRule {
    pub max: i16,
}

impl Rule for WheelSpeedRule {
    fn name(&self) -> &str {
        "wheel_speed"
    }

    fn check(&self, command: &Command) -> Result<(), KrishiError> {
        if let Command::Move { left, right } = command {
            for (side, speed) in [("left", left), ("right", right)] {
                if speed.unsigned_abs() > self.max.unsigned_abs() {
                    return Err(KrishiError::Hardware {
                        component: "drive_base".to_string(),
                        details: format!("{side} speed {speed} outside ±{}", self.max),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Servo angle bounds in degrees (inclusive).
pub struct ServoRangeRule {
    pub min: u8,
    pub max: u8,
}

impl Rule for ServoRangeRule {
    fn name(&self) -> &str {
        "servo_range"
    }

    fn check(&self, command: &Command) -> Result<(), KrishiError> {
        let (servo, angle) = match command {
            Command::Pan(a) => ("pan", *a),
            Command::Tilt(a) => ("tilt", *a),
            Command::Pipe(a) => ("pipe", *a),
            _ => return Ok(()),
        };
        if angle < self.min || angle > self.max {
            return Err(KrishiError::Hardware {
                component: format!("{servo}_servo"),
                details: format!("angle {angle} outside {}..={}", self.min, self.max),
            });
        }
        Ok(())
    }
}

pub struct TankRule {
    pub tanks: Vec<u8>,
    pub max_spray_ms: u64,
}

impl Rule for TankRule {
    fn name(&self) -> &str {
        "tank"
    }

    fn check(&self, command: &Command) -> Result<(), KrishiError> {
        let tank = match command {
            Command::Pump { tank, .. } => *tank,
            Command::Spray { tank, duration_ms } => {
                if *duration_ms > self.max_spray_ms {
                    return Err(KrishiError::Hardware {
                        component: format!("tank_{tank}"),
                        details: format!(
                            "spray duration {duration_ms} ms exceeds {} ms",
                            self.max_spray_ms
                        ),
                    });
                }
                *tank
            }
            _ => return Ok(()),
        };
        if !self.tanks.contains(&tank) {
            return Err(KrishiError::Hardware {
                component: format!("tank_{tank}"),
                details: format!("tank {tank} is not installed"),
            });
        }
        Ok(())
    }
}
