//! `krishi-kernel` – Safety
//!
//! Nothing reaches an endpoint without passing through here.
//!
//! # Modules
//!
//! - [`state_verifier`] – [`StateVerifier`][state_verifier::StateVerifier]:
//!   range rules (wheel speed, servo angle, installed tanks) checked before
//!   every frame is written.
//! - [`interlock`] – [`EmergencyLatch`][interlock::EmergencyLatch]: the
//!   emergency-stop latch and the rule that suppresses motion while it is
//!   engaged.
//! - [`command_gate`] – [`CommandGate`][command_gate::CommandGate]: the single
//!   interception point between the runtime and the transport link.
//! - [`watchdog`] – [`FeedWatchdog`][watchdog::FeedWatchdog]: detects sensor
//!   feeds that have gone quiet.

pub mod command_gate;
pub mod interlock;
pub mod state_verifier;
pub mod watchdog;

pub use command_gate::CommandGate;
pub use interlock::{EmergencyLatch, EmergencyLatchRule};
pub use state_verifier::{Rule, ServoRangeRule, StateVerifier, TankRule, WheelSpeedRule};
pub use watchdog::{FeedHealth, FeedWatchdog};
