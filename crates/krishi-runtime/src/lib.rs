//! `krishi-runtime` – The Mission Orchestrator
//!
//! Composes the link, safety kernel, devices and durable sink into one
//! supervisory control loop that walks a field, inspects every plant from
//! three angles and doses treatments against live environmental readings.
//!
//! # Modules
//!
//! - [`config`] – [`MissionConfig`][config::MissionConfig]: every runtime
//!   tunable (link timing, navigation geometry, capture angles, inference
//!   threshold, treatment groups, flush policy) with field-tested defaults.
//! - [`poller`] – [`SensorPoller`][poller::SensorPoller]: the sole writer of
//!   the cached [`SensorSnapshot`][krishi_types::SensorSnapshot].
//! - [`navigation`] – [`Navigator`][navigation::Navigator]: dead-reckoning
//!   travel with obstacle halts, drift correction and serpentine row changes.
//! - [`capture`] – [`CaptureSequencer`][capture::CaptureSequencer]: the
//!   top → middle → bottom inspection at one stop.
//! - [`treatment`] – [`TreatmentPlanner`][treatment::TreatmentPlanner]:
//!   humidity gating, heat scaling and one-at-a-time dispensing.
//! - [`session`] – [`SessionAggregator`][session::SessionAggregator]: tally,
//!   plant log and the bounded-retry flush to the durable sink.
//! - [`status`] – [`StatusBoard`][status::StatusBoard]: atomically replaced
//!   status snapshots.
//! - [`mission`] – [`MissionController`][mission::MissionController]: the
//!   mission state machine.
//! - [`runner`] – [`Runner`][runner::Runner] and
//!   [`CommandHandle`][runner::CommandHandle]: the control loop and its
//!   command ingress, with preemptive emergency stop.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: `tracing`
//!   subscriber setup with an optional OTLP span exporter.
//!
//! # Command gating
//!
//! Every frame the runtime sends goes through
//! [`CommandGate`][krishi_kernel::CommandGate], so the emergency latch and
//! the physical range rules apply to autonomous and manual commands alike.

pub mod capture;
pub mod config;
pub mod mission;
pub mod navigation;
pub mod poller;
pub mod runner;
pub mod session;
pub mod status;
pub mod telemetry;
pub mod treatment;

pub use capture::{CaptureSequencer, StopScan};
pub use config::MissionConfig;
pub use mission::{Collaborators, MissionController, mission_id};
pub use navigation::{Arrival, Navigator, RowChange, Travel, Turn};
pub use poller::SensorPoller;
pub use runner::{CommandHandle, Runner};
pub use session::{FlushOutcome, SessionAggregator};
pub use status::StatusBoard;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
pub use treatment::{Executed, TreatmentPlan, TreatmentPlanner};

pub use krishi_kernel::CommandGate;
