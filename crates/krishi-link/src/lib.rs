//! `krishi-link` – the transport link to the robot's two remote controllers.
//!
//! # Modules
//!
//! - [`frame`] – typed `<NAME[:arg]*>` codec that fails closed on unknown tags.
//! - [`report`] – interpretation of `DATA:SENSORS` reports.
//! - [`transport`] – [`FrameTransport`] and the tokio stream implementation.
//! - [`link`] – per-endpoint request/response with timeout, retry and
//!   unresponsive escalation; the two-endpoint [`Link`] and its handshake.
//! - [`bus`] – broadcast [`EventBus`] for mission events.

pub mod bus;
pub mod frame;
pub mod link;
pub mod report;
pub mod transport;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use frame::{Command, FrameError, Indication, Reply, decode};
pub use link::{EndpointLink, Link, RetryPolicy};
pub use report::{EnvReport, FAILURE_MARKER, MotionReport};
pub use transport::{FrameTransport, StreamTransport, connect};
