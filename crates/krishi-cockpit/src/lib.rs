//! `krishi-cockpit` – the operator's web surface.
//!
//! Boots a lightweight HTTP + WebSocket server (default port `8080`) that:
//!
//! 1. **Serves** a small embedded dashboard page at `/`.
//!
//! 2. **Answers** `GET /status` with the latest
//!    [`StatusSnapshot`][krishi_types::StatusSnapshot] as JSON and
//!    `GET /schema` with the JSON schema of
//!    [`OperatorCommand`][krishi_types::OperatorCommand].
//!
//! 3. **Bridges** every connected browser over a WebSocket: status
//!    snapshots and mission, diagnosis and alert events stream down, and
//!    operator commands (`{"command":"pause"}` and friends) stream up into
//!    the control loop through a
//!    [`CommandHandle`][krishi_runtime::CommandHandle].  Each command is
//!    answered with an `ack` message.
//!
//! When a password is configured, `/status` and WebSocket upgrades must
//! carry it as `?key=<password>`.
//!
//! # Usage
//!
//! ```rust,no_run
//! use krishi_cockpit::CockpitServer;
//! # async fn serve(handle: krishi_runtime::CommandHandle) -> Result<(), krishi_types::KrishiError> {
//! CockpitServer::new(handle).with_port(8080).run().await
//! # }
//! ```

pub mod server;

pub use server::{CockpitServer, DEFAULT_PORT};
