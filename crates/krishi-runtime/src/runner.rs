//! [`Runner`] – the supervisory control loop.
//!
//! The runner owns the [`MissionController`] and is therefore the only task
//! that mutates mission state.  Operator surfaces talk to it through a
//! cloneable [`CommandHandle`]:
//!
//! - commands arrive over an `mpsc` channel and are answered on a `oneshot`;
//! - while a mission step is in flight, commands are buffered and applied
//!   once the step finishes, so `pause` always lands on a step boundary;
//! - `emergency_stop` is the exception.  The handle engages the emergency
//!   latch and fires STOP itself, and the runner drops the in-flight step as
//!   soon as it sees the latch.
//!
//! Status is read through a `watch` channel of `Arc<StatusSnapshot>` and
//! never blocks the loop.

use std::sync::Arc;

use krishi_kernel::CommandGate;
use krishi_link::EventBus;
use krishi_types::{KrishiError, MissionState, OperatorCommand, StatusSnapshot};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep};
use tracing::{debug, info, warn};

use crate::mission::MissionController;

/// Pending operator commands before senders start waiting.
const COMMAND_QUEUE: usize = 32;

/// Minimum spacing between handshake attempts while in STARTUP.
const HANDSHAKE_RETRY: Duration = Duration::from_secs(1);

struct Request {
    command: OperatorCommand,
    reply: oneshot::Sender<Result<(), KrishiError>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// CommandHandle
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable ingress for operator commands and status reads.
#[derive(Clone)]
pub struct CommandHandle {
    tx: mpsc::Sender<Request>,
    gate: Arc<CommandGate>,
    status: watch::Receiver<Arc<StatusSnapshot>>,
    bus: EventBus,
}

impl CommandHandle {
    /// Submit `command` and wait until the control loop has applied it.
    ///
    /// An emergency stop engages the latch and sends STOP to both endpoints
    /// before it is queued, so it takes effect even while a step is running.
    pub async fn execute(&self, command: OperatorCommand) -> Result<(), KrishiError> {
        if matches!(command, OperatorCommand::EmergencyStop) {
            self.gate.emergency_stop().await;
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request { command, reply })
            .await
            .map_err(|_| loop_gone())?;
        rx.await.map_err(|_| loop_gone())?
    }

    /// Engage the emergency latch without waiting for anything.  Safe to
    /// call from a signal handler thread.
    pub fn trigger_emergency(&self) -> bool {
        self.gate.latch().trigger()
    }

    pub fn status(&self) -> Arc<StatusSnapshot> {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<Arc<StatusSnapshot>> {
        self.status.clone()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn gate(&self) -> &Arc<CommandGate> {
        &self.gate
    }
}

fn loop_gone() -> KrishiError {
    KrishiError::Hardware {
        component: "runner".to_string(),
        details: "control loop is not running".to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runner
// ─────────────────────────────────────────────────────────────────────────────

pub struct Runner {
    controller: MissionController,
    rx: mpsc::Receiver<Request>,
    idle_every: Duration,
    last_handshake: Option<Instant>,
}

impl Runner {
    pub fn new(controller: MissionController) -> (Self, CommandHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let handle = CommandHandle {
            tx,
            gate: controller.gate().clone(),
            status: controller.board().subscribe(),
            bus: controller.bus().clone(),
        };
        let idle_every = controller.config().link.poll_interval();
        let runner = Self {
            controller,
            rx,
            idle_every,
            last_handshake: None,
        };
        (runner, handle)
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drive the controller until every [`CommandHandle`] is dropped.
    pub async fn run(mut self) {
        info!("control loop started");
        let gate = self.controller.gate().clone();
        self.controller.publish();

        loop {
            let state = self.controller.state();
            if gate.latch().is_engaged() && state != MissionState::EmergencyStopped {
                self.controller.latched();
                continue;
            }

            if state.is_running() {
                self.step(&gate).await;
                continue;
            }

            tokio::select! {
                biased;
                _ = gate.latch().engaged(), if state != MissionState::EmergencyStopped => {
                    self.controller.latched();
                }
                request = self.rx.recv() => match request {
                    Some(request) => self.apply(request).await,
                    None => break,
                },
                _ = sleep(self.idle_every) => self.idle().await,
            }
        }
        info!("command channel closed; control loop stopped");
    }

    /// Run one mission step, buffering commands until it finishes.  The step
    /// is dropped the moment the emergency latch engages.
    async fn step(&mut self, gate: &CommandGate) {
        let mut buffered = Vec::new();
        let preempted = {
            let tick = self.controller.tick();
            tokio::pin!(tick);
            loop {
                tokio::select! {
                    biased;
                    _ = gate.latch().engaged() => break true,
                    _ = &mut tick => break false,
                    Some(request) = self.rx.recv() => buffered.push(request),
                }
            }
        };
        if preempted {
            warn!("in-flight step preempted by emergency stop");
            self.controller.latched();
        }
        for request in buffered {
            self.apply(request).await;
        }
    }

    async fn apply(&mut self, request: Request) {
        let result = self.controller.execute(request.command).await;
        if request.reply.send(result).is_err() {
            debug!("command issuer went away before the reply");
        }
    }

    async fn idle(&mut self) {
        if self.controller.state() == MissionState::Startup {
            let due = self
                .last_handshake
                .is_none_or(|at| at.elapsed() >= HANDSHAKE_RETRY);
            if due {
                self.last_handshake = Some(Instant::now());
                if let Err(e) = self.controller.handshake().await {
                    debug!(error = %e, "handshake attempt failed");
                }
            }
        }
        self.controller.publish();
    }
}
