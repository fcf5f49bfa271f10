//! Per-endpoint request/response with timeout, retry and escalation.
//!
//! Each [`EndpointLink`] owns its transport behind an async mutex, so at most
//! one command is outstanding per endpoint while the two endpoints can be
//! driven concurrently.  A command is retried on timeout or on a malformed
//! reply; once the retry bound is exhausted the endpoint is marked
//! unresponsive and every later [`EndpointLink::send`] fails immediately
//! until [`EndpointLink::reset`].

use std::collections::BTreeMap;
use std::time::Duration;

use krishi_types::{Endpoint, EndpointHealth, KrishiError, LinkStatus};
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, error, instrument, warn};

use crate::frame::{Command, Reply, decode};
use crate::report::{EnvReport, MotionReport};
use crate::transport::FrameTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// How long to wait for the acknowledgement of one attempt.
    pub ack_timeout: Duration,
    /// Attempts before the endpoint is declared unresponsive.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(2000),
            max_attempts: 3,
        }
    }
}

enum Exchange {
    Acked,
    Rejected(String),
}

pub struct EndpointLink {
    endpoint: Endpoint,
    transport: Mutex<Box<dyn FrameTransport>>,
    policy: RetryPolicy,
    health: watch::Sender<EndpointHealth>,
}

impl EndpointLink {
    pub fn new(endpoint: Endpoint, transport: Box<dyn FrameTransport>, policy: RetryPolicy) -> Self {
        let (health, _) = watch::channel(EndpointHealth::Unknown);
        Self {
            endpoint,
            transport: Mutex::new(transport),
            policy,
            health,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn health(&self) -> EndpointHealth {
        *self.health.borrow()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<EndpointHealth> {
        self.health.subscribe()
    }

    /// Clear an unresponsive mark after operator intervention.
    pub fn reset(&self) {
        self.health.send_replace(EndpointHealth::Unknown);
    }

    /// Send `command` and wait for its acknowledgement, retrying on timeout
    /// or malformed replies.  An `<ERROR:..>` reply is returned as
    /// [`KrishiError::Rejected`] without retrying.
    #[instrument(skip(self), fields(endpoint = %self.endpoint, command = command.name()))]
    pub async fn send(&self, command: &Command) -> Result<(), KrishiError> {
        if self.health() == EndpointHealth::Unresponsive {
            return Err(KrishiError::EndpointUnresponsive {
                endpoint: self.endpoint,
                attempts: 0,
            });
        }

        let frame = command.encode();
        let mut transport = self.transport.lock().await;

        for attempt in 1..=self.policy.max_attempts {
            match self.exchange(&mut transport, &frame, command).await {
                Ok(Exchange::Acked) => {
                    self.mark(EndpointHealth::Responsive);
                    return Ok(());
                }
                Ok(Exchange::Rejected(reason)) => {
                    self.mark(EndpointHealth::Responsive);
                    return Err(KrishiError::Rejected {
                        endpoint: self.endpoint,
                        command: command.name().to_string(),
                        reason,
                    });
                }
                Err(e) => {
                    warn!(attempt, max = self.policy.max_attempts, error = %e, "attempt failed");
                }
            }
        }

        error!("retry bound exhausted; endpoint marked unresponsive");
        self.mark(EndpointHealth::Unresponsive);
        Err(KrishiError::EndpointUnresponsive {
            endpoint: self.endpoint,
            attempts: self.policy.max_attempts,
        })
    }

    /// Write `command` once without waiting for its acknowledgement.  Used
    /// for emergency stops, which must go out even to an unresponsive
    /// endpoint.  Gives up if the transport stays busy for one ack timeout.
    pub async fn send_unconfirmed(&self, command: &Command) -> Result<(), KrishiError> {
        let mut transport = timeout(self.policy.ack_timeout, self.transport.lock())
            .await
            .map_err(|_| KrishiError::TransportTimeout {
                endpoint: self.endpoint,
                command: command.name().to_string(),
            })?;
        transport.send_frame(&command.encode()).await
    }

    /// Poll the endpoint's sensor report once.  Failures are returned to the
    /// caller and never count towards the unresponsive bound.
    pub async fn query(&self, wait: Duration) -> Result<BTreeMap<String, String>, KrishiError> {
        let mut transport = self.transport.lock().await;
        let command = Command::GetData;
        transport.send_frame(&command.encode()).await?;
        let deadline = Instant::now() + wait;
        loop {
            let raw = timeout_at(deadline, transport.recv_frame())
                .await
                .map_err(|_| KrishiError::TransportTimeout {
                    endpoint: self.endpoint,
                    command: command.name().to_string(),
                })??;
            match decode(&raw) {
                Ok(Reply::Data(data)) => return Ok(data),
                Ok(Reply::Error(reason)) => {
                    return Err(KrishiError::Rejected {
                        endpoint: self.endpoint,
                        command: command.name().to_string(),
                        reason,
                    });
                }
                Ok(other) => debug!(endpoint = %self.endpoint, ?other, "ignoring frame while polling"),
                Err(e) => {
                    return Err(KrishiError::TransportProtocol {
                        endpoint: self.endpoint,
                        details: e.to_string(),
                    });
                }
            }
        }
    }

    pub async fn query_motion(&self, wait: Duration) -> Result<MotionReport, KrishiError> {
        Ok(MotionReport::from_data(&self.query(wait).await?))
    }

    pub async fn query_env(&self, wait: Duration) -> Result<EnvReport, KrishiError> {
        Ok(EnvReport::from_data(&self.query(wait).await?))
    }

    async fn exchange(
        &self,
        transport: &mut Box<dyn FrameTransport>,
        frame: &str,
        command: &Command,
    ) -> Result<Exchange, KrishiError> {
        let name = command.name();
        transport.send_frame(frame).await?;
        let deadline = Instant::now() + self.policy.ack_timeout + command.ack_allowance();
        loop {
            let raw = timeout_at(deadline, transport.recv_frame())
                .await
                .map_err(|_| KrishiError::TransportTimeout {
                    endpoint: self.endpoint,
                    command: name.to_string(),
                })??;
            match decode(&raw) {
                Ok(Reply::Ack(acked)) if acked == name => return Ok(Exchange::Acked),
                Ok(Reply::Ack(stale)) => {
                    debug!(endpoint = %self.endpoint, stale, "ignoring stale acknowledgement");
                }
                Ok(Reply::Error(reason)) => return Ok(Exchange::Rejected(reason)),
                Ok(Reply::Ready) => debug!(endpoint = %self.endpoint, "endpoint announced READY"),
                Ok(Reply::Data(_)) => {}
                Err(e) => {
                    return Err(KrishiError::TransportProtocol {
                        endpoint: self.endpoint,
                        details: e.to_string(),
                    });
                }
            }
        }
    }

    fn mark(&self, health: EndpointHealth) {
        self.health.send_if_modified(|current| {
            if *current == health {
                false
            } else {
                *current = health;
                true
            }
        });
    }
}

/// Both endpoints of the robot.
pub struct Link {
    pub motion: EndpointLink,
    pub sensing: EndpointLink,
}

impl Link {
    pub fn new(motion: EndpointLink, sensing: EndpointLink) -> Self {
        Self { motion, sensing }
    }

    pub fn endpoint(&self, endpoint: Endpoint) -> &EndpointLink {
        match endpoint {
            Endpoint::Motion => &self.motion,
            Endpoint::Sensing => &self.sensing,
        }
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            motion: self.motion.health(),
            sensing: self.sensing.health(),
        }
    }

    /// Bring both endpoints to a known-safe state and confirm they answer.
    pub async fn handshake(&self) -> Result<(), KrishiError> {
        tokio::try_join!(
            self.motion.send(&Command::Stop),
            self.sensing.send(&Command::StopNano)
        )?;
        Ok(())
    }

    /// Best-effort STOP to both endpoints concurrently.  Errors are logged,
    /// never returned.
    pub async fn stop_all(&self) {
        let (motion, sensing) = tokio::join!(
            self.motion.send_unconfirmed(&Command::Stop),
            self.sensing.send_unconfirmed(&Command::StopNano)
        );
        for (endpoint, result) in [(Endpoint::Motion, motion), (Endpoint::Sensing, sensing)] {
            if let Err(e) = result {
                warn!(%endpoint, error = %e, "emergency stop could not be delivered");
            }
        }
    }

    pub fn reset(&self) {
        self.motion.reset();
        self.sensing.reset();
    }
}
