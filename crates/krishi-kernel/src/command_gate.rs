//! [`CommandGate`] – single interception point between the runtime and the
//! transport link.
//!
//! Every command the runtime issues goes through [`CommandGate::send`], which
//! applies the emergency interlock and the physical range rules before the
//! frame reaches an endpoint.  Emergency stops bypass the rules through
//! [`CommandGate::emergency_stop`].

use std::sync::Arc;

use krishi_link::{Command, EndpointLink, Link};
use krishi_types::{Endpoint, KrishiError, LinkStatus};
use tracing::warn;

use crate::interlock::{EmergencyLatch, EmergencyLatchRule};
use crate::state_verifier::StateVerifier;

pub struct CommandGate {
    link: Arc<Link>,
    verifier: StateVerifier,
    latch: EmergencyLatch,
}

impl CommandGate {
    /// Wrap `link`.  The latch rule is always evaluated first.
    pub fn new(link: Arc<Link>, verifier: StateVerifier, latch: EmergencyLatch) -> Self {
        let mut gated = StateVerifier::new();
        gated.add_rule(Box::new(EmergencyLatchRule {
            latch: latch.clone(),
        }));
        gated.extend(verifier);
        Self {
            link,
            verifier: gated,
            latch,
        }
    }

    pub fn latch(&self) -> &EmergencyLatch {
        &self.latch
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    pub fn endpoint(&self, endpoint: Endpoint) -> &EndpointLink {
        self.link.endpoint(endpoint)
    }

    pub fn status(&self) -> LinkStatus {
        self.link.status()
    }

    /// Verify `command` and send it to `endpoint`, waiting for its
    /// acknowledgement.
    pub async fn send(&self, endpoint: Endpoint, command: Command) -> Result<(), KrishiError> {
        self.verifier.verify(&command)?;
        self.link.endpoint(endpoint).send(&command).await
    }

    /// Engage the latch and fire STOP at both endpoints without waiting for
    /// confirmation.
    pub async fn emergency_stop(&self) {
        self.latch.trigger();
        self.link.stop_all().await;
    }

    /// Release the latch and forget any unresponsive marks.
    pub fn reset(&self) {
        self.latch.reset();
        self.link.reset();
    }

    /// Best-effort send used on shutdown paths; failures are only logged.
    pub async fn send_best_effort(&self, endpoint: Endpoint, command: Command) {
        if let Err(e) = self.send(endpoint, command.clone()).await {
            warn!(%endpoint, command = %command, error = %e, "best-effort command failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use krishi_link::{FrameTransport, RetryPolicy};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Acknowledges every frame and journals what it was sent.
    struct AckAll {
        sent: Arc<Mutex<Vec<String>>>,
        pending: VecDeque<String>,
    }

    #[async_trait]
    impl FrameTransport for AckAll {
        async fn send_frame(&mut self, frame: &str) -> Result<(), KrishiError> {
            self.sent.lock().unwrap().push(frame.to_string());
            let name = frame
                .trim_matches(|c| c == '<' || c == '>')
                .split(':')
                .next()
                .unwrap_or_default()
                .to_string();
            self.pending.push_back(format!("<ACK:{name}_OK>"));
            Ok(())
        }

        async fn recv_frame(&mut self) -> Result<String, KrishiError> {
            match self.pending.pop_front() {
                Some(frame) => Ok(frame),
                None => std::future::pending().await,
            }
        }
    }

    fn gate() -> (CommandGate, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let make = |endpoint| {
            EndpointLink::new(
                endpoint,
                Box::new(AckAll {
                    sent: sent.clone(),
                    pending: VecDeque::new(),
                }),
                RetryPolicy::default(),
            )
        };
        let link = Arc::new(Link::new(make(Endpoint::Motion), make(Endpoint::Sensing)));
        let gate = CommandGate::new(
            link,
            StateVerifier::standard(vec![1, 2, 3], 10_000),
            EmergencyLatch::new(),
        );
        (gate, sent)
    }

    #[tokio::test]
    async fn valid_command_reaches_endpoint() -> Result<(), Box<dyn std::error::Error>> {
        let (gate, sent) = gate();
        gate.send(Endpoint::Motion, Command::Move { left: 210, right: 210 })
            .await?;
        assert_eq!(*sent.lock().unwrap(), vec!["<MOVE:210:210>".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn out_of_range_command_never_sent() {
        let (gate, sent) = gate();
        assert!(gate.send(Endpoint::Sensing, Command::Tilt(200)).await.is_err());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn emergency_stop_suppresses_motion_until_reset() {
        let (gate, sent) = gate();
        gate.emergency_stop().await;
        assert!(gate.latch().is_engaged());
        assert_eq!(
            *sent.lock().unwrap(),
            vec!["<STOP>".to_string(), "<STOP_NANO>".to_string()]
        );

        let blocked = gate
            .send(Endpoint::Motion, Command::Move { left: 100, right: 100 })
            .await;
        assert!(matches!(blocked, Err(KrishiError::Interlocked(_))));
        assert_eq!(sent.lock().unwrap().len(), 2);

        gate.reset();
        assert!(gate
            .send(Endpoint::Motion, Command::Move { left: 100, right: 100 })
            .await
            .is_ok());
    }
}
