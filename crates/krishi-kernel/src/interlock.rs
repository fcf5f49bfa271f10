//! [`EmergencyLatch`] – process-wide emergency-stop interlock.
//!
//! Triggering the latch is synchronous and lock-free, so it can be done from
//! a signal handler, a WebSocket task or the control loop alike.  While the
//! latch is engaged [`EmergencyLatchRule`] refuses every command that could
//! set the robot in motion; only an explicit [`EmergencyLatch::reset`]
//! releases it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use krishi_link::Command;
use krishi_types::KrishiError;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::state_verifier::Rule;

#[derive(Clone, Default)]
pub struct EmergencyLatch {
    engaged: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl EmergencyLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engage the latch and wake every task waiting in [`engaged`](Self::engaged).
    /// Returns `true` if this call changed the state.
    pub fn trigger(&self) -> bool {
        let changed = !self.engaged.swap(true, Ordering::SeqCst);
        if changed {
            warn!("emergency latch engaged");
        }
        self.notify.notify_waiters();
        changed
    }

    pub fn reset(&self) {
        if self.engaged.swap(false, Ordering::SeqCst) {
            info!("emergency latch released");
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }

    /// Resolve once the latch is engaged.  Returns immediately if it already is.
    pub async fn engaged(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_engaged() {
                return;
            }
            notified.await;
        }
    }
}

/// Blocks motion commands while the latch is engaged.
pub struct EmergencyLatchRule {
    pub latch: EmergencyLatch,
}

impl Rule for EmergencyLatchRule {
    fn name(&self) -> &str {
        "emergency_latch"
    }

    fn check(&self, command: &Command) -> Result<(), KrishiError> {
        if self.latch.is_engaged() && command.is_motion() {
            return Err(KrishiError::Interlocked(format!(
                "{} suppressed while emergency-stopped",
                command.name()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn trigger_and_reset() {
        let latch = EmergencyLatch::new();
        assert!(!latch.is_engaged());
        assert!(latch.trigger());
        assert!(!latch.trigger(), "second trigger is not a change");
        assert!(latch.is_engaged());
        latch.reset();
        assert!(!latch.is_engaged());
    }

    #[test]
    fn rule_blocks_only_motion_while_engaged() {
        let latch = EmergencyLatch::new();
        let rule = EmergencyLatchRule {
            latch: latch.clone(),
        };
        let mv = Command::Move { left: 100, right: 100 };
        assert!(rule.check(&mv).is_ok());

        latch.trigger();
        assert!(matches!(rule.check(&mv), Err(KrishiError::Interlocked(_))));
        assert!(rule.check(&Command::Stop).is_ok());
        assert!(rule.check(&Command::Pump { tank: 1, on: false }).is_ok());
    }

    #[tokio::test]
    async fn engaged_wakes_waiter() {
        let latch = EmergencyLatch::new();
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.engaged().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        latch.trigger();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter must wake")
            .expect("task must not panic");
    }

    #[tokio::test]
    async fn engaged_returns_immediately_when_already_set() {
        let latch = EmergencyLatch::new();
        latch.trigger();
        tokio::time::timeout(Duration::from_millis(50), latch.engaged())
            .await
            .expect("already engaged");
    }
}
