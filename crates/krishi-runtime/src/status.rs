//! [`StatusBoard`] – atomically replaced status snapshots.
//!
//! The control loop builds a fresh [`StatusSnapshot`] and swaps it into a
//! `watch` channel behind an `Arc`; readers clone the `Arc` and never see a
//! half-written structure or hold up the writer.

use std::sync::Arc;

use krishi_types::{CapturePhase, StatusSnapshot};
use tokio::sync::watch;

#[derive(Clone)]
pub struct StatusBoard {
    tx: Arc<watch::Sender<Arc<StatusSnapshot>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(StatusSnapshot::startup()));
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StatusSnapshot>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Arc<StatusSnapshot> {
        self.tx.borrow().clone()
    }

    /// Copy the current snapshot, apply `edit`, bump the revision and
    /// publish the result.
    pub fn publish(&self, edit: impl FnOnce(&mut StatusSnapshot)) {
        self.tx.send_modify(|current| {
            let mut next = (**current).clone();
            edit(&mut next);
            next.revision = current.revision + 1;
            *current = Arc::new(next);
        });
    }

    pub fn set_capture_phase(&self, phase: Option<CapturePhase>) {
        self.publish(|s| s.capture_phase = phase);
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
