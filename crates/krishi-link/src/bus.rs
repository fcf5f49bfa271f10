//! Topic-based publish/subscribe bus for mission events.
//!
//! Uses [`tokio::sync::broadcast`] channels so every subscriber receives
//! every message without a slow subscriber blocking the control loop.
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Mission`] | State transitions |
//! | [`Topic::Diagnosis`] | Per-plant analysis results |
//! | [`Topic::Alerts`] | Endpoint health changes, emergency stops, persistence warnings |

use krishi_types::MissionEvent;
use tokio::sync::broadcast;
use tracing::warn;

/// Buffered events per topic before slow subscribers start lagging.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Mission,
    Diagnosis,
    Alerts,
}

/// Shared event bus.  Clones share the same channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    mission: broadcast::Sender<MissionEvent>,
    diagnosis: broadcast::Sender<MissionEvent>,
    alerts: broadcast::Sender<MissionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (mission, _) = broadcast::channel(capacity);
        let (diagnosis, _) = broadcast::channel(capacity);
        let (alerts, _) = broadcast::channel(capacity);
        Self {
            mission,
            diagnosis,
            alerts,
        }
    }

    /// Publish `event` on `topic`, returning how many subscribers received
    /// it.  Publishing with nobody listening is normal and returns `0`.
    pub fn publish_to(&self, topic: Topic, event: MissionEvent) -> usize {
        self.sender(topic).send(event).unwrap_or(0)
    }

    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.sender(topic).subscribe(),
        }
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<MissionEvent> {
        match topic {
            Topic::Mission => &self.mission,
            Topic::Diagnosis => &self.diagnosis,
            Topic::Alerts => &self.alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to one [`Topic`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<MissionEvent>,
}

impl TopicReceiver {
    /// Wait for the next event, skipping over any lag.  Returns `None` once
    /// the bus has shut down.
    pub async fn recv(&mut self) -> Option<MissionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}
