//! [`FeedWatchdog`] – staleness monitor for endpoint sensor feeds.
//!
//! The sensor poller calls [`FeedWatchdog::heartbeat`] after every successful
//! report from an endpoint.  A feed whose last report is older than its
//! deadline is [`FeedHealth::Stale`]; the poller logs each transition so an
//! operator can tell "clear path" from "sensor feed gone quiet".

use std::collections::HashMap;
use std::time::{Duration, Instant};

use krishi_types::Endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedHealth {
    Fresh,
    Stale,
}

struct FeedEntry {
    last_report: Instant,
    deadline: Duration,
    reported: FeedHealth,
}

#[derive(Default)]
pub struct FeedWatchdog {
    feeds: HashMap<Endpoint, FeedEntry>,
}

impl FeedWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching `endpoint`.  The feed starts fresh; re-registering
    /// resets its deadline.
    pub fn register(&mut self, endpoint: Endpoint, deadline: Duration) {
        self.feeds.insert(
            endpoint,
            FeedEntry {
                last_report: Instant::now(),
                deadline,
                reported: FeedHealth::Fresh,
            },
        );
    }

    /// Record a successful report.  No-op for unregistered endpoints.
    pub fn heartbeat(&mut self, endpoint: Endpoint) {
        if let Some(entry) = self.feeds.get_mut(&endpoint) {
            entry.last_report = Instant::now();
        }
    }

    /// Unregistered endpoints are stale.
    pub fn health(&self, endpoint: Endpoint) -> FeedHealth {
        match self.feeds.get(&endpoint) {
            Some(entry) if entry.last_report.elapsed() <= entry.deadline => FeedHealth::Fresh,
            _ => FeedHealth::Stale,
        }
    }

    /// Feeds whose health changed since the previous call, with their new
    /// health.
    pub fn transitions(&mut self) -> Vec<(Endpoint, FeedHealth)> {
        let mut changed = Vec::new();
        for (endpoint, entry) in self.feeds.iter_mut() {
            let now = if entry.last_report.elapsed() <= entry.deadline {
                FeedHealth::Fresh
            } else {
                FeedHealth::Stale
            };
            if now != entry.reported {
                entry.reported = now;
                changed.push((*endpoint, now));
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fresh_feed_after_register() {
        let mut wd = FeedWatchdog::new();
        wd.register(Endpoint::Motion, Duration::from_secs(5));
        assert_eq!(wd.health(Endpoint::Motion), FeedHealth::Fresh);
        assert_eq!(wd.health(Endpoint::Sensing), FeedHealth::Stale);
    }

    #[test]
    fn heartbeat_keeps_feed_fresh() {
        let mut wd = FeedWatchdog::new();
        wd.register(Endpoint::Sensing, Duration::from_millis(20));
        thread::sleep(Duration::from_millis(10));
        wd.heartbeat(Endpoint::Sensing);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(wd.health(Endpoint::Sensing), FeedHealth::Fresh);
    }

    #[test]
    fn transitions_reported_once() {
        let mut wd = FeedWatchdog::new();
        wd.register(Endpoint::Motion, Duration::from_millis(20));
        wd.register(Endpoint::Sensing, Duration::from_secs(60));
        assert!(wd.transitions().is_empty());

        thread::sleep(Duration::from_millis(30));
        assert_eq!(wd.transitions(), vec![(Endpoint::Motion, FeedHealth::Stale)]);
        assert!(wd.transitions().is_empty(), "no repeat while still stale");

        wd.heartbeat(Endpoint::Motion);
        assert_eq!(wd.transitions(), vec![(Endpoint::Motion, FeedHealth::Fresh)]);
    }
}
