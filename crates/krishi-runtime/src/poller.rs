//! [`SensorPoller`] – the only writer of the cached [`SensorSnapshot`].
//!
//! Every interval it asks both endpoints for a report concurrently and
//! replaces the snapshot in a `watch` channel.  A failed motion report reads
//! as maximum clearance and an unknown edge count; a failed or marker-only
//! environment report keeps the last known value.  Edge counts are never
//! carried over, since an older count may predate a `RESET_ENCODER`.  `updated_at` is stamped *before* the queries are
//! issued, so a reader that sent `RESET_ENCODER` at time `t` can trust any
//! snapshot stamped after `t`.

use std::sync::Arc;

use chrono::Utc;
use krishi_kernel::{FeedHealth, FeedWatchdog};
use krishi_link::{EventBus, Link, Topic};
use krishi_types::{AlertLevel, Endpoint, EventPayload, MissionEvent, SensorSnapshot};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, warn};

use crate::config::LinkConfig;

pub struct SensorPoller {
    link: Arc<Link>,
    every: Duration,
    wait: Duration,
    tx: watch::Sender<SensorSnapshot>,
    watchdog: FeedWatchdog,
    bus: Option<EventBus>,
}

impl SensorPoller {
    pub fn new(link: Arc<Link>, config: &LinkConfig) -> Self {
        let (tx, _) = watch::channel(SensorSnapshot::default());
        let mut watchdog = FeedWatchdog::new();
        watchdog.register(Endpoint::Motion, config.feed_deadline());
        watchdog.register(Endpoint::Sensing, config.feed_deadline());
        Self {
            link,
            every: config.poll_interval(),
            wait: config.poll_timeout(),
            tx,
            watchdog,
            bus: None,
        }
    }

    /// Publish feed staleness alerts on `bus`.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SensorSnapshot> {
        self.tx.subscribe()
    }

    /// One poll of both endpoints.
    pub async fn poll_once(&mut self) {
        let stamp = Utc::now();
        let (motion, env) = tokio::join!(
            self.link.motion.query_motion(self.wait),
            self.link.sensing.query_env(self.wait)
        );

        let mut next = self.tx.borrow().clone();
        match motion {
            Ok(report) => {
                self.watchdog.heartbeat(Endpoint::Motion);
                next.front_cm = report.front_cm;
                next.side_cm = report.side_cm;
                next.encoder_edges = report.encoder_edges;
            }
            Err(e) => {
                debug!(error = %e, "motion report unavailable");
                next.front_cm = None;
                next.side_cm = None;
                next.encoder_edges = None;
            }
        }
        match env {
            Ok(report) => {
                self.watchdog.heartbeat(Endpoint::Sensing);
                if report.temperature_c.is_some() {
                    next.temperature_c = report.temperature_c;
                }
                if report.humidity_pct.is_some() {
                    next.humidity_pct = report.humidity_pct;
                }
            }
            Err(e) => debug!(error = %e, "environment report unavailable"),
        }
        next.updated_at = Some(stamp);
        self.tx.send_replace(next);

        for (endpoint, health) in self.watchdog.transitions() {
            let (level, message) = match health {
                FeedHealth::Stale => (AlertLevel::Warning, format!("{endpoint} sensor feed is stale")),
                FeedHealth::Fresh => (AlertLevel::Info, format!("{endpoint} sensor feed recovered")),
            };
            warn!(%endpoint, ?health, "sensor feed health changed");
            if let Some(bus) = &self.bus {
                bus.publish_to(
                    Topic::Alerts,
                    MissionEvent::new("krishi-runtime::poller", EventPayload::Alert { level, message }),
                );
            }
        }
    }

    /// Poll forever at the configured interval.
    pub async fn run(mut self) {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    /// Spawn [`run`](Self::run), returning the receiver and the task handle.
    pub fn spawn(self) -> (watch::Receiver<SensorSnapshot>, JoinHandle<()>) {
        let rx = self.subscribe();
        (rx, tokio::spawn(self.run()))
    }
}
