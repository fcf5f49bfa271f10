//! Shared rig for the scenario tests: a simulated robot, the full runner
//! and an in-memory detection store.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use krishi_hal::{ScriptedDetector, SimRobot};
use krishi_kernel::{CommandGate, EmergencyLatch, StateVerifier};
use krishi_link::{EndpointLink, EventBus, Link, Topic, TopicReceiver};
use krishi_memory::{DetectionSink, SessionSummary, SqliteDetectionStore};
use krishi_runtime::config::{DispenseMethod, LinkConfig};
use krishi_runtime::{Collaborators, CommandHandle, MissionConfig, MissionController, Runner, SensorPoller};
use krishi_types::{
    Detection, Endpoint, IndividualRow, MissionEvent, MissionPlan, MissionState, OperatorCommand, PlanPayload,
    StatusSnapshot,
};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

pub const WAIT: Duration = Duration::from_secs(10);

/// Fast timings so scenarios finish in well under a second.
pub fn config() -> MissionConfig {
    let mut config = MissionConfig::default();
    config.link = LinkConfig {
        ack_timeout_ms: 50,
        max_attempts: 3,
        poll_interval_ms: 2,
        poll_timeout_ms: 30,
        feed_deadline_ms: 3000,
    };
    config.navigation.step_timeout_ms = 5000;
    config.navigation.pivot_ms = 10;
    config.capture.settle_ms = 1;
    // 0.5 mL at 5 mL/s: 100 ms per full dose.
    config.treatment.base_volume_ml = 0.5;
    config.treatment.min_volume_ml = 0.1;
    config.treatment.method = DispenseMethod::Spray;
    config.telemetry.flush_backoff_ms = 1;
    config
}

pub fn individual(plants: u32, spacing_cm: f32) -> PlanPayload {
    PlanPayload::Typed(MissionPlan::SingleRowIndividual {
        row: IndividualRow {
            plant_count: plants,
            spacing_cm,
        },
    })
}

/// One detection list per capture angle for a single plant.
pub fn plant(top: Vec<Detection>, middle: Vec<Detection>, bottom: Vec<Detection>) -> Vec<Vec<Detection>> {
    vec![top, middle, bottom]
}

pub fn healthy_plant() -> Vec<Vec<Detection>> {
    plant(vec![], vec![], vec![])
}

pub struct Rig {
    pub robot: SimRobot,
    pub handle: CommandHandle,
    pub store: Arc<SqliteDetectionStore>,
    pub bus: EventBus,
    runner: JoinHandle<()>,
    poller: JoinHandle<()>,
}

impl Rig {
    pub fn new(robot: SimRobot, plants: Vec<Vec<Vec<Detection>>>) -> Self {
        Self::with_config(robot, plants, config())
    }

    pub fn with_config(robot: SimRobot, plants: Vec<Vec<Vec<Detection>>>, config: MissionConfig) -> Self {
        let store = Arc::new(SqliteDetectionStore::open_in_memory().expect("in-memory store"));
        let sink: Arc<dyn DetectionSink> = store.clone();
        let policy = config.link.retry_policy();
        let link = Arc::new(Link::new(
            EndpointLink::new(Endpoint::Motion, robot.motion_transport(), policy),
            EndpointLink::new(Endpoint::Sensing, robot.sensing_transport(), policy),
        ));
        let bus = EventBus::default();
        let (sensors, poller) = SensorPoller::new(link.clone(), &config.link)
            .with_bus(bus.clone())
            .spawn();
        let gate = Arc::new(CommandGate::new(
            link,
            StateVerifier::standard(config.treatment.tanks(), config.treatment.max_dispense_ms()),
            EmergencyLatch::new(),
        ));
        let script = plants.into_iter().flatten().collect();
        let devices = Collaborators {
            camera: Box::new(robot.camera()),
            detector: Arc::new(ScriptedDetector::new(script).journaled(&robot)),
            archive: None,
            sink: Some(sink),
        };
        let controller = MissionController::new(config, gate, sensors, devices, bus.clone());
        let (runner, handle) = Runner::new(controller);
        Self {
            robot,
            handle,
            store,
            bus,
            runner: runner.spawn(),
            poller,
        }
    }

    pub fn subscribe(&self, topic: Topic) -> TopicReceiver {
        self.bus.subscribe_to(topic)
    }

    /// Wait until the published status satisfies `pred`.
    pub async fn wait_for(&self, what: &str, pred: impl Fn(&StatusSnapshot) -> bool) -> Arc<StatusSnapshot> {
        let mut rx = self.handle.subscribe_status();
        let found = timeout(WAIT, async {
            loop {
                let current = rx.borrow_and_update().clone();
                if pred(&current) {
                    return current;
                }
                if rx.changed().await.is_err() {
                    return current;
                }
            }
        })
        .await;
        match found {
            Ok(status) if pred(&status) => status,
            Ok(status) => panic!("status channel closed before {what}; last: {status:?}"),
            Err(_) => panic!("timed out waiting for {what}; last: {:?}", self.handle.status()),
        }
    }

    pub async fn wait_state(&self, state: MissionState) -> Arc<StatusSnapshot> {
        self.wait_for(state.as_str(), |s| s.robot_status == state).await
    }

    /// Handshake done, robot idle.
    pub async fn ready(&self) {
        self.wait_state(MissionState::Idle).await;
    }

    /// Save and start `plan`, returning the mission id.
    pub async fn launch(&self, plan: PlanPayload) -> String {
        self.ready().await;
        self.handle
            .execute(OperatorCommand::SaveMission { plan })
            .await
            .expect("plan accepted");
        let id = self
            .handle
            .status()
            .mission_id
            .clone()
            .expect("mission id assigned");
        self.handle
            .execute(OperatorCommand::StartMission)
            .await
            .expect("mission started");
        id
    }

    /// Poll the store until the session summary for `mission_id` lands.
    pub async fn summary(&self, mission_id: &str) -> SessionSummary {
        let found = timeout(WAIT, async {
            loop {
                if let Ok(Some(summary)) = self.store.session_summary(mission_id) {
                    return summary;
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        found.expect("session summary flushed")
    }

    pub fn frames(&self, endpoint: Endpoint) -> Vec<String> {
        self.robot.frames(endpoint)
    }

    pub fn count(&self, endpoint: Endpoint, prefix: &str) -> usize {
        self.frames(endpoint).iter().filter(|f| f.starts_with(prefix)).count()
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.runner.abort();
        self.poller.abort();
    }
}

/// Collect every event already queued on `rx`.
pub async fn drain(rx: &mut TopicReceiver) -> Vec<MissionEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = timeout(Duration::from_millis(20), rx.recv()).await {
        events.push(event);
    }
    events
}
