//! In-process simulated robot for headless runs and tests.
//!
//! [`SimRobot`] holds one shared [`SimWorld`] and hands out frame transports
//! for both endpoints plus a camera, all of which journal what they are asked
//! to do in a single ordered [`SimEvent`] log.  Replies follow the real
//! endpoint firmware: `<ACK:NAME_OK>` for commands and `<DATA:SENSORS:..>`
//! for `get_data`.
//!
//! The drive model is deliberately simple: every motion `get_data` poll made
//! while both wheels turn forward advances the encoder by a fixed number of
//! edges.
//!
//! ```rust
//! use krishi_hal::sim::SimRobot;
//!
//! let robot = SimRobot::new()
//!     .with_environment(Some(31.0), Some(60.0))
//!     .with_edges_per_poll(5);
//! let motion = robot.motion_transport();
//! let sensing = robot.sensing_transport();
//! # drop((motion, sensing));
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use krishi_link::{Command, FrameTransport};
use krishi_types::{Detection, Endpoint, KrishiError};

use crate::camera::{Camera, CameraFrame};
use crate::detector::Detector;

/// One entry in the simulation journal.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// A frame written to an endpoint.
    Frame { endpoint: Endpoint, frame: String },
    /// The camera captured with the tilt servo at `tilt` degrees.
    Capture { tilt: u8 },
    /// The detector was invoked.
    Detect,
}

/// The mutable state of the simulated robot.
#[derive(Debug, Clone)]
pub struct SimWorld {
    pub front_cm: f32,
    pub side_cm: f32,
    pub temperature_c: Option<f32>,
    pub humidity_pct: Option<f32>,
    pub edges: u64,
    pub edges_per_poll: u64,
    pub wheels: (i16, i16),
    pub pan: u8,
    pub tilt: u8,
    /// Pump relays currently open.
    pub open_tanks: Vec<u8>,
    /// When set the endpoint swallows every frame without replying.
    pub motion_silent: bool,
    pub sensing_silent: bool,
    pub journal: Vec<SimEvent>,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self {
            front_cm: 200.0,
            side_cm: 20.0,
            temperature_c: Some(28.0),
            humidity_pct: Some(55.0),
            edges: 0,
            edges_per_poll: 2,
            wheels: (0, 0),
            pan: 90,
            tilt: 90,
            open_tanks: Vec::new(),
            motion_silent: false,
            sensing_silent: false,
            journal: Vec::new(),
        }
    }
}

/// Handle to the shared simulated world.  Clones share state.
#[derive(Clone, Default)]
pub struct SimRobot {
    world: Arc<Mutex<SimWorld>>,
}

impl SimRobot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_environment(self, temperature_c: Option<f32>, humidity_pct: Option<f32>) -> Self {
        self.update(|w| {
            w.temperature_c = temperature_c;
            w.humidity_pct = humidity_pct;
        });
        self
    }

    pub fn with_edges_per_poll(self, edges: u64) -> Self {
        self.update(|w| w.edges_per_poll = edges);
        self
    }

    pub fn with_front_clearance(self, cm: f32) -> Self {
        self.update(|w| w.front_cm = cm);
        self
    }

    pub fn with_side_clearance(self, cm: f32) -> Self {
        self.update(|w| w.side_cm = cm);
        self
    }

    /// Mutate the world in place.
    pub fn update(&self, f: impl FnOnce(&mut SimWorld)) {
        f(&mut self.lock());
    }

    /// A copy of the current world.
    pub fn world(&self) -> SimWorld {
        self.lock().clone()
    }

    pub fn journal(&self) -> Vec<SimEvent> {
        self.lock().journal.clone()
    }

    /// Every frame sent to `endpoint`, in order.
    pub fn frames(&self, endpoint: Endpoint) -> Vec<String> {
        self.lock()
            .journal
            .iter()
            .filter_map(|e| match e {
                SimEvent::Frame { endpoint: ep, frame } if *ep == endpoint => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn motion_transport(&self) -> Box<dyn FrameTransport> {
        Box::new(SimEndpoint {
            endpoint: Endpoint::Motion,
            robot: self.clone(),
            replies: VecDeque::new(),
        })
    }

    pub fn sensing_transport(&self) -> Box<dyn FrameTransport> {
        Box::new(SimEndpoint {
            endpoint: Endpoint::Sensing,
            robot: self.clone(),
            replies: VecDeque::new(),
        })
    }

    pub fn camera(&self) -> SimCamera {
        SimCamera {
            robot: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimWorld> {
        // A poisoned lock only means a test panicked mid-update; the data is
        // still usable for reporting.
        self.world.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct SimEndpoint {
    endpoint: Endpoint,
    robot: SimRobot,
    replies: VecDeque<String>,
}

impl SimEndpoint {
    fn respond(&self, world: &mut SimWorld, frame: &str) -> Option<String> {
        let body = frame.trim().trim_start_matches('<').trim_end_matches('>');
        let mut parts = body.split(':');
        let name = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();
        let arg = |i: usize| args.get(i).and_then(|a| a.parse::<i64>().ok());

        let silent = match self.endpoint {
            Endpoint::Motion => world.motion_silent,
            Endpoint::Sensing => world.sensing_silent,
        };
        if silent {
            return None;
        }

        if name == Command::GetData.name() {
            return Some(match self.endpoint {
                Endpoint::Motion => {
                    if world.wheels.0 > 0 && world.wheels.1 > 0 {
                        world.edges += world.edges_per_poll;
                    }
                    format!(
                        "<DATA:SENSORS:F:{},S:{},E:{}>",
                        world.front_cm, world.side_cm, world.edges
                    )
                }
                Endpoint::Sensing => format!(
                    "<DATA:SENSORS:T:{},H:{}>",
                    env_text(world.temperature_c),
                    env_text(world.humidity_pct)
                ),
            });
        }

        match (self.endpoint, name) {
            (Endpoint::Motion, "MOVE") => {
                let (Some(l), Some(r)) = (arg(0), arg(1)) else {
                    return Some("<ERROR:bad_args>".into());
                };
                world.wheels = (l as i16, r as i16);
            }
            (Endpoint::Motion, "STOP") => {
                world.wheels = (0, 0);
                world.open_tanks.clear();
            }
            (Endpoint::Motion, "RESET_ENCODER") => world.edges = 0,
            (Endpoint::Motion, "PUMP") => {
                let (Some(tank), Some(state)) = (arg(0), arg(1)) else {
                    return Some("<ERROR:bad_args>".into());
                };
                let tank = tank as u8;
                world.open_tanks.retain(|t| *t != tank);
                if state == 1 {
                    world.open_tanks.push(tank);
                }
            }
            (Endpoint::Motion, "SPRAY") => {}
            (Endpoint::Sensing, "PAN") => world.pan = arg(0).unwrap_or(90) as u8,
            (Endpoint::Sensing, "TILT") => world.tilt = arg(0).unwrap_or(90) as u8,
            (
                Endpoint::Sensing,
                "PIPE" | "PIPE_EXTEND" | "INDICATE" | "BUZZER_ON" | "STOP_NANO",
            ) => {}
            _ => return Some("<ERROR:unknown_command>".into()),
        }
        Some(format!("<ACK:{name}_OK>"))
    }
}

fn env_text(value: Option<f32>) -> String {
    value.map_or_else(|| krishi_link::FAILURE_MARKER.to_string(), |v| v.to_string())
}

#[async_trait]
impl FrameTransport for SimEndpoint {
    async fn send_frame(&mut self, frame: &str) -> Result<(), KrishiError> {
        let reply = {
            let mut world = self.robot.lock();
            world.journal.push(SimEvent::Frame {
                endpoint: self.endpoint,
                frame: frame.to_string(),
            });
            self.respond(&mut world, frame)
        };
        if let Some(reply) = reply {
            self.replies.push_back(reply);
        }
        Ok(())
    }

    async fn recv_frame(&mut self) -> Result<String, KrishiError> {
        match self.replies.pop_front() {
            Some(reply) => Ok(reply),
            // A silent endpoint never answers; the link's timeout decides.
            None => std::future::pending().await,
        }
    }
}

/// Returns a small grey frame and journals the tilt it was taken at.
pub struct SimCamera {
    robot: SimRobot,
}

#[async_trait]
impl Camera for SimCamera {
    fn id(&self) -> &str {
        "sim_pan_tilt"
    }

    async fn capture(&mut self) -> Result<CameraFrame, KrishiError> {
        let mut world = self.robot.lock();
        let tilt = world.tilt;
        world.journal.push(SimEvent::Capture { tilt });
        Ok(CameraFrame {
            width: 8,
            height: 8,
            data: vec![tilt; 8 * 8 * 3],
        })
    }
}

/// Replays a fixed sequence of detection sets, one per call, then reports
/// nothing.
pub struct ScriptedDetector {
    script: Mutex<VecDeque<Vec<Detection>>>,
    robot: Option<SimRobot>,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            robot: None,
        }
    }

    /// Journal each invocation into `robot`'s event log.
    pub fn journaled(mut self, robot: &SimRobot) -> Self {
        self.robot = Some(robot.clone());
        self
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn detect(&self, _frame: &CameraFrame) -> Result<Vec<Detection>, KrishiError> {
        if let Some(robot) = &self.robot {
            robot.update(|w| w.journal.push(SimEvent::Detect));
        }
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        Ok(script.pop_front().unwrap_or_default())
    }
}
