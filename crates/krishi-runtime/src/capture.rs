//! [`CaptureSequencer`] – three-angle inspection at one stop.
//!
//! Strictly sequential: `TILT` (acknowledged) → settle → capture → infer,
//! once per [`CapturePhase`] in top, middle, bottom order, then the tilt
//! returns to the middle angle.  The next `TILT` is only issued after the
//! previous frame has been retrieved.
//!
//! A camera or inference failure at one angle is logged and that angle
//! contributes no detections; it never aborts the stop.  Frames with at
//! least one detection are archived and their reference attached to the
//! angle.

use std::sync::Arc;

use chrono::Local;
use krishi_hal::{Camera, Detector, ImageArchive, image_name};
use krishi_kernel::CommandGate;
use krishi_link::Command;
use krishi_types::{AngleDetections, CapturePhase, Endpoint, KrishiError, MergedDetections};
use tokio::time::sleep;
use tracing::{info, instrument, warn};

use crate::config::CaptureConfig;

/// Result of one stop.
#[derive(Debug, Clone, PartialEq)]
pub struct StopScan {
    pub angles: Vec<AngleDetections>,
    pub merged: MergedDetections,
}

pub struct CaptureSequencer {
    config: CaptureConfig,
    camera: Box<dyn Camera>,
    detector: Arc<dyn Detector>,
    archive: Option<Arc<dyn ImageArchive>>,
}

impl CaptureSequencer {
    pub fn new(config: CaptureConfig, camera: Box<dyn Camera>, detector: Arc<dyn Detector>) -> Self {
        Self {
            config,
            camera,
            detector,
            archive: None,
        }
    }

    pub fn with_archive(mut self, archive: Arc<dyn ImageArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn tilt_for(&self, phase: CapturePhase) -> u8 {
        match phase {
            CapturePhase::Top => self.config.tilt_top,
            CapturePhase::Middle => self.config.tilt_middle,
            CapturePhase::Bottom => self.config.tilt_bottom,
        }
    }

    /// Scan the plant in front of the camera.  `on_phase` is called as each
    /// phase begins.
    #[instrument(skip(self, gate, on_phase))]
    pub async fn scan_stop(
        &mut self,
        gate: &CommandGate,
        mission_id: Option<&str>,
        plant_number: u32,
        mut on_phase: impl FnMut(CapturePhase) + Send,
    ) -> Result<StopScan, KrishiError> {
        let mut angles = Vec::with_capacity(CapturePhase::SEQUENCE.len());
        for phase in CapturePhase::SEQUENCE {
            on_phase(phase);
            angles.push(self.capture_phase(gate, phase, mission_id, plant_number).await?);
        }
        gate.send(Endpoint::Sensing, Command::Tilt(self.config.tilt_middle)).await?;

        let merged = MergedDetections::merge(&angles);
        info!(plant_number, classes = merged.len(), "stop scanned");
        Ok(StopScan { angles, merged })
    }

    async fn capture_phase(
        &mut self,
        gate: &CommandGate,
        phase: CapturePhase,
        mission_id: Option<&str>,
        plant_number: u32,
    ) -> Result<AngleDetections, KrishiError> {
        gate.send(Endpoint::Sensing, Command::Tilt(self.tilt_for(phase))).await?;
        sleep(self.config.settle()).await;

        let frame = match self.camera.capture().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%phase, camera = self.camera.id(), error = %e, "capture failed; angle skipped");
                return Ok(AngleDetections {
                    phase,
                    detections: Vec::new(),
                    image_ref: None,
                });
            }
        };

        let detections = match self.detector.detect(&frame).await {
            Ok(d) => d,
            Err(e) => {
                warn!(%phase, error = %e, "inference failed; angle reports nothing");
                Vec::new()
            }
        };

        let mut image_ref = None;
        if !detections.is_empty() {
            if let Some(archive) = &self.archive {
                let classes: Vec<&str> = detections.iter().map(|d| d.class_name.as_str()).collect();
                let name = image_name(mission_id, plant_number, phase, &classes, Local::now());
                match archive.store(&name, &frame) {
                    Ok(reference) => image_ref = Some(reference),
                    Err(e) => warn!(%phase, error = %e, "image not archived"),
                }
            }
        }

        Ok(AngleDetections {
            phase,
            detections,
            image_ref,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krishi_hal::{DirectoryArchive, ScriptedDetector, SimEvent, SimRobot};
    use krishi_kernel::{EmergencyLatch, StateVerifier};
    use krishi_link::{EndpointLink, Link, RetryPolicy};
    use krishi_types::Detection;
    use tokio::time::Duration;

    fn gate(robot: &SimRobot) -> CommandGate {
        let policy = RetryPolicy {
            ack_timeout: Duration::from_millis(50),
            max_attempts: 3,
        };
        let link = Link::new(
            EndpointLink::new(Endpoint::Motion, robot.motion_transport(), policy),
            EndpointLink::new(Endpoint::Sensing, robot.sensing_transport(), policy),
        );
        CommandGate::new(Arc::new(link), StateVerifier::new(), EmergencyLatch::new())
    }

    fn fast() -> CaptureConfig {
        CaptureConfig {
            settle_ms: 1,
            ..CaptureConfig::default()
        }
    }

    #[tokio::test]
    async fn angles_are_strictly_sequential() -> Result<(), Box<dyn std::error::Error>> {
        let robot = SimRobot::new();
        let gate = gate(&robot);
        let detector = Arc::new(ScriptedDetector::new(vec![]).journaled(&robot));
        let mut seq = CaptureSequencer::new(fast(), Box::new(robot.camera()), detector);
        let mut seen = Vec::new();
        seq.scan_stop(&gate, None, 1, |p| seen.push(p)).await?;

        assert_eq!(seen, CapturePhase::SEQUENCE.to_vec());
        let tilt = |t: &str| SimEvent::Frame {
            endpoint: Endpoint::Sensing,
            frame: format!("<TILT:{t}>"),
        };
        assert_eq!(
            robot.journal(),
            vec![
                tilt("75"),
                SimEvent::Capture { tilt: 75 },
                SimEvent::Detect,
                tilt("90"),
                SimEvent::Capture { tilt: 90 },
                SimEvent::Detect,
                tilt("120"),
                SimEvent::Capture { tilt: 120 },
                SimEvent::Detect,
                tilt("90"),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn merge_keeps_max_confidence_per_class() -> Result<(), Box<dyn std::error::Error>> {
        let robot = SimRobot::new();
        let gate = gate(&robot);
        let detector = Arc::new(ScriptedDetector::new(vec![
            vec![Detection::new("Rust_Mildew", 0.7)],
            vec![],
            vec![Detection::new("Rust_Mildew", 0.9), Detection::new("Leaf_Spot", 0.4)],
        ]));
        let mut seq = CaptureSequencer::new(fast(), Box::new(robot.camera()), detector);
        let scan = seq.scan_stop(&gate, None, 1, |_| {}).await?;

        assert_eq!(scan.merged.len(), 2);
        assert_eq!(scan.merged.get("Rust_Mildew"), Some(0.9));
        assert_eq!(scan.angles[0].detections.len(), 1);
        assert!(scan.angles[1].detections.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn frames_with_detections_are_archived() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let archive = Arc::new(DirectoryArchive::open(dir.path())?);
        let robot = SimRobot::new();
        let gate = gate(&robot);
        let detector = Arc::new(ScriptedDetector::new(vec![
            vec![],
            vec![Detection::new("Leaf_Spot", 0.8)],
        ]));
        let mut seq =
            CaptureSequencer::new(fast(), Box::new(robot.camera()), detector).with_archive(archive);
        let scan = seq
            .scan_stop(&gate, Some("KR-MSN-2025-03-14-00042"), 7, |_| {})
            .await?;

        assert!(scan.angles[0].image_ref.is_none());
        let reference = scan.angles[1].image_ref.clone().unwrap();
        assert!(reference.starts_with("msn_00042_p7_middle_Leaf_Spot_"));
        assert!(dir.path().join(&reference).exists());
        assert!(scan.angles[2].image_ref.is_none());
        Ok(())
    }
}
