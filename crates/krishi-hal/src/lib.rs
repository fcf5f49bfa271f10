//! `krishi-hal` – Hardware Abstraction Layer
//!
//! Traits and drivers for the devices the orchestrator touches directly.
//! The two microcontroller endpoints are reached through `krishi-link`; this
//! crate covers everything else.
//!
//! # Modules
//!
//! - [`camera`] – [`Camera`] trait, RGB frames and the command-driven still
//!   camera.
//! - [`detector`] – [`Detector`] trait and the HTTP inference client.
//! - [`archive`] – JPEG archive for frames that produced detections.
//! - [`drift`] – proportional row-drift corrector.
//! - [`sim`] – simulated endpoints, camera and detector.

pub mod archive;
pub mod camera;
pub mod detector;
pub mod drift;
pub mod sim;

pub use archive::{DirectoryArchive, ImageArchive, image_name};
pub use camera::{Camera, CameraFrame, CommandCamera};
pub use detector::{Detector, HttpDetector};
pub use drift::DriftCorrector;
pub use sim::{ScriptedDetector, SimCamera, SimEvent, SimRobot, SimWorld};
