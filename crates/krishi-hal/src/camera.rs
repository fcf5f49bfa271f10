//! `Camera` trait and the command-driven still camera.

use std::time::Duration;

use async_trait::async_trait;
use image::ColorType;
use image::codecs::jpeg::JpegEncoder;
use krishi_types::KrishiError;
use tokio::process::Command;
use tracing::debug;

/// An RGB24 image frame.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGB24 pixels, `width * height * 3` bytes.
    pub data: Vec<u8>,
}

impl CameraFrame {
    /// Decode any format the `image` crate understands (JPEG, PNG, ...).
    pub fn decode(bytes: &[u8]) -> Result<Self, KrishiError> {
        let rgb = image::load_from_memory(bytes)
            .map_err(|e| hardware("camera", format!("cannot decode frame: {e}")))?
            .to_rgb8();
        Ok(Self {
            width: rgb.width(),
            height: rgb.height(),
            data: rgb.into_raw(),
        })
    }

    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, KrishiError> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode(&self.data, self.width, self.height, ColorType::Rgb8)
            .map_err(|e| hardware("camera", format!("cannot encode frame: {e}")))?;
        Ok(out)
    }
}

/// A still camera on the pan-tilt head.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Stable identifier, e.g. `"pan_tilt"`.
    fn id(&self) -> &str;

    /// Acquire one frame.
    async fn capture(&mut self) -> Result<CameraFrame, KrishiError>;
}

/// Captures by running an external still-capture program that writes one
/// encoded image to stdout, e.g. `rpicam-still -n -t 1 -e jpg -o -`.
pub struct CommandCamera {
    id: String,
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCamera {
    pub fn new(id: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id: id.into(),
            program: program.into(),
            args,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Camera for CommandCamera {
    fn id(&self) -> &str {
        &self.id
    }

    async fn capture(&mut self) -> Result<CameraFrame, KrishiError> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.program)
                .args(&self.args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| hardware(&self.id, "capture timed out"))?
        .map_err(|e| hardware(&self.id, format!("cannot run {}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(hardware(
                &self.id,
                format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        let frame = CameraFrame::decode(&output.stdout)?;
        debug!(camera = %self.id, width = frame.width, height = frame.height, "frame captured");
        Ok(frame)
    }
}

fn hardware(component: &str, details: impl Into<String>) -> KrishiError {
    KrishiError::Hardware {
        component: component.to_string(),
        details: details.into(),
    }
}
