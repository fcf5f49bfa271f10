//! JPEG archive for frames that produced detections.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use krishi_types::{CapturePhase, KrishiError};
use tracing::debug;

use crate::camera::CameraFrame;

pub trait ImageArchive: Send + Sync {
    /// Persist `frame` under `name` and return the reference stored with the
    /// detection events.
    fn store(&self, name: &str, frame: &CameraFrame) -> Result<String, KrishiError>;
}

/// Archive file name: `msn_<suffix>_p<plant>_<angle>_<class>_<HHMMSS>.jpg`,
/// where `<suffix>` is the last `-` segment of the mission id and `<class>`
/// is the alphabetically first detected class.
pub fn image_name(
    mission_id: Option<&str>,
    plant_number: u32,
    phase: CapturePhase,
    classes: &[&str],
    at: DateTime<Local>,
) -> String {
    let suffix = mission_id
        .and_then(|id| id.rsplit('-').next())
        .unwrap_or("UNKNOWN");
    let primary = classes
        .iter()
        .min()
        .map(|c| c.replace(' ', "_"))
        .unwrap_or_else(|| "none".to_string());
    format!(
        "msn_{suffix}_p{plant_number}_{phase}_{primary}_{}.jpg",
        at.format("%H%M%S")
    )
}

/// Writes JPEG files into one directory.
pub struct DirectoryArchive {
    root: PathBuf,
    quality: u8,
}

impl DirectoryArchive {
    /// Create the directory if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, KrishiError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .map_err(|e| KrishiError::Io(format!("cannot create {}: {e}", root.display())))?;
        Ok(Self { root, quality: 90 })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ImageArchive for DirectoryArchive {
    fn store(&self, name: &str, frame: &CameraFrame) -> Result<String, KrishiError> {
        let path = self.root.join(name);
        let jpeg = frame.encode_jpeg(self.quality)?;
        std::fs::write(&path, jpeg)
            .map_err(|e| KrishiError::Io(format!("cannot write {}: {e}", path.display())))?;
        debug!(path = %path.display(), "image archived");
        Ok(name.to_string())
    }
}
