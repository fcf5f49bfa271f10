//! Configuration Vault – reads/writes `~/.krishinetra/config.toml`.

use krishi_runtime::{LogFormat, MissionConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// The still-capture program behind the RGB camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub id: String,
    pub program: String,
    pub args: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            id: "rgb".to_string(),
            program: "rpicam-still".to_string(),
            args: ["-n", "-t", "1", "-e", "jpg", "-o", "-"]
                .into_iter()
                .map(String::from)
                .collect(),
            timeout_ms: 5000,
        }
    }
}

/// Persisted operator configuration stored in `~/.krishinetra/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Motion controller: a device node or `tcp://host:port` bridge.
    #[serde(default = "default_motion_port")]
    pub motion_port: String,

    /// Sensing controller: a device node or `tcp://host:port` bridge.
    #[serde(default = "default_sensing_port")]
    pub sensing_port: String,

    /// SQLite detection store.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// HTTP/WebSocket port of the operator cockpit.
    #[serde(default = "default_cockpit_port")]
    pub cockpit_port: u16,

    /// Required as `?key=` by the cockpit when non-empty.
    #[serde(default, skip_serializing_if = "is_unset")]
    pub cockpit_password: Zeroizing<String>,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub mission: MissionConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("motion_port", &self.motion_port)
            .field("sensing_port", &self.sensing_port)
            .field("database", &self.database)
            .field("cockpit_port", &self.cockpit_port)
            .field(
                "cockpit_password",
                if is_unset(&self.cockpit_password) { &"<not set>" } else { &"<redacted>" },
            )
            .field("log_format", &self.log_format)
            .field("camera", &self.camera)
            .field("mission", &self.mission)
            .finish()
    }
}

fn is_unset(secret: &Zeroizing<String>) -> bool {
    secret.is_empty()
}

fn default_motion_port() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_sensing_port() -> String {
    "/dev/ttyUSB1".to_string()
}
fn default_database() -> PathBuf {
    PathBuf::from("krishinetra.db")
}
fn default_cockpit_port() -> u16 {
    krishi_cockpit::DEFAULT_PORT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            motion_port: default_motion_port(),
            sensing_port: default_sensing_port(),
            database: default_database(),
            cockpit_port: default_cockpit_port(),
            cockpit_password: Zeroizing::default(),
            log_format: LogFormat::default(),
            camera: CameraConfig::default(),
            mission: MissionConfig::default(),
        }
    }
}

impl Config {
    /// The cockpit password, or `None` when the cockpit is open.
    pub fn cockpit_key(&self) -> Option<Zeroizing<String>> {
        (!is_unset(&self.cockpit_password)).then(|| self.cockpit_password.clone())
    }
}

/// Return the path to `~/.krishinetra/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".krishinetra").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg = parse(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

pub(crate) fn parse(raw: &str) -> Result<Config, String> {
    toml::from_str(raw).map_err(|e| format!("Failed to parse config: {}", e))
}

/// Apply `KRISHI_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `KRISHI_MOTION_PORT` | `motion_port` |
/// | `KRISHI_SENSING_PORT` | `sensing_port` |
/// | `KRISHI_DATABASE` | `database` |
/// | `KRISHI_COCKPIT_PORT` | `cockpit_port` |
/// | `KRISHI_INFERENCE_URL` | `mission.inference.url` |
/// | `KRISHI_COCKPIT_PASSWORD` | `cockpit_password` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("KRISHI_MOTION_PORT") {
        cfg.motion_port = v;
    }
    if let Ok(v) = std::env::var("KRISHI_SENSING_PORT") {
        cfg.sensing_port = v;
    }
    if let Ok(v) = std::env::var("KRISHI_DATABASE") {
        cfg.database = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("KRISHI_COCKPIT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.cockpit_port = port;
    }
    if let Ok(v) = std::env::var("KRISHI_INFERENCE_URL") {
        cfg.mission.inference.url = v;
    }
    if let Ok(v) = std::env::var("KRISHI_COCKPIT_PASSWORD") {
        cfg.cockpit_password = Zeroizing::new(v);
    }
}

/// Save the config to disk, creating `~/.krishinetra/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner-only directory (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = Zeroizing::new(toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?);
    // Owner-only file (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw.as_bytes()).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use krishi_runtime::config::DispenseMethod;

    #[test]
    fn config_debug_redacts_password() {
        let mut cfg = Config::default();
        cfg.cockpit_password = Zeroizing::new("field-secret".to_string());
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("field-secret"), "password must not appear in debug output");
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn config_debug_shows_not_set_for_empty_password() {
        let cfg = Config::default();
        assert!(format!("{:?}", cfg).contains("<not set>"));
        assert!(cfg.cockpit_key().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn roundtrip_keeps_password_and_mission_tunables() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.cockpit_password = Zeroizing::new("s3cret".to_string());
        cfg.mission.treatment.method = DispenseMethod::Spray;
        cfg.mission.link.ack_timeout_ms = 750;
        save_to(&cfg, &path).expect("save");

        // Parsed directly so the env-override tests cannot interfere.
        let loaded = parse(&std::fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(loaded.cockpit_port, 8080);
        assert_eq!(loaded.motion_port, "/dev/ttyUSB0");
        assert_eq!(loaded.cockpit_password.as_str(), "s3cret");
        assert_eq!(loaded.mission.treatment.method, DispenseMethod::Spray);
        assert_eq!(loaded.mission.link.ack_timeout_ms, 750);
        assert_eq!(loaded.camera, CameraConfig::default());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let loaded = parse("motion_port = \"tcp://10.0.0.5:4000\"\n[mission.navigation]\nautonomous_speed = 180\n")
            .expect("parse");
        assert_eq!(loaded.motion_port, "tcp://10.0.0.5:4000");
        assert_eq!(loaded.sensing_port, "/dev/ttyUSB1");
        assert_eq!(loaded.mission.navigation.autonomous_speed, 180);
        assert_eq!(loaded.mission.link.ack_timeout_ms, 2000);
    }

    #[test]
    fn config_path_points_to_krishinetra_dir() {
        let p = config_path_for_home("/home/grower");
        assert!(p.to_string_lossy().contains(".krishinetra"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn apply_env_overrides_changes_ports() {
        // SAFETY: each test touches its own variables.
        unsafe {
            std::env::set_var("KRISHI_MOTION_PORT", "tcp://bridge:4001");
            std::env::set_var("KRISHI_SENSING_PORT", "tcp://bridge:4002");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.motion_port, "tcp://bridge:4001");
        assert_eq!(cfg.sensing_port, "tcp://bridge:4002");
        unsafe {
            std::env::remove_var("KRISHI_MOTION_PORT");
            std::env::remove_var("KRISHI_SENSING_PORT");
        }
    }

    #[test]
    fn apply_env_overrides_changes_inference_url() {
        // SAFETY: each test touches its own variables.
        unsafe { std::env::set_var("KRISHI_INFERENCE_URL", "http://jetson:8500/detect") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.mission.inference.url, "http://jetson:8500/detect");
        unsafe { std::env::remove_var("KRISHI_INFERENCE_URL") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_cockpit_port() {
        // SAFETY: each test touches its own variables.
        unsafe { std::env::set_var("KRISHI_COCKPIT_PORT", "not-a-port") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.cockpit_port, 8080);
        unsafe { std::env::remove_var("KRISHI_COCKPIT_PORT") };
    }

    #[test]
    fn apply_env_overrides_sets_password_and_database() {
        // SAFETY: each test touches its own variables.
        unsafe {
            std::env::set_var("KRISHI_COCKPIT_PASSWORD", "from-env");
            std::env::set_var("KRISHI_DATABASE", "/var/lib/krishi/field.db");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.cockpit_key().as_deref().map(String::as_str), Some("from-env"));
        assert_eq!(cfg.database, PathBuf::from("/var/lib/krishi/field.db"));
        unsafe {
            std::env::remove_var("KRISHI_COCKPIT_PASSWORD");
            std::env::remove_var("KRISHI_DATABASE");
        }
    }
}
