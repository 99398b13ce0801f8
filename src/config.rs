use crate::code::ValidationPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BagtagConfig {
    pub camera: CameraConfig,
    pub scanner: ScannerConfig,
    pub wedge: WedgeConfig,
    pub fragments: FragmentConfig,
    pub store: StoreConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Force a specific V4L2 device (e.g. /dev/video2) instead of auto-selection
    #[serde(default)]
    pub device: Option<String>,

    /// Requested capture resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Replay still images from this directory instead of a live camera
    #[serde(default)]
    pub replay_dir: Option<PathBuf>,

    /// Turn the torch on at start when the device has one and the operator asked for it
    #[serde(default = "default_prefer_torch")]
    pub prefer_torch: bool,

    /// Set zoom to the middle of the reported range at start
    #[serde(default = "default_zoom_midpoint")]
    pub zoom_midpoint: bool,

    /// Give up on a frame source that produces nothing for this long
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,
}

/// Which acquisition path the coordinator starts with
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    #[default]
    Camera,
    Hardware,
}

impl InputMode {
    pub fn toggled(self) -> Self {
        match self {
            InputMode::Camera => InputMode::Hardware,
            InputMode::Hardware => InputMode::Camera,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScannerConfig {
    /// Check digit enforcement for 10-digit codes
    #[serde(default)]
    pub validation: ValidationPolicy,

    /// Identical raw text within this window is dropped
    #[serde(default = "default_dedupe_window_ms")]
    pub dedupe_window_ms: u64,

    /// Minimum gap between detection attempts
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    /// Pause after a successful read
    #[serde(default = "default_read_cooldown_ms")]
    pub read_cooldown_ms: u64,

    /// UNMATCHED result auto-dismiss delay
    #[serde(default = "default_unmatched_dismiss_ms")]
    pub unmatched_dismiss_ms: u64,

    /// Scan more rows (and both directions) in the fallback decoder
    #[serde(default = "default_try_harder")]
    pub try_harder: bool,

    #[serde(default)]
    pub input: InputMode,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WedgeConfig {
    /// Keystroke gap that ends a burst
    #[serde(default = "default_wedge_idle_ms")]
    pub idle_ms: u64,

    /// Shortest burst flushed on idle (Enter always flushes)
    #[serde(default = "default_wedge_min_length")]
    pub min_length: usize,

    /// Read a scanner's evdev node directly instead of the terminal
    #[serde(default)]
    pub device: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FragmentConfig {
    #[serde(default = "default_fragment_window_ms")]
    pub window_ms: u64,

    #[serde(default = "default_fragment_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    /// Directory holding the key-value files
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Record cap per session
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Sessions older than this are removed at startup
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl BagtagConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("bagtag.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.prefer_torch", default_prefer_torch())?
            .set_default("camera.zoom_midpoint", default_zoom_midpoint())?
            .set_default("camera.frame_timeout_ms", default_frame_timeout_ms())?
            .set_default("scanner.validation", "strict")?
            .set_default("scanner.dedupe_window_ms", default_dedupe_window_ms())?
            .set_default("scanner.frame_interval_ms", default_frame_interval_ms())?
            .set_default("scanner.read_cooldown_ms", default_read_cooldown_ms())?
            .set_default(
                "scanner.unmatched_dismiss_ms",
                default_unmatched_dismiss_ms(),
            )?
            .set_default("scanner.try_harder", default_try_harder())?
            .set_default("scanner.input", "camera")?
            .set_default("wedge.idle_ms", default_wedge_idle_ms())?
            .set_default("wedge.min_length", default_wedge_min_length() as i64)?
            .set_default("fragments.window_ms", default_fragment_window_ms())?
            .set_default("fragments.capacity", default_fragment_capacity() as i64)?
            .set_default("store.path", default_store_path())?
            .set_default("store.max_records", default_max_records() as i64)?
            .set_default("store.session_ttl_hours", default_session_ttl_hours())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            // BAGTAG_SCANNER__DEDUPE_WINDOW_MS=1200; field names contain underscores
            .add_source(
                Environment::with_prefix("BAGTAG")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: BagtagConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.scanner.frame_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Scanner frame_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.wedge.idle_ms == 0 {
            return Err(ConfigError::Message(
                "Wedge idle_ms must be greater than 0".to_string(),
            ));
        }

        if self.wedge.min_length == 0 {
            return Err(ConfigError::Message(
                "Wedge min_length must be greater than 0".to_string(),
            ));
        }

        if self.fragments.capacity < 2 {
            return Err(ConfigError::Message(
                "Fragment capacity must be at least 2".to_string(),
            ));
        }

        if self.store.max_records == 0 {
            return Err(ConfigError::Message(
                "Store max_records must be greater than 0".to_string(),
            ));
        }

        if self.store.path.trim().is_empty() {
            return Err(ConfigError::Message(
                "Store path must not be empty".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl CameraConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

impl ScannerConfig {
    pub fn dedupe_window(&self) -> Duration {
        Duration::from_millis(self.dedupe_window_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn read_cooldown(&self) -> Duration {
        Duration::from_millis(self.read_cooldown_ms)
    }

    pub fn unmatched_dismiss(&self) -> Duration {
        Duration::from_millis(self.unmatched_dismiss_ms)
    }
}

impl WedgeConfig {
    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }
}

impl FragmentConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl StoreConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_hours * 3600)
    }
}

impl Default for BagtagConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                device: None,
                resolution: default_camera_resolution(),
                fps: default_camera_fps(),
                replay_dir: None,
                prefer_torch: default_prefer_torch(),
                zoom_midpoint: default_zoom_midpoint(),
                frame_timeout_ms: default_frame_timeout_ms(),
            },
            scanner: ScannerConfig {
                validation: ValidationPolicy::default(),
                dedupe_window_ms: default_dedupe_window_ms(),
                frame_interval_ms: default_frame_interval_ms(),
                read_cooldown_ms: default_read_cooldown_ms(),
                unmatched_dismiss_ms: default_unmatched_dismiss_ms(),
                try_harder: default_try_harder(),
                input: InputMode::default(),
            },
            wedge: WedgeConfig {
                idle_ms: default_wedge_idle_ms(),
                min_length: default_wedge_min_length(),
                device: None,
            },
            fragments: FragmentConfig {
                window_ms: default_fragment_window_ms(),
                capacity: default_fragment_capacity(),
            },
            store: StoreConfig {
                path: default_store_path(),
                max_records: default_max_records(),
                session_ttl_hours: default_session_ttl_hours(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

// Default value functions
fn default_camera_resolution() -> (u32, u32) {
    (1920, 1080)
}
fn default_camera_fps() -> u32 {
    30
}
fn default_prefer_torch() -> bool {
    true
}
fn default_zoom_midpoint() -> bool {
    true
}
fn default_frame_timeout_ms() -> u64 {
    5000
}

fn default_dedupe_window_ms() -> u64 {
    900
}
fn default_frame_interval_ms() -> u64 {
    70
}
fn default_read_cooldown_ms() -> u64 {
    500
}
fn default_unmatched_dismiss_ms() -> u64 {
    800
}
fn default_try_harder() -> bool {
    true
}

fn default_wedge_idle_ms() -> u64 {
    60
}
fn default_wedge_min_length() -> usize {
    8
}

fn default_fragment_window_ms() -> u64 {
    1000
}
fn default_fragment_capacity() -> usize {
    10
}

fn default_store_path() -> String {
    "./bagtag-data".to_string()
}
fn default_max_records() -> usize {
    crate::store::DEFAULT_MAX_RECORDS
}
fn default_session_ttl_hours() -> u64 {
    48
}

fn default_event_bus_capacity() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BagtagConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.scanner.dedupe_window(), Duration::from_millis(900));
        assert_eq!(config.scanner.validation, ValidationPolicy::Strict);
        assert_eq!(config.scanner.input, InputMode::Camera);
        assert_eq!(config.wedge.min_length, 8);
        assert_eq!(config.store.session_ttl(), Duration::from_secs(48 * 3600));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[camera]
device = "/dev/video2"
resolution = [1280, 720]

[scanner]
validation = "lenient"
input = "hardware"
dedupe_window_ms = 1200

[store]
path = "/var/lib/bagtag"
"#
        )
        .unwrap();

        let config = BagtagConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.camera.device.as_deref(), Some("/dev/video2"));
        assert_eq!(config.camera.resolution, (1280, 720));
        assert_eq!(config.scanner.validation, ValidationPolicy::Lenient);
        assert_eq!(config.scanner.input, InputMode::Hardware);
        assert_eq!(config.scanner.dedupe_window_ms, 1200);
        // Untouched values keep their defaults
        assert_eq!(config.scanner.read_cooldown_ms, 500);
        assert_eq!(config.wedge.idle_ms, 60);
        assert_eq!(config.store.path, "/var/lib/bagtag");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BagtagConfig::load_from_file(dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.camera.resolution, (1920, 1080));
        assert_eq!(config.fragments.capacity, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = BagtagConfig::default();
        config.camera.resolution = (0, 0);
        assert!(config.validate().is_err());

        config.camera.resolution = (640, 480);
        assert!(config.validate().is_ok());

        config.fragments.capacity = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_input_mode_toggle() {
        assert_eq!(InputMode::Camera.toggled(), InputMode::Hardware);
        assert_eq!(InputMode::Hardware.toggled(), InputMode::Camera);
    }
}
