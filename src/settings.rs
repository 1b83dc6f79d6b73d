use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::analysis::StrokeParams;

pub const SERVER_URL_ENV: &str = "SWINGTRACK_SERVER_URL";
pub const DEBUG_ENV: &str = "SWINGTRACK_DEBUG";

const APP_DIR: &str = "swingtrack";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    /// Scheme, host and port; the `/api/...` paths are appended to it
    pub base_url: String,
    pub health_timeout_secs: u64,
    pub sample_timeout_secs: u64,
    /// Stroke detection and recording upload
    pub bulk_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".into(),
            health_timeout_secs: 10,
            sample_timeout_secs: 15,
            bulk_timeout_secs: 30,
        }
    }
}

impl ServerSettings {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_secs(self.sample_timeout_secs)
    }

    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingSettings {
    pub tick_interval_ms: u64,
    /// Wait between beginning and ending magnetic-field calibration
    pub calibration_settle_ms: u64,
    pub configure_on_connect: bool,
    /// Fail `connect` on the first configuration step that errors instead
    /// of logging it and carrying on
    pub abort_on_config_failure: bool,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5,
            calibration_settle_ms: 3_000,
            configure_on_connect: true,
            abort_on_config_failure: false,
        }
    }
}

impl SamplingSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn calibration_settle(&self) -> Duration {
        Duration::from_millis(self.calibration_settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecordingSettings {
    pub output_dir: PathBuf,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        let base = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            output_dir: base.join(APP_DIR).join("recordings"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserSettings {
    pub server: ServerSettings,
    pub sampling: SamplingSettings,
    pub stroke: StrokeParams,
    pub recording: RecordingSettings,
}

impl UserSettings {
    /// Applies `SWINGTRACK_SERVER_URL` on top of the file.
    fn apply_env(&mut self) {
        if let Ok(url) = env::var(SERVER_URL_ENV) {
            if !url.trim().is_empty() {
                self.server.base_url = url.trim().to_string();
            }
        }
    }
}

pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(SETTINGS_FILE)
}

/// `SWINGTRACK_DEBUG=1` or `true` turns on debug logging.
pub fn debug_logging_requested() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false)
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    /// Loads `path`, or defaults when it does not exist yet. A file that no
    /// longer parses is replaced by defaults in memory and left on disk.
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring unreadable settings in {}: {}", path.display(), err);
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };
        data.apply_env();

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> UserSettings {
        self.read().clone()
    }

    pub fn server(&self) -> ServerSettings {
        self.read().server.clone()
    }

    pub fn sampling(&self) -> SamplingSettings {
        self.read().sampling.clone()
    }

    pub fn stroke(&self) -> StrokeParams {
        self.read().stroke
    }

    pub fn recording(&self) -> RecordingSettings {
        self.read().recording.clone()
    }

    /// Command-line override; not persisted unless `update` is called later.
    pub fn override_server_url(&self, url: impl Into<String>) {
        self.write().server.base_url = url.into();
    }

    pub fn update(&self, settings: UserSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let mut data: UserSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid settings in {}", self.path.display()))?;
        data.apply_env();
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
