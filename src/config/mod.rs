use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::format::{TimeZoneChoice, TimestampFormatter, DEFAULT_TIMESTAMP_FORMAT};
use crate::status::PollerOptions;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
// The server pings devices every 30 seconds
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl DeviceEntry {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or(self.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub time_zone: TimeZoneChoice,
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            time_zone: TimeZoneChoice::default(),
            timestamp_format: default_timestamp_format(),
        }
    }
}

fn default_timestamp_format() -> String {
    DEFAULT_TIMESTAMP_FORMAT.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Console server hosting `/api/device_status`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Seconds between status polls in daemon mode
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Drop status responses that arrive after a newer one was applied
    #[serde(default = "default_true")]
    pub sequence_guard: bool,

    /// Desktop notifications when a device changes state
    #[serde(default)]
    pub notifications: bool,

    #[serde(default)]
    pub display: DisplayConfig,

    /// Devices shown on the status board
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            poll_interval_secs: default_poll_interval(),
            sequence_guard: true,
            notifications: false,
            display: DisplayConfig::default(),
            devices: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("labwatch");

        if let Err(e) = std::fs::create_dir_all(&config_dir) {
            tracing::warn!("Could not create config directory: {}", e);
        }

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from the default location, or create it with defaults
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Ok(path) => Self::load_from(&path),
            Err(_) => Ok(AppConfig::default()),
        }
    }

    /// Load config from `path`. A missing file is created with defaults;
    /// an unreadable or unparsable one is logged and defaults are used.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => return Ok(config.sanitized()),
                    Err(e) => tracing::warn!("Failed to parse config {}: {}", path.display(), e),
                },
                Err(e) => tracing::warn!("Failed to read config {}: {}", path.display(), e),
            }
            return Ok(AppConfig::default());
        }

        let config = AppConfig::default();
        if let Err(e) = config.save_to(path) {
            tracing::warn!("Could not write default config: {}", e);
        }
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(&self.clone().sanitized())?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Drop blank device ids and duplicates, clamp the poll interval
    fn sanitized(mut self) -> Self {
        let mut seen = std::collections::HashSet::new();
        self.devices.retain(|d| {
            let id = d.id.trim();
            !id.is_empty() && seen.insert(id.to_string())
        });
        for device in &mut self.devices {
            device.id = device.id.trim().to_string();
            if device.name.as_ref().map(|n| n.trim().is_empty()).unwrap_or(false) {
                device.name = None;
            }
        }
        self.poll_interval_secs = self.poll_interval_secs.max(1);
        self
    }

    pub fn poller_options(&self) -> PollerOptions {
        PollerOptions {
            formatter: TimestampFormatter::new(self.display.time_zone, &self.display.timestamp_format),
            sequence_guard: self.sequence_guard,
        }
    }
}
