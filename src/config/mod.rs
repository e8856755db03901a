// Configuration management for radiodesk
// Optional TOML file in the user config dir; everything has a default so a missing file is fine

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream_url: String,
    pub status_url: String,
    pub poll_interval_secs: u64,
    pub audio: AudioSettings,
    pub network: NetworkConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub initial_volume: f32,
    pub latency_ms: u64,
    pub buffer_chunks: usize,
    pub unwind_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub refresh_secs: u64,
    pub progress_width: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream_url: "https://relay0.r-a-d.io/main.mp3".to_string(),
            status_url: "https://r-a-d.io/api".to_string(),
            poll_interval_secs: 5,
            audio: AudioSettings::default(),
            network: NetworkConfig::default(),
            ui: UiConfig::default(),
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            initial_volume: 0.5,
            latency_ms: 100,
            buffer_chunks: 64,
            unwind_timeout_ms: 2000,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            user_agent: format!("radiodesk/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            refresh_secs: 1,
            progress_width: 20,
        }
    }
}

impl Config {
    /// Load from the default location, or defaults if there is no file. Never writes.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Config::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("radiodesk");

        Ok(config_dir.join("config.toml"))
    }

    /// Where the binaries write their rolling log files.
    pub fn log_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("radiodesk")
            .join("logs")
    }
}
