//! Engine configuration.
//!
//! Loaded from `~/.config/givesync/config.json` when present, otherwise
//! defaults. The agent layers environment overrides on top.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config/data directory paths
const APP_NAME: &str = "givesync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Origin of the remote API all replay and pass-through traffic targets.
    pub api_base_url: String,
    /// Active cache version; bumping it purges prior-version entries on
    /// activation.
    pub cache_version: String,
    pub max_replay_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub max_cache_entries: usize,
    pub max_cache_body_bytes: usize,
    /// Quiet window after an online transition before the queue drains.
    pub debounce_window_ms: u64,
    pub probe_interval_secs: u64,
    /// Overrides the platform data directory when set.
    pub data_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.givesync.org".to_string(),
            cache_version: "v1".to_string(),
            max_replay_attempts: 5,
            retry_base_delay_ms: 1000,
            request_timeout_secs: 30,
            max_cache_entries: 512,
            max_cache_body_bytes: 256 * 1024,
            debounce_window_ms: 2000,
            probe_interval_secs: 30,
            data_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Where the durable collections live.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }
}
