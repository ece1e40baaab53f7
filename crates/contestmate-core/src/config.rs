use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.yaml";

fn default_api_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_typewriter_interval_ms() -> u64 {
    30
}

fn default_context_window() -> usize {
    6
}

fn default_history_snapshot_limit() -> usize {
    50
}

fn default_cache_sweep_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// No timeout unless set.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_typewriter_interval_ms")]
    pub typewriter_interval_ms: u64,
    /// Number of recent messages sent along with each chat request.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Messages kept in the local chat history snapshot.
    #[serde(default = "default_history_snapshot_limit")]
    pub history_snapshot_limit: usize,
    #[serde(default = "default_cache_sweep_interval_secs")]
    pub cache_sweep_interval_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            request_timeout_secs: None,
            typewriter_interval_ms: default_typewriter_interval_ms(),
            context_window: default_context_window(),
            history_snapshot_limit: default_history_snapshot_limit(),
            cache_sweep_interval_secs: default_cache_sweep_interval_secs(),
        }
    }
}

impl ClientConfig {
    /// Reads `<data_dir>/config.yaml`, falling back to defaults when the file
    /// does not exist.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse yaml file: {}", path.display()))
    }

    pub fn typewriter_interval(&self) -> Duration {
        Duration::from_millis(self.typewriter_interval_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs)
    }
}
