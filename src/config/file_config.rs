use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub logging_level: Option<String>,
    pub namespace: Option<String>,
    pub task_kind: Option<String>,

    pub worker: Option<WorkerConfig>,
    pub webhook: Option<WebhookConfig>,
    pub lease: Option<LeaseConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: Option<usize>,
    pub idle_poll_ms: Option<u64>,
    pub backend_retry_ms: Option<u64>,
    pub task_timeout_sec: Option<u64>,
    pub heartbeat_interval_sec: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WebhookConfig {
    pub secret: Option<String>,
    pub max_retries: Option<u32>,
    pub attempt_timeout_ms: Option<u64>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LeaseConfig {
    pub stale_after_sec: Option<u64>,
    pub reap_interval_sec: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
