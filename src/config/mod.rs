mod file_config;

pub use file_config::{FileConfig, LeaseConfig, WebhookConfig, WorkerConfig};

use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub namespace: Option<String>,
    pub task_kind: Option<String>,
    pub workers: Option<usize>,
    pub task_timeout_sec: Option<u64>,
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,

    pub service: ServiceSettings,
}

/// Everything `TaskService` needs, independent of where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    /// Lane key prefix and first segment of task ids.
    pub namespace: String,
    /// Second segment of task ids.
    pub task_kind: String,
    pub worker: WorkerSettings,
    pub webhook: WebhookSettings,
    pub lease: LeaseSettings,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            namespace: "agent".to_string(),
            task_kind: "task".to_string(),
            worker: WorkerSettings::default(),
            webhook: WebhookSettings::default(),
            lease: LeaseSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub count: usize,
    pub idle_poll_ms: u64,
    pub backend_retry_ms: u64,
    pub task_timeout_sec: u64,
    pub heartbeat_interval_sec: u64,
}

impl WorkerSettings {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn backend_retry(&self) -> Duration {
        Duration::from_millis(self.backend_retry_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_sec)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_sec.max(1))
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            count: 4,
            idle_poll_ms: 1000,
            backend_retry_ms: 5000,
            task_timeout_sec: 300,
            heartbeat_interval_sec: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookSettings {
    /// HMAC key. Deliveries are unsigned without one.
    pub secret: Option<String>,
    /// Total attempts per delivery.
    pub max_retries: u32,
    pub attempt_timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl WebhookSettings {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            secret: None,
            max_retries: 3,
            attempt_timeout_ms: 10_000,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaseSettings {
    pub stale_after_sec: u64,
    pub reap_interval_sec: u64,
}

impl LeaseSettings {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_sec)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_sec.max(1))
    }
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            stale_after_sec: 120,
            reap_interval_sec: 30,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let defaults = ServiceSettings::default();
        let namespace = file
            .namespace
            .or_else(|| cli.namespace.clone())
            .unwrap_or(defaults.namespace);
        let task_kind = file
            .task_kind
            .or_else(|| cli.task_kind.clone())
            .unwrap_or(defaults.task_kind);
        for (name, value) in [("namespace", &namespace), ("task_kind", &task_kind)] {
            if value.is_empty() || value.contains(':') {
                bail!("{} must be non-empty and must not contain ':'", name);
            }
        }

        let worker_file = file.worker.unwrap_or_default();
        let worker = WorkerSettings {
            count: worker_file
                .count
                .or(cli.workers)
                .unwrap_or(defaults.worker.count),
            idle_poll_ms: worker_file
                .idle_poll_ms
                .unwrap_or(defaults.worker.idle_poll_ms),
            backend_retry_ms: worker_file
                .backend_retry_ms
                .unwrap_or(defaults.worker.backend_retry_ms),
            task_timeout_sec: worker_file
                .task_timeout_sec
                .or(cli.task_timeout_sec)
                .unwrap_or(defaults.worker.task_timeout_sec),
            heartbeat_interval_sec: worker_file
                .heartbeat_interval_sec
                .unwrap_or(defaults.worker.heartbeat_interval_sec),
        };
        if worker.count == 0 {
            bail!("worker count must be at least 1");
        }
        if worker.task_timeout_sec == 0 {
            bail!("task_timeout_sec must be at least 1");
        }

        let webhook_file = file.webhook.unwrap_or_default();
        let webhook = WebhookSettings {
            secret: webhook_file
                .secret
                .or_else(|| cli.webhook_secret.clone())
                .filter(|s| !s.is_empty()),
            max_retries: webhook_file
                .max_retries
                .unwrap_or(defaults.webhook.max_retries),
            attempt_timeout_ms: webhook_file
                .attempt_timeout_ms
                .unwrap_or(defaults.webhook.attempt_timeout_ms),
            initial_backoff_ms: webhook_file
                .initial_backoff_ms
                .unwrap_or(defaults.webhook.initial_backoff_ms),
            max_backoff_ms: webhook_file
                .max_backoff_ms
                .unwrap_or(defaults.webhook.max_backoff_ms),
        };

        let lease_file = file.lease.unwrap_or_default();
        let lease = LeaseSettings {
            stale_after_sec: lease_file
                .stale_after_sec
                .unwrap_or(defaults.lease.stale_after_sec),
            reap_interval_sec: lease_file
                .reap_interval_sec
                .unwrap_or(defaults.lease.reap_interval_sec),
        };
        if lease.stale_after_sec <= worker.heartbeat_interval_sec {
            bail!(
                "lease stale_after_sec ({}) must exceed the worker heartbeat interval ({})",
                lease.stale_after_sec,
                worker.heartbeat_interval_sec
            );
        }

        Ok(Self {
            db_dir,
            port,
            logging_level,
            service: ServiceSettings {
                namespace,
                task_kind,
                worker,
                webhook,
                lease,
            },
        })
    }

    pub fn tasks_db_path(&self) -> PathBuf {
        self.db_dir.join("tasks.db")
    }

    pub fn queue_db_path(&self) -> PathBuf {
        self.db_dir.join("queue.db")
    }

    pub fn history_db_path(&self) -> PathBuf {
        self.db_dir.join("history.db")
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
