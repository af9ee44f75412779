//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own databases and workers.

use super::constants::*;
use agent_task_server::config::{AppConfig, ServiceSettings, WorkerSettings};
use agent_task_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use agent_task_server::service::TaskService;
use agent_task_server::work_units::default_registry;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance with isolated databases.
///
/// When dropped, the HTTP server shuts down and the temp dir is removed.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Direct access to the service behind the routes
    pub service: Arc<TaskService>,

    _temp_db_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

/// Settings tuned for fast tests: short polls, quick backoff, signed webhooks.
pub fn test_settings() -> ServiceSettings {
    let mut settings = ServiceSettings {
        worker: WorkerSettings {
            count: 2,
            idle_poll_ms: 20,
            backend_retry_ms: 50,
            task_timeout_sec: 5,
            heartbeat_interval_sec: 1,
        },
        ..Default::default()
    };
    settings.webhook.secret = Some(WEBHOOK_SECRET.to_string());
    settings.webhook.initial_backoff_ms = 50;
    settings.webhook.attempt_timeout_ms = 2000;
    settings
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawns a server after letting the caller adjust the settings.
    pub async fn spawn_with(customize: impl FnOnce(&mut ServiceSettings)) -> Self {
        let temp_db_dir = TempDir::new().expect("Failed to create temp dir");

        let mut settings = test_settings();
        customize(&mut settings);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let app_config = AppConfig {
            db_dir: temp_db_dir.path().to_path_buf(),
            port,
            logging_level: RequestsLoggingLevel::None,
            service: settings,
        };
        let service = Arc::new(
            TaskService::open(&app_config, default_registry().expect("Failed to build registry"))
                .expect("Failed to open task service"),
        );
        service.start();

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port,
        };
        let app = make_app(config, service.clone());

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            service,
            _temp_db_dir: temp_db_dir,
            _shutdown_tx: Some(shutdown_tx),
        };
        server.wait_for_ready().await;
        server
    }

    /// Waits for the server to become ready by polling `/`
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }
            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
