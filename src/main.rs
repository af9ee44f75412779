use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use agent_task_server::config;
use agent_task_server::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig};
use agent_task_server::service::TaskService;
use agent_task_server::work_units::default_registry;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing database files (tasks.db, queue.db, history.db).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3002)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Queue key namespace, also the first segment of task ids.
    #[clap(long)]
    pub namespace: Option<String>,

    /// Second segment of task ids.
    #[clap(long)]
    pub task_kind: Option<String>,

    /// Number of concurrent task workers.
    #[clap(long)]
    pub workers: Option<usize>,

    /// Wall-clock budget of a single task, in seconds.
    #[clap(long)]
    pub task_timeout_sec: Option<u64>,

    /// HMAC key used to sign webhook deliveries.
    #[clap(long)]
    pub webhook_secret: Option<String>,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            port: args.port,
            logging_level: args.logging_level.clone(),
            namespace: args.namespace.clone(),
            task_kind: args.task_kind.clone(),
            workers: args.workers,
            task_timeout_sec: args.task_timeout_sec,
            webhook_secret: args.webhook_secret.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  port: {}", app_config.port);
    info!("  namespace: {}", app_config.service.namespace);
    info!("  workers: {}", app_config.service.worker.count);
    info!(
        "  webhook signing: {}",
        if app_config.service.webhook.secret.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );

    info!("Initializing metrics...");
    metrics::init_metrics();

    let service = Arc::new(TaskService::open(&app_config, default_registry()?)?);
    service.start();

    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
    };
    info!("Ready to serve at port {}!", app_config.port);

    let result = run_server(server_config, service.clone(), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, initiating graceful shutdown");
    })
    .await;
    info!("HTTP server stopped: {:?}", result);

    service.shutdown().await;
    result
}
