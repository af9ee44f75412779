use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;

use super::{log_requests, metrics::metrics_handler, state::*, ServerConfig};
use crate::error::TaskError;
use crate::history::HistoryQuery;
use crate::job_queue::QueueSizes;
use crate::service::{SubmitTask, TaskService};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
    pub version: &'static str,
}

#[derive(Serialize)]
struct QueueStatus {
    lanes: QueueSizes,
    total: usize,
    tasks: BTreeMap<&'static str, usize>,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

impl IntoResponse for TaskError {
    fn into_response(self) -> Response {
        let status = match &self {
            TaskError::Validation(_) => StatusCode::BAD_REQUEST,
            TaskError::NotFound(_) => StatusCode::NOT_FOUND,
            TaskError::NotCancellable { .. } => StatusCode::CONFLICT,
            TaskError::BackendUnavailable(_) => {
                error!("Request failed: {}", self);
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
        version: env!("CARGO_PKG_VERSION"),
    };
    Json(stats)
}

async fn submit_task(
    State(service): State<GuardedTaskService>,
    body: Result<Json<SubmitTask>, JsonRejection>,
) -> Response {
    let Json(submit) = match body {
        Ok(body) => body,
        Err(rejection) => return TaskError::Validation(rejection.body_text()).into_response(),
    };
    match service.enqueue(submit) {
        Ok(submission) => (StatusCode::ACCEPTED, Json(submission)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn get_task(State(service): State<GuardedTaskService>, Path(task_id): Path<String>) -> Response {
    match service.get(&task_id) {
        Ok(record) => Json(record).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn cancel_task(
    State(service): State<GuardedTaskService>,
    Path(task_id): Path<String>,
) -> Response {
    match service.request_cancel(&task_id) {
        Ok(record) => Json(record).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn get_queue(State(service): State<GuardedTaskService>) -> Response {
    let lanes = match service.queue_sizes() {
        Ok(sizes) => sizes,
        Err(err) => return err.into_response(),
    };
    let counts = match service.status_counts() {
        Ok(counts) => counts,
        Err(err) => return err.into_response(),
    };
    Json(QueueStatus {
        total: lanes.total(),
        lanes,
        tasks: counts
            .into_iter()
            .map(|(status, count)| (status.as_str(), count))
            .collect(),
    })
    .into_response()
}

async fn get_history(
    State(service): State<GuardedTaskService>,
    Path(owner_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    match service.history(&owner_id, &query) {
        Ok(records) => Json(records).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn make_app(config: ServerConfig, service: Arc<TaskService>) -> Router {
    let state = ServerState::new(config, service);

    let task_routes: Router = Router::new()
        .route("/tasks", post(submit_task))
        .route("/tasks/{task_id}", get(get_task))
        .route("/tasks/{task_id}/cancel", post(cancel_task))
        .route("/queue", get(get_queue))
        .route("/history/{owner_id}", get(get_history))
        .with_state(state.clone());

    Router::new()
        .route("/", get(home))
        .route("/metrics", get(metrics_handler))
        .with_state(state.clone())
        .nest("/v1", task_routes)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

/// Serves until `shutdown` resolves.
pub async fn run_server(
    config: ServerConfig,
    service: Arc<TaskService>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let port = config.port;
    let app = make_app(config, service);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
