use axum::extract::FromRef;

use crate::service::TaskService;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedTaskService = Arc<TaskService>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub service: GuardedTaskService,
    pub hash: String,
}

impl ServerState {
    pub fn new(config: ServerConfig, service: GuardedTaskService) -> Self {
        ServerState {
            config,
            start_time: Instant::now(),
            service,
            hash: env!("GIT_HASH").to_string(),
        }
    }
}

impl FromRef<ServerState> for GuardedTaskService {
    fn from_ref(input: &ServerState) -> Self {
        input.service.clone()
    }
}
