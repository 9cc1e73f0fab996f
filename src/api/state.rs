use std::sync::Arc;

use crate::config::Config;
use crate::observability::Metrics;
use crate::service::TaskService;
use crate::store::TaskStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: Arc<TaskService>,
    pub store: Arc<TaskStore>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Config,
        service: Arc<TaskService>,
        store: Arc<TaskStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            service,
            store,
            metrics,
        }
    }

    pub fn max_body_bytes(&self) -> usize {
        usize::try_from(self.config.server.max_body_bytes.as_u64()).unwrap_or(usize::MAX)
    }
}
