//! Process wiring: builds every component from [`Config`] and runs them

use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::{self, AppState};
use crate::config::Config;
use crate::downloader::{DownloadError, DownloaderRegistry, HttpConfig};
use crate::engine::{
    BatchDispatcher, DispatchStats, DownloadTaskCreatedHandler, RecoverySweep, TaskExecutor,
    spawn_periodic,
};
use crate::error::TaskError;
use crate::messaging::{InMemoryBus, MessagingError, RedeliveryPolicy, TOPIC_DOWNLOAD_TASK_CREATED};
use crate::observability::Metrics;
use crate::service::TaskService;
use crate::storage::{BlobStorage, StorageError};
use crate::store::{StoreError, TaskStore};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Failed to open task store: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to initialize blob storage: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to build downloaders: {0}")]
    Downloader(#[from] DownloadError),

    #[error("Event channel error: {0}")]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("Server error: {0}")]
    Server(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Fully wired components of one fetchtask process
pub struct App {
    config: Config,
    store: Arc<TaskStore>,
    metrics: Arc<Metrics>,
    executor: Arc<TaskExecutor>,
    bus: InMemoryBus,
    service: Arc<TaskService>,
    shutdown: CancellationToken,
}

impl App {
    pub fn build(config: Config) -> Result<Self> {
        let store = Arc::new(TaskStore::open(
            &config.server.data_path,
            config.server.lock_timeout.as_duration(),
        )?);
        let storage = BlobStorage::from_config(&config.storage)?;
        let downloaders = Arc::new(DownloaderRegistry::with_defaults(HttpConfig::from(
            &config.download,
        ))?);
        let metrics = Arc::new(Metrics::new());
        let bus = InMemoryBus::new(RedeliveryPolicy::from(&config.mq));
        let shutdown = CancellationToken::new();

        let executor = Arc::new(TaskExecutor::new(
            store.clone(),
            storage.clone(),
            downloaders.clone(),
            metrics.clone(),
        ));
        let service = Arc::new(TaskService::new(
            store.clone(),
            storage,
            downloaders,
            Arc::new(bus.clone()),
            metrics.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            config,
            store,
            metrics,
            executor,
            bus,
            service,
            shutdown,
        })
    }

    pub fn recovery_sweep(&self) -> RecoverySweep {
        RecoverySweep::new(
            self.store.clone(),
            self.metrics.clone(),
            self.config
                .cron
                .recovery_sweep
                .stale_after
                .map(|d| d.as_duration()),
        )
    }

    pub fn dispatcher(&self) -> BatchDispatcher {
        BatchDispatcher::new(
            self.store.clone(),
            self.executor.clone(),
            self.config.cron.dispatch_pending.concurrency_limit,
        )
    }

    pub fn state(&self) -> AppState {
        AppState::new(
            self.config.clone(),
            self.service.clone(),
            self.store.clone(),
            self.metrics.clone(),
        )
    }

    /// One recovery sweep, then flush the store
    pub fn sweep_once(&self) -> Result<usize> {
        let requeued = self.recovery_sweep().run()?;
        self.store.persist()?;
        Ok(requeued)
    }

    /// One batch dispatch, cancelled by Ctrl+C/SIGTERM
    pub async fn dispatch_once(&self) -> Result<DispatchStats> {
        let cancel = self.shutdown.clone();
        tokio::spawn(async move {
            api::shutdown_signal().await;
            cancel.cancel();
        });

        let stats = self.dispatcher().run(&self.shutdown).await?;
        self.store.persist()?;
        Ok(stats)
    }

    /// Run the API, event consumer and both schedulers until a shutdown
    /// signal arrives
    pub async fn run_server(self) -> Result<()> {
        let shutdown = self.shutdown.clone();

        self.bus.register_handler(
            TOPIC_DOWNLOAD_TASK_CREATED,
            Arc::new(DownloadTaskCreatedHandler::new(
                self.executor.clone(),
                shutdown.clone(),
            )),
        )?;
        let consumer = self.bus.start(shutdown.clone())?;

        let cron = &self.config.cron;
        let sweep = spawn_periodic(
            Arc::new(self.recovery_sweep()),
            cron.recovery_sweep.interval.as_duration(),
            shutdown.clone(),
        );
        let dispatch = spawn_periodic(
            Arc::new(self.dispatcher()),
            cron.dispatch_pending.interval.as_duration(),
            shutdown.clone(),
        );

        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            api::shutdown_signal().await;
            signal_token.cancel();
        });

        let served = api::serve(self.config.server.bind_addr, self.state(), shutdown.clone()).await;

        // The server may also stop on its own error
        shutdown.cancel();
        for (name, handle) in [("consumer", consumer), ("recovery_sweep", sweep), ("dispatch_pending", dispatch)] {
            if let Err(e) = handle.await {
                error!(component = name, error = %e, "Background task panicked");
            }
        }

        self.store.persist()?;
        info!("fetchtask stopped");

        served.map_err(|e| AppError::Server(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageProvider;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.server.data_path = dir.path().join("tasks");
        config.storage.provider = StorageProvider::Memory;
        config
    }

    #[tokio::test]
    async fn test_build_and_run_one_shot_jobs() {
        let dir = TempDir::new().unwrap();
        let app = App::build(config(&dir)).unwrap();

        assert_eq!(app.sweep_once().unwrap(), 0);
        let stats = app.dispatcher().run(&CancellationToken::new()).await.unwrap();
        assert_eq!(stats, DispatchStats::default());
        assert!(app.service.health().await);
    }
}
