//! # Job Service Bootstrap
//!
//! Wires the store, gateway and services together from one
//! [`JobServiceConfig`], either fully in memory or against PostgreSQL with
//! pgmq, and runs the background loops behind a single handle.
//!
//! ```rust,no_run
//! use job_service::config::ConfigManager;
//! use job_service::orchestration::bootstrap::JobServiceSystem;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let system = JobServiceSystem::connect(manager.config().clone()).await?;
//! let handle = system.start();
//! // ... serve requests through system.lifecycle ...
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

use super::{DelayedJobScheduler, DependencyResolver, JobLifecycleManager, TaskDispatcher};
use crate::config::JobServiceConfig;
use crate::database::{DatabaseConnection, DatabaseMigrations};
use crate::error::Result;
use crate::messaging::{InMemoryQueueGateway, PgmqQueueGateway, TaskQueueConsumer, TaskQueueGateway};
use crate::store::{InMemoryJobStore, JobStore, PgJobStore};
use crate::tracking::{CompletionBatcher, HealthProbe, JobTrackingProxy, TrackingConsumer};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Every component of a running job service
#[derive(Debug, Clone)]
pub struct JobServiceSystem {
    pub config: JobServiceConfig,
    pub store: Arc<dyn JobStore>,
    pub lifecycle: Arc<JobLifecycleManager>,
    pub resolver: Arc<DependencyResolver>,
    pub dispatcher: Arc<TaskDispatcher>,
    pub scheduler: Arc<DelayedJobScheduler>,
    pub batcher: Arc<CompletionBatcher>,
    pub proxy: Arc<JobTrackingProxy>,
    pub consumer: Arc<TrackingConsumer>,
    pub health: HealthProbe,
}

impl JobServiceSystem {
    /// Assemble the services over an existing store and queue backend
    pub fn assemble<Q>(config: JobServiceConfig, store: Arc<dyn JobStore>, queues: Arc<Q>) -> Self
    where
        Q: TaskQueueGateway + TaskQueueConsumer + 'static,
    {
        let suspended = config.partitions.suspended_partitions();
        let gateway: Arc<dyn TaskQueueGateway> = queues.clone();
        let consumer_backend: Arc<dyn TaskQueueConsumer> = queues;

        let dispatcher = Arc::new(TaskDispatcher::new(
            gateway.clone(),
            store.clone(),
            config.queues.clone(),
        ));
        let resolver = Arc::new(DependencyResolver::new(
            store.clone(),
            dispatcher.clone(),
            suspended.clone(),
        ));
        let lifecycle = Arc::new(
            JobLifecycleManager::new(store.clone(), dispatcher.clone(), suspended.clone())
                .with_default_expiry(config.expiration.clone()),
        );
        let scheduler = Arc::new(DelayedJobScheduler::new(
            store.clone(),
            dispatcher.clone(),
            suspended,
            config.scheduler.clone(),
        ));
        let batcher = Arc::new(CompletionBatcher::new(resolver.clone(), &config.tracking));
        let proxy = Arc::new(JobTrackingProxy::new(
            store.clone(),
            resolver.clone(),
            batcher.clone(),
            gateway,
            config.tracking.clone(),
        ));
        let consumer = Arc::new(TrackingConsumer::new(
            consumer_backend,
            proxy.clone(),
            scheduler.clone(),
            config.queues.clone(),
            config.tracking.clone(),
        ));

        Self {
            health: HealthProbe::new(store.clone()),
            config,
            store,
            lifecycle,
            resolver,
            dispatcher,
            scheduler,
            batcher,
            proxy,
            consumer,
        }
    }

    /// Everything in process; returns the gateway so callers can inspect queues
    pub fn in_memory(config: JobServiceConfig) -> (Self, InMemoryQueueGateway) {
        let store: Arc<dyn JobStore> =
            Arc::new(InMemoryJobStore::with_query_config(config.query.clone()));
        let gateway = InMemoryQueueGateway::new();
        let system = Self::assemble(config, store, Arc::new(gateway.clone()));
        (system, gateway)
    }

    /// PostgreSQL store and pgmq queues sharing one pool
    pub async fn connect(config: JobServiceConfig) -> Result<Self> {
        config.validate()?;

        let db = DatabaseConnection::connect(&config.database).await?;
        if config.database.run_migrations {
            DatabaseMigrations::run_all(db.pool()).await?;
            DatabaseMigrations::ensure_pgmq_extension(db.pool()).await?;
        }

        let store: Arc<dyn JobStore> = Arc::new(PgJobStore::with_query_config(
            db.pool().clone(),
            config.query.clone(),
        ));
        let gateway = Arc::new(PgmqQueueGateway::new(db.pool().clone()));
        for queue in [&config.queues.tracking_queue, &config.queues.resume_job_queue] {
            gateway.ensure_queue(queue).await?;
        }

        info!("✅ Job service connected");
        Ok(Self::assemble(config, store, gateway))
    }

    /// Spawn the scheduler, batcher and consumer loops
    pub fn start(&self) -> SystemHandle {
        let mut tasks = vec![
            self.batcher.clone().start(),
            self.consumer.clone().start(),
        ];
        if self.config.scheduler.enabled {
            tasks.push(self.scheduler.clone().start());
        } else {
            warn!("Delayed job scheduler disabled by configuration");
        }
        info!(loops = tasks.len(), "🚀 Job service started");

        SystemHandle {
            system: self.clone(),
            tasks,
        }
    }
}

/// Running background loops
#[derive(Debug)]
pub struct SystemHandle {
    system: JobServiceSystem,
    tasks: Vec<JoinHandle<()>>,
}

impl SystemHandle {
    /// Stop consuming first, then flush pending completions
    pub async fn shutdown(self) {
        self.system.consumer.shutdown();
        self.system.scheduler.shutdown();
        self.system.batcher.shutdown();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background loop ended abnormally");
            }
        }
        info!("🛑 Job service stopped");
    }
}
