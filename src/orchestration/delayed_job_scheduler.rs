//! # Delayed Job Scheduler
//!
//! Periodically releases templated jobs whose delay has elapsed and applies
//! job expiration policies. Also handles resume triggers for jobs leaving
//! Paused. Dispatch failures are recorded on the job with the
//! scheduled-executor source.

use super::task_dispatcher::TaskDispatcher;
use crate::config::{SchedulerConfig, SuspendedPartitions};
use crate::constants::sources;
use crate::error::Result;
use crate::messaging::ResumeJobMessage;
use crate::store::{ExpirationOutcome, JobStore};
use crate::validation::{validate_job_id, validate_partition_id};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

#[derive(Debug)]
pub struct DelayedJobScheduler {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<TaskDispatcher>,
    suspended: SuspendedPartitions,
    config: SchedulerConfig,
    running: AtomicBool,
    shutdown_notify: Notify,
}

impl DelayedJobScheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        dispatcher: Arc<TaskDispatcher>,
        suspended: SuspendedPartitions,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            suspended,
            config,
            running: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Release and dispatch every job eligible at `now`; returns the number dispatched
    #[instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut dispatched = 0;
        loop {
            let released = self
                .store
                .release_eligible_jobs(now, self.config.release_batch_size, &self.suspended)
                .await?;
            let full_batch = released.len() as i64 >= self.config.release_batch_size;

            dispatched += self
                .dispatcher
                .dispatch_all(&released, None, sources::scheduled_executor)
                .await;

            if !full_batch {
                break;
            }
        }

        if dispatched > 0 {
            info!(dispatched, "⏰ Released delayed jobs");
        }
        Ok(dispatched)
    }

    /// Expire or delete jobs whose policy is due at `now`
    #[instrument(skip(self))]
    pub async fn apply_expiration(&self, now: DateTime<Utc>) -> Result<ExpirationOutcome> {
        let mut outcome = ExpirationOutcome::default();
        loop {
            let pass = self
                .store
                .apply_expiration_policies(
                    now,
                    self.config.expiration_batch_size,
                    self.config.propagate_failures,
                )
                .await?;
            let full_batch = (pass.expired.len() + pass.deleted.len()) as i64
                >= self.config.expiration_batch_size;

            outcome.expired.extend(pass.expired);
            outcome.deleted.extend(pass.deleted);
            outcome.failed_dependents.extend(pass.failed_dependents);
            if !full_batch {
                break;
            }
        }
        Ok(outcome)
    }

    /// Try to release a resumed job straight away; true when it was dispatched
    #[instrument(skip(self, message), fields(partition_id = %message.partition_id, job_id = %message.job_id))]
    pub async fn handle_resume(&self, message: &ResumeJobMessage) -> Result<bool> {
        validate_partition_id(&message.partition_id)?;
        validate_job_id(&message.job_id)?;

        let released = self
            .store
            .release_job(
                &message.partition_id,
                &message.job_id,
                self.suspended.is_suspended(&message.partition_id),
                Utc::now(),
            )
            .await?;

        match released {
            Some(template) => {
                self.dispatcher
                    .dispatch_or_record(&template, None, sources::scheduled_executor)
                    .await?;
                info!("▶️ Resumed job dispatched");
                Ok(true)
            }
            None => {
                debug!("Resumed job has nothing to dispatch yet");
                Ok(false)
            }
        }
    }

    /// Spawn the polling loop; it runs until [`Self::shutdown`]
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::Release);
        tokio::spawn(async move {
            info!(
                poll_interval_seconds = self.config.poll_interval_seconds,
                "🚀 Delayed job scheduler started"
            );
            let mut interval = tokio::time::interval(self.config.poll_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = Utc::now();
                        if let Err(e) = self.run_once(now).await {
                            error!(error = %e, "Delayed job poll failed");
                        }
                        if let Err(e) = self.apply_expiration(now).await {
                            error!(error = %e, "Applying job expiration policies failed");
                        }
                    }
                    _ = self.shutdown_notify.notified() => {
                        debug!("Shutdown notification received");
                        break;
                    }
                }
            }

            self.running.store(false, Ordering::Release);
            info!("🛑 Delayed job scheduler stopped");
        })
    }

    pub fn shutdown(&self) {
        self.shutdown_notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::messaging::InMemoryQueueGateway;
    use crate::models::{NewJob, TaskDefinition};
    use crate::state_machine::{JobEvent, JobStatus};
    use crate::store::{CreateJobRecord, InMemoryJobStore};
    use chrono::Duration;

    fn record(job_id: &str, delay_seconds: i32) -> CreateJobRecord {
        let job = NewJob {
            task: TaskDefinition {
                task_classifier: "Worker".to_string(),
                task_api_version: 1,
                task_data: b"payload".to_vec(),
                task_pipe: "worker-in".to_string(),
                target_pipe: "worker-out".to_string(),
            },
            delay_seconds,
            ..NewJob::default()
        };
        CreateJobRecord::new("p", job_id, job, Vec::new(), false)
    }

    fn scheduler(store: Arc<InMemoryJobStore>, gateway: &InMemoryQueueGateway) -> DelayedJobScheduler {
        let dispatcher = Arc::new(TaskDispatcher::new(
            Arc::new(gateway.clone()),
            store.clone(),
            QueueConfig::default(),
        ));
        DelayedJobScheduler::new(store, dispatcher, SuspendedPartitions::default(), SchedulerConfig::default())
    }

    #[tokio::test]
    async fn test_delayed_job_released_after_delay() {
        let store = Arc::new(InMemoryJobStore::new());
        let gateway = InMemoryQueueGateway::new();
        store.create_job(record("d", 60)).await.unwrap();
        let scheduler = scheduler(store.clone(), &gateway);

        assert_eq!(scheduler.run_once(Utc::now()).await.unwrap(), 0);
        assert_eq!(store.get_job("p", "d").await.unwrap().status, JobStatus::Waiting);

        let later = Utc::now() + Duration::seconds(61);
        assert_eq!(scheduler.run_once(later).await.unwrap(), 1);
        assert_eq!(store.get_job("p", "d").await.unwrap().status, JobStatus::Active);
        assert_eq!(gateway.len("worker-in"), 1);
    }

    #[tokio::test]
    async fn test_resume_trigger_dispatches_held_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let gateway = InMemoryQueueGateway::new();
        store.create_job(record("h", 1)).await.unwrap();
        store.apply_event("p", "h", JobEvent::Pause).await.unwrap();
        let scheduler = scheduler(store.clone(), &gateway);

        // Paused jobs are held even once their delay passes
        let later = Utc::now() + Duration::seconds(5);
        assert_eq!(scheduler.run_once(later).await.unwrap(), 0);

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        store.apply_event("p", "h", JobEvent::Resume).await.unwrap();
        let dispatched = scheduler
            .handle_resume(&ResumeJobMessage::new("p", "h"))
            .await
            .unwrap();
        assert!(dispatched);
        assert_eq!(gateway.len("worker-in"), 1);
    }

    #[tokio::test]
    async fn test_expiration_drains_in_batches() {
        use crate::models::{ExpirationPolicy, ExpiryPolicy, ExpiryReference, ExpiryTime};

        let store = Arc::new(InMemoryJobStore::new());
        let gateway = InMemoryQueueGateway::new();
        let expiration = ExpirationPolicy::default()
            .with_default(ExpiryPolicy::delete(ExpiryTime::after(ExpiryReference::CreateTime, 1)))
            .resolve(Utc::now())
            .unwrap();
        for job_id in ["x1", "x2", "x3"] {
            store
                .create_job(record(job_id, 0).with_expiration(expiration))
                .await
                .unwrap();
        }
        let dispatcher = Arc::new(TaskDispatcher::new(
            Arc::new(gateway.clone()),
            store.clone(),
            QueueConfig::default(),
        ));
        let config = SchedulerConfig {
            expiration_batch_size: 2,
            ..SchedulerConfig::default()
        };
        let scheduler =
            DelayedJobScheduler::new(store.clone(), dispatcher, SuspendedPartitions::default(), config);

        assert!(scheduler.apply_expiration(Utc::now()).await.unwrap().is_empty());
        let outcome = scheduler
            .apply_expiration(Utc::now() + Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(outcome.deleted.len(), 3);
        assert_eq!(store.job_count(), 0);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let store = Arc::new(InMemoryJobStore::new());
        let gateway = InMemoryQueueGateway::new();
        let scheduler = Arc::new(scheduler(store, &gateway));

        let handle = scheduler.clone().start();
        assert!(scheduler.is_running());
        scheduler.shutdown();
        handle.await.unwrap();
        assert!(!scheduler.is_running());
    }
}
