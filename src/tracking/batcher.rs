//! # Completion Batcher
//!
//! Buffers completed task ids per job and flushes them through
//! [`DependencyResolver::complete_tasks`] when either bound is hit:
//!
//! - `max_batch_size` task ids are pending across all jobs
//! - the oldest pending id has waited `max_batch_time`
//!
//! The size bound is checked on every [`CompletionBatcher::add`]; the time
//! bound is checked by the ticker spawned from [`CompletionBatcher::start`].
//! Batches that fail with a transient error go back into the buffer.

use crate::config::TrackingConfig;
use crate::error::{JobServiceError, Result};
use crate::models::JobTaskId;
use crate::orchestration::DependencyResolver;
use crate::store::CompletionBatch;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type JobKey = (String, String);

#[derive(Debug, Default)]
struct PendingCompletions {
    batches: BTreeMap<JobKey, CompletionBatch>,
    task_count: usize,
    oldest: Option<Instant>,
}

impl PendingCompletions {
    fn add(&mut self, task_id: JobTaskId) {
        let key = (task_id.partition_id().to_string(), task_id.job_id().to_string());
        let batch = self
            .batches
            .entry(key)
            .or_insert_with(|| CompletionBatch::new(task_id.partition_id(), task_id.job_id()));
        if batch.add(task_id) {
            self.task_count += 1;
            self.oldest.get_or_insert_with(Instant::now);
        }
    }

    fn merge(&mut self, batch: CompletionBatch) {
        for task_id in batch.task_ids {
            self.add(task_id);
        }
    }

    fn take(&mut self) -> Vec<CompletionBatch> {
        self.task_count = 0;
        self.oldest = None;
        std::mem::take(&mut self.batches).into_values().collect()
    }
}

#[derive(Debug)]
pub struct CompletionBatcher {
    resolver: Arc<DependencyResolver>,
    max_batch_size: usize,
    max_batch_time: Duration,
    pending: Mutex<PendingCompletions>,
    shutdown_notify: Notify,
}

impl CompletionBatcher {
    pub fn new(resolver: Arc<DependencyResolver>, config: &TrackingConfig) -> Self {
        Self {
            resolver,
            max_batch_size: config.max_batch_size.max(1),
            max_batch_time: config.max_batch_time(),
            pending: Mutex::new(PendingCompletions::default()),
            shutdown_notify: Notify::new(),
        }
    }

    /// Task ids buffered and not yet flushed
    pub fn pending_len(&self) -> usize {
        self.pending.lock().task_count
    }

    /// Buffer a completed task id, flushing everything once the size bound is reached
    pub async fn add(&self, task_id: JobTaskId) -> Result<()> {
        let ready = {
            let mut pending = self.pending.lock();
            pending.add(task_id);
            if pending.task_count >= self.max_batch_size {
                pending.take()
            } else {
                Vec::new()
            }
        };

        if ready.is_empty() {
            return Ok(());
        }
        debug!(batches = ready.len(), "Completion batch size reached");
        self.flush_batches(ready).await
    }

    /// Flush when the oldest buffered id has waited out the time bound
    pub async fn flush_if_due(&self) -> Result<usize> {
        let due = self
            .pending
            .lock()
            .oldest
            .is_some_and(|oldest| oldest.elapsed() >= self.max_batch_time);
        if due {
            self.flush().await
        } else {
            Ok(0)
        }
    }

    /// Flush everything buffered; returns the number of batches applied
    pub async fn flush(&self) -> Result<usize> {
        let batches = self.pending.lock().take();
        let count = batches.len();
        self.flush_batches(batches).await?;
        Ok(count)
    }

    async fn flush_batches(&self, batches: Vec<CompletionBatch>) -> Result<()> {
        let mut batches = batches.into_iter();
        while let Some(batch) = batches.next() {
            match self.resolver.complete_tasks(&batch).await {
                Ok(_) => {}
                Err(err) if err.is_transient() => {
                    warn!(error = %err, "Completion flush interrupted; batches re-queued");
                    let mut pending = self.pending.lock();
                    pending.merge(batch);
                    for remaining in batches.by_ref() {
                        pending.merge(remaining);
                    }
                    return Err(err);
                }
                Err(JobServiceError::NotFound { message }) => {
                    warn!(job_id = %batch.job_id, error = %message, "Completions reported for unknown job");
                }
                Err(err) => {
                    error!(
                        partition_id = %batch.partition_id,
                        job_id = %batch.job_id,
                        error = %err,
                        "❌ Completion batch rejected"
                    );
                }
            }
        }
        Ok(())
    }

    /// Spawn the time-bound ticker; pending ids are flushed on shutdown
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let tick = (self.max_batch_time / 4).max(Duration::from_millis(10));
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.flush_if_due().await {
                            error!(error = %e, "Timed completion flush failed");
                        }
                    }
                    _ = self.shutdown_notify.notified() => {
                        debug!("Shutdown notification received");
                        break;
                    }
                }
            }

            match self.flush().await {
                Ok(batches) => info!(batches, "🛑 Completion batcher stopped"),
                Err(e) => error!(error = %e, "Final completion flush failed"),
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutdown_notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueueConfig, SuspendedPartitions};
    use crate::messaging::InMemoryQueueGateway;
    use crate::models::{NewJob, TaskDefinition};
    use crate::orchestration::TaskDispatcher;
    use crate::state_machine::JobStatus;
    use crate::store::{CreateJobRecord, InMemoryJobStore, JobStore};

    async fn setup(max_batch_size: usize) -> (Arc<CompletionBatcher>, Arc<InMemoryJobStore>) {
        let store = Arc::new(InMemoryJobStore::new());
        let job = NewJob {
            task: TaskDefinition {
                task_classifier: "Worker".to_string(),
                task_api_version: 1,
                task_data: b"payload".to_vec(),
                task_pipe: "worker-in".to_string(),
                target_pipe: "worker-out".to_string(),
            },
            ..NewJob::default()
        };
        store
            .create_job(CreateJobRecord::new("p", "job", job, Vec::new(), false))
            .await
            .unwrap();

        let dispatcher = Arc::new(TaskDispatcher::new(
            Arc::new(InMemoryQueueGateway::new()),
            store.clone(),
            QueueConfig::default(),
        ));
        let resolver = Arc::new(DependencyResolver::new(
            store.clone(),
            dispatcher,
            SuspendedPartitions::default(),
        ));
        let config = TrackingConfig {
            max_batch_size,
            max_batch_time_ms: 50,
            ..TrackingConfig::default()
        };
        (Arc::new(CompletionBatcher::new(resolver, &config)), store)
    }

    fn task(raw: &str) -> JobTaskId {
        JobTaskId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_size_bound_flushes() {
        let (batcher, store) = setup(2).await;
        batcher.add(task("p:job.1")).await.unwrap();
        assert_eq!(batcher.pending_len(), 1);
        assert_eq!(store.get_job("p", "job").await.unwrap().status, JobStatus::Active);

        batcher.add(task("p:job.2*")).await.unwrap();
        assert_eq!(batcher.pending_len(), 0);
        assert_eq!(store.get_job("p", "job").await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_duplicate_ids_count_once() {
        let (batcher, _) = setup(10).await;
        batcher.add(task("p:job.1")).await.unwrap();
        batcher.add(task("p:job.1")).await.unwrap();
        assert_eq!(batcher.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_time_bound_flushes() {
        let (batcher, store) = setup(100).await;
        batcher.add(task("p:job")).await.unwrap();
        assert_eq!(batcher.flush_if_due().await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(batcher.flush_if_due().await.unwrap(), 1);
        assert_eq!(store.get_job("p", "job").await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_transient_failure_requeues() {
        let (batcher, store) = setup(100).await;
        batcher.add(task("p:job.1")).await.unwrap();
        store.set_available(false);
        assert!(batcher.flush().await.unwrap_err().is_transient());
        assert_eq!(batcher.pending_len(), 1);

        store.set_available(true);
        assert_eq!(batcher.flush().await.unwrap(), 1);
        assert_eq!(batcher.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_remaining() {
        let (batcher, store) = setup(100).await;
        let handle = batcher.clone().start();
        batcher.add(task("p:job")).await.unwrap();
        batcher.shutdown();
        handle.await.unwrap();
        assert_eq!(store.get_job("p", "job").await.unwrap().status, JobStatus::Completed);
    }
}
