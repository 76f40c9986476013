//! Shared fixtures for the in-memory integration tests.

#![allow(dead_code)]

use job_service::config::JobServiceConfig;
use job_service::messaging::{InMemoryQueueGateway, TaskEnvelope, TaskQueueConsumer, TaskQueueGateway, TaskStatus};
use job_service::models::{NewJob, TaskDefinition};
use job_service::orchestration::JobServiceSystem;

pub const PARTITION: &str = "tenant-a";
pub const WORKER_QUEUE: &str = "report-worker";
pub const OUTPUT_QUEUE: &str = "report-output";

/// Configuration tuned so nothing waits on wall-clock batching in tests
pub fn test_config() -> JobServiceConfig {
    let mut config = JobServiceConfig::default();
    config.database.url = "postgresql://localhost/job_service_test".to_string();
    config.tracking.max_batch_size = 1;
    config.tracking.max_batch_time_ms = 50;
    config.tracking.consumer_poll_interval_ms = 10;
    config.scheduler.poll_interval_seconds = 1;
    config
}

pub fn test_system() -> (JobServiceSystem, InMemoryQueueGateway) {
    JobServiceSystem::in_memory(test_config())
}

pub fn task(payload: &str) -> TaskDefinition {
    TaskDefinition {
        task_classifier: "Report".to_string(),
        task_api_version: 1,
        task_data: payload.as_bytes().to_vec(),
        task_pipe: WORKER_QUEUE.to_string(),
        target_pipe: OUTPUT_QUEUE.to_string(),
    }
}

pub fn new_job(payload: &str) -> NewJob {
    NewJob::new(task(payload))
}

/// Job ids whose tasks are sitting on the worker queue
pub fn dispatched_job_ids(queues: &InMemoryQueueGateway) -> Vec<String> {
    queues
        .messages(WORKER_QUEUE)
        .iter()
        .filter_map(|envelope| envelope.tracking.as_ref()?.job_task_id.clone())
        .collect()
}

/// Simulate a worker: take every task off the worker queue, mark it
/// successful and route the result through the tracking queue to the
/// output queue. Returns how many tasks were processed.
pub async fn run_worker(queues: &InMemoryQueueGateway, tracking_queue: &str) -> usize {
    let deliveries = queues
        .receive(WORKER_QUEUE, 100, 30)
        .await
        .expect("worker queue readable");
    let processed = deliveries.len();

    for delivery in deliveries {
        let mut result: TaskEnvelope = delivery.envelope.clone();
        result.task_status = TaskStatus::ResultSuccess;
        result.to = Some(OUTPUT_QUEUE.to_string());
        queues
            .publish(tracking_queue, &result)
            .await
            .expect("tracking queue writable");
        queues.acknowledge(&delivery).await.expect("acknowledged");
    }
    processed
}
