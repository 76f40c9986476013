//! Create, dispatch, worker result, tracking proxy, completion and cascade,
//! driven by the background loops of a running system.

use crate::common::*;
use job_service::state_machine::JobStatus;
use std::time::Duration;

async fn wait_for_status(
    system: &job_service::orchestration::JobServiceSystem,
    job_id: &str,
    expected: JobStatus,
) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if system.lifecycle.get_job_status(PARTITION, job_id).await.unwrap() == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "{job_id} never reached {expected}");
}

#[tokio::test]
async fn test_worker_result_completes_job_and_releases_dependent() {
    let (system, queues) = test_system();
    let tracking_queue = system.config.queues.tracking_queue.clone();
    let handle = system.start();

    system.lifecycle.create_job(PARTITION, "extract", new_job("e"), None).await.unwrap();
    system
        .lifecycle
        .create_job(PARTITION, "load", new_job("l").with_prerequisites(["extract"]), None)
        .await
        .unwrap();

    assert_eq!(run_worker(&queues, &tracking_queue).await, 1);
    wait_for_status(&system, "extract", JobStatus::Completed).await;
    wait_for_status(&system, "load", JobStatus::Active).await;

    let extract = system.lifecycle.get_job(PARTITION, "extract").await.unwrap();
    assert_eq!(extract.percentage_complete, 100.0);

    assert_eq!(run_worker(&queues, &tracking_queue).await, 1);
    wait_for_status(&system, "load", JobStatus::Completed).await;

    let results = queues.messages(OUTPUT_QUEUE);
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|envelope| envelope.tracking.is_none()));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_health_probe_reflects_store() {
    let (system, _queues) = test_system();
    let status = system.health.check().await;
    assert!(status.healthy);

    let store = std::sync::Arc::new(job_service::store::InMemoryJobStore::new());
    let queues = std::sync::Arc::new(job_service::messaging::InMemoryQueueGateway::new());
    let degraded = job_service::orchestration::JobServiceSystem::assemble(test_config(), store.clone(), queues);
    store.set_available(false);
    assert!(!degraded.health.check().await.healthy);
}

#[tokio::test]
async fn test_shutdown_flushes_buffered_completions() {
    let mut config = test_config();
    config.tracking.max_batch_size = 100;
    config.tracking.max_batch_time_ms = 60_000;
    let (system, queues) = job_service::orchestration::JobServiceSystem::in_memory(config);
    system.lifecycle.create_job(PARTITION, "job-1", new_job("a"), None).await.unwrap();

    let handle = system.start();
    system
        .batcher
        .add(job_service::models::JobTaskId::root(PARTITION, "job-1"))
        .await
        .unwrap();
    assert_eq!(system.batcher.pending_len(), 1);

    handle.shutdown().await;
    assert_eq!(system.batcher.pending_len(), 0);
    assert_eq!(
        system.lifecycle.get_job_status(PARTITION, "job-1").await.unwrap(),
        JobStatus::Completed
    );
    assert_eq!(queues.len(WORKER_QUEUE), 1);
}
