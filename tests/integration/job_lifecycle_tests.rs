//! Create, get, delete and client transitions through the lifecycle manager.

use crate::common::*;
use job_service::models::Failure;
use job_service::orchestration::JobCreation;
use job_service::state_machine::{JobStatus, TransitionDecision};
use job_service::store::JobStore;
use job_service::JobServiceError;
use std::sync::Arc;

#[tokio::test]
async fn test_create_dispatches_unblocked_job() {
    let (system, queues) = test_system();

    let created = system
        .lifecycle
        .create_job(PARTITION, "job-1", new_job("a").with_name("First"), Some("corr-1"))
        .await
        .unwrap();
    assert_eq!(created, JobCreation::Created);

    let job = system.lifecycle.get_job(PARTITION, "job-1").await.unwrap();
    assert_eq!(job.status, JobStatus::Active);
    assert_eq!(job.name.as_deref(), Some("First"));
    assert_eq!(job.create_time, job.last_update_time);

    let envelopes = queues.messages(WORKER_QUEUE);
    assert_eq!(envelopes.len(), 1);
    let tracking = envelopes[0].tracking.as_ref().unwrap();
    assert_eq!(tracking.job_task_id.as_deref(), Some("tenant-a:job-1"));
    assert_eq!(tracking.track_to.as_deref(), Some(OUTPUT_QUEUE));
    assert_eq!(envelopes[0].correlation_id.as_deref(), Some("corr-1"));
}

#[tokio::test]
async fn test_create_is_idempotent_for_identical_definition() {
    let (system, queues) = test_system();

    for _ in 0..3 {
        system
            .lifecycle
            .create_job(PARTITION, "job-1", new_job("a"), None)
            .await
            .unwrap();
    }

    assert_eq!(queues.len(WORKER_QUEUE), 1);
    let second = system
        .lifecycle
        .create_job(PARTITION, "job-1", new_job("a"), None)
        .await
        .unwrap();
    assert_eq!(second, JobCreation::Unchanged);
}

#[tokio::test]
async fn test_redefinition_is_forbidden() {
    let (system, _queues) = test_system();
    system
        .lifecycle
        .create_job(PARTITION, "job-1", new_job("a"), None)
        .await
        .unwrap();

    let err = system
        .lifecycle
        .create_job(PARTITION, "job-1", new_job("b"), None)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);

    let job = system.lifecycle.get_job(PARTITION, "job-1").await.unwrap();
    let original = task("a").definition_hash();
    assert_eq!(job.job_hash, original);
}

#[tokio::test]
async fn test_concurrent_identical_creates_write_one_job() {
    let (system, queues) = test_system();
    let lifecycle = Arc::clone(&system.lifecycle);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let lifecycle = Arc::clone(&lifecycle);
        handles.push(tokio::spawn(async move {
            lifecycle
                .create_job(PARTITION, "race", new_job("same"), None)
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() == JobCreation::Created {
            created += 1;
        }
    }
    assert_eq!(created, 1);
    assert_eq!(queues.len(WORKER_QUEUE), 1);
}

#[tokio::test]
async fn test_invalid_requests_are_bad_requests() {
    let (system, _queues) = test_system();

    let err = system
        .lifecycle
        .create_job(PARTITION, "bad:id", new_job("a"), None)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    let err = system
        .lifecycle
        .create_job(PARTITION, "job-1", new_job("a").with_delay(-1), None)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    let err = system
        .lifecycle
        .create_job(PARTITION, "job-1", new_job("a").with_prerequisites(["job-1"]), None)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let (system, _queues) = test_system();

    let err = system.lifecycle.get_job(PARTITION, "ghost").await.unwrap_err();
    assert!(matches!(err, JobServiceError::NotFound { .. }));
    assert_eq!(
        system.lifecycle.cancel_job(PARTITION, "ghost", None).await.unwrap_err().status_code(),
        404
    );
    assert_eq!(
        system.lifecycle.delete_job(PARTITION, "ghost", None).await.unwrap_err().status_code(),
        404
    );

    let activity = system.lifecycle.is_job_active(PARTITION, "ghost").await.unwrap();
    assert!(!activity.active);
}

#[tokio::test]
async fn test_cancel_is_idempotent_and_final() {
    let (system, _queues) = test_system();
    system
        .lifecycle
        .create_job(PARTITION, "job-1", new_job("a"), None)
        .await
        .unwrap();

    let first = system.lifecycle.cancel_job(PARTITION, "job-1", None).await.unwrap();
    assert!(first.is_transition());
    let updated = system.lifecycle.get_job(PARTITION, "job-1").await.unwrap();

    let again = system.lifecycle.cancel_job(PARTITION, "job-1", None).await.unwrap();
    assert_eq!(again, TransitionDecision::NoOp(JobStatus::Cancelled));
    let unchanged = system.lifecycle.get_job(PARTITION, "job-1").await.unwrap();
    assert_eq!(updated.last_update_time, unchanged.last_update_time);

    let err = system.lifecycle.pause_job(PARTITION, "job-1", None).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
    let err = system.lifecycle.resume_job(PARTITION, "job-1", None).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_pause_and_resume_publish_one_trigger() {
    let (system, queues) = test_system();
    let resume_queue = system.config.queues.resume_job_queue.clone();
    system
        .lifecycle
        .create_job(PARTITION, "job-1", new_job("a"), None)
        .await
        .unwrap();

    assert!(system.lifecycle.pause_job(PARTITION, "job-1", None).await.unwrap().is_transition());
    assert!(!system.lifecycle.pause_job(PARTITION, "job-1", None).await.unwrap().is_transition());
    assert_eq!(
        system.lifecycle.get_job_status(PARTITION, "job-1").await.unwrap(),
        JobStatus::Paused
    );
    assert!(!system.lifecycle.is_job_active(PARTITION, "job-1").await.unwrap().active);

    let resumed = system.lifecycle.resume_job(PARTITION, "job-1", None).await.unwrap();
    assert!(resumed.is_transition());
    assert_eq!(queues.len(&resume_queue), 1);

    let err = system.lifecycle.resume_job(PARTITION, "job-1", None).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(queues.len(&resume_queue), 1);
}

#[tokio::test]
async fn test_fail_job_appends_failure() {
    let (system, _queues) = test_system();
    system
        .lifecycle
        .create_job(PARTITION, "job-1", new_job("a"), None)
        .await
        .unwrap();

    let failure = Failure::new("E42", "ops", "operator aborted");
    let decision = system
        .lifecycle
        .fail_job(PARTITION, "job-1", failure.clone(), None)
        .await
        .unwrap();
    assert_eq!(decision.resulting_status(), JobStatus::Failed);

    let job = system.lifecycle.get_job(PARTITION, "job-1").await.unwrap();
    assert_eq!(job.failures, vec![failure]);

    let err = system.lifecycle.cancel_job(PARTITION, "job-1", None).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_dispatch_failure_is_recorded_on_job() {
    let (system, queues) = test_system();
    queues.fail_queue(WORKER_QUEUE);

    let err = system
        .lifecycle
        .create_job(PARTITION, "job-1", new_job("a"), None)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 503);

    let job = system.store.get_job(PARTITION, "job-1").await.unwrap();
    assert_eq!(job.failures.len(), 1);
    assert_eq!(job.failures[0].failure_id, "ADD_TO_QUEUE_FAILURE");
}

#[tokio::test]
async fn test_store_outage_is_service_unavailable() {
    let store = job_service::store::InMemoryJobStore::new();
    store.set_available(false);
    let err = store.get_job(PARTITION, "job-1").await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.status_code(), 503);
}

#[tokio::test]
async fn test_operations_are_partition_scoped() {
    let (system, _queues) = test_system();
    system
        .lifecycle
        .create_job(PARTITION, "shared-id", new_job("a"), None)
        .await
        .unwrap();

    let other = "tenant-b";
    assert_eq!(system.lifecycle.get_job(other, "shared-id").await.unwrap_err().status_code(), 404);
    assert_eq!(
        system.lifecycle.cancel_job(other, "shared-id", None).await.unwrap_err().status_code(),
        404
    );
    assert_eq!(
        system.lifecycle.delete_job(other, "shared-id", None).await.unwrap_err().status_code(),
        404
    );

    system
        .lifecycle
        .create_job(other, "shared-id", new_job("different"), None)
        .await
        .unwrap();
    let original = system.lifecycle.get_job(PARTITION, "shared-id").await.unwrap();
    assert_eq!(original.status, JobStatus::Active);
    assert_eq!(original.job_hash, task("a").definition_hash());
}
