//! Job expiration policies: stored per job, defaulted from configuration and
//! applied by the scheduler.

use crate::common::*;
use chrono::{Duration, Utc};
use job_service::constants::failures;
use job_service::models::{ExpirationOperation, ExpirationPolicy, ExpiryPolicy, ExpiryReference, ExpiryTime};
use job_service::orchestration::JobServiceSystem;
use job_service::state_machine::JobStatus;

fn expire_after(reference: ExpiryReference, minutes: i64) -> ExpiryPolicy {
    ExpiryPolicy::expire(ExpiryTime::after(reference, minutes))
}

#[tokio::test]
async fn test_job_expiry_is_stored_and_filled_from_default() {
    let (system, _) = test_system();
    let policy = ExpirationPolicy::default()
        .with_default(expire_after(ExpiryReference::CreateTime, 60 * 24))
        .with_status(
            JobStatus::Completed,
            ExpiryPolicy::delete(ExpiryTime::after(ExpiryReference::LastUpdateTime, 60)),
        );
    system
        .lifecycle
        .create_job(PARTITION, "job-1", new_job("a").with_expiry(policy), None)
        .await
        .unwrap();

    let expiry = system.lifecycle.get_job_expiry(PARTITION, "job-1").await.unwrap();
    assert_eq!(expiry.active, expire_after(ExpiryReference::CreateTime, 1440));
    assert_eq!(expiry.waiting, expiry.active);
    assert_eq!(expiry.completed.operation, ExpirationOperation::Delete);
    assert!(expiry.expired.is_never());

    let err = system.lifecycle.get_job_expiry(PARTITION, "ghost").await.unwrap_err();
    assert_eq!(err.status_code(), 404);
    let err = system.lifecycle.get_job_expiry(PARTITION, "bad:id").await.unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_configured_default_applies_to_jobs_without_policy() {
    let mut config = test_config();
    config.expiration = ExpirationPolicy::default().with_default(expire_after(ExpiryReference::LastUpdateTime, 30));
    let (system, _) = JobServiceSystem::in_memory(config);

    system.lifecycle.create_job(PARTITION, "job-1", new_job("a"), None).await.unwrap();
    let expiry = system.lifecycle.get_job_expiry(PARTITION, "job-1").await.unwrap();
    assert_eq!(expiry, system.lifecycle.default_expiration().unwrap());
    assert_eq!(expiry.paused, expire_after(ExpiryReference::LastUpdateTime, 30));
}

#[tokio::test]
async fn test_expiry_instant_in_the_past_is_rejected() {
    let (system, _) = test_system();
    let policy = ExpirationPolicy::default()
        .with_default(ExpiryPolicy::expire(ExpiryTime::At(Utc::now() - Duration::hours(1))));

    let err = system
        .lifecycle
        .create_job(PARTITION, "job-1", new_job("a").with_expiry(policy), None)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert!(system.lifecycle.get_job(PARTITION, "job-1").await.is_err());
}

#[tokio::test]
async fn test_scheduler_expires_job_and_fails_dependents_when_enabled() {
    let mut config = test_config();
    config.scheduler.propagate_failures = true;
    let (system, queues) = JobServiceSystem::in_memory(config);
    let lifecycle = &system.lifecycle;

    let policy = ExpirationPolicy::default().with_status(
        JobStatus::Active,
        expire_after(ExpiryReference::LastUpdateTime, 5),
    );
    lifecycle
        .create_job(PARTITION, "a", new_job("a").with_expiry(policy), None)
        .await
        .unwrap();
    lifecycle
        .create_job(PARTITION, "b", new_job("b").with_prerequisites(["a"]), None)
        .await
        .unwrap();

    let outcome = system.scheduler.apply_expiration(Utc::now()).await.unwrap();
    assert!(outcome.is_empty());

    let outcome = system
        .scheduler
        .apply_expiration(Utc::now() + Duration::minutes(6))
        .await
        .unwrap();
    assert_eq!(outcome.expired, vec![(PARTITION.to_string(), "a".to_string())]);
    assert_eq!(outcome.failed_dependents, vec![(PARTITION.to_string(), "b".to_string())]);

    assert_eq!(lifecycle.get_job_status(PARTITION, "a").await.unwrap(), JobStatus::Expired);
    let dependent = lifecycle.get_job(PARTITION, "b").await.unwrap();
    assert_eq!(dependent.status, JobStatus::Failed);
    assert_eq!(dependent.failures[0].failure_id, failures::PREREQUISITE_EXPIRED);
    assert!(dependent.failures[0].failure_message.contains("Prerequisite job a"));

    // Expired is terminal and no longer active for workers
    assert!(!lifecycle.is_job_active(PARTITION, "a").await.unwrap().active);
    assert_eq!(dispatched_job_ids(&queues), vec!["tenant-a:a".to_string()]);
}

#[tokio::test]
async fn test_dependents_stay_waiting_without_propagation() {
    let (system, _) = test_system();
    let lifecycle = &system.lifecycle;
    let policy = ExpirationPolicy::default().with_status(
        JobStatus::Active,
        expire_after(ExpiryReference::CreateTime, 1),
    );
    lifecycle
        .create_job(PARTITION, "a", new_job("a").with_expiry(policy), None)
        .await
        .unwrap();
    lifecycle
        .create_job(PARTITION, "b", new_job("b").with_prerequisites(["a"]), None)
        .await
        .unwrap();

    let outcome = system
        .scheduler
        .apply_expiration(Utc::now() + Duration::minutes(2))
        .await
        .unwrap();
    assert_eq!(outcome.expired.len(), 1);
    assert!(outcome.failed_dependents.is_empty());
    assert_eq!(lifecycle.get_job_status(PARTITION, "b").await.unwrap(), JobStatus::Waiting);

    // An expired prerequisite never completes, so completion reports are ignored
    system
        .resolver
        .complete_tasks(&job_service::store::CompletionBatch::single(
            job_service::models::JobTaskId::root(PARTITION, "a"),
        ))
        .await
        .unwrap();
    assert_eq!(lifecycle.get_job_status(PARTITION, "a").await.unwrap(), JobStatus::Expired);
    assert_eq!(lifecycle.get_job_status(PARTITION, "b").await.unwrap(), JobStatus::Waiting);
}
