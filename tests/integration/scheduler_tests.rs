//! Delayed release, suspended partitions and resume triggers.

use crate::common::*;
use chrono::{Duration, Utc};
use job_service::models::JobTaskId;
use job_service::orchestration::JobServiceSystem;
use job_service::state_machine::JobStatus;
use job_service::store::CompletionBatch;

#[tokio::test]
async fn test_delayed_job_waits_for_its_delay() {
    let (system, queues) = test_system();
    system
        .lifecycle
        .create_job(PARTITION, "later", new_job("a").with_delay(60), None)
        .await
        .unwrap();

    let job = system.lifecycle.get_job(PARTITION, "later").await.unwrap();
    assert_eq!(job.status, JobStatus::Waiting);
    let eligible_at = job.eligible_to_run_date.unwrap();
    assert!(eligible_at > job.create_time);
    assert_eq!(queues.len(WORKER_QUEUE), 0);

    assert_eq!(system.scheduler.run_once(Utc::now()).await.unwrap(), 0);
    assert_eq!(queues.len(WORKER_QUEUE), 0);

    let dispatched = system
        .scheduler
        .run_once(eligible_at + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(dispatched, 1);
    assert_eq!(
        system.lifecycle.get_job_status(PARTITION, "later").await.unwrap(),
        JobStatus::Active
    );

    assert_eq!(
        system.scheduler.run_once(eligible_at + Duration::seconds(2)).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_delay_clock_starts_when_prerequisite_completes() {
    let (system, queues) = test_system();
    let lifecycle = &system.lifecycle;
    lifecycle.create_job(PARTITION, "a", new_job("a"), None).await.unwrap();
    lifecycle
        .create_job(
            PARTITION,
            "b",
            new_job("b").with_prerequisites(["a"]).with_delay(30),
            None,
        )
        .await
        .unwrap();

    let blocked = lifecycle.get_job(PARTITION, "b").await.unwrap();
    assert_eq!(blocked.status, JobStatus::Waiting);
    assert_eq!(blocked.eligible_to_run_date, None);
    assert_eq!(system.scheduler.run_once(Utc::now() + Duration::hours(1)).await.unwrap(), 0);

    let before = Utc::now();
    system
        .resolver
        .complete_tasks(&CompletionBatch::single(JobTaskId::root(PARTITION, "a")))
        .await
        .unwrap();
    let after = Utc::now();

    let deferred = lifecycle.get_job(PARTITION, "b").await.unwrap();
    assert_eq!(deferred.status, JobStatus::Waiting);
    let eligible_at = deferred.eligible_to_run_date.unwrap();
    assert!(eligible_at >= before + Duration::seconds(30));
    assert!(eligible_at <= after + Duration::seconds(30));
    assert!(system.store.task_template(PARTITION, "b").await.unwrap().is_some());
    assert!(system.store.dependency_edges(PARTITION, "b").await.unwrap().is_empty());

    assert_eq!(system.scheduler.run_once(Utc::now()).await.unwrap(), 0);
    assert_eq!(
        system
            .scheduler
            .run_once(eligible_at + Duration::seconds(1))
            .await
            .unwrap(),
        1
    );
    assert_eq!(lifecycle.get_job_status(PARTITION, "b").await.unwrap(), JobStatus::Active);
    assert_eq!(
        system
            .scheduler
            .run_once(eligible_at + Duration::seconds(2))
            .await
            .unwrap(),
        0
    );

    let dispatched_b = dispatched_job_ids(&queues)
        .into_iter()
        .filter(|id| id == "tenant-a:b")
        .count();
    assert_eq!(dispatched_b, 1);
}

#[tokio::test]
async fn test_suspended_partition_holds_every_job() {
    let mut config = test_config();
    config.partitions.suspended = vec!["frozen".to_string()];
    let (system, queues) = JobServiceSystem::in_memory(config);

    system.lifecycle.create_job("frozen", "job-1", new_job("a"), None).await.unwrap();
    assert_eq!(
        system.lifecycle.get_job_status("frozen", "job-1").await.unwrap(),
        JobStatus::Waiting
    );
    assert_eq!(system.scheduler.run_once(Utc::now() + Duration::hours(1)).await.unwrap(), 0);
    assert_eq!(queues.len(WORKER_QUEUE), 0);

    system.lifecycle.create_job(PARTITION, "job-1", new_job("a"), None).await.unwrap();
    assert_eq!(queues.len(WORKER_QUEUE), 1);
}

#[tokio::test]
async fn test_resume_trigger_releases_held_job() {
    let (system, queues) = test_system();
    let lifecycle = &system.lifecycle;
    lifecycle.create_job(PARTITION, "a", new_job("a"), None).await.unwrap();
    lifecycle
        .create_job(PARTITION, "b", new_job("b").with_prerequisites(["a"]), None)
        .await
        .unwrap();
    lifecycle.pause_job(PARTITION, "b", None).await.unwrap();

    system
        .resolver
        .complete_tasks(&CompletionBatch::single(JobTaskId::root(PARTITION, "a")))
        .await
        .unwrap();
    assert_eq!(lifecycle.get_job_status(PARTITION, "b").await.unwrap(), JobStatus::Paused);
    assert!(system.store.task_template(PARTITION, "b").await.unwrap().is_some());
    assert_eq!(queues.len(WORKER_QUEUE), 1);

    lifecycle.resume_job(PARTITION, "b", None).await.unwrap();
    assert_eq!(system.consumer.poll_resume_queue().await.unwrap(), 1);

    assert_eq!(lifecycle.get_job_status(PARTITION, "b").await.unwrap(), JobStatus::Active);
    assert!(system.store.task_template(PARTITION, "b").await.unwrap().is_none());
    assert_eq!(dispatched_job_ids(&queues).last().map(String::as_str), Some("tenant-a:b"));
}

#[tokio::test]
async fn test_lost_resume_trigger_is_covered_by_poll() {
    let (system, queues) = test_system();
    let resume_queue = system.config.queues.resume_job_queue.clone();
    let lifecycle = &system.lifecycle;
    lifecycle.create_job(PARTITION, "a", new_job("a"), None).await.unwrap();
    lifecycle
        .create_job(PARTITION, "b", new_job("b").with_prerequisites(["a"]), None)
        .await
        .unwrap();
    lifecycle.pause_job(PARTITION, "b", None).await.unwrap();
    system
        .resolver
        .complete_tasks(&CompletionBatch::single(JobTaskId::root(PARTITION, "a")))
        .await
        .unwrap();

    queues.fail_queue(&resume_queue);
    let decision = lifecycle.resume_job(PARTITION, "b", None).await.unwrap();
    assert!(decision.is_transition());
    assert_eq!(queues.len(&resume_queue), 0);

    assert_eq!(system.scheduler.run_once(Utc::now()).await.unwrap(), 1);
    assert_eq!(lifecycle.get_job_status(PARTITION, "b").await.unwrap(), JobStatus::Active);
}

#[tokio::test]
async fn test_malformed_resume_trigger_is_acknowledged() {
    use job_service::messaging::{TaskEnvelope, TaskQueueGateway};

    let (system, queues) = test_system();
    let resume_queue = system.config.queues.resume_job_queue.clone();
    let envelope = TaskEnvelope::new_task("ResumeJob", 1, Vec::new()).to_queue(&resume_queue);
    queues.publish(&resume_queue, &envelope).await.unwrap();

    assert_eq!(system.consumer.poll_resume_queue().await.unwrap(), 1);
    assert_eq!(queues.len(&resume_queue), 0);
}
