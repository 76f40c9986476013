//! Prerequisite gating and the completion cascade.

use crate::common::*;
use job_service::models::JobTaskId;
use job_service::state_machine::JobStatus;
use job_service::store::CompletionBatch;

async fn complete(system: &job_service::orchestration::JobServiceSystem, job_id: &str) {
    system
        .resolver
        .complete_tasks(&CompletionBatch::single(JobTaskId::root(PARTITION, job_id)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_dependent_waits_for_every_prerequisite() {
    let (system, queues) = test_system();
    let lifecycle = &system.lifecycle;

    lifecycle.create_job(PARTITION, "a", new_job("a"), None).await.unwrap();
    lifecycle.create_job(PARTITION, "b", new_job("b"), None).await.unwrap();
    lifecycle
        .create_job(PARTITION, "c", new_job("c").with_prerequisites(["a", "b"]), None)
        .await
        .unwrap();

    assert_eq!(lifecycle.get_job_status(PARTITION, "c").await.unwrap(), JobStatus::Waiting);
    assert_eq!(system.store.dependency_edges(PARTITION, "c").await.unwrap().len(), 2);
    assert!(system.store.task_template(PARTITION, "c").await.unwrap().is_some());
    assert_eq!(queues.len(WORKER_QUEUE), 2);

    complete(&system, "a").await;
    assert_eq!(lifecycle.get_job_status(PARTITION, "c").await.unwrap(), JobStatus::Waiting);
    assert_eq!(queues.len(WORKER_QUEUE), 2);

    complete(&system, "b").await;
    assert_eq!(lifecycle.get_job_status(PARTITION, "c").await.unwrap(), JobStatus::Active);
    assert!(system.store.task_template(PARTITION, "c").await.unwrap().is_none());
    assert!(system.store.dependency_edges(PARTITION, "c").await.unwrap().is_empty());

    let dispatched = dispatched_job_ids(&queues);
    assert_eq!(dispatched.len(), 3);
    assert_eq!(dispatched.last().map(String::as_str), Some("tenant-a:c"));
}

#[tokio::test]
async fn test_completed_prerequisite_creates_no_edge() {
    let (system, queues) = test_system();
    system.lifecycle.create_job(PARTITION, "a", new_job("a"), None).await.unwrap();
    complete(&system, "a").await;

    system
        .lifecycle
        .create_job(PARTITION, "b", new_job("b").with_prerequisites(["a"]), None)
        .await
        .unwrap();
    assert_eq!(
        system.lifecycle.get_job_status(PARTITION, "b").await.unwrap(),
        JobStatus::Active
    );
    assert_eq!(queues.len(WORKER_QUEUE), 2);
}

#[tokio::test]
async fn test_unknown_prerequisite_blocks_until_it_completes() {
    let (system, queues) = test_system();
    system
        .lifecycle
        .create_job(PARTITION, "later", new_job("l").with_prerequisites(["future"]), None)
        .await
        .unwrap();
    assert_eq!(queues.len(WORKER_QUEUE), 0);

    system.lifecycle.create_job(PARTITION, "future", new_job("f"), None).await.unwrap();
    complete(&system, "future").await;

    assert_eq!(
        system.lifecycle.get_job_status(PARTITION, "later").await.unwrap(),
        JobStatus::Active
    );
}

#[tokio::test]
async fn test_repeated_completion_dispatches_dependent_once() {
    let (system, queues) = test_system();
    system.lifecycle.create_job(PARTITION, "a", new_job("a"), None).await.unwrap();
    system
        .lifecycle
        .create_job(PARTITION, "b", new_job("b").with_prerequisites(["a"]), None)
        .await
        .unwrap();

    complete(&system, "a").await;
    complete(&system, "a").await;
    system.resolver.on_prerequisite_satisfied(PARTITION, "a").await.unwrap();

    let dispatched_b = dispatched_job_ids(&queues)
        .into_iter()
        .filter(|id| id == "tenant-a:b")
        .count();
    assert_eq!(dispatched_b, 1);
}

#[tokio::test]
async fn test_deleting_prerequisite_leaves_dependent_blocked() {
    let (system, queues) = test_system();
    system.lifecycle.create_job(PARTITION, "a", new_job("a"), None).await.unwrap();
    system
        .lifecycle
        .create_job(PARTITION, "b", new_job("b").with_prerequisites(["a"]), None)
        .await
        .unwrap();

    system.lifecycle.delete_job(PARTITION, "a", None).await.unwrap();

    let job = system.lifecycle.get_job(PARTITION, "b").await.unwrap();
    assert_eq!(job.status, JobStatus::Waiting);
    let edges = system.store.dependency_edges(PARTITION, "b").await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].prerequisite_job_id, "a");
    assert_eq!(queues.len(WORKER_QUEUE), 1);
}

#[tokio::test]
async fn test_cancelled_dependent_is_never_dispatched() {
    let (system, queues) = test_system();
    system.lifecycle.create_job(PARTITION, "a", new_job("a"), None).await.unwrap();
    system
        .lifecycle
        .create_job(PARTITION, "b", new_job("b").with_prerequisites(["a"]), None)
        .await
        .unwrap();

    system.lifecycle.cancel_job(PARTITION, "b", None).await.unwrap();
    assert!(system.store.task_template(PARTITION, "b").await.unwrap().is_none());

    complete(&system, "a").await;
    assert_eq!(
        system.lifecycle.get_job_status(PARTITION, "b").await.unwrap(),
        JobStatus::Cancelled
    );
    assert_eq!(queues.len(WORKER_QUEUE), 1);
}

#[tokio::test]
async fn test_subtask_completions_collapse_to_root() {
    let (system, _queues) = test_system();
    system.lifecycle.create_job(PARTITION, "a", new_job("a"), None).await.unwrap();

    let root = JobTaskId::root(PARTITION, "a");
    let mut first = CompletionBatch::new(PARTITION, "a");
    first.add(root.subtask(1, false));
    let outcome = system.resolver.complete_tasks(&first).await.unwrap();
    assert!(!outcome.job_completed);
    assert_eq!(outcome.status, JobStatus::Active);

    let mut second = CompletionBatch::new(PARTITION, "a");
    second.add(root.subtask(2, true));
    let outcome = system.resolver.complete_tasks(&second).await.unwrap();
    assert!(outcome.job_completed);

    let job = system.lifecycle.get_job(PARTITION, "a").await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.percentage_complete, 100.0);
}

#[tokio::test]
async fn test_partitions_do_not_share_edges() {
    let (system, _queues) = test_system();
    system.lifecycle.create_job("tenant-b", "a", new_job("a"), None).await.unwrap();
    system.lifecycle.create_job(PARTITION, "a", new_job("a"), None).await.unwrap();
    system
        .lifecycle
        .create_job(PARTITION, "b", new_job("b").with_prerequisites(["a"]), None)
        .await
        .unwrap();

    system
        .resolver
        .complete_tasks(&CompletionBatch::single(JobTaskId::root("tenant-b", "a")))
        .await
        .unwrap();

    assert_eq!(
        system.lifecycle.get_job_status(PARTITION, "b").await.unwrap(),
        JobStatus::Waiting
    );
}
