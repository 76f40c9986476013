//! Explicit tracking reports and transparent interception through the
//! tracking queue consumer.

use crate::common::*;
use job_service::config::JobServiceConfig;
use job_service::messaging::{InMemoryQueueGateway, TaskEnvelope, TaskQueueGateway, TaskStatus, TrackingInfo};
use job_service::orchestration::JobServiceSystem;
use job_service::state_machine::JobStatus;
use job_service::tracking::{
    ReportedFailure, TrackingReport, TrackingReportStatus, TrackingReportTask,
    TRACKING_REPORT_API_VERSION, TRACKING_REPORT_CLASSIFIER,
};

async fn publish_reports(system: &JobServiceSystem, queues: &InMemoryQueueGateway, reports: Vec<TrackingReport>) {
    let payload = TrackingReportTask {
        tracking_reports: reports,
    }
    .to_payload()
    .unwrap();
    let envelope = TaskEnvelope::new_task(TRACKING_REPORT_CLASSIFIER, TRACKING_REPORT_API_VERSION, payload)
        .to_queue(&system.config.queues.tracking_queue);
    queues
        .publish(&system.config.queues.tracking_queue, &envelope)
        .await
        .unwrap();
}

fn tracked_result(job_task_id: &str, status: TaskStatus, to: &str) -> TaskEnvelope {
    let mut envelope = TaskEnvelope::new_task("Report", 1, b"result".to_vec())
        .to_queue(to)
        .with_tracking(TrackingInfo {
            job_task_id: Some(job_task_id.to_string()),
            tracking_pipe: Some("jobtracking-in".to_string()),
            track_to: Some(OUTPUT_QUEUE.to_string()),
            ..TrackingInfo::default()
        });
    envelope.task_status = status;
    envelope
}

async fn system_with(config: JobServiceConfig) -> (JobServiceSystem, InMemoryQueueGateway) {
    let (system, queues) = JobServiceSystem::in_memory(config);
    system
        .lifecycle
        .create_job(PARTITION, "job-1", new_job("a"), None)
        .await
        .unwrap();
    (system, queues)
}

#[tokio::test]
async fn test_explicit_progress_and_retry_reports() {
    let (system, queues) = system_with(test_config()).await;

    let mut progress = TrackingReport::new("tenant-a:job-1", TrackingReportStatus::Progress);
    progress.estimated_percentage_completed = Some(40.0);
    let mut retry = TrackingReport::new("tenant-a:job-1.1", TrackingReportStatus::Retry);
    retry.retries = Some(2);
    publish_reports(&system, &queues, vec![progress, retry]).await;

    assert_eq!(system.consumer.poll_tracking_queue().await.unwrap(), 1);
    let job = system.lifecycle.get_job(PARTITION, "job-1").await.unwrap();
    assert_eq!(job.status, JobStatus::Active);
    assert_eq!(job.percentage_complete, 40.0);
    assert!(job.failures.is_empty());
}

#[tokio::test]
async fn test_explicit_subtask_completions_complete_job() {
    let (system, queues) = system_with(test_config()).await;

    publish_reports(
        &system,
        &queues,
        vec![
            TrackingReport::new("tenant-a:job-1.2*", TrackingReportStatus::Complete),
            TrackingReport::new("tenant-a:job-1.1", TrackingReportStatus::Complete),
        ],
    )
    .await;
    system.consumer.poll_tracking_queue().await.unwrap();
    system.batcher.flush().await.unwrap();

    let job = system.lifecycle.get_job(PARTITION, "job-1").await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.percentage_complete, 100.0);
}

#[tokio::test]
async fn test_completions_buffer_until_batch_is_full() {
    let mut config = test_config();
    config.tracking.max_batch_size = 10;
    config.tracking.max_batch_time_ms = 60_000;
    let (system, queues) = system_with(config).await;

    publish_reports(
        &system,
        &queues,
        vec![TrackingReport::new("tenant-a:job-1", TrackingReportStatus::Complete)],
    )
    .await;
    system.consumer.poll_tracking_queue().await.unwrap();

    assert_eq!(system.batcher.pending_len(), 1);
    assert_eq!(
        system.lifecycle.get_job_status(PARTITION, "job-1").await.unwrap(),
        JobStatus::Active
    );

    assert_eq!(system.batcher.flush().await.unwrap(), 1);
    assert_eq!(
        system.lifecycle.get_job_status(PARTITION, "job-1").await.unwrap(),
        JobStatus::Completed
    );
}

#[tokio::test]
async fn test_explicit_failure_is_recorded_without_status_change() {
    let (system, queues) = system_with(test_config()).await;

    publish_reports(
        &system,
        &queues,
        vec![
            TrackingReport::new("tenant-a:job-1", TrackingReportStatus::Failed),
            TrackingReport::new("tenant-a:ghost", TrackingReportStatus::Progress),
            TrackingReport::new("not a task id", TrackingReportStatus::Progress),
        ],
    )
    .await;
    assert_eq!(system.consumer.poll_tracking_queue().await.unwrap(), 1);

    let job = system.lifecycle.get_job(PARTITION, "job-1").await.unwrap();
    assert_eq!(job.status, JobStatus::Active);
    assert_eq!(job.failures.len(), 1);
    assert_eq!(job.failures[0].failure_id, "FAILED");
}

#[tokio::test]
async fn test_explicit_failure_with_root_cause_records_composite_source() {
    let (system, _) = system_with(test_config()).await;

    let mut failed = TrackingReport::new("tenant-a:job-1.2", TrackingReportStatus::Failed);
    failed.failure = Some(
        ReportedFailure::new("OCR_FAILED", "OcrWorker", "page 3 unreadable").with_root_cause("BatchWorker"),
    );
    system
        .proxy
        .handle_report_task(&TrackingReportTask {
            tracking_reports: vec![failed],
        })
        .await
        .unwrap();

    let job = system.lifecycle.get_job(PARTITION, "job-1").await.unwrap();
    assert_eq!(job.failures.len(), 1);
    assert_eq!(job.failures[0].failure_id, "OCR_FAILED");
    assert_eq!(job.failures[0].failure_source, "BatchWorker:OcrWorker");
    assert_eq!(job.failures[0].failure_message, "page 3 unreadable");
}

#[tokio::test]
async fn test_redelivered_report_task_does_not_duplicate_failures() {
    let (system, _) = system_with(test_config()).await;

    let mut failed = TrackingReport::new("tenant-a:job-1.1", TrackingReportStatus::Failed);
    failed.failure = Some(ReportedFailure::new("E1", "Worker", "boom"));
    let mut progress = TrackingReport::new("tenant-a:job-1", TrackingReportStatus::Progress);
    progress.estimated_percentage_completed = Some(25.0);
    let task = TrackingReportTask {
        tracking_reports: vec![failed, progress],
    };

    system.proxy.handle_report_task(&task).await.unwrap();
    system.proxy.handle_report_task(&task).await.unwrap();

    let job = system.lifecycle.get_job(PARTITION, "job-1").await.unwrap();
    assert_eq!(job.failures.len(), 1);
    assert_eq!(job.percentage_complete, 25.0);
}

#[tokio::test]
async fn test_transparent_progress_is_forwarded_with_tracking() {
    let (system, queues) = system_with(test_config()).await;

    let envelope = tracked_result("tenant-a:job-1", TaskStatus::NewTask, "next-stage");
    system.proxy.handle_envelope(envelope.clone()).await.unwrap();

    let forwarded = queues.messages("next-stage");
    assert_eq!(forwarded, vec![envelope]);
    assert_eq!(
        system.lifecycle.get_job_status(PARTITION, "job-1").await.unwrap(),
        JobStatus::Active
    );
}

#[tokio::test]
async fn test_transparent_arrival_completes_and_strips_tracking() {
    let (system, queues) = system_with(test_config()).await;

    let envelope = tracked_result("tenant-a:job-1", TaskStatus::ResultSuccess, OUTPUT_QUEUE);
    system.proxy.handle_envelope(envelope).await.unwrap();

    let forwarded = queues.messages(OUTPUT_QUEUE);
    assert_eq!(forwarded.len(), 1);
    assert!(forwarded[0].tracking.is_none());
    assert_eq!(
        system.lifecycle.get_job_status(PARTITION, "job-1").await.unwrap(),
        JobStatus::Completed
    );
}

#[tokio::test]
async fn test_rejection_fails_job_only_when_configured() {
    let (system, _queues) = system_with(test_config()).await;
    let rejected = tracked_result("tenant-a:job-1", TaskStatus::ResultException, OUTPUT_QUEUE);
    system.proxy.handle_envelope(rejected.clone()).await.unwrap();

    let job = system.lifecycle.get_job(PARTITION, "job-1").await.unwrap();
    assert_eq!(job.status, JobStatus::Active);
    assert_eq!(job.failures[0].failure_id, "RESULT_EXCEPTION");

    let mut config = test_config();
    config.tracking.fail_jobs_on_rejection = true;
    let (strict, _queues) = system_with(config).await;
    strict.proxy.handle_envelope(rejected).await.unwrap();
    assert_eq!(
        strict.lifecycle.get_job_status(PARTITION, "job-1").await.unwrap(),
        JobStatus::Failed
    );
}

#[tokio::test]
async fn test_worker_rejection_header_records_retries() {
    let (system, _queues) = system_with(test_config()).await;
    let mut envelope = tracked_result("tenant-a:job-1", TaskStatus::Unknown, "worker-retry");
    envelope.headers.insert("x-worker-retry".to_string(), "3".to_string());
    envelope
        .headers
        .insert("x-worker-rejected".to_string(), "Max retries exceeded".to_string());
    system.proxy.handle_envelope(envelope).await.unwrap();

    let job = system.lifecycle.get_job(PARTITION, "job-1").await.unwrap();
    assert!(job.failures[0]
        .failure_message
        .contains("Execution of this job task was retried 3 times."));
}

#[tokio::test]
async fn test_untracked_envelope_is_forwarded_untouched() {
    let (system, queues) = system_with(test_config()).await;
    let envelope = TaskEnvelope::new_task("Report", 1, Vec::new()).to_queue("elsewhere");
    system.proxy.handle_envelope(envelope.clone()).await.unwrap();
    assert_eq!(queues.messages("elsewhere"), vec![envelope]);
}

#[tokio::test]
async fn test_store_outage_leaves_message_for_redelivery() {
    let store = std::sync::Arc::new(job_service::store::InMemoryJobStore::new());
    let queues = std::sync::Arc::new(InMemoryQueueGateway::new());
    let system = JobServiceSystem::assemble(test_config(), store.clone(), queues.clone());
    system
        .lifecycle
        .create_job(PARTITION, "job-1", new_job("a"), None)
        .await
        .unwrap();

    let tracking_queue = system.config.queues.tracking_queue.clone();
    let envelope = tracked_result("tenant-a:job-1", TaskStatus::ResultSuccess, OUTPUT_QUEUE);
    queues.publish(&tracking_queue, &envelope).await.unwrap();

    store.set_available(false);
    assert_eq!(system.consumer.poll_tracking_queue().await.unwrap(), 0);
    queues.redeliver_in_flight();
    assert_eq!(queues.len(&tracking_queue), 1);

    store.set_available(true);
    assert_eq!(system.consumer.poll_tracking_queue().await.unwrap(), 1);
    assert_eq!(
        system.lifecycle.get_job_status(PARTITION, "job-1").await.unwrap(),
        JobStatus::Completed
    );
}
