//! Partition-scoped listing with labels, filters, sort and pagination.

use crate::common::*;
use job_service::query_builder::{JobQuery, JobSort, Pagination, SortField, StatusFilter};

async fn seed(system: &job_service::orchestration::JobServiceSystem) {
    let lifecycle = &system.lifecycle;
    lifecycle
        .create_job(
            PARTITION,
            "report-1",
            new_job("1").with_name("Alpha").with_label("tag1", "x").with_label("owner", "alice"),
            None,
        )
        .await
        .unwrap();
    lifecycle
        .create_job(PARTITION, "report-2", new_job("2").with_name("beta").with_label("tag1", "y"), None)
        .await
        .unwrap();
    lifecycle
        .create_job(PARTITION, "audit-1", new_job("3").with_name("Gamma").with_label("owner", "bob"), None)
        .await
        .unwrap();
    lifecycle
        .create_job("tenant-b", "report-1", new_job("1").with_label("tag1", "x"), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_listing_never_crosses_partitions() {
    let (system, _queues) = test_system();
    seed(&system).await;

    let jobs = system.lifecycle.list_jobs(PARTITION, &JobQuery::new()).await.unwrap();
    assert_eq!(jobs.len(), 3);
    assert!(jobs.iter().all(|job| job.partition_id == PARTITION));
    assert_eq!(system.lifecycle.count_jobs("tenant-b", &JobQuery::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_label_selector_returns_complete_label_maps() {
    let (system, _queues) = test_system();
    seed(&system).await;

    let query = JobQuery::new().with_label_selector(["tag1"]);
    let jobs = system.lifecycle.list_jobs(PARTITION, &query).await.unwrap();
    let mut ids: Vec<&str> = jobs.iter().map(|job| job.job_id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["report-1", "report-2"]);

    let report_1 = jobs.iter().find(|job| job.job_id == "report-1").unwrap();
    assert_eq!(report_1.labels.get("owner").map(String::as_str), Some("alice"));
}

#[tokio::test]
async fn test_filter_prefix_and_status_compose() {
    let (system, _queues) = test_system();
    seed(&system).await;
    system.lifecycle.cancel_job(PARTITION, "report-2", None).await.unwrap();

    let query = JobQuery::new()
        .with_job_id_prefix("report")
        .with_status(StatusFilter::NotFinished);
    let jobs = system.lifecycle.list_jobs(PARTITION, &query).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_id, "report-1");

    let query = JobQuery::new().with_filter_str("labels.owner==bob").unwrap();
    let jobs = system.lifecycle.list_jobs(PARTITION, &query).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_id, "audit-1");

    assert!(JobQuery::new().with_filter_str("bogus==1").is_err());
}

#[tokio::test]
async fn test_sort_is_case_insensitive_and_paginates() {
    let (system, _queues) = test_system();
    seed(&system).await;

    let query = JobQuery::new().with_sort(JobSort::ascending(SortField::Name));
    let names: Vec<String> = system
        .lifecycle
        .list_jobs(PARTITION, &query)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|job| job.name)
        .collect();
    assert_eq!(names, vec!["Alpha", "beta", "Gamma"]);

    let page_two = query.with_pagination(Pagination::new(2, 2));
    let jobs = system.lifecycle.list_jobs(PARTITION, &page_two).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].name.as_deref(), Some("Gamma"));
    assert_eq!(system.lifecycle.count_jobs(PARTITION, &page_two).await.unwrap(), 3);
}
