//! # System Constants
//!
//! Identifiers, limits and well-known names shared between the job store,
//! the dispatcher and the tracking proxy.

/// Partition used when a job task id carries no partition prefix
pub const DEFAULT_PARTITION_ID: &str = "default";

/// Maximum length of a partition id
pub const MAX_PARTITION_ID_LENGTH: usize = 40;

/// Characters reserved by job task id syntax; never valid in job or partition ids
pub const RESERVED_ID_CHARACTERS: &[char] = &['.', ',', ':', ';', '*', '?', '!', '|', '(', ')'];

/// Failure identifiers recorded against jobs
pub mod failures {
    pub const ADD_TO_QUEUE_FAILURE: &str = "ADD_TO_QUEUE_FAILURE";
    pub const PREREQUISITE_EXPIRED: &str = "PREREQUISITE_EXPIRED";
}

/// Failure sources recorded against jobs
pub mod sources {
    pub fn create_job(job_id: &str) -> String {
        format!("Job Service - create job {job_id}")
    }

    pub fn tracking_proxy(job_id: &str) -> String {
        format!("Job Tracking Proxy for job id {job_id}")
    }

    pub fn scheduled_executor(job_id: &str) -> String {
        format!("Job Service Scheduled Executor for job id {job_id}")
    }

    pub const UNKNOWN_NO_SOURCE_INFO: &str = "Unknown - no source info";
    pub const UNKNOWN_WORKER_NAME: &str = "Unknown - worker name not set";
}

/// Envelope headers set by the broker layer on redelivery
pub mod headers {
    pub const WORKER_RETRY: &str = "x-worker-retry";
    pub const WORKER_REJECTED: &str = "x-worker-rejected";
}

/// Default queue and endpoint settings
pub mod defaults {
    pub const TRACKING_QUEUE: &str = "jobtracking-in";
    pub const RESUME_JOB_QUEUE: &str = "resume-job-in";
    pub const RESUME_JOB_TASK_CLASSIFIER: &str = "ResumeJob";
    pub const RESUME_JOB_TASK_API_VERSION: u32 = 1;
    pub const STATUS_CHECK_URL: &str = "http://localhost:8080/job-service/v1";
    pub const STATUS_CHECK_INTERVAL_SECONDS: u64 = 5;
    pub const TRACKING_WORKER_NAME: &str = "JobTrackingProxy";
    pub const MAX_BATCH_SIZE: usize = 100;
    pub const MAX_BATCH_TIME_MS: u64 = 10_000;
    pub const SCHEDULER_POLL_INTERVAL_SECONDS: u64 = 10;
    pub const SCHEDULER_RELEASE_BATCH_SIZE: i64 = 100;
    pub const SCHEDULER_EXPIRATION_BATCH_SIZE: i64 = 500;
    pub const DEFAULT_PAGE_SIZE: u32 = 20;
    pub const MAX_PAGE_SIZE: u32 = 1000;
}
