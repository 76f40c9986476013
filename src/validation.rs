//! # Input Validation
//!
//! Every client-initiated operation validates its inputs here before touching
//! the job store. All failures are `BadRequest` and leave no side effects.

use crate::constants::{MAX_PARTITION_ID_LENGTH, RESERVED_ID_CHARACTERS};
use crate::error::{JobServiceError, Result};
use crate::models::{normalize_prerequisites, NewJob, TaskDefinition};

pub fn validate_partition_id(partition_id: &str) -> Result<()> {
    if partition_id.trim().is_empty() {
        return Err(JobServiceError::bad_request(
            "The partition id has not been specified.",
        ));
    }
    if partition_id.chars().count() > MAX_PARTITION_ID_LENGTH {
        return Err(JobServiceError::bad_request("The partition id is too long."));
    }
    let invalid = partition_id
        .chars()
        .any(|c| RESERVED_ID_CHARACTERS.contains(&c) || (c.is_whitespace() && c != ' '));
    if invalid {
        return Err(JobServiceError::bad_request(
            "The partition id contains one or more invalid characters.",
        ));
    }
    Ok(())
}

pub fn validate_job_id(job_id: &str) -> Result<()> {
    if job_id.trim().is_empty() {
        return Err(JobServiceError::bad_request(
            "The job identifier has not been specified.",
        ));
    }
    if job_id.contains(RESERVED_ID_CHARACTERS) {
        return Err(JobServiceError::bad_request(
            "The job identifier contains one or more invalid characters.",
        ));
    }
    Ok(())
}

pub fn validate_task_definition(task: &TaskDefinition) -> Result<()> {
    if task.task_classifier.trim().is_empty() {
        return Err(JobServiceError::bad_request(
            "The task classifier has not been specified.",
        ));
    }
    if task.task_api_version == 0 {
        return Err(JobServiceError::bad_request(
            "The task api version has not been specified.",
        ));
    }
    if task.target_pipe.trim().is_empty() {
        return Err(JobServiceError::bad_request(
            "The target queue name has not been specified.",
        ));
    }
    if task.task_pipe.trim().is_empty() {
        return Err(JobServiceError::bad_request(
            "The task queue name has not been specified.",
        ));
    }
    if task.task_data.is_empty() {
        return Err(JobServiceError::bad_request(
            "The task data has not been specified.",
        ));
    }
    Ok(())
}

pub fn validate_label_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(JobServiceError::bad_request(
            "The label name has not been specified.",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(JobServiceError::bad_request(
            "The label name contains one or more invalid characters.",
        ));
    }
    Ok(())
}

/// Validate a full create request and return its normalized prerequisite ids
pub fn validate_new_job(partition_id: &str, job_id: &str, job: &NewJob) -> Result<Vec<String>> {
    validate_partition_id(partition_id)?;
    validate_job_id(job_id)?;
    validate_task_definition(&job.task)?;

    for name in job.labels.keys() {
        validate_label_name(name)?;
    }

    if job.delay_seconds < 0 {
        return Err(JobServiceError::bad_request(
            "The delay must be a non-negative number of seconds.",
        ));
    }

    let prerequisites = normalize_prerequisites(&job.prerequisite_job_ids);
    for prerequisite in &prerequisites {
        validate_job_id(prerequisite)?;
        if prerequisite == job_id {
            return Err(JobServiceError::bad_request(format!(
                "job_id {job_id} cannot be a prerequisite of itself."
            )));
        }
    }

    Ok(prerequisites)
}
