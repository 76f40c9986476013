use super::events::JobEvent;
use super::states::JobStatus;
use crate::error::{JobServiceError, Result};

/// Outcome of checking an event against a job's current status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDecision {
    /// Apply the transition and bump `lastUpdateTime`
    Transition { from: JobStatus, to: JobStatus },
    /// Legal but nothing changes; `lastUpdateTime` stays put
    NoOp(JobStatus),
}

impl TransitionDecision {
    pub fn is_transition(&self) -> bool {
        matches!(self, Self::Transition { .. })
    }

    /// Status after the decision is applied
    pub fn resulting_status(&self) -> JobStatus {
        match self {
            Self::Transition { to, .. } => *to,
            Self::NoOp(current) => *current,
        }
    }
}

/// Trait for implementing state transition guards
pub trait StateGuard: Send + Sync {
    /// Decide whether the event applies to a job in `current`
    fn check(&self, job_id: &str, current: JobStatus) -> Result<TransitionDecision>;

    /// Get a description of this guard for logging
    fn description(&self) -> &'static str;
}

fn transition(from: JobStatus, to: JobStatus) -> Result<TransitionDecision> {
    Ok(TransitionDecision::Transition { from, to })
}

fn no_op(current: JobStatus) -> Result<TransitionDecision> {
    Ok(TransitionDecision::NoOp(current))
}

pub struct ReleaseGuard;

impl StateGuard for ReleaseGuard {
    fn check(&self, _job_id: &str, current: JobStatus) -> Result<TransitionDecision> {
        match current {
            JobStatus::Waiting => transition(current, JobStatus::Active),
            _ => no_op(current),
        }
    }

    fn description(&self) -> &'static str {
        "Only waiting jobs move to Active when released"
    }
}

pub struct ProgressGuard;

impl StateGuard for ProgressGuard {
    fn check(&self, _job_id: &str, current: JobStatus) -> Result<TransitionDecision> {
        match current {
            JobStatus::Waiting => transition(current, JobStatus::Active),
            _ => no_op(current),
        }
    }

    fn description(&self) -> &'static str {
        "Progress activates waiting jobs and leaves others unchanged"
    }
}

pub struct CompleteGuard;

impl StateGuard for CompleteGuard {
    fn check(&self, _job_id: &str, current: JobStatus) -> Result<TransitionDecision> {
        match current {
            JobStatus::Active | JobStatus::Waiting | JobStatus::Paused => {
                transition(current, JobStatus::Completed)
            }
            // Late or redelivered completions never reopen a finished job
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed | JobStatus::Expired => {
                no_op(current)
            }
        }
    }

    fn description(&self) -> &'static str {
        "Unfinished jobs complete; finished jobs ignore completion"
    }
}

pub struct FailGuard;

impl StateGuard for FailGuard {
    fn check(&self, job_id: &str, current: JobStatus) -> Result<TransitionDecision> {
        match current {
            JobStatus::Active | JobStatus::Waiting | JobStatus::Paused => {
                transition(current, JobStatus::Failed)
            }
            JobStatus::Failed => no_op(current),
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Expired => Err(JobServiceError::bad_request(
                format!(
                    "job_id {job_id} cannot be failed as it has a status of {current}. Jobs that have already finished cannot be failed."
                ),
            )),
        }
    }

    fn description(&self) -> &'static str {
        "Only unfinished jobs can be failed"
    }
}

pub struct CancelGuard;

impl StateGuard for CancelGuard {
    fn check(&self, job_id: &str, current: JobStatus) -> Result<TransitionDecision> {
        match current {
            JobStatus::Active | JobStatus::Waiting | JobStatus::Paused => {
                transition(current, JobStatus::Cancelled)
            }
            JobStatus::Cancelled => no_op(current),
            JobStatus::Completed | JobStatus::Failed | JobStatus::Expired => Err(JobServiceError::bad_request(
                format!(
                    "job_id {job_id} cannot be cancelled as it has a status of {current}. Jobs that have already finished cannot be cancelled."
                ),
            )),
        }
    }

    fn description(&self) -> &'static str {
        "Finished jobs cannot be cancelled; re-cancel is a no-op"
    }
}

pub struct PauseGuard;

impl StateGuard for PauseGuard {
    fn check(&self, job_id: &str, current: JobStatus) -> Result<TransitionDecision> {
        match current {
            JobStatus::Active | JobStatus::Waiting => transition(current, JobStatus::Paused),
            JobStatus::Paused => no_op(current),
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed | JobStatus::Expired => {
                Err(JobServiceError::bad_request(format!(
                    "job_id {job_id} cannot be paused as it has a status of {current}. Only jobs with a status of Active or Waiting can be paused."
                )))
            }
        }
    }

    fn description(&self) -> &'static str {
        "Only active or waiting jobs can be paused; re-pause is a no-op"
    }
}

pub struct ResumeGuard;

impl StateGuard for ResumeGuard {
    fn check(&self, job_id: &str, current: JobStatus) -> Result<TransitionDecision> {
        match current {
            JobStatus::Paused => transition(current, JobStatus::Active),
            _ => Err(JobServiceError::bad_request(format!(
                "job_id {job_id} cannot be resumed as it has a status of {current}. Only jobs with a status of Paused can be resumed."
            ))),
        }
    }

    fn description(&self) -> &'static str {
        "Only paused jobs can be resumed"
    }
}

pub struct ExpireGuard;

impl StateGuard for ExpireGuard {
    fn check(&self, _job_id: &str, current: JobStatus) -> Result<TransitionDecision> {
        match current {
            JobStatus::Expired => no_op(current),
            _ => transition(current, JobStatus::Expired),
        }
    }

    fn description(&self) -> &'static str {
        "Any job can expire once; Expired jobs wait for their delete policy"
    }
}

/// Guard responsible for an event
pub fn guard_for(event: JobEvent) -> &'static dyn StateGuard {
    match event {
        JobEvent::Release => &ReleaseGuard,
        JobEvent::Progress => &ProgressGuard,
        JobEvent::Complete => &CompleteGuard,
        JobEvent::Fail => &FailGuard,
        JobEvent::Cancel => &CancelGuard,
        JobEvent::Pause => &PauseGuard,
        JobEvent::Resume => &ResumeGuard,
        JobEvent::Expire => &ExpireGuard,
    }
}

/// Check an event against the current status
pub fn evaluate(job_id: &str, current: JobStatus, event: JobEvent) -> Result<TransitionDecision> {
    guard_for(event).check(job_id, current)
}
