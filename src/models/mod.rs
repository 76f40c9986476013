//! # Data Models
//!
//! Jobs, their task definitions, prerequisite edges, labels, failures and
//! expiration policies, plus the job task id syntax used to attribute pipeline traffic back to a job.
//!
//! Rows read from PostgreSQL go through the `*Row` types, which derive
//! `sqlx::FromRow` and convert into the domain types.

pub mod expiration;
pub mod failure;
pub mod job;
pub mod job_dependency;
pub mod job_task_id;
pub mod label;
pub mod task_definition;

pub use expiration::{
    ExpirationOperation, ExpirationPolicy, ExpirationPolicyRow, ExpiryPolicy, ExpiryReference,
    ExpiryTime, JobExpiration,
};
pub use failure::Failure;
pub use job::{Job, JobActivity, JobRow, NewJob};
pub use job_dependency::{normalize_prerequisites, JobDependency};
pub use job_task_id::{CompletedTaskSet, JobTaskId, TaskPath, TaskSegment};
pub use label::{group_label_rows, matches_label_selector, LabelMap, LabelRow};
pub use task_definition::{JobTaskTemplate, TaskDefinition};
