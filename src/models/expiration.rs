//! # Expiration Policies
//!
//! Every job carries one [`ExpiryPolicy`] per status. Once a job has stayed in
//! a status past that policy's expiry time, the scheduler either expires it
//! (moving it to Expired) or deletes it. Expired jobs follow their own delete
//! policy.
//!
//! Expiry times are written as:
//!
//! - `none`: never
//! - `createTime+P<n><unit>` or `lastUpdateTime+P<n><unit>`, where the unit is
//!   `M` (minutes), `H` (hours), `D` (days) or `Y` (365-day years)
//! - an RFC 3339 instant, which must lie in the future when the job is created

use crate::error::{JobServiceError, Result};
use crate::state_machine::JobStatus;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound on relative expiry times (1000 years)
const MAX_EXPIRY_MINUTES: i64 = 1000 * 525_600;

/// What happens to a job once its policy is due
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExpirationOperation {
    #[default]
    Expire,
    Delete,
}

impl ExpirationOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expire => "Expire",
            Self::Delete => "Delete",
        }
    }
}

impl FromStr for ExpirationOperation {
    type Err = JobServiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "expire" => Ok(Self::Expire),
            "delete" => Ok(Self::Delete),
            _ => Err(JobServiceError::bad_request(format!(
                "Invalid expiration operation {s}"
            ))),
        }
    }
}

/// Timestamp a relative expiry time counts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpiryReference {
    CreateTime,
    LastUpdateTime,
}

impl ExpiryReference {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateTime => "createTime",
            Self::LastUpdateTime => "lastUpdateTime",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "createTime" => Some(Self::CreateTime),
            "lastUpdateTime" => Some(Self::LastUpdateTime),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExpiryTime {
    #[default]
    Never,
    After {
        reference: ExpiryReference,
        minutes: i64,
    },
    At(DateTime<Utc>),
}

impl ExpiryTime {
    pub fn after(reference: ExpiryReference, minutes: i64) -> Self {
        Self::After { reference, minutes }
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Self::Never)
    }

    /// Instant at which the policy becomes due, if ever
    pub fn deadline(
        &self,
        create_time: DateTime<Utc>,
        last_update_time: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Self::Never => None,
            Self::At(instant) => Some(*instant),
            Self::After { reference, minutes } => {
                let base = match reference {
                    ExpiryReference::CreateTime => create_time,
                    ExpiryReference::LastUpdateTime => last_update_time,
                };
                base.checked_add_signed(Duration::minutes(*minutes))
            }
        }
    }

    /// Absolute instants must not already have passed
    pub fn validate_future(&self, now: DateTime<Utc>) -> Result<()> {
        match self {
            Self::At(instant) if *instant < now => Err(JobServiceError::bad_request(format!(
                "The expiry time {self} should be in the future."
            ))),
            _ => Ok(()),
        }
    }
}

fn parse_relative(raw: &str) -> Option<ExpiryTime> {
    let (reference, amount) = raw.split_once("+P")?;
    let reference = ExpiryReference::parse(reference)?;

    let unit = amount.chars().last()?;
    let digits = &amount[..amount.len() - unit.len_utf8()];
    if digits.is_empty()
        || digits.starts_with('0')
        || !digits.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    let count: i64 = digits.parse().ok()?;
    let factor = match unit {
        'M' => 1,
        'H' => 60,
        'D' => 1440,
        'Y' => 525_600,
        _ => return None,
    };
    let minutes = count.checked_mul(factor).filter(|m| *m <= MAX_EXPIRY_MINUTES)?;
    Some(ExpiryTime::after(reference, minutes))
}

impl FromStr for ExpiryTime {
    type Err = JobServiceError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();
        if raw.eq_ignore_ascii_case("none") {
            return Ok(Self::Never);
        }
        if let Some(relative) = parse_relative(raw) {
            return Ok(relative);
        }
        DateTime::parse_from_rfc3339(raw)
            .map(|instant| Self::At(instant.with_timezone(&Utc)))
            .map_err(|_| JobServiceError::bad_request(format!("Invalid expiry time {raw}")))
    }
}

impl fmt::Display for ExpiryTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("none"),
            Self::After { reference, minutes } => {
                write!(f, "{}+P{minutes}M", reference.as_str())
            }
            Self::At(instant) => f.write_str(&instant.to_rfc3339()),
        }
    }
}

impl TryFrom<String> for ExpiryTime {
    type Error = JobServiceError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ExpiryTime> for String {
    fn from(value: ExpiryTime) -> Self {
        value.to_string()
    }
}

/// Operation and expiry time for one status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExpiryPolicy {
    pub operation: ExpirationOperation,
    #[serde(alias = "expiry_time")]
    pub expiry_time: ExpiryTime,
}

impl ExpiryPolicy {
    pub fn expire(expiry_time: ExpiryTime) -> Self {
        Self {
            operation: ExpirationOperation::Expire,
            expiry_time,
        }
    }

    pub fn delete(expiry_time: ExpiryTime) -> Self {
        Self {
            operation: ExpirationOperation::Delete,
            expiry_time,
        }
    }

    pub fn is_due(
        &self,
        create_time: DateTime<Utc>,
        last_update_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        self.expiry_time
            .deadline(create_time, last_update_time)
            .is_some_and(|deadline| deadline <= now)
    }
}

/// Requested policies; statuses left unset fall back to `default`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExpirationPolicy {
    pub default: Option<ExpiryPolicy>,
    pub waiting: Option<ExpiryPolicy>,
    pub active: Option<ExpiryPolicy>,
    pub paused: Option<ExpiryPolicy>,
    pub completed: Option<ExpiryPolicy>,
    pub cancelled: Option<ExpiryPolicy>,
    pub failed: Option<ExpiryPolicy>,
    /// When an already expired job is deleted
    pub expired: Option<ExpiryTime>,
}

impl ExpirationPolicy {
    pub fn with_default(mut self, policy: ExpiryPolicy) -> Self {
        self.default = Some(policy);
        self
    }

    /// Override the policy for one status; Expired only takes the expiry time
    pub fn with_status(mut self, status: JobStatus, policy: ExpiryPolicy) -> Self {
        match status {
            JobStatus::Waiting => self.waiting = Some(policy),
            JobStatus::Active => self.active = Some(policy),
            JobStatus::Paused => self.paused = Some(policy),
            JobStatus::Completed => self.completed = Some(policy),
            JobStatus::Cancelled => self.cancelled = Some(policy),
            JobStatus::Failed => self.failed = Some(policy),
            JobStatus::Expired => self.expired = Some(policy.expiry_time),
        }
        self
    }

    /// Fill every status and reject absolute times already in the past
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<JobExpiration> {
        let fallback = self.default.unwrap_or_default();
        let pick = |policy: Option<ExpiryPolicy>| policy.unwrap_or(fallback);

        let resolved = JobExpiration {
            waiting: pick(self.waiting),
            active: pick(self.active),
            paused: pick(self.paused),
            completed: pick(self.completed),
            cancelled: pick(self.cancelled),
            failed: pick(self.failed),
            expired: self.expired.unwrap_or_default(),
        };
        for (_, policy) in resolved.policies() {
            policy.expiry_time.validate_future(now)?;
        }
        Ok(resolved)
    }
}

/// Effective policy for every status of one job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExpiration {
    pub waiting: ExpiryPolicy,
    pub active: ExpiryPolicy,
    pub paused: ExpiryPolicy,
    pub completed: ExpiryPolicy,
    pub cancelled: ExpiryPolicy,
    pub failed: ExpiryPolicy,
    pub expired: ExpiryTime,
}

impl JobExpiration {
    pub fn for_status(&self, status: JobStatus) -> ExpiryPolicy {
        match status {
            JobStatus::Waiting => self.waiting,
            JobStatus::Active => self.active,
            JobStatus::Paused => self.paused,
            JobStatus::Completed => self.completed,
            JobStatus::Cancelled => self.cancelled,
            JobStatus::Failed => self.failed,
            JobStatus::Expired => ExpiryPolicy::delete(self.expired),
        }
    }

    /// One entry per status, in [`JobStatus::ALL`] order
    pub fn policies(&self) -> Vec<(JobStatus, ExpiryPolicy)> {
        JobStatus::ALL
            .into_iter()
            .map(|status| (status, self.for_status(status)))
            .collect()
    }

    /// Rebuild from per-status rows; missing statuses keep the default policy
    pub fn from_policies(rows: impl IntoIterator<Item = (JobStatus, ExpiryPolicy)>) -> Self {
        let mut expiration = Self::default();
        for (status, policy) in rows {
            match status {
                JobStatus::Waiting => expiration.waiting = policy,
                JobStatus::Active => expiration.active = policy,
                JobStatus::Paused => expiration.paused = policy,
                JobStatus::Completed => expiration.completed = policy,
                JobStatus::Cancelled => expiration.cancelled = policy,
                JobStatus::Failed => expiration.failed = policy,
                JobStatus::Expired => expiration.expired = policy.expiry_time,
            }
        }
        expiration
    }

    /// The operation to apply at `now`, if the current status's policy is due
    pub fn due_operation(
        &self,
        status: JobStatus,
        create_time: DateTime<Utc>,
        last_update_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<ExpirationOperation> {
        let policy = self.for_status(status);
        policy
            .is_due(create_time, last_update_time, now)
            .then_some(policy.operation)
    }
}

/// Database row for `job_expiration_policy`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExpirationPolicyRow {
    pub job_status: String,
    pub operation: String,
    pub expiry_reference: Option<String>,
    pub expiry_minutes: Option<i64>,
    pub expiry_at: Option<DateTime<Utc>>,
}

impl ExpirationPolicyRow {
    /// Column values for one status's policy
    pub fn columns(policy: &ExpiryPolicy) -> (Option<&'static str>, Option<i64>, Option<DateTime<Utc>>) {
        match policy.expiry_time {
            ExpiryTime::Never => (None, None, None),
            ExpiryTime::After { reference, minutes } => (Some(reference.as_str()), Some(minutes), None),
            ExpiryTime::At(instant) => (None, None, Some(instant)),
        }
    }

    pub fn into_policy(self) -> Result<(JobStatus, ExpiryPolicy)> {
        let status = self
            .job_status
            .parse::<JobStatus>()
            .map_err(JobServiceError::internal)?;
        let operation = self
            .operation
            .parse::<ExpirationOperation>()
            .map_err(|e| JobServiceError::internal(e.message().to_string()))?;
        let expiry_time = match (self.expiry_reference, self.expiry_minutes, self.expiry_at) {
            (_, _, Some(instant)) => ExpiryTime::At(instant),
            (Some(reference), Some(minutes), None) => ExpiryTime::after(
                ExpiryReference::parse(&reference).ok_or_else(|| {
                    JobServiceError::internal(format!("Unknown expiry reference {reference}"))
                })?,
                minutes,
            ),
            _ => ExpiryTime::Never,
        };
        Ok((
            status,
            ExpiryPolicy {
                operation,
                expiry_time,
            },
        ))
    }
}
