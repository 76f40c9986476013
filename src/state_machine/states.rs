use serde::{Deserialize, Serialize};
use std::fmt;

/// Job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobStatus {
    /// Blocked by prerequisites, a delay or a suspended partition
    Waiting,
    /// Task dispatched and being processed
    Active,
    /// Held by an operator; resumes to Active
    Paused,
    Completed,
    Cancelled,
    Failed,
    /// Removed from service by its expiration policy
    Expired,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        Self::Waiting,
        Self::Active,
        Self::Paused,
        Self::Completed,
        Self::Cancelled,
        Self::Failed,
        Self::Expired,
    ];

    /// Check if this is a terminal state; only expiry moves a terminal job
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Failed | Self::Expired
        )
    }

    /// Jobs in these states may still have their task dispatched
    pub fn accepts_dispatch(&self) -> bool {
        matches!(self, Self::Waiting | Self::Active)
    }

    /// Reported as active to status-check callers
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Waiting | Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "Waiting",
            Self::Active => "Active",
            Self::Paused => "Paused",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
            Self::Expired => "Expired",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    /// Case-insensitive so filter values like `status==completed` work
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Invalid job status: {s}"))
    }
}
