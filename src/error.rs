//! # Job Service Error Types
//!
//! Every error that crosses the core boundary is one of five kinds. The kind
//! decides the caller-visible code and whether a retry is worthwhile.

use thiserror::Error;

/// Error classification used by callers to map onto their own protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,
    Forbidden,
    NotFound,
    ServiceUnavailable,
    Internal,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobServiceError {
    /// Malformed input, illegal state transition or immutable-field change
    #[error("{message}")]
    BadRequest { message: String },

    /// Attempt to redefine an existing job with a different definition
    #[error("{message}")]
    Forbidden { message: String },

    #[error("{message}")]
    NotFound { message: String },

    /// Backing store or broker connectivity failure; safe to retry
    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl JobServiceError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a not-found error for a specific job
    pub fn job_not_found(job_id: &str) -> Self {
        Self::not_found(format!("job_id {job_id} not found"))
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest { .. } => ErrorKind::BadRequest,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// HTTP-style status code for transport layers
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::BadRequest => 400,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::ServiceUnavailable => 503,
            ErrorKind::Internal => 500,
        }
    }

    /// Transient errors should be retried by message redelivery, never recorded as job failures
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. })
    }

    /// The message without the kind prefix
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message }
            | Self::Forbidden { message }
            | Self::NotFound { message }
            | Self::ServiceUnavailable { message }
            | Self::Internal { message } => message,
        }
    }
}

/// SQLSTATE classes that indicate the database itself is unreachable or refusing work
fn is_connection_class(code: &str) -> bool {
    code.starts_with("08") || code.starts_with("53") || code.starts_with("57P")
}

impl From<sqlx::Error> for JobServiceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                JobServiceError::service_unavailable("Timed out acquiring a database connection")
            }
            sqlx::Error::PoolClosed => {
                JobServiceError::service_unavailable("Database pool is closed")
            }
            sqlx::Error::Io(e) => JobServiceError::service_unavailable(e.to_string()),
            sqlx::Error::Tls(e) => JobServiceError::service_unavailable(e.to_string()),
            sqlx::Error::Protocol(message) => JobServiceError::service_unavailable(message),
            sqlx::Error::WorkerCrashed => {
                JobServiceError::service_unavailable("Database connection worker crashed")
            }
            sqlx::Error::RowNotFound => JobServiceError::not_found("No rows found"),
            sqlx::Error::Database(db_err) => match db_err.code() {
                Some(code) if is_connection_class(&code) => {
                    JobServiceError::service_unavailable(db_err.message().to_string())
                }
                _ => JobServiceError::internal(db_err.to_string()),
            },
            other => JobServiceError::internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for JobServiceError {
    fn from(err: serde_json::Error) -> Self {
        JobServiceError::internal(format!("Serialization error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, JobServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(JobServiceError::bad_request("x").status_code(), 400);
        assert_eq!(JobServiceError::forbidden("x").status_code(), 403);
        assert_eq!(JobServiceError::not_found("x").status_code(), 404);
        assert_eq!(JobServiceError::service_unavailable("x").status_code(), 503);
        assert_eq!(JobServiceError::internal("x").status_code(), 500);
    }

    #[test]
    fn test_pool_errors_are_transient() {
        let err: JobServiceError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);

        let err: JobServiceError = sqlx::Error::PoolClosed.into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: JobServiceError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_connection_sqlstate_classes() {
        assert!(is_connection_class("08006"));
        assert!(is_connection_class("53300"));
        assert!(is_connection_class("57P01"));
        assert!(!is_connection_class("23505"));
        assert!(!is_connection_class("42P01"));
    }

    #[test]
    fn test_display_keeps_message() {
        let err = JobServiceError::bad_request("The job identifier has not been specified.");
        assert_eq!(err.to_string(), "The job identifier has not been specified.");
        assert_eq!(err.message(), "The job identifier has not been specified.");

        let err = JobServiceError::service_unavailable("db down");
        assert!(err.to_string().contains("db down"));
    }
}
