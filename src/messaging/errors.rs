//! # Messaging Error Types
//!
//! Structured errors for queue gateway operations. Connectivity problems are
//! kept apart from payload problems so the core can decide whether a publish
//! failure is worth retrying.

use crate::error::JobServiceError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessagingError {
    #[error("Queue connection error: {message}")]
    Connection { message: String },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Invalid queue name: {queue_name}: {reason}")]
    InvalidQueueName { queue_name: String, reason: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn invalid_queue_name(queue_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQueueName {
            queue_name: queue_name.into(),
            reason: reason.into(),
        }
    }

    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for MessagingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                MessagingError::queue_operation("unknown", "database", db_err.to_string())
            }
            sqlx::Error::Configuration(config_err) => {
                MessagingError::internal(format!("Queue configuration error: {config_err}"))
            }
            other => MessagingError::connection(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            MessagingError::message_deserialization(err.to_string())
        } else {
            MessagingError::message_serialization(err.to_string())
        }
    }
}

impl From<MessagingError> for JobServiceError {
    fn from(err: MessagingError) -> Self {
        match err {
            MessagingError::Connection { .. } | MessagingError::QueueOperation { .. } => {
                JobServiceError::service_unavailable(err.to_string())
            }
            MessagingError::InvalidQueueName { .. } => JobServiceError::bad_request(err.to_string()),
            _ => JobServiceError::internal(err.to_string()),
        }
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
