use crate::error::JobServiceError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {message}")]
    LoadFailed { message: String },

    #[error("Invalid configuration value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingRequiredField { field: String },
}

impl ConfigurationError {
    pub fn load_failed(message: impl Into<String>) -> Self {
        Self::LoadFailed {
            message: message.into(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_required_field(field: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        ConfigurationError::load_failed(err.to_string())
    }
}

impl From<ConfigurationError> for JobServiceError {
    fn from(err: ConfigurationError) -> Self {
        JobServiceError::internal(err.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
