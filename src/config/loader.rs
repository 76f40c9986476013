//! Configuration Loader
//!
//! Layers serialized defaults, an optional base file, an optional
//! environment-specific file and `JOB_SERVICE__` environment variables.

use super::error::{ConfigResult, ConfigurationError};
use super::JobServiceConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const CONFIG_FILE_STEM: &str = "job-service";
const ENV_PREFIX: &str = "JOB_SERVICE";

/// Loaded configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: JobServiceConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load from a specific directory with an explicit environment name
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            database_url = %mask_database_url(&config.database.url),
            tracking_queue = %config.queues.tracking_queue,
            max_batch_size = config.tracking.max_batch_size,
            "✅ Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already constructed configuration
    pub fn from_config(config: JobServiceConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: PathBuf::from("config"),
        }))
    }

    pub fn config(&self) -> &JobServiceConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    pub fn detect_environment() -> String {
        env::var("JOB_SERVICE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<JobServiceConfig> {
        let base_file = config_directory.join(format!("{CONFIG_FILE_STEM}.toml"));
        let env_file = config_directory.join(format!("{CONFIG_FILE_STEM}.{environment}.toml"));

        debug!(
            base_file = %base_file.display(),
            env_file = %env_file.display(),
            "Resolving configuration sources"
        );

        let defaults = Config::try_from(&JobServiceConfig::default())?;

        let merged = Config::builder()
            .add_source(defaults)
            .add_source(File::from(base_file).required(false))
            .add_source(File::from(env_file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("partitions.suspended")
                    .try_parsing(true),
            )
            .build()?;

        merged
            .try_deserialize::<JobServiceConfig>()
            .map_err(|e| ConfigurationError::load_failed(e.to_string()))
    }
}

/// Hide the password component of a connection url
pub fn mask_database_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _password)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}
