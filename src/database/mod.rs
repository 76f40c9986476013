//! # Database Operations
//!
//! PostgreSQL connectivity for the job store and queue gateway.
//!
//! ## Key Components
//!
//! - [`connection`] - pool construction from [`crate::config::DatabaseConfig`] and health checks
//! - [`migrations`] - embedded schema migrations applied under an advisory lock
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use job_service::config::DatabaseConfig;
//! use job_service::database::{DatabaseConnection, DatabaseMigrations};
//!
//! # async fn example() -> Result<(), sqlx::Error> {
//! let db = DatabaseConnection::connect(&DatabaseConfig::default()).await?;
//! DatabaseMigrations::run_all(db.pool()).await?;
//! assert!(db.health_check().await?);
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod migrations;

pub use connection::{health_check, DatabaseConnection};
pub use migrations::{DatabaseMigrations, Migration, MIGRATIONS};
