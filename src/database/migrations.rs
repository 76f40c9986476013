//! # Schema Migrations
//!
//! The job schema ships inside the binary as an ordered list of migrations.
//! Applied versions are tracked in `job_service_schema_migrations`.
//!
//! ## Concurrency Control
//!
//! Several service instances may start at once. The runner holds a PostgreSQL
//! advisory lock on one dedicated connection for the whole run, so exactly one
//! instance applies outstanding migrations while the others wait:
//!
//! ```sql
//! SELECT pg_advisory_lock(7364021958340917)
//! ```

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::info;

/// Advisory lock key guarding schema changes
const MIGRATION_LOCK_KEY: i64 = 7_364_021_958_340_917;

/// A single embedded migration
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Sortable version (YYYYMMDDHHMMSS)
    pub version: &'static str,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "20240101000000",
        name: "create_job_tables",
        sql: r#"
            CREATE TABLE IF NOT EXISTS job (
                partition_id VARCHAR(40) NOT NULL,
                job_id TEXT NOT NULL,
                name TEXT,
                description TEXT,
                data TEXT,
                create_date TIMESTAMPTZ NOT NULL,
                last_update_date TIMESTAMPTZ NOT NULL,
                status TEXT NOT NULL DEFAULT 'Waiting',
                percentage_complete REAL NOT NULL DEFAULT 0,
                failure_details JSONB NOT NULL DEFAULT '[]'::jsonb,
                job_hash TEXT NOT NULL,
                delay INTEGER NOT NULL DEFAULT 0,
                eligible_to_run_date TIMESTAMPTZ,
                PRIMARY KEY (partition_id, job_id)
            );

            CREATE TABLE IF NOT EXISTS job_dependency (
                partition_id VARCHAR(40) NOT NULL,
                job_id TEXT NOT NULL,
                prerequisite_job_id TEXT NOT NULL,
                PRIMARY KEY (partition_id, job_id, prerequisite_job_id)
            );

            CREATE INDEX IF NOT EXISTS idx_job_dependency_prerequisite
                ON job_dependency (partition_id, prerequisite_job_id);

            CREATE TABLE IF NOT EXISTS job_task_data (
                partition_id VARCHAR(40) NOT NULL,
                job_id TEXT NOT NULL,
                task_classifier TEXT NOT NULL,
                task_api_version INTEGER NOT NULL,
                task_data BYTEA NOT NULL,
                task_pipe TEXT NOT NULL,
                target_pipe TEXT NOT NULL,
                PRIMARY KEY (partition_id, job_id)
            );

            CREATE TABLE IF NOT EXISTS label (
                partition_id VARCHAR(40) NOT NULL,
                job_id TEXT NOT NULL,
                label TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (partition_id, job_id, label)
            );
        "#,
    },
    Migration {
        version: "20240101000100",
        name: "create_completed_subtask_report",
        sql: r#"
            CREATE TABLE IF NOT EXISTS completed_subtask_report (
                partition_id VARCHAR(40) NOT NULL,
                job_id TEXT NOT NULL,
                task_path TEXT NOT NULL,
                PRIMARY KEY (partition_id, job_id, task_path)
            );
        "#,
    },
    Migration {
        version: "20240101000200",
        name: "index_job_eligibility",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_job_eligible_to_run_date
                ON job (eligible_to_run_date)
                WHERE eligible_to_run_date IS NOT NULL;

            CREATE INDEX IF NOT EXISTS idx_job_partition_create_date
                ON job (partition_id, create_date DESC);
        "#,
    },
    Migration {
        version: "20240101000300",
        name: "create_job_expiration_policy",
        sql: r#"
            CREATE TABLE IF NOT EXISTS job_expiration_policy (
                partition_id VARCHAR(40) NOT NULL,
                job_id TEXT NOT NULL,
                job_status TEXT NOT NULL,
                operation TEXT NOT NULL DEFAULT 'Expire',
                expiry_reference TEXT,
                expiry_minutes BIGINT,
                expiry_at TIMESTAMPTZ,
                PRIMARY KEY (partition_id, job_id, job_status)
            );

            CREATE INDEX IF NOT EXISTS idx_job_status
                ON job (status);
        "#,
    },
];

/// Applies the embedded migrations under an advisory lock
pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Apply every migration not yet recorded
    pub async fn run_all(pool: &PgPool) -> Result<(), sqlx::Error> {
        let mut conn = pool.acquire().await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let result = Self::apply_outstanding(&mut conn).await;

        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        result
    }

    /// Install the pgmq extension backing the queue gateway
    pub async fn ensure_pgmq_extension(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS pgmq CASCADE")
            .execute(pool)
            .await?;
        Ok(())
    }

    async fn apply_outstanding(conn: &mut PoolConnection<Postgres>) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_service_schema_migrations (
                version TEXT PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut **conn)
        .await?;

        let applied: Vec<String> =
            sqlx::query_scalar("SELECT version FROM job_service_schema_migrations")
                .fetch_all(&mut **conn)
                .await?;

        for migration in pending(MIGRATIONS, &applied) {
            info!(
                version = migration.version,
                name = migration.name,
                "📦 Applying migration"
            );
            sqlx::raw_sql(migration.sql).execute(&mut **conn).await?;
            sqlx::query("INSERT INTO job_service_schema_migrations (version) VALUES ($1)")
                .bind(migration.version)
                .execute(&mut **conn)
                .await?;
        }

        Ok(())
    }
}

/// Migrations not yet applied, in version order
pub fn pending<'a>(migrations: &'a [Migration], applied: &[String]) -> Vec<&'a Migration> {
    let mut outstanding: Vec<&Migration> = migrations
        .iter()
        .filter(|migration| !applied.iter().any(|version| version == migration.version))
        .collect();
    outstanding.sort_by_key(|migration| migration.version);
    outstanding
}
