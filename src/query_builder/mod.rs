//! # Job Query Building
//!
//! Listing predicates for jobs within a single partition.
//!
//! ## Key Components
//!
//! - [`filter`] - RSQL-style filter grammar parsed into a [`FilterExpr`] tree
//! - [`sort`] - sort keys over job id, name, create time or a label
//! - [`pagination`] - offset/limit windows clamped to the configured page size
//! - [`builder`] - [`JobQuery`] tying the pieces together with a [`StatusFilter`]
//!
//! Every piece evaluates both in memory and as bound-parameter SQL through
//! `sqlx::QueryBuilder`, so the in-memory and PostgreSQL stores agree on
//! what a query returns.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use job_service::query_builder::{JobQuery, JobSort, Pagination, StatusFilter};
//!
//! let query = JobQuery::new()
//!     .with_status(StatusFilter::NotFinished)
//!     .with_filter_str("labels.owner==alice;name==report*")?
//!     .with_sort(JobSort::parse("name:asc")?)
//!     .with_pagination(Pagination::new(1, 50));
//! let jobs = store.list_jobs("tenant-a", &query).await?;
//! ```

pub mod builder;
pub mod filter;
pub mod pagination;
pub mod sort;

pub use builder::{JobQuery, StatusFilter};
pub use filter::{ComparisonOp, FilterExpr, FilterField, FilterValue};
pub use pagination::Pagination;
pub use sort::{JobSort, SortField};
