use super::filter::{escape_like, FilterExpr};
use super::pagination::Pagination;
use super::sort::JobSort;
use crate::error::{JobServiceError, Result};
use crate::models::{matches_label_selector, Job};
use crate::state_machine::JobStatus;
use sqlx::{Postgres, QueryBuilder};
use std::str::FromStr;

/// Coarse status selection applied before the filter grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    /// Anything but Completed, Cancelled or Expired
    NotFinished,
    /// Any terminal status
    Finished,
    NotCompleted,
    Exact(JobStatus),
}

impl StatusFilter {
    pub fn matches(&self, status: JobStatus) -> bool {
        match self.statuses() {
            Some(statuses) => statuses.contains(&status),
            None => true,
        }
    }

    /// Statuses admitted by this filter; `None` admits everything
    pub fn statuses(&self) -> Option<Vec<JobStatus>> {
        let admitted = |predicate: fn(&JobStatus) -> bool| -> Option<Vec<JobStatus>> {
            Some(JobStatus::ALL.into_iter().filter(predicate).collect())
        };
        match self {
            Self::All => None,
            Self::NotFinished => admitted(|s| {
                !matches!(s, JobStatus::Completed | JobStatus::Cancelled | JobStatus::Expired)
            }),
            Self::Finished => admitted(JobStatus::is_terminal),
            Self::NotCompleted => admitted(|s| *s != JobStatus::Completed),
            Self::Exact(status) => Some(vec![*status]),
        }
    }
}

impl FromStr for StatusFilter {
    type Err = JobServiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "notfinished" => Ok(Self::NotFinished),
            "finished" => Ok(Self::Finished),
            "notcompleted" => Ok(Self::NotCompleted),
            _ => s
                .parse::<JobStatus>()
                .map(Self::Exact)
                .map_err(JobServiceError::bad_request),
        }
    }
}

/// Partition-scoped job listing request
///
/// Built with chained `with_*` calls and evaluated either in memory
/// ([`JobQuery::apply`]) or as SQL ([`JobQuery::push_where`]).
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub job_id_starts_with: Option<String>,
    pub status: StatusFilter,
    pub filter: Option<FilterExpr>,
    pub sort: JobSort,
    pub pagination: Pagination,
    /// Jobs must carry at least one of these label names
    pub label_selector: Vec<String>,
}

impl JobQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.job_id_starts_with = Some(prefix.into());
        self
    }

    pub fn with_status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Parse and attach a filter expression; blank input clears it
    pub fn with_filter_str(mut self, filter: &str) -> Result<Self> {
        self.filter = if filter.trim().is_empty() {
            None
        } else {
            Some(FilterExpr::parse(filter)?)
        };
        Ok(self)
    }

    pub fn with_sort(mut self, sort: JobSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn with_label_selector<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.label_selector = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Predicate check, ignoring sort and pagination
    pub fn matches(&self, job: &Job) -> bool {
        self.job_id_starts_with
            .as_deref()
            .map_or(true, |prefix| job.job_id.starts_with(prefix))
            && self.status.matches(job.status)
            && matches_label_selector(&job.labels, &self.label_selector)
            && self.filter.as_ref().map_or(true, |filter| filter.matches(job))
    }

    /// Filter, sort and window an in-memory listing
    pub fn apply(&self, jobs: Vec<Job>, default_page_size: u32, max_page_size: u32) -> Vec<Job> {
        let mut matching: Vec<Job> = jobs.into_iter().filter(|job| self.matches(job)).collect();
        matching.sort_by(|a, b| self.sort.compare(a, b));
        self.pagination
            .apply(matching, default_page_size, max_page_size)
    }

    /// Append the `WHERE` clause for a query selecting from `job j`
    pub fn push_where<'args>(&self, qb: &mut QueryBuilder<'args, Postgres>, partition_id: &str) {
        qb.push(" WHERE j.partition_id = ");
        qb.push_bind(partition_id.to_string());

        if let Some(prefix) = &self.job_id_starts_with {
            qb.push(" AND j.job_id LIKE ");
            qb.push_bind(format!("{}%", escape_like(prefix)));
            qb.push(" ESCAPE '\\'");
        }

        if let Some(statuses) = self.status.statuses() {
            qb.push(" AND j.status IN (");
            let mut separated = qb.separated(", ");
            for status in statuses {
                separated.push_bind(status.as_str().to_string());
            }
            separated.push_unseparated(")");
        }

        if !self.label_selector.is_empty() {
            qb.push(" AND EXISTS (SELECT 1 FROM label l WHERE l.partition_id = j.partition_id AND l.job_id = j.job_id AND l.label IN (");
            let mut separated = qb.separated(", ");
            for label in &self.label_selector {
                separated.push_bind(label.clone());
            }
            separated.push_unseparated("))");
        }

        if let Some(filter) = &self.filter {
            qb.push(" AND ");
            filter.push_sql(qb);
        }
    }
}
