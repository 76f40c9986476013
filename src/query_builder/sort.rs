use crate::error::{JobServiceError, Result};
use crate::models::Job;
use sqlx::{Postgres, QueryBuilder};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortField {
    JobId,
    Name,
    CreateTime,
    Label(String),
}

/// Sort order for job listings; string keys compare case-insensitively
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSort {
    pub field: SortField,
    pub descending: bool,
}

impl Default for JobSort {
    fn default() -> Self {
        Self {
            field: SortField::CreateTime,
            descending: true,
        }
    }
}

impl JobSort {
    pub fn ascending(field: SortField) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    pub fn descending(field: SortField) -> Self {
        Self {
            field,
            descending: true,
        }
    }

    /// Parse `field[:asc|:desc]`
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::default());
        }

        let (name, direction) = match raw.rsplit_once(':') {
            Some((name, direction)) => (name, Some(direction)),
            None => (raw, None),
        };

        let descending = match direction.map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => false,
            Some("desc") => true,
            Some(other) => {
                return Err(JobServiceError::bad_request(format!(
                    "Invalid sort direction: {other}"
                )))
            }
        };

        let field = match name.to_ascii_lowercase().as_str() {
            "jobid" | "id" => SortField::JobId,
            "name" => SortField::Name,
            "createtime" => SortField::CreateTime,
            lowered if lowered.starts_with("labels.") && lowered.len() > "labels.".len() => {
                SortField::Label(name["labels.".len()..].to_string())
            }
            _ => {
                return Err(JobServiceError::bad_request(format!(
                    "Invalid sort field: {name}"
                )))
            }
        };

        Ok(Self { field, descending })
    }

    /// Compare two jobs; missing values sort last ascending, first descending
    pub fn compare(&self, a: &Job, b: &Job) -> Ordering {
        let ordering = match &self.field {
            SortField::JobId => a.job_id.to_lowercase().cmp(&b.job_id.to_lowercase()),
            SortField::Name => compare_optional(a.name.as_deref(), b.name.as_deref()),
            SortField::CreateTime => a.create_time.cmp(&b.create_time),
            SortField::Label(label) => compare_optional(
                a.labels.get(label).map(String::as_str),
                b.labels.get(label).map(String::as_str),
            ),
        };
        let ordering = if self.descending {
            ordering.reverse()
        } else {
            ordering
        };
        ordering.then_with(|| a.job_id.cmp(&b.job_id))
    }

    /// Append an `ORDER BY` clause for a query selecting from `job j`
    pub fn push_sql<'args>(&self, qb: &mut QueryBuilder<'args, Postgres>) {
        qb.push(" ORDER BY ");
        match &self.field {
            SortField::JobId => {
                qb.push("LOWER(j.job_id)");
            }
            SortField::Name => {
                qb.push("LOWER(j.name)");
            }
            SortField::CreateTime => {
                qb.push("j.create_date");
            }
            SortField::Label(label) => {
                qb.push("(SELECT LOWER(l.value) FROM label l WHERE l.partition_id = j.partition_id AND l.job_id = j.job_id AND l.label = ");
                qb.push_bind(label.clone());
                qb.push(")");
            }
        }
        qb.push(if self.descending { " DESC" } else { " ASC" });
        qb.push(", j.job_id ASC");
    }
}

fn compare_optional(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
