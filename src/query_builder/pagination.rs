use sqlx::{Postgres, QueryBuilder};

/// Offset/limit window over a job listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pagination {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Pagination {
    /// Create pagination with page number (1-indexed) and per-page count
    pub fn new(page: u32, per_page: u32) -> Self {
        let offset = if page > 0 { Some((page - 1) * per_page) } else { None };
        Self {
            limit: Some(per_page),
            offset,
        }
    }

    pub fn limit_only(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            offset: None,
        }
    }

    pub fn limit_offset(limit: u32, offset: u32) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }

    /// Effective `(limit, offset)`; a missing limit takes the default and any limit is capped
    pub fn resolve(&self, default_page_size: u32, max_page_size: u32) -> (u32, u32) {
        let limit = self.limit.unwrap_or(default_page_size).min(max_page_size);
        (limit, self.offset.unwrap_or(0))
    }

    /// Apply to an already filtered and sorted listing
    pub fn apply<T>(&self, items: Vec<T>, default_page_size: u32, max_page_size: u32) -> Vec<T> {
        let (limit, offset) = self.resolve(default_page_size, max_page_size);
        items
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect()
    }

    /// Append bound `LIMIT`/`OFFSET` clauses
    pub fn push_sql<'args>(
        &self,
        qb: &mut QueryBuilder<'args, Postgres>,
        default_page_size: u32,
        max_page_size: u32,
    ) {
        let (limit, offset) = self.resolve(default_page_size, max_page_size);
        qb.push(" LIMIT ");
        qb.push_bind(i64::from(limit));
        qb.push(" OFFSET ");
        qb.push_bind(i64::from(offset));
    }

    /// Calculate total pages given a total count
    pub fn total_pages(&self, total_count: u32) -> u32 {
        match self.limit {
            Some(limit) if limit > 0 => total_count.div_ceil(limit),
            _ => 1,
        }
    }

    /// Check if there's a next page
    pub fn has_next_page(&self, total_count: u32) -> bool {
        match (self.limit, self.offset) {
            (Some(limit), offset) => offset.unwrap_or(0) + limit < total_count,
            _ => false,
        }
    }
}
