//! # Filter Grammar
//!
//! A small RSQL-style predicate language over job fields and labels:
//!
//! ```text
//! status==Active;labels.owner==alice
//! (name==report* or id=in=(a,b)),percentageComplete=gt=50
//! createTime=ge='2024-01-01T00:00:00Z'
//! ```
//!
//! `;` and `and` bind tighter than `,` and `or`. The parser yields a
//! [`FilterExpr`] tree which is either evaluated in memory or rendered as
//! bound-parameter SQL. Values never reach the query text.

use crate::error::{JobServiceError, Result};
use crate::models::Job;
use crate::state_machine::JobStatus;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterField {
    Id,
    Name,
    Description,
    CreateTime,
    LastUpdateTime,
    Status,
    PercentageComplete,
    Label(String),
}

impl FilterField {
    pub fn parse(selector: &str) -> Result<Self> {
        let field = match selector.to_ascii_lowercase().as_str() {
            "id" | "jobid" => Self::Id,
            "name" => Self::Name,
            "description" => Self::Description,
            "createtime" => Self::CreateTime,
            "lastupdatetime" => Self::LastUpdateTime,
            "status" => Self::Status,
            "percentagecomplete" => Self::PercentageComplete,
            lowered if lowered.starts_with("labels.") && lowered.len() > "labels.".len() => {
                Self::Label(selector["labels.".len()..].to_string())
            }
            _ => {
                return Err(JobServiceError::bad_request(format!(
                    "Unrecognised filter field: {selector}"
                )))
            }
        };
        Ok(field)
    }

    fn column(&self) -> &'static str {
        match self {
            Self::Id => "j.job_id",
            Self::Name => "j.name",
            Self::Description => "j.description",
            Self::CreateTime => "j.create_date",
            Self::LastUpdateTime => "j.last_update_date",
            Self::Status => "j.status",
            Self::PercentageComplete => "j.percentage_complete",
            Self::Label(_) => "l.value",
        }
    }

    fn typed_value(&self, raw: String) -> Result<FilterValue> {
        let value = match self {
            Self::CreateTime | Self::LastUpdateTime => DateTime::parse_from_rfc3339(&raw)
                .map(|time| FilterValue::Time(time.with_timezone(&Utc)))
                .map_err(|_| unable_to_parse())?,
            Self::PercentageComplete => raw
                .parse::<f32>()
                .map(FilterValue::Number)
                .map_err(|_| unable_to_parse())?,
            Self::Status => raw
                .parse::<JobStatus>()
                .map(FilterValue::Status)
                .map_err(|_| unable_to_parse())?,
            _ => FilterValue::Text(raw),
        };
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    Out,
}

impl ComparisonOp {
    fn takes_list(&self) -> bool {
        matches!(self, Self::In | Self::Out)
    }

    fn sql(&self) -> &'static str {
        match self {
            Self::Eq => " = ",
            Self::Ne => " <> ",
            Self::Gt => " > ",
            Self::Ge => " >= ",
            Self::Lt => " < ",
            Self::Le => " <= ",
            Self::In | Self::Out => " IN ",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Time(DateTime<Utc>),
    Number(f32),
    Status(JobStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub field: FilterField,
    pub op: ComparisonOp,
    pub values: Vec<FilterValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Comparison(Comparison),
}

impl FilterExpr {
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser::new(input);
        let expr = parser.parse_or()?;
        parser.skip_whitespace();
        if !parser.at_end() {
            return Err(unable_to_parse());
        }
        Ok(expr)
    }

    /// Evaluate against a job loaded in memory
    pub fn matches(&self, job: &Job) -> bool {
        match self {
            Self::And(terms) => terms.iter().all(|term| term.matches(job)),
            Self::Or(terms) => terms.iter().any(|term| term.matches(job)),
            Self::Comparison(comparison) => comparison.matches(job),
        }
    }

    /// Append this predicate to a query selecting from `job j`
    pub fn push_sql<'args>(&self, qb: &mut QueryBuilder<'args, Postgres>) {
        match self {
            Self::And(terms) => push_joined(qb, terms, " AND "),
            Self::Or(terms) => push_joined(qb, terms, " OR "),
            Self::Comparison(comparison) => comparison.push_sql(qb),
        }
    }
}

fn push_joined<'args>(qb: &mut QueryBuilder<'args, Postgres>, terms: &[FilterExpr], separator: &str) {
    qb.push("(");
    for (index, term) in terms.iter().enumerate() {
        if index > 0 {
            qb.push(separator);
        }
        term.push_sql(qb);
    }
    qb.push(")");
}

impl Comparison {
    fn matches(&self, job: &Job) -> bool {
        match self.op {
            ComparisonOp::Eq => self.equals_any(job, true),
            ComparisonOp::Ne => !self.equals_any(job, true),
            ComparisonOp::In => self.equals_any(job, false),
            ComparisonOp::Out => !self.equals_any(job, false),
            ComparisonOp::Gt => self.ordering(job) == Some(Ordering::Greater),
            ComparisonOp::Ge => matches!(self.ordering(job), Some(Ordering::Greater | Ordering::Equal)),
            ComparisonOp::Lt => self.ordering(job) == Some(Ordering::Less),
            ComparisonOp::Le => matches!(self.ordering(job), Some(Ordering::Less | Ordering::Equal)),
        }
    }

    fn equals_any(&self, job: &Job, wildcards: bool) -> bool {
        self.values.iter().any(|value| match (field_value(job, &self.field), value) {
            (Some(FieldValue::Text(actual)), FilterValue::Text(expected)) => {
                if wildcards && expected.contains('*') {
                    wildcard_match(expected, actual)
                } else {
                    actual == expected
                }
            }
            (Some(actual), expected) => compare(&actual, expected) == Some(Ordering::Equal),
            (None, _) => false,
        })
    }

    fn ordering(&self, job: &Job) -> Option<Ordering> {
        let actual = field_value(job, &self.field)?;
        compare(&actual, self.values.first()?)
    }

    fn push_sql<'args>(&self, qb: &mut QueryBuilder<'args, Postgres>) {
        let negated = matches!(self.op, ComparisonOp::Ne | ComparisonOp::Out);
        let positive = match self.op {
            ComparisonOp::Ne => ComparisonOp::Eq,
            ComparisonOp::Out => ComparisonOp::In,
            op => op,
        };

        if let FilterField::Label(name) = &self.field {
            qb.push(if negated { "NOT EXISTS" } else { "EXISTS" });
            qb.push(" (SELECT 1 FROM label l WHERE l.partition_id = j.partition_id AND l.job_id = j.job_id AND l.label = ");
            qb.push_bind(name.clone());
            qb.push(" AND ");
            push_predicate(qb, self.field.column(), positive, &self.values);
            qb.push(")");
            return;
        }

        let column = self.field.column();
        if negated {
            qb.push("(");
            qb.push(column);
            qb.push(" IS NULL OR NOT (");
            push_predicate(qb, column, positive, &self.values);
            qb.push("))");
        } else {
            push_predicate(qb, column, positive, &self.values);
        }
    }
}

fn push_predicate<'args>(
    qb: &mut QueryBuilder<'args, Postgres>,
    column: &str,
    op: ComparisonOp,
    values: &[FilterValue],
) {
    qb.push(column);
    match (op, values) {
        (ComparisonOp::In, values) => {
            qb.push(" IN (");
            for (index, value) in values.iter().enumerate() {
                if index > 0 {
                    qb.push(", ");
                }
                push_value(qb, value);
            }
            qb.push(")");
        }
        (ComparisonOp::Eq, [FilterValue::Text(pattern)]) if pattern.contains('*') => {
            qb.push(" LIKE ");
            qb.push_bind(like_pattern(pattern));
            qb.push(" ESCAPE '\\'");
        }
        (op, values) => {
            qb.push(op.sql());
            if let Some(value) = values.first() {
                push_value(qb, value);
            }
        }
    }
}

fn push_value<'args>(qb: &mut QueryBuilder<'args, Postgres>, value: &FilterValue) {
    match value {
        FilterValue::Text(text) => qb.push_bind(text.clone()),
        FilterValue::Time(time) => qb.push_bind(*time),
        FilterValue::Number(number) => qb.push_bind(*number),
        FilterValue::Status(status) => qb.push_bind(status.as_str().to_string()),
    };
}

/// Escape LIKE metacharacters so `text` matches literally
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Translate a `*` wildcard into a LIKE pattern, escaping LIKE metacharacters
pub fn like_pattern(pattern: &str) -> String {
    let mut like = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '%' | '_' | '\\' => {
                like.push('\\');
                like.push(ch);
            }
            '*' => like.push('%'),
            other => like.push(other),
        }
    }
    like
}

/// Match `text` against a pattern where `*` stands for any run of characters
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|ch| *ch == '*')
}

enum FieldValue<'a> {
    Text(&'a str),
    Time(DateTime<Utc>),
    Number(f32),
    Status(JobStatus),
}

fn field_value<'a>(job: &'a Job, field: &FilterField) -> Option<FieldValue<'a>> {
    match field {
        FilterField::Id => Some(FieldValue::Text(&job.job_id)),
        FilterField::Name => job.name.as_deref().map(FieldValue::Text),
        FilterField::Description => job.description.as_deref().map(FieldValue::Text),
        FilterField::CreateTime => Some(FieldValue::Time(job.create_time)),
        FilterField::LastUpdateTime => Some(FieldValue::Time(job.last_update_time)),
        FilterField::Status => Some(FieldValue::Status(job.status)),
        FilterField::PercentageComplete => Some(FieldValue::Number(job.percentage_complete)),
        FilterField::Label(name) => job.labels.get(name).map(|value| FieldValue::Text(value)),
    }
}

fn compare(actual: &FieldValue<'_>, expected: &FilterValue) -> Option<Ordering> {
    match (actual, expected) {
        (FieldValue::Text(actual), FilterValue::Text(expected)) => Some((*actual).cmp(expected.as_str())),
        (FieldValue::Time(actual), FilterValue::Time(expected)) => Some(actual.cmp(expected)),
        (FieldValue::Number(actual), FilterValue::Number(expected)) => actual.partial_cmp(expected),
        (FieldValue::Status(actual), FilterValue::Status(expected)) => {
            Some(actual.as_str().cmp(expected.as_str()))
        }
        _ => None,
    }
}

fn unable_to_parse() -> JobServiceError {
    JobServiceError::bad_request("Unable to parse filter")
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume `and`/`or` when followed by whitespace or a parenthesis
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let len = keyword.len();
        let candidate: String = self.chars.iter().skip(self.pos).take(len).collect();
        if !candidate.eq_ignore_ascii_case(keyword) {
            return false;
        }
        match self.peek_at(len) {
            Some(next) if next.is_whitespace() || next == '(' => {
                self.pos += len;
                true
            }
            _ => false,
        }
    }

    fn parse_or(&mut self) -> Result<FilterExpr> {
        let mut terms = vec![self.parse_and()?];
        loop {
            self.skip_whitespace();
            if self.eat(',') || self.eat_keyword("or") {
                terms.push(self.parse_and()?);
            } else {
                break;
            }
        }
        Ok(match terms.len() {
            1 => terms.remove(0),
            _ => FilterExpr::Or(terms),
        })
    }

    fn parse_and(&mut self) -> Result<FilterExpr> {
        let mut terms = vec![self.parse_primary()?];
        loop {
            self.skip_whitespace();
            if self.eat(';') || self.eat_keyword("and") {
                terms.push(self.parse_primary()?);
            } else {
                break;
            }
        }
        Ok(match terms.len() {
            1 => terms.remove(0),
            _ => FilterExpr::And(terms),
        })
    }

    fn parse_primary(&mut self) -> Result<FilterExpr> {
        self.skip_whitespace();
        if self.eat('(') {
            let expr = self.parse_or()?;
            self.skip_whitespace();
            if !self.eat(')') {
                return Err(unable_to_parse());
            }
            return Ok(expr);
        }
        self.parse_comparison().map(FilterExpr::Comparison)
    }

    fn parse_comparison(&mut self) -> Result<Comparison> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(unable_to_parse());
        }
        let selector: String = self.chars[start..self.pos].iter().collect();
        let field = FilterField::parse(&selector)?;

        self.skip_whitespace();
        let op = self.parse_operator()?;
        self.skip_whitespace();

        let raw_values = if self.eat('(') {
            let mut values = Vec::new();
            loop {
                self.skip_whitespace();
                values.push(self.parse_value()?);
                self.skip_whitespace();
                if self.eat(',') {
                    continue;
                }
                if self.eat(')') {
                    break;
                }
                return Err(unable_to_parse());
            }
            values
        } else {
            vec![self.parse_value()?]
        };

        if !op.takes_list() && raw_values.len() != 1 {
            return Err(unable_to_parse());
        }

        let values = raw_values
            .into_iter()
            .map(|raw| field.typed_value(raw))
            .collect::<Result<Vec<_>>>()?;

        Ok(Comparison { field, op, values })
    }

    fn parse_operator(&mut self) -> Result<ComparisonOp> {
        let two: String = self.chars.iter().skip(self.pos).take(2).collect();
        let fixed = match two.as_str() {
            "==" => Some((ComparisonOp::Eq, 2)),
            "!=" => Some((ComparisonOp::Ne, 2)),
            ">=" => Some((ComparisonOp::Ge, 2)),
            "<=" => Some((ComparisonOp::Le, 2)),
            _ => match self.peek() {
                Some('>') => Some((ComparisonOp::Gt, 1)),
                Some('<') => Some((ComparisonOp::Lt, 1)),
                _ => None,
            },
        };
        if let Some((op, len)) = fixed {
            self.pos += len;
            return Ok(op);
        }

        if self.peek() == Some('=') {
            let mut end = self.pos + 1;
            while self
                .chars
                .get(end)
                .is_some_and(|c| c.is_ascii_alphabetic() || *c == '-')
            {
                end += 1;
            }
            if self.chars.get(end) == Some(&'=') && end > self.pos + 1 {
                let token: String = self.chars[self.pos..=end].iter().collect();
                let op = match token.to_ascii_lowercase().as_str() {
                    "=gt=" => ComparisonOp::Gt,
                    "=ge=" => ComparisonOp::Ge,
                    "=lt=" => ComparisonOp::Lt,
                    "=le=" => ComparisonOp::Le,
                    "=in=" => ComparisonOp::In,
                    "=out=" => ComparisonOp::Out,
                    _ => {
                        return Err(JobServiceError::bad_request(format!(
                            "Unrecognised filter condition: {token}"
                        )))
                    }
                };
                self.pos = end + 1;
                return Ok(op);
            }
        }

        let start = self.pos;
        while self.peek().is_some_and(|c| {
            !c.is_alphanumeric() && !c.is_whitespace() && !matches!(c, '(' | ')' | '\'' | '"' | ';' | ',')
        }) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(unable_to_parse());
        }
        let token: String = self.chars[start..self.pos].iter().collect();
        Err(JobServiceError::bad_request(format!(
            "Unrecognised filter condition: {token}"
        )))
    }

    fn parse_value(&mut self) -> Result<String> {
        match self.peek() {
            Some(quote @ ('\'' | '"')) => {
                self.pos += 1;
                let mut value = String::new();
                loop {
                    match self.peek() {
                        None => return Err(unable_to_parse()),
                        Some('\\') => {
                            let escaped = self.peek_at(1).ok_or_else(unable_to_parse)?;
                            value.push(escaped);
                            self.pos += 2;
                        }
                        Some(c) if c == quote => {
                            self.pos += 1;
                            return Ok(value);
                        }
                        Some(c) => {
                            value.push(c);
                            self.pos += 1;
                        }
                    }
                }
            }
            _ => {
                let start = self.pos;
                while self.peek().is_some_and(|c| {
                    !c.is_whitespace() && !matches!(c, '(' | ')' | '\'' | '"' | ';' | ',')
                }) {
                    self.pos += 1;
                }
                if start == self.pos {
                    return Err(unable_to_parse());
                }
                Ok(self.chars[start..self.pos].iter().collect())
            }
        }
    }
}
