use std::collections::BTreeMap;

/// Label name to value; ordered so serialized output is stable
pub type LabelMap = BTreeMap<String, String>;

/// A single persisted label row
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LabelRow {
    pub partition_id: String,
    pub job_id: String,
    pub label: String,
    pub value: String,
}

/// Group label rows by job id, unioning every row into one map per job
pub fn group_label_rows(rows: impl IntoIterator<Item = LabelRow>) -> BTreeMap<String, LabelMap> {
    let mut grouped: BTreeMap<String, LabelMap> = BTreeMap::new();
    for row in rows {
        grouped
            .entry(row.job_id)
            .or_default()
            .insert(row.label, row.value);
    }
    grouped
}

/// True when the job has at least one of the selected label names
pub fn matches_label_selector(labels: &LabelMap, selector: &[String]) -> bool {
    selector.is_empty() || selector.iter().any(|name| labels.contains_key(name))
}
