use std::collections::HashMap;

use serde::Serialize;

use crate::normalize::normalize_field_name;

/// A single cell. `None` is an absent or null value; everything else is text.
pub type Value = Option<String>;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// A bounded chunk of rows read from one source.
///
/// Every row is aligned with the header: `rows()[r][c]` is the value of
/// `columns()[c]` in row `r`. Rows only enter through [`push_row`](Self::push_row).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowGroup {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    rows_dropped: usize,
}

impl RowGroup {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new(), rows_dropped: 0 }
    }

    /// Append a row, padding short rows with nulls.
    ///
    /// A row wider than the header is malformed: it is dropped, counted, and
    /// `false` is returned.
    pub fn push_row(&mut self, mut row: Vec<Value>) -> bool {
        if row.len() > self.columns.len() {
            self.rows_dropped += 1;
            return false;
        }
        row.resize(self.columns.len(), None);
        self.rows.push(row);
        true
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows rejected by [`push_row`](Self::push_row).
    pub fn rows_dropped(&self) -> usize {
        self.rows_dropped
    }

    /// Normalize every column name and merge columns that collide.
    ///
    /// Merged columns keep the position of their first occurrence. Within a
    /// row the last present value among the colliding source columns wins.
    pub fn normalized(self) -> RowGroup {
        let mut columns: Vec<String> = Vec::with_capacity(self.columns.len());
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut target: Vec<usize> = Vec::with_capacity(self.columns.len());

        for raw in &self.columns {
            let name = normalize_field_name(raw);
            let idx = *positions.entry(name.clone()).or_insert_with(|| {
                columns.push(name);
                columns.len() - 1
            });
            target.push(idx);
        }

        if columns == self.columns {
            return self;
        }

        let width = columns.len();
        let rows = self
            .rows
            .into_iter()
            .map(|row| {
                let mut out: Vec<Value> = vec![None; width];
                for (value, &dest) in row.into_iter().zip(&target) {
                    if value.is_some() {
                        out[dest] = value;
                    }
                }
                out
            })
            .collect();

        RowGroup { columns, rows, rows_dropped: self.rows_dropped }
    }
}

// ---------------------------------------------------------------------------
// Ingestion outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Imported,
    Failed,
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Imported => write!(f, "imported"),
            Self::Failed => write!(f, "error"),
        }
    }
}

/// Per-source result of ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub source: String,
    pub status: SourceStatus,
    /// This source's first row-group created the relation.
    pub created_relation: bool,
    pub row_groups: usize,
    pub rows_appended: usize,
    /// Malformed rows skipped by the source reader.
    pub rows_dropped: usize,
    /// Columns this source added to the relation, in order of addition.
    pub columns_added: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceOutcome {
    pub(crate) fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            status: SourceStatus::Imported,
            created_relation: false,
            row_groups: 0,
            rows_appended: 0,
            rows_dropped: 0,
            columns_added: Vec::new(),
            error: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == SourceStatus::Failed
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub sources: Vec<SourceOutcome>,
}

impl IngestReport {
    pub fn failed(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.sources.iter().filter(|s| s.is_failed())
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn rows_appended(&self) -> usize {
        self.sources.iter().map(|s| s.rows_appended).sum()
    }

    pub fn rows_dropped(&self) -> usize {
        self.sources.iter().map(|s| s.rows_dropped).sum()
    }
}

// ---------------------------------------------------------------------------
// Deduplication output
// ---------------------------------------------------------------------------

/// Representative row of one identity group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasterRecord {
    /// Position of the row in the wide relation (0-based insertion order).
    pub insertion_index: usize,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MasterStats {
    pub input_rows: usize,
    pub groups: usize,
    pub duplicates_dropped: usize,
    /// Rows with a null primary identifier; they form no identity group.
    pub rows_without_primary: usize,
    /// The secondary identifier column was absent and has been synthesized.
    pub secondary_synthesized: bool,
    /// Null secondary identifiers replaced by the sentinel (kept rows only).
    pub secondary_filled: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasterSet {
    pub columns: Vec<String>,
    pub records: Vec<MasterRecord>,
    pub stats: MasterStats,
}

impl MasterSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value of `column` in the `record`-th master row.
    pub fn get(&self, record: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.records.get(record)?.values.get(col)?.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Value {
        Some(v.to_string())
    }

    #[test]
    fn normalized_lowercases_and_trims() {
        let mut group = RowGroup::new(vec!["EAN ".into(), " Name".into()]);
        group.push_row(vec![s("1"), s("Widget")]);

        let group = group.normalized();
        assert_eq!(group.columns, vec!["ean", "name"]);
        assert_eq!(group.rows[0], vec![s("1"), s("Widget")]);
    }

    #[test]
    fn colliding_columns_last_present_value_wins() {
        let mut group = RowGroup::new(vec!["EAN".into(), "price".into(), "ean ".into()]);
        group.push_row(vec![s("1"), s("9.99"), s("2")]);
        group.push_row(vec![s("3"), s("1.00"), None]);

        let group = group.normalized();
        assert_eq!(group.columns, vec!["ean", "price"]);
        assert_eq!(group.rows[0], vec![s("2"), s("9.99")]);
        // A trailing null does not erase an earlier value.
        assert_eq!(group.rows[1], vec![s("3"), s("1.00")]);
    }

    #[test]
    fn push_row_pads_short_rows() {
        let mut group = RowGroup::new(vec!["a".into(), "b".into(), "c".into()]);
        group.push_row(vec![s("1")]);
        assert_eq!(group.rows[0], vec![s("1"), None, None]);
    }

    #[test]
    fn push_row_drops_rows_wider_than_header() {
        let mut group = RowGroup::new(vec!["EAN".into()]);
        assert!(!group.push_row(vec![s("1"), s("x")]));
        assert!(group.push_row(vec![s("2")]));
        assert_eq!(group.len(), 1);
        assert_eq!(group.rows_dropped(), 1);

        let group = group.normalized();
        assert_eq!(group.rows(), [vec![s("2")]]);
        assert_eq!(group.rows_dropped(), 1);
    }
}
