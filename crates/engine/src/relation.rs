use std::collections::HashMap;

use crate::model::{RowGroup, Value};

/// The single accumulating table: union of every column seen so far.
///
/// Columns are only ever appended. Each row is stored at full width, so a
/// widening backfills `None` into every existing row. A row's position in
/// [`rows`](Self::rows) is its insertion index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WideRelation {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl WideRelation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relation with the given column set and no rows. Duplicate names are
    /// collapsed onto their first occurrence.
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut relation = Self::new();
        for name in columns {
            relation.add_column(name);
        }
        relation
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&[Value]> {
        self.rows.get(index).map(|r| r.as_slice())
    }

    /// Value of `column` in row `row`; `None` for null, unknown column or row.
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.rows.get(row)?.get(col)?.as_deref()
    }

    /// Widen by one nullable column. Returns `false` if it already exists.
    pub fn add_column(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.index.contains_key(&name) {
            return false;
        }
        self.index.insert(name.clone(), self.columns.len());
        self.columns.push(name);
        for row in &mut self.rows {
            row.push(None);
        }
        true
    }

    /// Append a full-width row, padding with nulls if it is short.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    /// Append every row of `group`, mapping its columns by name.
    ///
    /// Columns of the group that the relation lacks are added first, so
    /// no value is ever discarded. Returns the number of rows appended.
    pub fn append_group(&mut self, group: &RowGroup) -> usize {
        for name in group.columns() {
            self.add_column(name.as_str());
        }

        let mapping: Vec<usize> = group
            .columns()
            .iter()
            .filter_map(|name| self.column_index(name))
            .collect();

        let width = self.columns.len();
        self.rows.reserve(group.len());
        for source_row in group.rows() {
            let mut row: Vec<Value> = vec![None; width];
            for (src, value) in source_row.iter().enumerate() {
                if let Some(&dst) = mapping.get(src) {
                    row[dst] = value.clone();
                }
            }
            self.rows.push(row);
        }
        group.len()
    }
}
