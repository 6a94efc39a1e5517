use std::collections::{HashSet, VecDeque};

use log::{debug, info, warn};

use crate::error::{EngineError, SourceError};
use crate::model::{IngestReport, RowGroup, SourceOutcome, SourceStatus};
use crate::store::RelationStore;

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// A named, lazily read sequence of row-groups.
///
/// `next_group` returns `None` once the source is exhausted. An `Err` means
/// the rest of the source cannot be read; the ingestor stops pulling from it.
pub trait Source {
    fn id(&self) -> &str;

    fn next_group(&mut self) -> Option<Result<RowGroup, SourceError>>;

    /// Malformed rows skipped so far.
    fn rows_dropped(&self) -> usize {
        0
    }
}

/// Source over row-groups already in memory.
#[derive(Debug)]
pub struct MemorySource {
    id: String,
    groups: VecDeque<Result<RowGroup, SourceError>>,
}

impl MemorySource {
    pub fn new(id: impl Into<String>, groups: Vec<RowGroup>) -> Self {
        Self {
            id: id.into(),
            groups: groups.into_iter().map(Ok).collect(),
        }
    }

    /// Source that yields `groups` and then fails with `err`.
    pub fn failing_after(id: impl Into<String>, groups: Vec<RowGroup>, err: SourceError) -> Self {
        let mut source = Self::new(id, groups);
        source.groups.push_back(Err(err));
        source
    }
}

impl Source for MemorySource {
    fn id(&self) -> &str {
        &self.id
    }

    fn next_group(&mut self) -> Option<Result<RowGroup, SourceError>> {
        self.groups.pop_front()
    }
}

// ---------------------------------------------------------------------------
// Ingestor
// ---------------------------------------------------------------------------

/// What a single row-group did to the relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMerge {
    pub created: bool,
    pub columns_added: Vec<String>,
    pub rows: usize,
    /// Malformed rows the group rejected before reaching the store.
    pub rows_dropped: usize,
}

/// Folds sources into the store, one row-group at a time.
///
/// Owns the store for the duration of ingestion; take it back with
/// [`into_store`](Self::into_store) to read the final relation.
pub struct Ingestor<S: RelationStore> {
    store: S,
}

impl<S: RelationStore> Ingestor<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Normalize, reconcile and append one row-group.
    pub fn ingest_group(&mut self, group: RowGroup) -> Result<GroupMerge, EngineError> {
        let group = group.normalized();
        let rows_dropped = group.rows_dropped();

        if !self.store.exists() {
            self.store.create(group.columns())?;
            let rows = self.store.append(&group)?;
            return Ok(GroupMerge { created: true, columns_added: Vec::new(), rows, rows_dropped });
        }

        let existing: HashSet<String> = self.store.columns()?.into_iter().collect();
        let mut columns_added = Vec::new();
        for name in group.columns() {
            if !existing.contains(name) {
                self.store.add_column(name)?;
                columns_added.push(name.clone());
            }
        }

        let rows = self.store.append(&group)?;
        Ok(GroupMerge { created: false, columns_added, rows, rows_dropped })
    }

    /// Ingest every row-group of `source`. Failures stop this source only.
    pub fn ingest_source(&mut self, source: &mut dyn Source) -> SourceOutcome {
        let mut outcome = SourceOutcome::new(source.id());

        while let Some(next) = source.next_group() {
            let merged = next
                .map_err(EngineError::from)
                .and_then(|group| self.ingest_group(group));

            match merged {
                Ok(merge) => {
                    outcome.row_groups += 1;
                    outcome.rows_appended += merge.rows;
                    outcome.rows_dropped += merge.rows_dropped;
                    outcome.created_relation |= merge.created;
                    if !merge.columns_added.is_empty() {
                        debug!("{}: widened with {:?}", outcome.source, merge.columns_added);
                    }
                    outcome.columns_added.extend(merge.columns_added);
                    debug!(
                        "{}: row-group {} appended {} rows",
                        outcome.source, outcome.row_groups, merge.rows
                    );
                }
                Err(err) => {
                    warn!("{}: {err}", outcome.source);
                    outcome.status = SourceStatus::Failed;
                    outcome.error = Some(err.to_string());
                    break;
                }
            }
        }

        outcome.rows_dropped += source.rows_dropped();
        if outcome.rows_dropped > 0 {
            warn!("{}: skipped {} malformed rows", outcome.source, outcome.rows_dropped);
        }
        if !outcome.is_failed() {
            info!(
                "{}: imported {} rows in {} row-groups",
                outcome.source, outcome.rows_appended, outcome.row_groups
            );
        }
        outcome
    }

    /// Ingest sources in the order given. Never aborts: each source gets an outcome.
    pub fn ingest_all<I>(&mut self, sources: I) -> IngestReport
    where
        I: IntoIterator,
        I::Item: Source,
    {
        let mut report = IngestReport::default();
        for mut source in sources {
            report.sources.push(self.ingest_source(&mut source));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use crate::store::MemoryStore;

    fn s(v: &str) -> Value {
        Some(v.to_string())
    }

    fn group(columns: &[&str], rows: &[&[&str]]) -> RowGroup {
        let mut g = RowGroup::new(columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            g.push_row(row.iter().map(|v| if v.is_empty() { None } else { s(v) }).collect());
        }
        g
    }

    /// Store that refuses to add one specific column.
    struct RejectingStore {
        inner: MemoryStore,
        reject: &'static str,
    }

    impl RelationStore for RejectingStore {
        fn exists(&self) -> bool {
            self.inner.exists()
        }
        fn columns(&self) -> Result<Vec<String>, EngineError> {
            self.inner.columns()
        }
        fn create(&mut self, columns: &[String]) -> Result<(), EngineError> {
            self.inner.create(columns)
        }
        fn add_column(&mut self, name: &str) -> Result<(), EngineError> {
            if name == self.reject {
                return Err(EngineError::Widen {
                    column: name.to_string(),
                    reason: "too many columns".into(),
                });
            }
            self.inner.add_column(name)
        }
        fn append(&mut self, group: &RowGroup) -> Result<usize, EngineError> {
            self.inner.append(group)
        }
        fn load(&self) -> Result<crate::relation::WideRelation, EngineError> {
            self.inner.load()
        }
    }

    #[test]
    fn first_group_creates_relation() {
        let mut ingestor = Ingestor::new(MemoryStore::new());
        let merge = ingestor.ingest_group(group(&["EAN", " Name "], &[&["1", "Widget"]])).unwrap();

        assert!(merge.created);
        let rel = ingestor.store().relation().unwrap();
        assert_eq!(rel.columns(), ["ean", "name"]);
        assert_eq!(rel.len(), 1);
    }

    #[test]
    fn later_group_widens_and_backfills() {
        let mut ingestor = Ingestor::new(MemoryStore::new());
        ingestor.ingest_group(group(&["ean", "name"], &[&["1", "Widget"]])).unwrap();
        let merge = ingestor.ingest_group(group(&["EAN", "price"], &[&["1", "9.99"]])).unwrap();

        assert!(!merge.created);
        assert_eq!(merge.columns_added, vec!["price"]);

        let rel = ingestor.into_store().into_relation().unwrap();
        assert_eq!(rel.columns(), ["ean", "name", "price"]);
        assert_eq!(rel.row(0).unwrap(), [s("1"), s("Widget"), None]);
        assert_eq!(rel.row(1).unwrap(), [s("1"), None, s("9.99")]);
    }

    #[test]
    fn disjoint_groups_union_columns() {
        let mut ingestor = Ingestor::new(MemoryStore::new());
        ingestor.ingest_group(group(&["a", "b"], &[&["1", "2"]])).unwrap();
        ingestor.ingest_group(group(&["c", "d"], &[&["3", "4"]])).unwrap();

        let rel = ingestor.into_store().into_relation().unwrap();
        assert_eq!(rel.columns(), ["a", "b", "c", "d"]);
        assert_eq!(rel.row(0).unwrap(), [s("1"), s("2"), None, None]);
        assert_eq!(rel.row(1).unwrap(), [None, None, s("3"), s("4")]);
    }

    #[test]
    fn failing_source_keeps_partial_rows_and_continues() {
        let mut ingestor = Ingestor::new(MemoryStore::new());
        let sources = vec![
            MemorySource::failing_after(
                "a.csv",
                vec![group(&["ean"], &[&["1"]])],
                SourceError::Corrupt("bad quoting".into()),
            ),
            MemorySource::new("b.csv", vec![group(&["ean"], &[&["2"]])]),
        ];

        let report = ingestor.ingest_all(sources);
        assert_eq!(report.sources.len(), 2);
        assert!(report.sources[0].is_failed());
        assert!(report.sources[0].created_relation);
        assert_eq!(report.sources[0].rows_appended, 1);
        assert!(report.sources[0].error.as_deref().unwrap().contains("bad quoting"));
        assert_eq!(report.sources[1].status, SourceStatus::Imported);
        assert_eq!(report.failed_count(), 1);

        let rel = ingestor.into_store().into_relation().unwrap();
        assert_eq!(rel.len(), 2);
    }

    #[test]
    fn widen_failure_aborts_rest_of_source() {
        let store = RejectingStore { inner: MemoryStore::new(), reject: "blob" };
        let mut ingestor = Ingestor::new(store);
        let sources = vec![
            MemorySource::new("a.csv", vec![group(&["ean"], &[&["1"]])]),
            MemorySource::new(
                "b.csv",
                vec![
                    group(&["ean", "blob"], &[&["2", "x"]]),
                    group(&["ean"], &[&["3"]]),
                ],
            ),
            MemorySource::new("c.csv", vec![group(&["ean"], &[&["4"]])]),
        ];

        let report = ingestor.ingest_all(sources);
        assert!(!report.sources[0].is_failed());
        assert!(report.sources[1].is_failed());
        assert_eq!(report.sources[1].row_groups, 0);
        assert!(!report.sources[2].is_failed());

        let rel = ingestor.store().load().unwrap();
        let eans: Vec<_> = (0..rel.len()).map(|i| rel.get(i, "ean")).collect();
        assert_eq!(eans, vec![Some("1"), Some("4")]);
    }

    #[test]
    fn insertion_order_follows_sources_then_groups() {
        let mut ingestor = Ingestor::new(MemoryStore::new());
        let sources = vec![
            MemorySource::new(
                "a.csv",
                vec![group(&["ean"], &[&["1"], &["2"]]), group(&["ean"], &[&["3"]])],
            ),
            MemorySource::new("b.csv", vec![group(&["ean"], &[&["4"], &["5"]])]),
        ];
        ingestor.ingest_all(sources);

        let rel = ingestor.into_store().into_relation().unwrap();
        let eans: Vec<_> = (0..rel.len()).map(|i| rel.get(i, "ean").unwrap()).collect();
        assert_eq!(eans, vec!["1", "2", "3", "4", "5"]);
    }

    #[test]
    fn header_only_group_still_shapes_relation() {
        let mut ingestor = Ingestor::new(MemoryStore::new());
        ingestor.ingest_group(group(&["ean"], &[&["1"]])).unwrap();
        let merge = ingestor.ingest_group(group(&["ean", "weight"], &[])).unwrap();

        assert_eq!(merge.rows, 0);
        assert_eq!(merge.columns_added, vec!["weight"]);
        assert!(ingestor.store().relation().unwrap().has_column("weight"));
    }

    #[test]
    fn rows_wider_than_header_are_dropped_not_fatal() {
        let mut wide = RowGroup::new(vec!["EAN".into()]);
        wide.push_row(vec![s("1"), s("x")]);
        wide.push_row(vec![s("2")]);

        let mut ingestor = Ingestor::new(MemoryStore::new());
        let merge = ingestor.ingest_group(wide.clone()).unwrap();
        assert_eq!(merge.rows, 1);
        assert_eq!(merge.rows_dropped, 1);

        let report = ingestor.ingest_all(vec![MemorySource::new("b.csv", vec![wide])]);
        assert!(!report.sources[0].is_failed());
        assert_eq!(report.sources[0].rows_appended, 1);
        assert_eq!(report.sources[0].rows_dropped, 1);

        let rel = ingestor.into_store().into_relation().unwrap();
        assert_eq!(rel.columns(), ["ean"]);
        assert_eq!(rel.rows(), [vec![s("2")], vec![s("2")]]);
    }
}
