// SQLite staging store for the wide relation

use std::path::{Path, PathBuf};

use log::debug;
use rusqlite::{params, params_from_iter, Connection};

use masterdata_engine::{EngineError, RelationStore, RowGroup, Value, WideRelation};

/// Staging table name unless configured otherwise.
pub const DEFAULT_TABLE: &str = "products";

/// Hidden `INTEGER PRIMARY KEY` that records insertion order.
///
/// Ordering by `rowid` is not enough: a source column called `rowid`, `oid`
/// or `_rowid_` shadows the alias. Normalized field names are trimmed, so a
/// leading space keeps this name out of their reach.
const SEQ_COLUMN: &str = " mdm_seq";

/// The wide relation persisted as one all-TEXT SQLite table.
///
/// Insertion order is kept in a hidden sequence column that never shows up in
/// [`columns`](RelationStore::columns) or the loaded relation. The connection is owned by the
/// store and closed when it is dropped or [`close`](Self::close)d.
pub struct SqliteStore {
    conn: Connection,
    table: String,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open a fresh staging database at `path`, deleting any previous one.
    pub fn create_fresh(path: &Path, table: &str) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Store(format!("{}: {e}", parent.display())))?;
        }
        if path.exists() {
            std::fs::remove_file(path)
                .map_err(|e| EngineError::Store(format!("{}: {e}", path.display())))?;
        }

        let conn = Connection::open(path).map_err(store_err)?;
        debug!("opened staging database {}", path.display());
        Ok(Self { conn, table: table.to_string(), path: Some(path.to_path_buf()) })
    }

    /// Staging database that lives only as long as the store.
    pub fn in_memory(table: &str) -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Ok(Self { conn, table: table.to_string(), path: None })
    }

    /// Close the connection, optionally deleting the database file.
    pub fn close(self, remove_file: bool) -> Result<(), EngineError> {
        let path = self.path.clone();
        self.conn.close().map_err(|(_, e)| store_err(e))?;
        if let (true, Some(path)) = (remove_file, path) {
            std::fs::remove_file(&path)
                .map_err(|e| EngineError::Store(format!("{}: {e}", path.display())))?;
        }
        Ok(())
    }

    fn table_ident(&self) -> String {
        quote_ident(&self.table)
    }
}

impl RelationStore for SqliteStore {
    fn exists(&self) -> bool {
        self.conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.table],
                |_| Ok(()),
            )
            .is_ok()
    }

    fn columns(&self) -> Result<Vec<String>, EngineError> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", self.table_ident()))
            .map_err(store_err)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(store_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err)?;
        Ok(names.into_iter().filter(|name| name != SEQ_COLUMN).collect())
    }

    fn create(&mut self, columns: &[String]) -> Result<(), EngineError> {
        if columns.is_empty() {
            return Err(EngineError::Store("cannot create a table without columns".into()));
        }
        let mut defs = vec![format!("{} INTEGER PRIMARY KEY", quote_ident(SEQ_COLUMN))];
        defs.extend(columns.iter().map(|c| format!("{} TEXT", quote_ident(c))));
        let sql = format!("CREATE TABLE {} ({})", self.table_ident(), defs.join(", "));
        self.conn.execute(&sql, []).map_err(store_err)?;
        Ok(())
    }

    fn add_column(&mut self, name: &str) -> Result<(), EngineError> {
        let sql = format!("ALTER TABLE {} ADD COLUMN {} TEXT", self.table_ident(), quote_ident(name));
        self.conn.execute(&sql, []).map_err(|e| EngineError::Widen {
            column: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    fn append(&mut self, group: &RowGroup) -> Result<usize, EngineError> {
        if group.is_empty() {
            return Ok(0);
        }

        let names: Vec<String> = group.columns().iter().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table_ident(),
            names.join(", "),
            placeholders.join(", ")
        );

        // One transaction per row-group.
        let tx = self.conn.transaction().map_err(store_err)?;
        {
            let mut stmt = tx.prepare(&sql).map_err(store_err)?;
            for row in group.rows() {
                stmt.execute(params_from_iter(row.iter())).map_err(store_err)?;
            }
        }
        tx.commit().map_err(store_err)?;
        Ok(group.len())
    }

    fn load(&self) -> Result<WideRelation, EngineError> {
        if !self.exists() {
            return Err(EngineError::EmptyRelation);
        }

        let columns = self.columns()?;
        let mut relation = WideRelation::with_columns(columns.iter().cloned());
        let width = columns.len();

        let select: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            select.join(", "),
            self.table_ident(),
            quote_ident(SEQ_COLUMN)
        );
        let mut stmt = self.conn.prepare(&sql).map_err(store_err)?;
        let mut rows = stmt.query([]).map_err(store_err)?;
        while let Some(row) = rows.next().map_err(store_err)? {
            let mut values: Vec<Value> = Vec::with_capacity(width);
            for i in 0..width {
                values.push(row.get::<_, Option<String>>(i).map_err(store_err)?);
            }
            relation.push_row(values);
        }

        debug!("loaded {} rows x {} columns from {}", relation.len(), width, self.table);
        Ok(relation)
    }
}

fn store_err(e: rusqlite::Error) -> EngineError {
    EngineError::Store(e.to_string())
}

/// Quote an SQL identifier, doubling embedded quotes.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use masterdata_engine::{Deduplicator, Ingestor, MemorySource};
    use tempfile::tempdir;

    fn s(v: &str) -> Value {
        Some(v.to_string())
    }

    fn group(columns: &[&str], rows: &[&[Option<&str>]]) -> RowGroup {
        let mut g = RowGroup::new(columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            g.push_row(row.iter().map(|v| v.map(str::to_string)).collect());
        }
        g
    }

    #[test]
    fn create_widen_append_load() {
        let mut store = SqliteStore::in_memory(DEFAULT_TABLE).unwrap();
        assert!(!store.exists());

        store.create(&["ean".into(), "name".into()]).unwrap();
        store.append(&group(&["ean", "name"], &[&[Some("1"), Some("Widget")]])).unwrap();
        store.add_column("price").unwrap();
        store.append(&group(&["ean", "price"], &[&[Some("1"), Some("9.99")]])).unwrap();

        assert_eq!(store.columns().unwrap(), vec!["ean", "name", "price"]);
        let rel = store.load().unwrap();
        assert_eq!(rel.len(), 2);
        assert_eq!(rel.row(0).unwrap(), [s("1"), s("Widget"), None]);
        assert_eq!(rel.row(1).unwrap(), [s("1"), None, s("9.99")]);
    }

    #[test]
    fn load_without_table_is_empty_relation() {
        let store = SqliteStore::in_memory(DEFAULT_TABLE).unwrap();
        assert_eq!(store.load(), Err(EngineError::EmptyRelation));
    }

    #[test]
    fn awkward_identifiers_are_quoted() {
        let mut store = SqliteStore::in_memory("staging \"raw\"").unwrap();
        store.create(&["unit price".into(), "select".into()]).unwrap();
        store.add_column("a\"b").unwrap();
        store
            .append(&group(&["a\"b", "select"], &[&[Some("x"), Some("y")]]))
            .unwrap();

        let rel = store.load().unwrap();
        assert_eq!(rel.columns(), ["unit price", "select", "a\"b"]);
        assert_eq!(rel.get(0, "a\"b"), Some("x"));
    }

    #[test]
    fn duplicate_column_is_widen_error() {
        let mut store = SqliteStore::in_memory(DEFAULT_TABLE).unwrap();
        store.create(&["ean".into()]).unwrap();
        assert!(matches!(store.add_column("ean"), Err(EngineError::Widen { .. })));
    }

    #[test]
    fn rowid_named_columns_keep_insertion_order() {
        for shadow in ["rowid", "oid", "_rowid_"] {
            let mut ingestor = Ingestor::new(SqliteStore::in_memory(DEFAULT_TABLE).unwrap());
            ingestor
                .ingest_group(group(
                    &["ean", shadow, "name"],
                    &[&[Some("1"), Some("z"), Some("first")], &[Some("1"), Some("a"), Some("second")]],
                ))
                .unwrap();

            let store = ingestor.into_store();
            assert_eq!(store.columns().unwrap(), vec!["ean", shadow, "name"]);

            let rel = store.load().unwrap();
            assert_eq!(rel.columns(), ["ean", shadow, "name"]);
            assert_eq!(rel.get(0, "name"), Some("first"), "shadowed by {shadow}");
            assert_eq!(rel.get(0, shadow), Some("z"));

            let set = Deduplicator::default().deduplicate(&rel).unwrap();
            assert_eq!(set.get(0, "name"), Some("first"), "shadowed by {shadow}");
        }
    }

    #[test]
    fn rowid_column_added_later_keeps_insertion_order() {
        let mut store = SqliteStore::in_memory(DEFAULT_TABLE).unwrap();
        store.create(&["ean".into()]).unwrap();
        store.append(&group(&["ean"], &[&[Some("1")]])).unwrap();
        store.add_column("rowid").unwrap();
        store
            .append(&group(&["ean", "rowid"], &[&[Some("2"), Some("0")], &[Some("3"), Some("-1")]]))
            .unwrap();

        let rel = store.load().unwrap();
        let eans: Vec<_> = (0..rel.len()).map(|i| rel.get(i, "ean").unwrap()).collect();
        assert_eq!(eans, ["1", "2", "3"]);
    }

    #[test]
    fn create_fresh_replaces_previous_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("result").join("staging.db");

        let mut first = SqliteStore::create_fresh(&path, DEFAULT_TABLE).unwrap();
        first.create(&["ean".into()]).unwrap();
        first.close(false).unwrap();
        assert!(path.exists());

        let second = SqliteStore::create_fresh(&path, DEFAULT_TABLE).unwrap();
        assert!(!second.exists());
        second.close(true).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn matches_memory_store_through_ingestor() {
        let sources = || {
            vec![
                MemorySource::new("a.csv", vec![group(&["EAN", "Name"], &[&[Some("1"), Some("a")]])]),
                MemorySource::new(
                    "b.csv",
                    vec![group(
                        &["ean", "product_id"],
                        &[&[Some("1"), None], &[Some("2"), Some("P")]],
                    )],
                ),
            ]
        };

        let mut sqlite = Ingestor::new(SqliteStore::in_memory(DEFAULT_TABLE).unwrap());
        sqlite.ingest_all(sources());
        let mut memory = Ingestor::new(masterdata_engine::MemoryStore::new());
        memory.ingest_all(sources());

        let from_sqlite = sqlite.store().load().unwrap();
        let from_memory = memory.store().load().unwrap();
        assert_eq!(from_sqlite, from_memory);

        let dedup = Deduplicator::default();
        assert_eq!(dedup.deduplicate(&from_sqlite).unwrap(), dedup.deduplicate(&from_memory).unwrap());
    }
}
