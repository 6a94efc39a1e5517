use std::collections::HashSet;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::model::{MasterRecord, MasterSet, MasterStats};
use crate::normalize::normalize_field_name;
use crate::relation::WideRelation;

pub const DEFAULT_PRIMARY: &str = "ean";
pub const DEFAULT_SECONDARY: &str = "product_id";
pub const DEFAULT_SENTINEL: &str = "N/A";

/// Composite natural key used to detect duplicate entities.
///
/// Deserializes from the `[identity]` table of a pipeline config; absent
/// fields take the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityKey {
    pub primary: String,
    pub secondary: String,
    /// Stands in for an absent or null secondary identifier.
    pub sentinel: String,
}

impl Default for IdentityKey {
    fn default() -> Self {
        Self {
            primary: DEFAULT_PRIMARY.into(),
            secondary: DEFAULT_SECONDARY.into(),
            sentinel: DEFAULT_SENTINEL.into(),
        }
    }
}

impl IdentityKey {
    /// Same key with both column names passed through [`normalize_field_name`],
    /// so it matches the reconciled relation.
    pub fn normalized(&self) -> IdentityKey {
        IdentityKey {
            primary: normalize_field_name(&self.primary),
            secondary: normalize_field_name(&self.secondary),
            sentinel: self.sentinel.clone(),
        }
    }
}

/// Order of master records in the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupOrder {
    /// Order in which each identity group was first encountered.
    #[default]
    FirstSeen,
    /// Ascending (primary, secondary) text order.
    Key,
}

/// Collapses the wide relation to one row per identity key.
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    key: IdentityKey,
    order: GroupOrder,
}

impl Deduplicator {
    pub fn new(key: IdentityKey) -> Self {
        Self { key, order: GroupOrder::default() }
    }

    pub fn with_order(mut self, order: GroupOrder) -> Self {
        self.order = order;
        self
    }

    /// Keep the earliest-inserted row of every (primary, secondary) group.
    ///
    /// The relation is only read. Output columns are the relation's columns,
    /// plus the secondary identifier appended last when the relation never
    /// had it. Rows with a null primary identifier are left out.
    pub fn deduplicate(&self, relation: &WideRelation) -> Result<MasterSet, EngineError> {
        let primary_idx = relation.column_index(&self.key.primary).ok_or_else(|| {
            EngineError::MissingIdentityColumn { column: self.key.primary.clone() }
        })?;
        let secondary_idx = relation.column_index(&self.key.secondary);

        let mut columns = relation.columns().to_vec();
        let secondary_out = match secondary_idx {
            Some(idx) => idx,
            None => {
                columns.push(self.key.secondary.clone());
                columns.len() - 1
            }
        };

        let mut stats = MasterStats {
            input_rows: relation.len(),
            secondary_synthesized: secondary_idx.is_none(),
            ..MasterStats::default()
        };
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        let mut records = Vec::new();

        for (insertion_index, row) in relation.rows().iter().enumerate() {
            let Some(primary) = row[primary_idx].as_deref() else {
                stats.rows_without_primary += 1;
                continue;
            };
            let secondary = secondary_idx
                .and_then(|idx| row[idx].as_deref())
                .unwrap_or(self.key.sentinel.as_str());

            if !seen.insert((primary, secondary)) {
                stats.duplicates_dropped += 1;
                continue;
            }

            let mut values = row.clone();
            match secondary_idx {
                Some(idx) if values[idx].is_none() => {
                    values[idx] = Some(self.key.sentinel.clone());
                    stats.secondary_filled += 1;
                }
                Some(_) => {}
                None => values.push(Some(self.key.sentinel.clone())),
            }
            records.push(MasterRecord { insertion_index, values });
        }

        if self.order == GroupOrder::Key {
            records.sort_by(|a, b| {
                let ka = (&a.values[primary_idx], &a.values[secondary_out]);
                let kb = (&b.values[primary_idx], &b.values[secondary_out]);
                ka.cmp(&kb)
            });
        }

        stats.groups = records.len();
        debug!(
            "deduplicated {} rows into {} groups ({} duplicates, {} without '{}')",
            stats.input_rows,
            stats.groups,
            stats.duplicates_dropped,
            stats.rows_without_primary,
            self.key.primary
        );

        Ok(MasterSet { columns, records, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;

    fn s(v: &str) -> Value {
        Some(v.to_string())
    }

    fn relation(columns: &[&str], rows: &[&[Option<&str>]]) -> WideRelation {
        let mut rel = WideRelation::with_columns(columns.iter().copied());
        for row in rows {
            rel.push_row(row.iter().map(|v| v.map(str::to_string)).collect());
        }
        rel
    }

    #[test]
    fn first_seen_row_wins_per_pair() {
        let rel = relation(
            &["ean", "product_id", "name"],
            &[
                &[Some("1"), Some("A"), Some("first")],
                &[Some("1"), Some("A"), Some("second")],
                &[Some("2"), Some("B"), Some("third")],
            ],
        );

        let set = Deduplicator::default().deduplicate(&rel).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.records[0].insertion_index, 0);
        assert_eq!(set.get(0, "name"), Some("first"));
        assert_eq!(set.get(1, "name"), Some("third"));
        assert_eq!(set.stats.duplicates_dropped, 1);
    }

    #[test]
    fn missing_secondary_column_is_synthesized() {
        let rel = relation(
            &["ean", "name"],
            &[&[Some("1"), Some("x")], &[Some("1"), Some("y")], &[Some("2"), None]],
        );

        let set = Deduplicator::default().deduplicate(&rel).unwrap();
        assert_eq!(set.columns, vec!["ean", "name", "product_id"]);
        assert!(set.stats.secondary_synthesized);
        assert_eq!(set.len(), 2);
        for i in 0..set.len() {
            assert_eq!(set.get(i, "product_id"), Some("N/A"));
        }
        // Input untouched.
        assert!(!rel.has_column("product_id"));
    }

    #[test]
    fn null_secondary_groups_with_sentinel() {
        let rel = relation(
            &["ean", "product_id"],
            &[
                &[Some("1"), None],
                &[Some("1"), Some("N/A")],
                &[Some("1"), Some("P")],
            ],
        );

        let set = Deduplicator::default().deduplicate(&rel).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.records[0].values, vec![s("1"), s("N/A")]);
        assert_eq!(set.records[0].insertion_index, 0);
        assert_eq!(set.stats.secondary_filled, 1);
        assert_eq!(rel.get(0, "product_id"), None);
    }

    #[test]
    fn missing_primary_is_fatal() {
        let rel = relation(&["sku", "product_id"], &[&[Some("1"), Some("A")]]);
        let err = Deduplicator::default().deduplicate(&rel).unwrap_err();
        assert_eq!(err, EngineError::MissingIdentityColumn { column: "ean".into() });
    }

    #[test]
    fn null_primary_rows_are_excluded() {
        let rel = relation(
            &["ean", "product_id"],
            &[&[None, Some("A")], &[Some("1"), Some("A")]],
        );
        let set = Deduplicator::default().deduplicate(&rel).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.stats.rows_without_primary, 1);
        assert_eq!(set.records[0].insertion_index, 1);
    }

    #[test]
    fn key_order_sorts_groups() {
        let rel = relation(
            &["ean", "product_id"],
            &[
                &[Some("2"), Some("B")],
                &[Some("1"), Some("Z")],
                &[Some("1"), Some("A")],
            ],
        );
        let set = Deduplicator::default()
            .with_order(GroupOrder::Key)
            .deduplicate(&rel)
            .unwrap();
        let keys: Vec<_> = (0..set.len())
            .map(|i| (set.get(i, "ean").unwrap(), set.get(i, "product_id").unwrap()))
            .collect();
        assert_eq!(keys, vec![("1", "A"), ("1", "Z"), ("2", "B")]);
    }

    #[test]
    fn idempotent_on_same_snapshot() {
        let rel = relation(
            &["ean", "product_id", "price"],
            &[
                &[Some("1"), None, Some("1.00")],
                &[Some("1"), None, Some("2.00")],
                &[Some("3"), Some("C"), None],
            ],
        );
        let dedup = Deduplicator::default();
        assert_eq!(dedup.deduplicate(&rel).unwrap(), dedup.deduplicate(&rel).unwrap());
    }

    #[test]
    fn normalized_key_matches_reconciled_columns() {
        let key = IdentityKey { primary: " GTIN".into(), secondary: "Variant ".into(), sentinel: "-".into() };
        let rel = relation(&["gtin", "variant"], &[&[Some("1"), None]]);

        let set = Deduplicator::new(key.normalized()).deduplicate(&rel).unwrap();
        assert_eq!(set.records[0].values, vec![s("1"), s("-")]);
        assert_eq!(key.normalized().sentinel, "-");
    }

    #[test]
    fn empty_relation_with_primary_yields_empty_set() {
        let rel = WideRelation::with_columns(["ean"]);
        let set = Deduplicator::default().deduplicate(&rel).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.columns, vec!["ean", "product_id"]);
    }
}
