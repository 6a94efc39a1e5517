use crate::error::EngineError;
use crate::model::RowGroup;
use crate::relation::WideRelation;

/// Backing storage for the wide relation.
///
/// The ingestor drives a store through create / widen / append and hands the
/// final state to the deduplicator through [`load`](RelationStore::load).
/// Implementations must preserve append order.
pub trait RelationStore {
    /// Whether the relation has been created.
    fn exists(&self) -> bool;

    /// Current column set, in creation order. Empty if the relation does not exist.
    fn columns(&self) -> Result<Vec<String>, EngineError>;

    /// Create the relation with exactly `columns`.
    fn create(&mut self, columns: &[String]) -> Result<(), EngineError>;

    /// Add one nullable text column; existing rows read null.
    fn add_column(&mut self, name: &str) -> Result<(), EngineError>;

    /// Append all rows of `group`. Every column of the group must exist.
    fn append(&mut self, group: &RowGroup) -> Result<usize, EngineError>;

    /// Read the whole relation back in insertion order.
    fn load(&self) -> Result<WideRelation, EngineError>;
}

/// In-memory store holding the relation directly.
#[derive(Debug, Default)]
pub struct MemoryStore {
    relation: Option<WideRelation>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn relation(&self) -> Option<&WideRelation> {
        self.relation.as_ref()
    }

    /// Take the relation without copying it.
    pub fn into_relation(self) -> Result<WideRelation, EngineError> {
        self.relation.ok_or(EngineError::EmptyRelation)
    }
}

impl RelationStore for MemoryStore {
    fn exists(&self) -> bool {
        self.relation.is_some()
    }

    fn columns(&self) -> Result<Vec<String>, EngineError> {
        Ok(self
            .relation
            .as_ref()
            .map(|r| r.columns().to_vec())
            .unwrap_or_default())
    }

    fn create(&mut self, columns: &[String]) -> Result<(), EngineError> {
        if self.relation.is_some() {
            return Err(EngineError::Store("relation already exists".into()));
        }
        self.relation = Some(WideRelation::with_columns(columns.iter().cloned()));
        Ok(())
    }

    fn add_column(&mut self, name: &str) -> Result<(), EngineError> {
        let relation = self.relation.as_mut().ok_or_else(|| EngineError::Widen {
            column: name.to_string(),
            reason: "relation does not exist".into(),
        })?;
        relation.add_column(name);
        Ok(())
    }

    fn append(&mut self, group: &RowGroup) -> Result<usize, EngineError> {
        let relation = self
            .relation
            .as_mut()
            .ok_or_else(|| EngineError::Store("append before create".into()))?;
        Ok(relation.append_group(group))
    }

    fn load(&self) -> Result<WideRelation, EngineError> {
        self.relation.clone().ok_or(EngineError::EmptyRelation)
    }
}
