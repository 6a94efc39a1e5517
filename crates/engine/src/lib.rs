//! `masterdata-engine`: schema-reconciling ingestion and identity deduplication.
//!
//! Pure engine crate: receives row-groups from sources, folds them into one
//! wide relation, and collapses it into master records. No file or database IO;
//! storage is reached through the [`store::RelationStore`] trait.

pub mod dedup;
pub mod error;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod relation;
pub mod store;

pub use dedup::{Deduplicator, GroupOrder, IdentityKey};
pub use error::{EngineError, SourceError};
pub use ingest::{Ingestor, MemorySource, Source};
pub use model::{IngestReport, MasterRecord, MasterSet, MasterStats, RowGroup, SourceOutcome, SourceStatus, Value};
pub use normalize::normalize_field_name;
pub use relation::WideRelation;
pub use store::{MemoryStore, RelationStore};
