use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The primary identifier never appeared in any ingested source.
    MissingIdentityColumn { column: String },
    /// Nothing was ever ingested, so there is no relation to read back.
    EmptyRelation,
    /// The store rejected a column addition.
    Widen { column: String, reason: String },
    /// Any other store failure (create, append, read back).
    Store(String),
    /// A source could not be read.
    Source(SourceError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingIdentityColumn { column } => {
                write!(f, "identity column '{column}' is not present in any ingested source")
            }
            Self::EmptyRelation => write!(f, "no data was ingested; the staging relation does not exist"),
            Self::Widen { column, reason } => {
                write!(f, "cannot add column '{column}': {reason}")
            }
            Self::Store(msg) => write!(f, "store error: {msg}"),
            Self::Source(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<SourceError> for EngineError {
    fn from(err: SourceError) -> Self {
        Self::Source(err)
    }
}

/// Source-level failure. Aborts the current source only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The source could not be opened or read (missing file, permission, IO).
    Unreadable(String),
    /// The source was read but has no usable tabular structure.
    Corrupt(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable(msg) => write!(f, "unreadable source: {msg}"),
            Self::Corrupt(msg) => write!(f, "corrupt source: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}
