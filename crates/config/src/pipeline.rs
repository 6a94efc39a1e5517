// Pipeline settings
// Loaded from a TOML file; every field has a default so an empty file is valid.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use masterdata_engine::{GroupOrder, IdentityKey};

#[derive(Debug)]
pub enum ConfigError {
    /// File could not be read.
    Io(String),
    /// TOML parse / deserialization error.
    Parse(String),
    /// Semantically invalid setting.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "cannot read config: {msg}"),
            Self::Parse(msg) => write!(f, "config parse error: {msg}"),
            Self::Validation(msg) => write!(f, "config validation error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Where the wide relation is staged during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// SQLite database file, recreated every run.
    #[default]
    Sqlite,
    /// Kept in process memory only.
    Memory,
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Directory scanned for sources.
    pub source_dir: PathBuf,
    /// File extension of sources, without the dot.
    pub extension: String,
    /// Master CSV output path.
    pub output: PathBuf,
    /// Staging database path; defaults to `staging.db` next to the output.
    pub staging: Option<PathBuf>,
    /// Leave the staging database on disk after the run.
    pub keep_staging: bool,
    pub store: StoreKind,
    /// Rows per row-group.
    pub chunk_size: usize,
    /// Staging table name.
    pub table: String,
    /// Single character, `\t` for tab, or `auto` to sniff per file.
    pub delimiter: String,
    /// Field values read as null (exact match).
    pub null_values: Vec<String>,
    /// Also read the common exported missing-value markers (`NA`, `NULL`,
    /// `#N/A`, `nan`, ...) as null.
    pub standard_nulls: bool,
    /// Order of rows in the master file.
    pub order: GroupOrder,
    pub identity: IdentityKey,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            extension: "csv".into(),
            output: PathBuf::from("result").join("master_data.csv"),
            staging: None,
            keep_staging: true,
            store: StoreKind::Sqlite,
            chunk_size: 50_000,
            table: "products".into(),
            delimiter: ",".into(),
            null_values: vec![String::new()],
            standard_nulls: false,
            order: GroupOrder::FirstSeen,
            identity: IdentityKey::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig =
            toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml(&input)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Validation("chunk_size must be at least 1".into()));
        }
        if self.extension.trim().is_empty() {
            return Err(ConfigError::Validation("extension must not be empty".into()));
        }
        if self.table.trim().is_empty() {
            return Err(ConfigError::Validation("table must not be empty".into()));
        }
        self.delimiter_byte()?;

        let id = &self.identity;
        if id.primary.trim().is_empty() || id.secondary.trim().is_empty() {
            return Err(ConfigError::Validation(
                "identity.primary and identity.secondary must not be empty".into(),
            ));
        }
        if id.primary.trim().to_lowercase() == id.secondary.trim().to_lowercase() {
            return Err(ConfigError::Validation(format!(
                "identity.primary and identity.secondary are both '{}'",
                id.primary.trim()
            )));
        }

        Ok(())
    }

    /// Delimiter byte, or `None` when it should be sniffed per file.
    pub fn delimiter_byte(&self) -> Result<Option<u8>, ConfigError> {
        match self.delimiter.as_str() {
            "auto" => Ok(None),
            "\\t" | "\t" | "tab" => Ok(Some(b'\t')),
            d if d.len() == 1 && d.is_ascii() => Ok(Some(d.as_bytes()[0])),
            other => Err(ConfigError::Validation(format!(
                "delimiter must be a single ASCII character, \"\\t\" or \"auto\", got {other:?}"
            ))),
        }
    }

    /// Effective staging database path.
    pub fn staging_path(&self) -> PathBuf {
        match &self.staging {
            Some(path) => path.clone(),
            None => self
                .output
                .parent()
                .map(|p| p.join("staging.db"))
                .unwrap_or_else(|| PathBuf::from("staging.db")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
