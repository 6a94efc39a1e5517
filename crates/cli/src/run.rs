//! `mdm run`: stage every source, deduplicate, write the master file.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use log::{info, warn};
use serde::Serialize;

use masterdata_config::{PipelineConfig, StoreKind};
use masterdata_engine::{
    Deduplicator, EngineError, GroupOrder, Ingestor, MasterSet, MasterStats, MemoryStore,
    RelationStore, SourceOutcome,
};
use masterdata_io::{discover_sources, master, CsvOptions, CsvSource, SqliteStore};

use crate::exit_codes::{engine_exit_code, EXIT_ERROR, EXIT_NO_SOURCES, EXIT_OUTPUT, EXIT_STORE};
use crate::CliError;

#[derive(Args)]
pub struct RunArgs {
    /// Pipeline config file (TOML); flags below override it
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Directory holding the source files
    #[arg(long, short = 's')]
    source_dir: Option<PathBuf>,

    /// Master CSV output path
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Staging database path (sqlite store only)
    #[arg(long)]
    staging: Option<PathBuf>,

    /// Where to stage the wide relation
    #[arg(long, value_enum)]
    store: Option<StoreArg>,

    /// Rows per row-group
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Primary identifier column
    #[arg(long)]
    primary: Option<String>,

    /// Secondary identifier column
    #[arg(long)]
    secondary: Option<String>,

    /// Output row order
    #[arg(long, value_enum)]
    order: Option<OrderArg>,

    /// Also treat NA, NULL, #N/A, nan and similar markers as null
    #[arg(long)]
    standard_nulls: bool,

    /// Print a JSON run report to stdout
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreArg {
    Sqlite,
    Memory,
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    FirstSeen,
    Key,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub meta: RunMeta,
    pub sources: Vec<SourceOutcome>,
    pub relation: RelationShape,
    pub master: MasterStats,
    pub output: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct RunMeta {
    pub engine_version: String,
    pub commit: String,
    pub run_at: String,
    pub primary: String,
    pub secondary: String,
}

#[derive(Debug, Serialize)]
pub struct RelationShape {
    pub columns: Vec<String>,
    pub rows: usize,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = PipelineConfig::load(&config_path).map_err(|e| CliError::args(e.to_string()))?;
    eprintln!(
        "valid: sources '{}' (*.{}) -> '{}', identity ({}, {})",
        config.source_dir.display(),
        config.extension,
        config.output.display(),
        config.identity.primary,
        config.identity.secondary,
    );
    Ok(())
}

pub fn cmd_run(args: RunArgs) -> Result<(), CliError> {
    let config = resolve_config(&args)?;
    let run_at = chrono::Utc::now().to_rfc3339();

    let paths = discover_sources(&config.source_dir, &config.extension)
        .map_err(|e| CliError::new(EXIT_NO_SOURCES, format!("cannot list sources: {e}")))?;
    if paths.is_empty() {
        return Err(CliError::new(
            EXIT_NO_SOURCES,
            format!("no *.{} files in {}", config.extension, config.source_dir.display()),
        ));
    }
    info!("{} sources in {}", paths.len(), config.source_dir.display());

    let mut options = CsvOptions {
        chunk_size: config.chunk_size,
        delimiter: config.delimiter_byte().map_err(|e| CliError::args(e.to_string()))?,
        null_values: config.null_values.clone(),
    };
    if config.standard_nulls {
        options = options.with_standard_nulls();
    }
    let key = config.identity.normalized();
    let dedup = Deduplicator::new(key.clone()).with_order(config.order);

    let staged = match config.store {
        StoreKind::Sqlite => {
            let staging = config.staging_path();
            let store = SqliteStore::create_fresh(&staging, &config.table).map_err(|e| {
                CliError::new(EXIT_STORE, format!("cannot create staging database: {e}"))
            })?;
            let (store, staged) = stage(store, &paths, &options, &config.table, &dedup);
            if let Err(e) = store.close(!config.keep_staging) {
                warn!("closing staging database {}: {e}", staging.display());
            }
            staged
        }
        StoreKind::Memory => stage(MemoryStore::new(), &paths, &options, &config.table, &dedup).1,
    };

    let (columns, rows, set) = staged.merged.map_err(|e| fatal(e, &key.primary))?;

    master::export(&set, &config.output).map_err(|e| {
        CliError::new(EXIT_OUTPUT, format!("cannot write {}: {e}", config.output.display()))
    })?;

    let failed = staged.sources.iter().filter(|s| s.is_failed()).count();
    eprintln!(
        "done     {} ({} master records from {} rows, {} of {} sources failed)",
        config.output.display(),
        set.len(),
        rows,
        failed,
        staged.sources.len(),
    );

    if args.json {
        let report = RunReport {
            meta: RunMeta {
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
                commit: env!("MDM_COMMIT").to_string(),
                run_at,
                primary: key.primary,
                secondary: key.secondary,
            },
            sources: staged.sources,
            relation: RelationShape { columns, rows },
            master: set.stats,
            output: config.output.clone(),
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::new(EXIT_ERROR, format!("JSON serialization error: {e}")))?;
        println!("{json}");
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Per-source outcomes and the deduplicated relation.
struct Staged {
    sources: Vec<SourceOutcome>,
    merged: Result<(Vec<String>, usize, MasterSet), EngineError>,
}

/// Ingest every source into `store`, then read it back and deduplicate.
/// The store is handed back so the caller can release it.
fn stage<S: RelationStore>(
    store: S,
    paths: &[PathBuf],
    options: &CsvOptions,
    table: &str,
    dedup: &Deduplicator,
) -> (S, Staged) {
    let mut ingestor = Ingestor::new(store);
    let mut sources = Vec::with_capacity(paths.len());

    for path in paths {
        let mut source = CsvSource::new(path, options.clone());
        let outcome = ingestor.ingest_source(&mut source);
        print_status(&outcome, table);
        sources.push(outcome);
    }

    let store = ingestor.into_store();
    let merged = store.load().and_then(|relation| {
        let set = dedup.deduplicate(&relation)?;
        Ok((relation.columns().to_vec(), relation.len(), set))
    });

    (store, Staged { sources, merged })
}

fn print_status(outcome: &SourceOutcome, table: &str) {
    if outcome.created_relation {
        eprintln!("created  {table} with {}", outcome.source);
    }
    match &outcome.error {
        Some(err) => eprintln!("error    {}: {err}", outcome.source),
        None => {
            let mut line = format!("imported {} ({} rows", outcome.source, outcome.rows_appended);
            if !outcome.columns_added.is_empty() {
                line.push_str(&format!(", new columns: {}", outcome.columns_added.join(", ")));
            }
            if outcome.rows_dropped > 0 {
                line.push_str(&format!(", {} malformed rows skipped", outcome.rows_dropped));
            }
            line.push(')');
            eprintln!("{line}");
        }
    }
}

fn fatal(err: EngineError, primary: &str) -> CliError {
    let code = engine_exit_code(&err);
    let error = CliError::new(code, format!("run aborted, no output written: {err}"));
    match err {
        EngineError::MissingIdentityColumn { .. } => error.with_hint(format!(
            "no source has a '{primary}' column; set identity.primary or --primary"
        )),
        EngineError::EmptyRelation => error.with_hint("every source failed or none had a header row"),
        _ => error,
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn resolve_config(args: &RunArgs) -> Result<PipelineConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path).map_err(|e| CliError::args(e.to_string()))?,
        None => PipelineConfig::default(),
    };

    if let Some(dir) = &args.source_dir {
        config.source_dir = dir.clone();
    }
    if let Some(output) = &args.output {
        config.output = output.clone();
    }
    if let Some(staging) = &args.staging {
        config.staging = Some(staging.clone());
    }
    if let Some(store) = args.store {
        config.store = match store {
            StoreArg::Sqlite => StoreKind::Sqlite,
            StoreArg::Memory => StoreKind::Memory,
        };
    }
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(primary) = &args.primary {
        config.identity.primary = primary.clone();
    }
    if let Some(secondary) = &args.secondary {
        config.identity.secondary = secondary.clone();
    }
    if args.standard_nulls {
        config.standard_nulls = true;
    }
    if let Some(order) = args.order {
        config.order = match order {
            OrderArg::FirstSeen => GroupOrder::FirstSeen,
            OrderArg::Key => GroupOrder::Key,
        };
    }

    config.validate().map_err(|e| CliError::args(e.to_string()))?;
    if config.output.is_dir() {
        return Err(CliError::args(format!("output {} is a directory", config.output.display())));
    }
    Ok(config)
}
