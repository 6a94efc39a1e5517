//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Scripts rely on these values; do not renumber.
//!
//! # Exit Code Ranges
//!
//! | Code | Description                                               |
//! |------|-----------------------------------------------------------|
//! | 0    | Success (individual sources may still have failed)        |
//! | 1    | General error (unspecified)                               |
//! | 2    | CLI usage error (bad args, invalid config)                |
//! | 3    | No source files found                                     |
//! | 4    | Primary identity column absent from every ingested source |
//! | 5    | Staging store could not be opened or read back            |
//! | 6    | Master file could not be written                          |

/// Success - master file written.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unreadable or invalid config.
pub const EXIT_USAGE: u8 = 2;

/// The source directory holds no matching files (or cannot be listed).
pub const EXIT_NO_SOURCES: u8 = 3;

/// The primary identifier never appeared; no output is produced.
pub const EXIT_IDENTITY: u8 = 4;

/// Staging store failure: cannot be created, or nothing could be read back.
pub const EXIT_STORE: u8 = 5;

/// Master file write failed.
pub const EXIT_OUTPUT: u8 = 6;

use masterdata_engine::EngineError;

/// Map a run-aborting engine error to its exit code.
pub fn engine_exit_code(err: &EngineError) -> u8 {
    match err {
        EngineError::MissingIdentityColumn { .. } => EXIT_IDENTITY,
        EngineError::EmptyRelation | EngineError::Store(_) | EngineError::Widen { .. } => EXIT_STORE,
        EngineError::Source(_) => EXIT_ERROR,
    }
}
