// File I/O: CSV sources, SQLite staging, master output

pub mod csv;
pub mod master;
pub mod staging;

pub use crate::csv::{discover_sources, CsvOptions, CsvSource, STANDARD_NULL_VALUES};
pub use staging::SqliteStore;
