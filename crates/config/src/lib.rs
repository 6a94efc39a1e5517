// Configuration loading

pub mod pipeline;

pub use pipeline::{ConfigError, PipelineConfig, StoreKind};
