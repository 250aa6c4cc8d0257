//! Error types for the sparkify ETL.

use snafu::prelude::*;

pub use sparkify_core::error::{ConfigError, ReadError, StorageError, TableError, WriteError};

/// Errors that abort a pipeline run.
///
/// Every stage is fatal: nothing is retried and no partial result is
/// reported, so each variant records only where the run stopped.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Reading an input or a previously written table failed.
    #[snafu(display("Failed to read {table}: {source}"))]
    Read { table: String, source: ReadError },

    /// Writing an output table failed.
    #[snafu(display("Failed to write {table}: {source}"))]
    Write { table: String, source: WriteError },

    /// A relational step failed.
    #[snafu(display("Failed to derive {table}: {source}"))]
    Transform { table: String, source: TableError },
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}
