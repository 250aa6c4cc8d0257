//! Error types shared by the storage layer, the table engine and the
//! JSON/Parquet readers and writers.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// Local root directory is missing and the provider was opened for reading.
    #[snafu(display("Local path does not exist: {path}"))]
    LocalRootNotFound { path: String },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error: {source}"))]
    S3Config { source: object_store::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            StorageError::LocalRootNotFound { .. } => true,
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Input root is empty.
    #[snafu(display("input_data cannot be empty"))]
    EmptyInputPath,

    /// Output root is empty.
    #[snafu(display("output_data cannot be empty"))]
    EmptyOutputPath,

    /// Playback page sentinel is empty.
    #[snafu(display("events.playback_page cannot be empty"))]
    EmptyPlaybackPage,

    /// A size setting that must be positive was zero.
    #[snafu(display("{setting} must be greater than zero"))]
    ZeroSize { setting: String },

    /// UTC offset could not be parsed.
    #[snafu(display("Invalid UTC offset '{value}' (expected e.g. +00:00 or -05:30)"))]
    InvalidUtcOffset { value: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

// ============ Table Errors ============

/// Errors raised by relational operations on a [`crate::Table`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TableError {
    /// A referenced column does not exist.
    #[snafu(display("Column '{name}' not found (available: {})", available.join(", ")))]
    ColumnNotFound { name: String, available: Vec<String> },

    /// A join would produce two columns with the same name.
    #[snafu(display("Column '{name}' exists on both sides of the join"))]
    AmbiguousColumn { name: String },

    /// A derived column has the wrong length or type.
    #[snafu(display("Derived column '{name}' does not match its declared shape: {message}"))]
    DerivedColumn { name: String, message: String },

    /// Arrow compute kernel failed.
    #[snafu(display("Arrow error: {source}"))]
    Arrow {
        source: arrow::error::ArrowError,
    },
}

// ============ Read Errors ============

/// Errors that can occur while reading JSON or Parquet inputs.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReadError {
    /// Storage access failed.
    #[snafu(display("Failed to access {url}: {source}"))]
    ReadStorage { url: String, source: StorageError },

    /// The input pattern matched no files.
    #[snafu(display("Path does not exist: no files match {pattern}"))]
    NoMatchingFiles { pattern: String },

    /// The input pattern could not be compiled.
    #[snafu(display("Invalid path pattern {pattern}: {source}"))]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    /// Failed to infer a schema from JSON records.
    #[snafu(display("Failed to infer JSON schema from {pattern}: {source}"))]
    SchemaInference {
        pattern: String,
        source: arrow::error::ArrowError,
    },

    /// Failed to decode JSON into Arrow.
    #[snafu(display("Failed to decode JSON in {path}: {message}"))]
    JsonDecode { path: String, message: String },

    /// Failed to decode a Parquet file.
    #[snafu(display("Failed to read Parquet file {path}: {source}"))]
    ParquetDecode {
        path: String,
        source: parquet::errors::ParquetError,
    },

    /// Failed to build a table from decoded batches.
    #[snafu(display("Failed to assemble table from {path}: {source}"))]
    Assemble { path: String, source: TableError },
}

// ============ Write Errors ============

/// Errors that can occur while writing a partitioned Parquet table.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriteError {
    /// Storage access failed.
    #[snafu(display("Failed to write {url}: {source}"))]
    WriteStorage { url: String, source: StorageError },

    /// The destination already holds data and the save mode forbids replacing it.
    #[snafu(display("Path {url} already exists"))]
    PathExists { url: String },

    /// Parquet encoding failed.
    #[snafu(display("Failed to encode Parquet for {url}: {source}"))]
    ParquetEncode {
        url: String,
        source: parquet::errors::ParquetError,
    },

    /// Partitioning the table failed.
    #[snafu(display("Failed to partition table for {url}: {source}"))]
    Partition { url: String, source: TableError },
}
