//! Engine for the sparkify ETL.
//!
//! Provides an in-memory relational [`Table`] over Arrow, a [`Session`] that
//! reads newline-delimited JSON and Hive-partitioned Parquet from S3 or the
//! local filesystem and writes Parquet back, plus the configuration, error,
//! logging and metrics plumbing shared with the binary.

pub mod config;
pub mod error;
pub mod io;
pub mod metrics;
pub mod partition;
pub mod session;
pub mod storage;
pub mod table;
pub mod tracing;

pub use config::ParquetCompression;
pub use error::{ConfigError, ReadError, StorageError, TableError, WriteError};
pub use io::ParquetWriterConfig;
pub use session::{ParquetReadOptions, SaveMode, Session, SessionConfig, WriteSummary};
pub use storage::StorageProvider;
pub use table::Table;
