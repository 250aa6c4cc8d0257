//! File format codecs used by [`crate::Session`].

pub mod json;
pub mod parquet;

pub use self::json::{JsonDecoder, JsonLines, infer_schema};
pub use self::parquet::{ParquetWriterConfig, PartitionAttacher, PartitionBatch};
