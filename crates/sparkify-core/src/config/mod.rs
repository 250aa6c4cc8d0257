//! Configuration types shared by the engine and the ETL binary.

mod vars;

pub use vars::{InterpolationResult, interpolate};

use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use serde::{Deserialize, Serialize};

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    Uncompressed,
    #[default]
    Snappy,
    Gzip,
    Zstd,
    Lz4,
}

impl ParquetCompression {
    /// The parquet codec for this setting.
    pub fn codec(self) -> Compression {
        match self {
            ParquetCompression::Uncompressed => Compression::UNCOMPRESSED,
            ParquetCompression::Snappy => Compression::SNAPPY,
            ParquetCompression::Gzip => Compression::GZIP(GzipLevel::default()),
            ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
            ParquetCompression::Lz4 => Compression::LZ4_RAW,
        }
    }

    /// Infix used in file names, e.g. `part-00000.snappy.parquet`.
    pub fn file_infix(self) -> Option<&'static str> {
        match self {
            ParquetCompression::Uncompressed => None,
            ParquetCompression::Snappy => Some("snappy"),
            ParquetCompression::Gzip => Some("gz"),
            ParquetCompression::Zstd => Some("zstd"),
            ParquetCompression::Lz4 => Some("lz4raw"),
        }
    }
}
