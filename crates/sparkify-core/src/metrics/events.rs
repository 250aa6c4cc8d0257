//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence while reading or
//! writing a table. Events implement [`InternalEvent`], which emits the
//! corresponding counter and a `trace` log line.

use metrics::counter;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Input files read for a source pattern.
pub struct FilesRead {
    pub count: u64,
    pub source: String,
}

impl InternalEvent for FilesRead {
    fn emit(self) {
        trace!(count = self.count, source = %self.source, "Files read");
        counter!("sparkify_files_read_total", "source" => self.source).increment(self.count);
    }
}

/// Records decoded from a source.
pub struct RecordsRead {
    pub count: u64,
    pub source: String,
}

impl InternalEvent for RecordsRead {
    fn emit(self) {
        trace!(count = self.count, source = %self.source, "Records read");
        counter!("sparkify_records_read_total", "source" => self.source).increment(self.count);
    }
}

/// Input lines that were not JSON objects and became all-null rows.
pub struct MalformedRecords {
    pub count: u64,
    pub source: String,
}

impl InternalEvent for MalformedRecords {
    fn emit(self) {
        trace!(count = self.count, source = %self.source, "Malformed records");
        counter!("sparkify_malformed_records_total", "source" => self.source)
            .increment(self.count);
    }
}

/// Rows written to an output table.
pub struct RowsWritten {
    pub count: u64,
    pub table: String,
}

impl InternalEvent for RowsWritten {
    fn emit(self) {
        trace!(count = self.count, table = %self.table, "Rows written");
        counter!("sparkify_rows_written_total", "table" => self.table).increment(self.count);
    }
}

/// Parquet files written to an output table.
pub struct FilesWritten {
    pub count: u64,
    pub table: String,
}

impl InternalEvent for FilesWritten {
    fn emit(self) {
        trace!(count = self.count, table = %self.table, "Files written");
        counter!("sparkify_files_written_total", "table" => self.table).increment(self.count);
    }
}

/// Encoded Parquet bytes written to an output table.
pub struct BytesWritten {
    pub bytes: u64,
    pub table: String,
}

impl InternalEvent for BytesWritten {
    fn emit(self) {
        trace!(bytes = self.bytes, table = %self.table, "Bytes written");
        counter!("sparkify_bytes_written_total", "table" => self.table).increment(self.bytes);
    }
}
