//! Output table layout and the shared table writer.

use snafu::prelude::*;
use tracing::info;

use sparkify_core::emit;
use sparkify_core::metrics::events::{BytesWritten, FilesWritten, RowsWritten};
use sparkify_core::storage::join_url;
use sparkify_core::{SaveMode, Session, Table, WriteSummary};

use crate::error::{PipelineError, WriteSnafu};

/// Name and partition columns of one output table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    /// Directory under the output root.
    pub name: &'static str,
    pub partition_by: &'static [&'static str],
}

pub const SONGS: TableSpec = TableSpec {
    name: "songs",
    partition_by: &["year", "artist_id"],
};

pub const ARTISTS: TableSpec = TableSpec {
    name: "artists",
    partition_by: &[],
};

pub const USERS: TableSpec = TableSpec {
    name: "users",
    partition_by: &[],
};

pub const TIME: TableSpec = TableSpec {
    name: "time",
    partition_by: &["year", "month"],
};

pub const SONGPLAYS: TableSpec = TableSpec {
    name: "songplays",
    partition_by: &["year", "month"],
};

/// Writes tables under one output root, replacing earlier generations.
#[derive(Debug, Clone)]
pub struct OutputWriter<'a> {
    session: &'a Session,
    output_root: String,
}

impl<'a> OutputWriter<'a> {
    pub fn new(session: &'a Session, output_root: impl Into<String>) -> Self {
        Self {
            session,
            output_root: output_root.into(),
        }
    }

    /// Location of a table: `<output_root>/<name>`.
    pub fn url(&self, target: &TableSpec) -> String {
        join_url(&self.output_root, target.name)
    }

    /// Write `table` with overwrite semantics.
    pub async fn write(
        &self,
        target: &TableSpec,
        table: &Table,
    ) -> Result<WriteSummary, PipelineError> {
        let url = self.url(target);
        let summary = self
            .session
            .write_parquet(table, &url, target.partition_by, SaveMode::Overwrite)
            .await
            .context(WriteSnafu { table: target.name })?;

        emit!(RowsWritten {
            count: summary.rows as u64,
            table: target.name.to_string(),
        });
        emit!(FilesWritten {
            count: summary.files as u64,
            table: target.name.to_string(),
        });
        emit!(BytesWritten {
            bytes: summary.bytes,
            table: target.name.to_string(),
        });

        info!(
            table = target.name,
            url = %url,
            rows = summary.rows,
            files = summary.files,
            partitions = summary.partitions,
            "Wrote table"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparkify_core::SessionConfig;

    #[test]
    fn test_table_urls() {
        let session = Session::new(SessionConfig::default());
        let writer = OutputWriter::new(&session, "s3a://lake/output/");

        assert_eq!(writer.url(&SONGS), "s3a://lake/output/songs");
        assert_eq!(writer.url(&TIME), "s3a://lake/output/time");
    }

    #[test]
    fn test_partition_layout() {
        assert_eq!(SONGS.partition_by, &["year", "artist_id"]);
        assert!(ARTISTS.partition_by.is_empty());
        assert!(USERS.partition_by.is_empty());
        assert_eq!(TIME.partition_by, &["year", "month"]);
        assert_eq!(SONGPLAYS.partition_by, &["year", "month"]);
    }
}
