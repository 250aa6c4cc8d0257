//! Entry point for reading and writing tables.
//!
//! A [`Session`] holds the storage options and codec settings for one run.
//! Every operation resolves its own [`StorageProvider`] from the URL it is
//! given, so inputs and outputs may live on different backends.

use std::collections::HashMap;

use arrow::datatypes::{FieldRef, Schema, SchemaRef};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use object_store::path::Path;
use snafu::prelude::*;
use tracing::{debug, info};

use crate::emit;
use crate::error::{
    AssembleSnafu, InvalidPatternSnafu, NoMatchingFilesSnafu, ParquetDecodeSnafu,
    ParquetEncodeSnafu, PartitionSnafu, PathExistsSnafu, ReadError, ReadStorageSnafu,
    StorageError, WriteError, WriteStorageSnafu,
};
use crate::io::json::{JsonDecoder, JsonLines, infer_schema};
use crate::io::parquet::{
    ParquetWriterConfig, PartitionAttacher, decode_file, encode_files, split_partitions,
};
use crate::metrics::events::{FilesRead, MalformedRecords, RecordsRead};
use crate::partition::unescape_value;
use crate::storage::{PathPattern, StorageProvider};
use crate::table::Table;

/// Marker object written after every data file of a table.
pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// Number of objects fetched concurrently while reading.
const READ_CONCURRENCY: usize = 16;

/// Number of Parquet files uploaded concurrently while writing.
const WRITE_CONCURRENCY: usize = 16;

/// Settings shared by every read and write of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Options for remote backends, including credentials.
    pub storage_options: HashMap<String, String>,
    /// Maximum rows per decoded batch.
    pub batch_size: usize,
    pub writer: ParquetWriterConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_options: HashMap::new(),
            batch_size: 8192,
            writer: ParquetWriterConfig::default(),
        }
    }
}

/// What to do when the destination of a write already holds data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    /// Delete everything under the destination first.
    #[default]
    Overwrite,
    /// Fail with [`WriteError::PathExists`].
    ErrorIfExists,
}

/// Options for reading a partitioned Parquet table.
#[derive(Debug, Clone, Default)]
pub struct ParquetReadOptions {
    /// Partition columns to recover from `key=value` directories.
    pub partition_columns: Vec<FieldRef>,
    /// Schema of the result when the location holds no data files.
    pub schema: Option<SchemaRef>,
}

/// Outcome of one table write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteSummary {
    pub rows: usize,
    /// Data files written, excluding the success marker.
    pub files: usize,
    pub bytes: u64,
    /// Distinct partition directories; zero for an unpartitioned table.
    pub partitions: usize,
}

/// Reads and writes tables on object storage.
#[derive(Debug, Clone)]
pub struct Session {
    config: SessionConfig,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Open `url` for reading. `None` when a local root does not exist.
    async fn input_storage(&self, url: &str) -> Result<Option<StorageProvider>, StorageError> {
        match StorageProvider::for_url_with_options(url, &self.config.storage_options).await {
            Ok(storage) => Ok(Some(storage)),
            Err(StorageError::LocalRootNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn output_storage(&self, url: &str) -> Result<StorageProvider, StorageError> {
        StorageProvider::for_output_url_with_options(url, &self.config.storage_options).await
    }

    /// Fetch every listed path concurrently, keeping the listing order.
    async fn fetch_all(
        storage: &StorageProvider,
        paths: Vec<Path>,
    ) -> Result<Vec<(Path, Bytes)>, StorageError> {
        stream::iter(paths)
            .map(|path| async move {
                let bytes = storage.get(&path).await?;
                Ok::<_, StorageError>((path, bytes))
            })
            .buffered(READ_CONCURRENCY)
            .try_collect()
            .await
    }

    /// Read newline-delimited JSON files matching `pattern`.
    ///
    /// With `schema` every record is coerced to it; without one the schema
    /// is inferred from all matched records.
    pub async fn read_json(
        &self,
        pattern: &str,
        schema: Option<SchemaRef>,
    ) -> Result<Table, ReadError> {
        let path_pattern = PathPattern::parse(pattern).context(InvalidPatternSnafu { pattern })?;
        let Some(storage) = self
            .input_storage(path_pattern.root())
            .await
            .context(ReadStorageSnafu {
                url: path_pattern.root(),
            })?
        else {
            return NoMatchingFilesSnafu { pattern }.fail();
        };

        let matched: Vec<Path> = storage
            .list_files()
            .await
            .context(ReadStorageSnafu {
                url: storage.canonical_url(),
            })?
            .into_iter()
            .filter(|path| path_pattern.matches(path.as_ref()))
            .collect();
        ensure!(!matched.is_empty(), NoMatchingFilesSnafu { pattern });

        let fetched = Self::fetch_all(&storage, matched)
            .await
            .context(ReadStorageSnafu {
                url: storage.canonical_url(),
            })?;

        let files: Vec<(String, JsonLines)> = fetched
            .into_iter()
            .map(|(path, bytes)| {
                let path = path.to_string();
                let lines = JsonLines::parse(&bytes, &path);
                (path, lines)
            })
            .collect();

        let schema = match schema {
            Some(schema) => schema,
            None => {
                let lines: Vec<&JsonLines> = files.iter().map(|(_, lines)| lines).collect();
                infer_schema(&lines, pattern)?
            }
        };

        let decoder = JsonDecoder::new(schema.clone(), self.config.batch_size);
        let mut batches = Vec::new();
        let mut malformed = 0;
        for (path, lines) in &files {
            debug!(path, records = lines.len(), "Decoding JSON file");
            malformed += lines.malformed();
            batches.extend(decoder.decode(lines, path)?);
        }

        let table = Table::try_new(schema, batches).context(AssembleSnafu { path: pattern })?;

        emit!(FilesRead {
            count: files.len() as u64,
            source: pattern.to_string(),
        });
        emit!(RecordsRead {
            count: table.num_rows() as u64,
            source: pattern.to_string(),
        });
        if malformed > 0 {
            emit!(MalformedRecords {
                count: malformed as u64,
                source: pattern.to_string(),
            });
        }

        info!(
            source = pattern,
            files = files.len(),
            rows = table.num_rows(),
            malformed,
            "Read JSON"
        );
        Ok(table)
    }

    /// Read every Parquet file below `url`, recovering partition columns.
    pub async fn read_parquet(
        &self,
        url: &str,
        options: &ParquetReadOptions,
    ) -> Result<Table, ReadError> {
        let storage = self
            .input_storage(url)
            .await
            .context(ReadStorageSnafu { url })?;

        let data_files: Vec<Path> = match &storage {
            Some(storage) => storage
                .list_files()
                .await
                .context(ReadStorageSnafu { url })?
                .into_iter()
                .filter(|path| is_data_file(path))
                .collect(),
            None => Vec::new(),
        };

        let (Some(storage), false) = (storage, data_files.is_empty()) else {
            return match &options.schema {
                Some(schema) => {
                    debug!(url, "No Parquet files found, using declared schema");
                    Ok(Table::empty(schema.clone()))
                }
                None => NoMatchingFilesSnafu { pattern: url }.fail(),
            };
        };

        let fetched = Self::fetch_all(&storage, data_files)
            .await
            .context(ReadStorageSnafu { url })?;

        let attacher = PartitionAttacher::new(options.partition_columns.clone());
        let mut table_schema = None;
        let mut batches = Vec::new();
        let file_count = fetched.len();

        for (path, bytes) in fetched {
            let path = stored_path(&path);
            let (file_schema, decoded) = decode_file(bytes, self.config.batch_size)
                .context(ParquetDecodeSnafu { path: &path })?;
            let schema = table_schema
                .get_or_insert_with(|| attacher.table_schema(&file_schema))
                .clone();
            let attached = attacher
                .attach(&path, decoded, &schema)
                .context(AssembleSnafu { path: &path })?;
            batches.extend(attached);
        }

        let schema = table_schema.unwrap_or_else(|| attacher.table_schema(&Schema::empty()));
        let table = Table::try_new(schema, batches).context(AssembleSnafu { path: url })?;

        emit!(FilesRead {
            count: file_count as u64,
            source: url.to_string(),
        });
        emit!(RecordsRead {
            count: table.num_rows() as u64,
            source: url.to_string(),
        });

        info!(source = url, files = file_count, rows = table.num_rows(), "Read Parquet");
        Ok(table)
    }

    /// Write `table` under `url` as Hive-partitioned Parquet.
    pub async fn write_parquet(
        &self,
        table: &Table,
        url: &str,
        partition_by: &[&str],
        mode: SaveMode,
    ) -> Result<WriteSummary, WriteError> {
        let storage = self
            .output_storage(url)
            .await
            .context(WriteStorageSnafu { url })?;

        match mode {
            SaveMode::Overwrite => {
                let removed = storage.delete_all().await.context(WriteStorageSnafu { url })?;
                if removed > 0 {
                    debug!(url, removed, "Cleared destination before overwrite");
                }
            }
            SaveMode::ErrorIfExists => {
                let existing = storage.list_files().await.context(WriteStorageSnafu { url })?;
                ensure!(existing.is_empty(), PathExistsSnafu { url });
            }
        }

        let groups = split_partitions(table, partition_by).context(PartitionSnafu { url })?;
        let writer = &self.config.writer;

        let mut summary = WriteSummary {
            partitions: if partition_by.is_empty() { 0 } else { groups.len() },
            ..Default::default()
        };

        let mut uploads = Vec::new();
        for group in &groups {
            let files = encode_files(&group.batch, writer).context(ParquetEncodeSnafu { url })?;
            for (rows, bytes) in files {
                let name = writer.file_name(summary.files);
                let path = if group.dir.is_empty() {
                    Path::from(name)
                } else {
                    Path::from(format!("{}/{name}", group.dir))
                };

                summary.rows += rows;
                summary.bytes += bytes.len() as u64;
                summary.files += 1;
                uploads.push((path, rows, bytes));
            }
        }

        let storage = &storage;
        stream::iter(uploads)
            .map(|(path, rows, bytes)| async move {
                debug!(url, path = %path, rows, bytes = bytes.len(), "Writing Parquet file");
                storage.put_parquet(&path, bytes).await
            })
            .buffer_unordered(WRITE_CONCURRENCY)
            .try_collect::<Vec<()>>()
            .await
            .context(WriteStorageSnafu { url })?;

        storage
            .put(&Path::from(SUCCESS_MARKER), Bytes::new())
            .await
            .context(WriteStorageSnafu { url })?;

        Ok(summary)
    }
}

/// The path as it was written, undoing the object store's own segment encoding.
///
/// Object keys percent-encode `%`, so an escaped partition value such as
/// `AC%2FDC` is listed as `AC%252FDC`.
fn stored_path(path: &Path) -> String {
    path.parts()
        .map(|part| unescape_value(part.as_ref()))
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether a listed object is a data file rather than a marker or hidden file.
fn is_data_file(path: &Path) -> bool {
    let Some(name) = path.filename() else {
        return false;
    };
    name.ends_with(".parquet") && !name.starts_with('_') && !name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::test_support::*;
    use arrow::array::{Array, AsArray};
    use arrow::datatypes::{DataType, Field, Int32Type};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write_file(root: &std::path::Path, relative: &str, content: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn url(root: &std::path::Path, relative: &str) -> String {
        format!("{}/{relative}", root.display())
    }

    #[tokio::test]
    async fn test_read_json_matches_fixed_depth_only() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "in/a/b/1.json", "{\"x\": 1}\n{\"x\": 2}\n");
        write_file(dir.path(), "in/a/b/2.json", "{\"x\": 3}\n");
        write_file(dir.path(), "in/a/3.json", "{\"x\": 4}\n");
        write_file(dir.path(), "in/a/b/notes.txt", "{\"x\": 5}\n");

        let session = Session::new(SessionConfig::default());
        let table = session
            .read_json(&url(dir.path(), "in/*/*/*.json"), None)
            .await
            .unwrap();

        assert_eq!(table.num_rows(), 3);
        assert_eq!(table.schema().field(0).data_type(), &DataType::Int64);
    }

    #[tokio::test]
    async fn test_read_json_no_match_fails() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "in/a/1.json", "{}\n");

        let session = Session::new(SessionConfig::default());
        let err = session
            .read_json(&url(dir.path(), "in/*/*/*.json"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReadError::NoMatchingFiles { .. }));
    }

    #[tokio::test]
    async fn test_read_json_with_schema_coerces() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "in/1.json", "{\"year\": \"n/a\"}\n{\"year\": 1999}\n");
        let schema = Arc::new(Schema::new(vec![Field::new("year", DataType::Int32, true)]));

        let session = Session::new(SessionConfig::default());
        let table = session
            .read_json(&url(dir.path(), "in/*.json"), Some(schema.clone()))
            .await
            .unwrap();

        assert_eq!(table.schema(), &schema);
        let years = table.column("year").unwrap();
        let years = years.as_primitive::<Int32Type>();
        assert!(years.is_null(0));
        assert_eq!(years.value(1), 1999);
    }

    #[tokio::test]
    async fn test_write_then_read_partitioned() {
        let dir = TempDir::new().unwrap();
        let out = url(dir.path(), "out/songs");
        let songs = table(vec![
            ("song_id", strings(&[Some("S1"), Some("S2"), Some("S3")])),
            ("year", ints(&[Some(2000), Some(0), Some(2000)])),
            ("artist_id", strings(&[Some("AR1"), Some("AR1"), Some("AR2")])),
        ]);

        let session = Session::new(SessionConfig::default());
        let summary = session
            .write_parquet(&songs, &out, &["year", "artist_id"], SaveMode::Overwrite)
            .await
            .unwrap();

        assert_eq!(summary.rows, 3);
        assert_eq!(summary.files, 3);
        assert_eq!(summary.partitions, 3);
        assert!(dir.path().join("out/songs/_SUCCESS").exists());
        assert!(
            dir.path()
                .join("out/songs/year=2000/artist_id=AR1/part-00001.snappy.parquet")
                .exists()
        );

        let options = ParquetReadOptions {
            partition_columns: vec![
                Arc::new(Field::new("year", DataType::Int32, true)),
                Arc::new(Field::new("artist_id", DataType::Utf8, true)),
            ],
            schema: None,
        };
        let read = session.read_parquet(&out, &options).await.unwrap();

        assert_eq!(read.num_rows(), 3);
        assert_eq!(read.column_names(), vec!["song_id", "year", "artist_id"]);
        assert_eq!(
            string_values(&read, "song_id"),
            vec![
                Some("S2".to_string()),
                Some("S1".to_string()),
                Some("S3".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_overwrite_replaces_previous_output() {
        let dir = TempDir::new().unwrap();
        let out = url(dir.path(), "out/time");
        let session = Session::new(SessionConfig::default());

        let first = table(vec![("month", ints(&[Some(10), Some(11)]))]);
        session
            .write_parquet(&first, &out, &["month"], SaveMode::Overwrite)
            .await
            .unwrap();
        let second = table(vec![("month", ints(&[Some(12)]))]);
        session
            .write_parquet(&second, &out, &["month"], SaveMode::Overwrite)
            .await
            .unwrap();

        assert!(!dir.path().join("out/time/month=10").exists());
        assert!(dir.path().join("out/time/month=12").exists());
    }

    #[tokio::test]
    async fn test_error_if_exists() {
        let dir = TempDir::new().unwrap();
        let out = url(dir.path(), "out/users");
        let session = Session::new(SessionConfig::default());
        let users = table(vec![("user_id", strings(&[Some("1")]))]);

        session
            .write_parquet(&users, &out, &[], SaveMode::ErrorIfExists)
            .await
            .unwrap();
        let err = session
            .write_parquet(&users, &out, &[], SaveMode::ErrorIfExists)
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::PathExists { .. }));
    }

    #[tokio::test]
    async fn test_read_empty_location_uses_declared_schema() {
        let dir = TempDir::new().unwrap();
        let out = url(dir.path(), "out/songs");
        let schema = Arc::new(Schema::new(vec![Field::new("song_id", DataType::Utf8, true)]));
        let empty = Table::empty(schema.clone());

        let session = Session::new(SessionConfig::default());
        let summary = session
            .write_parquet(&empty, &out, &[], SaveMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(summary.rows, 0);
        assert_eq!(summary.files, 1);

        let options = ParquetReadOptions {
            partition_columns: vec![],
            schema: Some(schema.clone()),
        };
        let read = session.read_parquet(&out, &options).await.unwrap();
        assert!(read.is_empty());
        assert_eq!(read.column_names(), vec!["song_id"]);
    }

    #[tokio::test]
    async fn test_partition_values_with_separators_survive_round_trip() {
        let dir = TempDir::new().unwrap();
        let out = url(dir.path(), "out/artists");
        let artists = table(vec![
            ("name", strings(&[Some("AC/DC"), Some("Percent")])),
            ("artist_id", strings(&[Some("AC/DC"), Some("100%")])),
        ]);

        let session = Session::new(SessionConfig::default());
        session
            .write_parquet(&artists, &out, &["artist_id"], SaveMode::Overwrite)
            .await
            .unwrap();

        let options = ParquetReadOptions {
            partition_columns: vec![Arc::new(Field::new("artist_id", DataType::Utf8, true))],
            schema: None,
        };
        let read = session.read_parquet(&out, &options).await.unwrap();

        let mut ids = string_values(&read, "artist_id");
        ids.sort();
        assert_eq!(
            ids,
            vec![Some("100%".to_string()), Some("AC/DC".to_string())]
        );
    }

    #[test]
    fn test_stored_path_undoes_key_encoding() {
        let path = Path::from("artist_id=AC%2FDC/part-00000.parquet");
        assert_eq!(path.as_ref(), "artist_id=AC%252FDC/part-00000.parquet");
        assert_eq!(stored_path(&path), "artist_id=AC%2FDC/part-00000.parquet");
    }

    #[tokio::test]
    async fn test_reads_of_missing_local_root_leave_no_trace() {
        let dir = TempDir::new().unwrap();
        let session = Session::new(SessionConfig::default());

        let err = session
            .read_json(&url(dir.path(), "in/song_data/*/*.json"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReadError::NoMatchingFiles { .. }));

        let schema = Arc::new(Schema::new(vec![Field::new("song_id", DataType::Utf8, true)]));
        let options = ParquetReadOptions {
            partition_columns: vec![],
            schema: Some(schema),
        };
        let read = session
            .read_parquet(&url(dir.path(), "out/songs"), &options)
            .await
            .unwrap();
        assert!(read.is_empty());

        assert!(!dir.path().join("in").exists());
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_many_files_upload_with_stable_names() {
        let dir = TempDir::new().unwrap();
        let out = url(dir.path(), "out/users");
        let config = SessionConfig {
            writer: ParquetWriterConfig {
                max_rows_per_file: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let session = Session::new(config);
        let ids: Vec<Option<&str>> = (0..40).map(|_| Some("u")).collect();
        let users = table(vec![
            ("user_id", strings(&ids)),
            ("level", strings(&[Some("free"); 40])),
        ]);

        let summary = session
            .write_parquet(&users, &out, &["level"], SaveMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(summary.files, 40);
        assert_eq!(summary.rows, 40);

        let partition = dir.path().join("out/users/level=free");
        for i in 0..40 {
            assert!(partition.join(format!("part-{i:05}.snappy.parquet")).exists());
        }

        let read = session
            .read_parquet(&out, &ParquetReadOptions::default())
            .await
            .unwrap();
        assert_eq!(read.num_rows(), 40);
    }

    #[test]
    fn test_is_data_file() {
        assert!(is_data_file(&Path::from("year=1/part-00000.snappy.parquet")));
        assert!(!is_data_file(&Path::from("_SUCCESS")));
        assert!(!is_data_file(&Path::from(".part-00000.parquet.crc")));
    }
}
