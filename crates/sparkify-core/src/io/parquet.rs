//! Parquet encoding and decoding for Hive-partitioned tables.
//!
//! Writing splits a table into one batch per distinct combination of
//! partition values; partition columns live in the directory names only.
//! Reading re-attaches them from the file path.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch, StringArray, UInt64Array};
use arrow::compute::{cast, take_record_batch};
use arrow::datatypes::{FieldRef, Schema, SchemaRef};
use arrow::util::display::{ArrayFormatter, FormatOptions};
use bytes::{BufMut, Bytes, BytesMut};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use snafu::prelude::*;

use crate::config::ParquetCompression;
use crate::error::{ArrowSnafu, TableError};
use crate::partition::{PartitionExtractor, partition_dir};
use crate::table::Table;

/// Settings for encoding Parquet files.
#[derive(Debug, Clone)]
pub struct ParquetWriterConfig {
    pub compression: ParquetCompression,
    /// Upper bound on rows in a single file.
    pub max_rows_per_file: usize,
}

impl Default for ParquetWriterConfig {
    fn default() -> Self {
        Self {
            compression: ParquetCompression::default(),
            max_rows_per_file: 1_000_000,
        }
    }
}

impl ParquetWriterConfig {
    fn writer_properties(&self) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(self.compression.codec())
            .build()
    }

    /// File name for the `index`-th file of a write.
    pub fn file_name(&self, index: usize) -> String {
        match self.compression.file_infix() {
            Some(infix) => format!("part-{index:05}.{infix}.parquet"),
            None => format!("part-{index:05}.parquet"),
        }
    }
}

/// Rows of one partition directory.
#[derive(Debug)]
pub struct PartitionBatch {
    /// Relative directory such as `year=2018/month=11`; empty when unpartitioned.
    pub dir: String,
    /// The rows, without partition columns.
    pub batch: RecordBatch,
}

/// Group a table's rows by the values of `partition_by`.
///
/// Groups come back sorted by their rendered partition values, nulls first.
pub fn split_partitions(
    table: &Table,
    partition_by: &[&str],
) -> Result<Vec<PartitionBatch>, TableError> {
    let keys = table.select(partition_by)?.collect()?;
    let data_columns: Vec<String> = table
        .column_names()
        .into_iter()
        .filter(|name| !partition_by.contains(&name.as_str()))
        .collect();
    let data_columns: Vec<&str> = data_columns.iter().map(String::as_str).collect();
    let data = table.select(&data_columns)?.collect()?;

    if partition_by.is_empty() {
        return Ok(vec![PartitionBatch {
            dir: String::new(),
            batch: data,
        }]);
    }

    let options = FormatOptions::default();
    let formatters = keys
        .columns()
        .iter()
        .map(|column| ArrayFormatter::try_new(column.as_ref(), &options))
        .collect::<Result<Vec<_>, _>>()
        .context(ArrowSnafu)?;

    let mut groups: BTreeMap<Vec<Option<String>>, Vec<u64>> = BTreeMap::new();
    for row in 0..keys.num_rows() {
        let key = keys
            .columns()
            .iter()
            .zip(&formatters)
            .map(|(column, formatter)| {
                (!column.is_null(row)).then(|| formatter.value(row).to_string())
            })
            .collect();
        groups.entry(key).or_default().push(row as u64);
    }

    groups
        .into_iter()
        .map(|(values, rows)| {
            let pairs: Vec<(&str, Option<&str>)> = partition_by
                .iter()
                .zip(&values)
                .map(|(key, value)| (*key, value.as_deref()))
                .collect();
            let batch = take_record_batch(&data, &UInt64Array::from(rows)).context(ArrowSnafu)?;
            Ok(PartitionBatch {
                dir: partition_dir(&pairs),
                batch,
            })
        })
        .collect()
}

/// Encode a batch as one or more Parquet files of at most `max_rows_per_file` rows.
///
/// An empty batch still produces one file so the schema is persisted.
pub fn encode_files(
    batch: &RecordBatch,
    config: &ParquetWriterConfig,
) -> Result<Vec<(usize, Bytes)>, ParquetError> {
    let max_rows = config.max_rows_per_file.max(1);
    let mut files = Vec::with_capacity(batch.num_rows().div_ceil(max_rows).max(1));

    let mut offset = 0;
    loop {
        let len = max_rows.min(batch.num_rows() - offset);
        let slice = batch.slice(offset, len);

        let mut writer = ArrowWriter::try_new(
            BytesMut::new().writer(),
            batch.schema(),
            Some(config.writer_properties()),
        )?;
        writer.write(&slice)?;
        let bytes = writer.into_inner()?.into_inner().freeze();
        files.push((len, bytes));

        offset += len;
        if offset >= batch.num_rows() {
            break;
        }
    }

    Ok(files)
}

/// Decode every row group of a Parquet file.
pub fn decode_file(
    bytes: Bytes,
    batch_size: usize,
) -> Result<(SchemaRef, Vec<RecordBatch>), ParquetError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?.with_batch_size(batch_size);
    let schema = builder.schema().clone();
    let batches = builder
        .build()?
        .collect::<Result<Vec<_>, _>>()
        .map_err(ParquetError::from)?;
    Ok((schema, batches))
}

/// Appends partition columns parsed from file paths to decoded batches.
#[derive(Debug, Clone)]
pub struct PartitionAttacher {
    fields: Vec<FieldRef>,
    extractor: PartitionExtractor,
}

impl PartitionAttacher {
    pub fn new(fields: Vec<FieldRef>) -> Self {
        let extractor = PartitionExtractor::new(fields.iter().map(|f| f.name().clone()).collect());
        Self { fields, extractor }
    }

    /// The file schema extended with the partition fields it lacks.
    pub fn table_schema(&self, file_schema: &Schema) -> SchemaRef {
        let mut fields: Vec<FieldRef> = file_schema.fields().iter().cloned().collect();
        for field in &self.fields {
            if file_schema.index_of(field.name()).is_err() {
                fields.push(field.clone());
            }
        }
        Arc::new(Schema::new(fields))
    }

    /// Append constant partition columns for the file at `path`.
    ///
    /// A partition missing from the path reads as null, as does the default
    /// partition directory. Values are cast from their text form to the
    /// declared field type.
    pub fn attach(
        &self,
        path: &str,
        batches: Vec<RecordBatch>,
        schema: &SchemaRef,
    ) -> Result<Vec<RecordBatch>, TableError> {
        let values = self.extractor.extract(path);

        batches
            .into_iter()
            .map(|batch| {
                let mut columns = batch.columns().to_vec();
                for field in &self.fields {
                    if batch.schema().index_of(field.name()).is_ok() {
                        continue;
                    }
                    let value = values.get(field.name()).cloned().flatten();
                    let text: ArrayRef = Arc::new(StringArray::from(vec![
                        value.as_deref();
                        batch.num_rows()
                    ]));
                    columns.push(cast(&text, field.data_type()).context(ArrowSnafu)?);
                }
                RecordBatch::try_new(schema.clone(), columns).context(ArrowSnafu)
            })
            .collect()
    }
}
