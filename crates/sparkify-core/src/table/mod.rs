//! In-memory relational table over Arrow record batches.
//!
//! A [`Table`] is immutable: every operation returns a new table. Batch
//! boundaries are preserved by row-wise operators and act as the unit of
//! parallel work (and of surrogate id ranges, see
//! [`Table::with_monotonic_id`]).

mod join;

use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Int64Array, UInt64Array};
use arrow::compute::{cast, concat_batches, filter_record_batch, take_record_batch};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow::row::{RowConverter, SortField};
use snafu::prelude::*;

use crate::error::{ArrowSnafu, ColumnNotFoundSnafu, DerivedColumnSnafu, TableError};

/// Number of low bits reserved for the row position in a surrogate id.
const ROW_ID_BITS: u32 = 33;

/// An immutable collection of record batches sharing one schema.
#[derive(Debug, Clone)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Table {
    /// Create a table from batches that all carry `schema`.
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self, TableError> {
        let batches = batches
            .into_iter()
            .filter(|b| b.num_rows() > 0)
            .map(|b| {
                if b.schema() == schema {
                    Ok(b)
                } else {
                    RecordBatch::try_new(schema.clone(), b.columns().to_vec()).context(ArrowSnafu)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { schema, batches })
    }

    /// A single-batch table carrying the batch's own schema.
    pub fn from_batch(batch: RecordBatch) -> Self {
        let schema = batch.schema();
        let batches = if batch.num_rows() > 0 { vec![batch] } else { Vec::new() };
        Self { schema, batches }
    }

    /// A table with no rows.
    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Column names in schema order.
    pub fn column_names(&self) -> Vec<String> {
        self.schema.fields().iter().map(|f| f.name().clone()).collect()
    }

    fn index_of(&self, name: &str) -> Result<usize, TableError> {
        self.schema.index_of(name).map_err(|_| {
            ColumnNotFoundSnafu {
                name,
                available: self.column_names(),
            }
            .build()
        })
    }

    /// Concatenate all batches into one.
    pub fn collect(&self) -> Result<RecordBatch, TableError> {
        concat_batches(&self.schema, &self.batches).context(ArrowSnafu)
    }

    /// The full contents of one column.
    pub fn column(&self, name: &str) -> Result<ArrayRef, TableError> {
        let index = self.index_of(name)?;
        Ok(self.collect()?.column(index).clone())
    }

    /// Keep only the named columns, in the given order.
    pub fn select(&self, columns: &[&str]) -> Result<Table, TableError> {
        let pairs: Vec<(&str, &str)> = columns.iter().map(|c| (*c, *c)).collect();
        self.select_as(&pairs)
    }

    /// Keep only the named `(source, alias)` columns, renamed to their alias.
    pub fn select_as(&self, columns: &[(&str, &str)]) -> Result<Table, TableError> {
        let indices = columns
            .iter()
            .map(|(source, _)| self.index_of(source))
            .collect::<Result<Vec<_>, _>>()?;

        let fields: Vec<Field> = indices
            .iter()
            .zip(columns)
            .map(|(i, (_, alias))| self.schema.field(*i).clone().with_name(*alias))
            .collect();
        let schema = Arc::new(Schema::new(fields));

        let batches = self
            .batches
            .iter()
            .map(|batch| {
                let arrays = indices.iter().map(|i| batch.column(*i).clone()).collect();
                RecordBatch::try_new(schema.clone(), arrays).context(ArrowSnafu)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Table { schema, batches })
    }

    /// Remove the named columns; names that do not exist are ignored.
    pub fn drop_columns(&self, columns: &[&str]) -> Result<Table, TableError> {
        let keep: Vec<String> = self
            .column_names()
            .into_iter()
            .filter(|name| !columns.contains(&name.as_str()))
            .collect();
        let keep: Vec<&str> = keep.iter().map(String::as_str).collect();
        self.select(&keep)
    }

    /// Keep rows for which `predicate` returns true; null counts as false.
    pub fn filter<F>(&self, predicate: F) -> Result<Table, TableError>
    where
        F: Fn(&RecordBatch) -> Result<BooleanArray, TableError>,
    {
        let batches = self
            .batches
            .iter()
            .map(|batch| {
                let mask = predicate(batch)?;
                filter_record_batch(batch, &mask).context(ArrowSnafu)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Table::try_new(self.schema.clone(), batches)
    }

    /// Keep rows whose `column`, rendered as UTF-8, equals `value` exactly.
    pub fn filter_eq(&self, column: &str, value: &str) -> Result<Table, TableError> {
        let index = self.index_of(column)?;
        self.filter(|batch| {
            let rendered = cast(batch.column(index), &DataType::Utf8).context(ArrowSnafu)?;
            let strings = rendered.as_string::<i32>();
            Ok(strings
                .iter()
                .map(|v| Some(v == Some(value)))
                .collect::<BooleanArray>())
        })
    }

    /// Append a derived column, or replace an existing column of the same name.
    ///
    /// `derive` is called once per batch and must return an array of
    /// `data_type` with one value per row.
    pub fn with_column<F>(
        &self,
        name: &str,
        data_type: DataType,
        derive: F,
    ) -> Result<Table, TableError>
    where
        F: Fn(&RecordBatch) -> Result<ArrayRef, TableError>,
    {
        let existing = self.schema.index_of(name).ok();
        let field = Arc::new(Field::new(name, data_type.clone(), true));

        let mut fields: Vec<_> = self.schema.fields().iter().cloned().collect();
        match existing {
            Some(i) => fields[i] = field,
            None => fields.push(field),
        }
        let schema = Arc::new(Schema::new(fields));

        let batches = self
            .batches
            .iter()
            .map(|batch| {
                let derived = derive(batch)?;
                ensure!(
                    derived.len() == batch.num_rows() && derived.data_type() == &data_type,
                    DerivedColumnSnafu {
                        name,
                        message: format!(
                            "expected {} rows of {data_type}, got {} rows of {}",
                            batch.num_rows(),
                            derived.len(),
                            derived.data_type()
                        ),
                    }
                );
                let mut columns = batch.columns().to_vec();
                match existing {
                    Some(i) => columns[i] = derived,
                    None => columns.push(derived),
                }
                RecordBatch::try_new(schema.clone(), columns).context(ArrowSnafu)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Table { schema, batches })
    }

    /// Collapse rows that are identical across every column.
    ///
    /// The first occurrence of each distinct row is kept and the relative
    /// order of first occurrences is preserved. Nulls compare equal.
    pub fn distinct(&self) -> Result<Table, TableError> {
        if self.is_empty() {
            return Ok(Table::empty(self.schema.clone()));
        }

        let batch = self.collect()?;
        let sort_fields = self
            .schema
            .fields()
            .iter()
            .map(|f| SortField::new(f.data_type().clone()))
            .collect();
        let converter = RowConverter::new(sort_fields).context(ArrowSnafu)?;
        let rows = converter
            .convert_columns(batch.columns())
            .context(ArrowSnafu)?;

        let mut seen = HashSet::with_capacity(rows.num_rows());
        let mut keep = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            if seen.insert(row) {
                keep.push(i as u64);
            }
        }

        let deduped = take_record_batch(&batch, &UInt64Array::from(keep)).context(ArrowSnafu)?;
        Ok(Table::from_batch(deduped))
    }

    /// Append a unique, monotonically increasing Int64 column.
    ///
    /// The id of row `r` in batch `b` is `(b << 33) + r`: ids increase in
    /// table order but jump between batches, so they are neither contiguous
    /// nor stable when batch boundaries change.
    pub fn with_monotonic_id(&self, name: &str) -> Result<Table, TableError> {
        let mut fields: Vec<_> = self.schema.fields().iter().cloned().collect();
        fields.push(Arc::new(Field::new(name, DataType::Int64, false)));
        let schema = Arc::new(Schema::new(fields));

        let batches = self
            .batches
            .iter()
            .enumerate()
            .map(|(b, batch)| {
                let base = (b as i64) << ROW_ID_BITS;
                let ids: ArrayRef = Arc::new(Int64Array::from_iter_values(
                    (0..batch.num_rows() as i64).map(|r| base + r),
                ));
                let mut columns = batch.columns().to_vec();
                columns.push(ids);
                RecordBatch::try_new(schema.clone(), columns).context(ArrowSnafu)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Table { schema, batches })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use arrow::array::{Int32Array, StringArray};

    /// Build a single-batch table of nullable Utf8 and Int32 columns.
    pub(crate) fn table(columns: Vec<(&str, ArrayRef)>) -> Table {
        let fields: Vec<Field> = columns
            .iter()
            .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
            .collect();
        let schema = Arc::new(Schema::new(fields));
        let batch =
            RecordBatch::try_new(schema, columns.into_iter().map(|(_, a)| a).collect())
                .unwrap();
        Table::from_batch(batch)
    }

    pub(crate) fn strings(values: &[Option<&str>]) -> ArrayRef {
        Arc::new(StringArray::from(values.to_vec()))
    }

    pub(crate) fn ints(values: &[Option<i32>]) -> ArrayRef {
        Arc::new(Int32Array::from(values.to_vec()))
    }

    pub(crate) fn string_values(table: &Table, column: &str) -> Vec<Option<String>> {
        let array = table.column(column).unwrap();
        let array = cast(&array, &DataType::Utf8).unwrap();
        array
            .as_string::<i32>()
            .iter()
            .map(|v| v.map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn artists() -> Table {
        table(vec![
            (
                "artist_id",
                strings(&[Some("AR1"), Some("AR2"), Some("AR1"), None, None]),
            ),
            (
                "artist_name",
                strings(&[Some("Blue"), Some("Red"), Some("Blue"), Some("X"), Some("X")]),
            ),
            ("year", ints(&[Some(1990), Some(0), Some(1990), None, None])),
        ])
    }

    #[test]
    fn test_select_as_projects_and_renames() {
        let t = artists()
            .select_as(&[("artist_name", "name"), ("artist_id", "artist_id")])
            .unwrap();

        assert_eq!(t.column_names(), vec!["name", "artist_id"]);
        assert_eq!(t.num_rows(), 5);
        assert_eq!(string_values(&t, "name")[1], Some("Red".to_string()));
    }

    #[test]
    fn test_select_unknown_column_fails() {
        let err = artists().select(&["artist_id", "missing"]).unwrap_err();
        match err {
            TableError::ColumnNotFound { name, available } => {
                assert_eq!(name, "missing");
                assert_eq!(available, vec!["artist_id", "artist_name", "year"]);
            }
            other => panic!("Expected ColumnNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_drop_columns_ignores_absent_names() {
        let t = artists().drop_columns(&["year", "not_there"]).unwrap();
        assert_eq!(t.column_names(), vec!["artist_id", "artist_name"]);
    }

    #[test]
    fn test_distinct_collapses_identical_rows_only() {
        let t = artists().distinct().unwrap();

        assert_eq!(t.num_rows(), 3);
        assert_eq!(
            string_values(&t, "artist_id"),
            vec![Some("AR1".to_string()), Some("AR2".to_string()), None]
        );
    }

    #[test]
    fn test_distinct_keeps_rows_differing_in_one_column() {
        let t = table(vec![
            ("user_id", strings(&[Some("10"), Some("10")])),
            ("level", strings(&[Some("free"), Some("paid")])),
        ]);
        assert_eq!(t.distinct().unwrap().num_rows(), 2);
    }

    #[test]
    fn test_filter_eq_excludes_nulls_and_other_values() {
        let t = table(vec![(
            "page",
            strings(&[Some("NextSong"), Some("Home"), None, Some("nextsong")]),
        )]);
        let filtered = t.filter_eq("page", "NextSong").unwrap();

        assert_eq!(filtered.num_rows(), 1);
        assert_eq!(string_values(&filtered, "page"), vec![Some("NextSong".to_string())]);
    }

    #[test]
    fn test_with_column_appends_and_replaces() {
        let t = artists()
            .with_column("decade", DataType::Int32, |batch| {
                let years = batch.column(2).as_primitive::<arrow::datatypes::Int32Type>();
                let decades: arrow::array::Int32Array =
                    years.iter().map(|y| y.map(|y| y / 10 * 10)).collect();
                Ok(Arc::new(decades) as ArrayRef)
            })
            .unwrap();
        assert_eq!(t.column_names().last().unwrap(), "decade");

        let replaced = t
            .with_column("year", DataType::Utf8, |batch| {
                Ok(cast(batch.column(2), &DataType::Utf8).unwrap())
            })
            .unwrap();
        assert_eq!(replaced.schema().field(2).data_type(), &DataType::Utf8);
        assert_eq!(replaced.column_names().len(), 4);
    }

    #[test]
    fn test_with_column_rejects_wrong_type() {
        let err = artists()
            .with_column("x", DataType::Int64, |batch| Ok(batch.column(0).clone()))
            .unwrap_err();
        assert!(matches!(err, TableError::DerivedColumn { .. }));
    }

    #[test]
    fn test_monotonic_id_spans_batches() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, true)]));
        let batch = |n: i32| {
            RecordBatch::try_new(
                schema.clone(),
                vec![Arc::new(arrow::array::Int32Array::from_iter_values(0..n))],
            )
            .unwrap()
        };
        let t = Table::try_new(schema.clone(), vec![batch(2), batch(3)])
            .unwrap()
            .with_monotonic_id("id")
            .unwrap();

        let ids = t.column("id").unwrap();
        let ids: Vec<i64> = ids
            .as_primitive::<arrow::datatypes::Int64Type>()
            .values()
            .to_vec();
        assert_eq!(ids, vec![0, 1, 1 << 33, (1 << 33) + 1, (1 << 33) + 2]);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_empty_table_operations() {
        let t = Table::empty(artists().schema().clone());
        assert_eq!(t.distinct().unwrap().num_rows(), 0);
        assert_eq!(t.collect().unwrap().num_rows(), 0);
        assert_eq!(t.select(&["year"]).unwrap().column_names(), vec!["year"]);
    }
}
