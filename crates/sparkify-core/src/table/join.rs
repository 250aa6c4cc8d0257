//! Hash equi-join.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{Array, UInt64Array};
use arrow::compute::{cast, take, take_record_batch};
use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use arrow::row::{RowConverter, SortField};
use snafu::prelude::*;
use tracing::debug;

use super::Table;
use crate::error::{AmbiguousColumnSnafu, ArrowSnafu, TableError};

impl Table {
    /// Inner equi-join of `self` (probe side) with `right` (build side).
    ///
    /// The right key is cast to the left key's type. Null keys never match.
    /// When both keys share a name the right key column is left out of the
    /// output; any other duplicated column name is an error. Output keeps the
    /// left batch layout, with matches in left row order.
    pub fn inner_join(
        &self,
        right: &Table,
        left_key: &str,
        right_key: &str,
    ) -> Result<Table, TableError> {
        let left_index = self.index_of(left_key)?;
        let right_index = right.index_of(right_key)?;
        let using = left_key == right_key;

        let right_columns: Vec<usize> = (0..right.schema.fields().len())
            .filter(|i| !(using && *i == right_index))
            .collect();
        for i in &right_columns {
            let name = right.schema.field(*i).name();
            ensure!(
                self.schema.index_of(name).is_err(),
                AmbiguousColumnSnafu { name }
            );
        }

        let mut fields: Vec<_> = self.schema.fields().iter().cloned().collect();
        fields.extend(right_columns.iter().map(|i| right.schema.fields()[*i].clone()));
        let schema = Arc::new(Schema::new(fields));

        let key_type = self.schema.field(left_index).data_type().clone();
        let build = right.collect()?;
        let build_keys = cast(build.column(right_index), &key_type).context(ArrowSnafu)?;

        // Build and probe keys live in one `Rows` so that every `Row` borrows
        // from the same buffer.
        let converter = RowConverter::new(vec![SortField::new(key_type)]).context(ArrowSnafu)?;
        let mut rows = converter
            .convert_columns(&[build_keys.clone()])
            .context(ArrowSnafu)?;
        let mut probe_offsets = Vec::with_capacity(self.batches.len());
        for batch in &self.batches {
            probe_offsets.push(rows.num_rows());
            converter
                .append(&mut rows, &[batch.column(left_index).clone()])
                .context(ArrowSnafu)?;
        }

        let mut hash_table: HashMap<_, Vec<u64>> = HashMap::new();
        for i in 0..build.num_rows() {
            if build_keys.is_valid(i) {
                hash_table.entry(rows.row(i)).or_default().push(i as u64);
            }
        }

        let batches = self
            .batches
            .iter()
            .zip(probe_offsets)
            .map(|(batch, offset)| {
                let keys = batch.column(left_index);
                let mut probe_indices = Vec::new();
                let mut build_indices = Vec::new();
                for r in 0..batch.num_rows() {
                    if keys.is_null(r) {
                        continue;
                    }
                    if let Some(matches) = hash_table.get(&rows.row(offset + r)) {
                        for m in matches {
                            probe_indices.push(r as u64);
                            build_indices.push(*m);
                        }
                    }
                }

                let left = take_record_batch(batch, &UInt64Array::from(probe_indices))
                    .context(ArrowSnafu)?;
                let build_indices = UInt64Array::from(build_indices);
                let mut columns = left.columns().to_vec();
                for i in &right_columns {
                    columns.push(take(build.column(*i), &build_indices, None).context(ArrowSnafu)?);
                }
                RecordBatch::try_new(schema.clone(), columns).context(ArrowSnafu)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let joined = Table::try_new(schema, batches)?;
        debug!(
            left_key,
            right_key,
            left_rows = self.num_rows(),
            right_rows = build.num_rows(),
            joined_rows = joined.num_rows(),
            "Joined tables"
        );
        Ok(joined)
    }
}
