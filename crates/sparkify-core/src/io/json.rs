//! Newline-delimited JSON decoding.
//!
//! Every line is parsed with serde_json and coerced against the target
//! schema before it reaches Arrow's decoder, so one oddly typed value never
//! fails a whole file:
//! - values whose JSON type cannot represent the field type become null
//! - numbers and booleans headed for a `Utf8` field are stringified
//! - a line that is not a JSON object becomes an all-null row

use std::sync::Arc;

use arrow::datatypes::{DataType, Schema, SchemaRef};
use arrow::json::ReaderBuilder;
use arrow::json::reader::infer_json_schema_from_iterator;
use arrow::record_batch::RecordBatch;
use serde_json::{Map, Value};
use snafu::prelude::*;
use tracing::warn;

use crate::error::{JsonDecodeSnafu, ReadError, SchemaInferenceSnafu};

/// Parsed lines of one file.
#[derive(Debug, Default)]
pub struct JsonLines {
    /// One entry per non-blank line; `None` where the line was not an object.
    records: Vec<Option<Map<String, Value>>>,
    malformed: usize,
}

impl JsonLines {
    /// Split `data` into lines and parse each one.
    pub fn parse(data: &[u8], path: &str) -> Self {
        let text = String::from_utf8_lossy(data);
        let mut lines = JsonLines::default();

        for (line_num, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(Value::Object(record)) => lines.records.push(Some(record)),
                Ok(_) => {
                    warn!(path, line = line_num + 1, "JSON line is not an object, reading as null row");
                    lines.push_malformed();
                }
                Err(e) => {
                    warn!(path, line = line_num + 1, error = %e, "Malformed JSON line, reading as null row");
                    lines.push_malformed();
                }
            }
        }

        lines
    }

    fn push_malformed(&mut self) {
        self.records.push(None);
        self.malformed += 1;
    }

    /// Number of rows these lines decode into.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Lines that were not JSON objects.
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    fn objects(&self) -> impl Iterator<Item = &Map<String, Value>> {
        self.records.iter().flatten()
    }
}

/// Infer a schema covering every object across all files.
pub fn infer_schema(files: &[&JsonLines], pattern: &str) -> Result<SchemaRef, ReadError> {
    let values = files
        .iter()
        .flat_map(|lines| lines.objects())
        .map(|record| Ok::<_, arrow::error::ArrowError>(Value::Object(record.clone())));

    let schema = infer_json_schema_from_iterator(values).context(SchemaInferenceSnafu {
        pattern: pattern.to_string(),
    })?;
    Ok(Arc::new(schema))
}

/// Decodes coerced JSON records into Arrow batches of a fixed schema.
pub struct JsonDecoder {
    schema: SchemaRef,
    batch_size: usize,
}

impl JsonDecoder {
    pub fn new(schema: SchemaRef, batch_size: usize) -> Self {
        Self { schema, batch_size }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Decode one file's lines into batches of at most `batch_size` rows.
    pub fn decode(&self, lines: &JsonLines, path: &str) -> Result<Vec<RecordBatch>, ReadError> {
        let rows: Vec<Value> = lines
            .records
            .iter()
            .map(|record| Value::Object(coerce_record(record.as_ref(), &self.schema)))
            .collect();

        let mut decoder = ReaderBuilder::new(Arc::clone(&self.schema))
            .with_batch_size(self.batch_size)
            .with_strict_mode(false)
            .build_decoder()
            .map_err(|e| {
                JsonDecodeSnafu {
                    path,
                    message: e.to_string(),
                }
                .build()
            })?;

        let mut batches = Vec::with_capacity(rows.len().div_ceil(self.batch_size));
        for chunk in rows.chunks(self.batch_size) {
            decoder.serialize(chunk).map_err(|e| {
                JsonDecodeSnafu {
                    path,
                    message: e.to_string(),
                }
                .build()
            })?;
            let batch = decoder.flush().map_err(|e| {
                JsonDecodeSnafu {
                    path,
                    message: e.to_string(),
                }
                .build()
            })?;
            if let Some(batch) = batch {
                batches.push(batch);
            }
        }

        Ok(batches)
    }
}

/// Keep only schema fields, each coerced to its field type.
fn coerce_record(record: Option<&Map<String, Value>>, schema: &Schema) -> Map<String, Value> {
    let mut coerced = Map::with_capacity(schema.fields().len());
    let Some(record) = record else {
        return coerced;
    };
    for field in schema.fields() {
        if let Some(value) = record.get(field.name()) {
            let value = coerce_value(value, field.data_type());
            if !value.is_null() {
                coerced.insert(field.name().clone(), value);
            }
        }
    }
    coerced
}

fn coerce_value(value: &Value, data_type: &DataType) -> Value {
    match (data_type, value) {
        (_, Value::Null) => Value::Null,
        (DataType::Null, _) => Value::Null,

        (DataType::Utf8 | DataType::LargeUtf8, Value::String(_)) => value.clone(),
        (DataType::Utf8 | DataType::LargeUtf8, Value::Number(n)) => Value::String(n.to_string()),
        (DataType::Utf8 | DataType::LargeUtf8, Value::Bool(b)) => Value::String(b.to_string()),
        (DataType::Utf8 | DataType::LargeUtf8, _) => Value::String(value.to_string()),

        (DataType::Boolean, Value::Bool(_)) => value.clone(),

        (DataType::Int8, Value::Number(_)) => integer_in(value, i8::MIN.into(), i8::MAX.into()),
        (DataType::Int16, Value::Number(_)) => integer_in(value, i16::MIN.into(), i16::MAX.into()),
        (DataType::Int32, Value::Number(_)) => integer_in(value, i32::MIN.into(), i32::MAX.into()),
        (DataType::Int64, Value::Number(_)) => integer_in(value, i64::MIN, i64::MAX),

        (DataType::Float16 | DataType::Float32 | DataType::Float64, Value::Number(_)) => {
            value.clone()
        }

        (DataType::Struct(fields), Value::Object(obj)) => {
            let mut out = Map::new();
            for field in fields.iter() {
                if let Some(v) = obj.get(field.name()) {
                    out.insert(field.name().clone(), coerce_value(v, field.data_type()));
                }
            }
            Value::Object(out)
        }
        (DataType::List(field) | DataType::LargeList(field), Value::Array(items)) => Value::Array(
            items
                .iter()
                .map(|item| coerce_value(item, field.data_type()))
                .collect(),
        ),

        _ => Value::Null,
    }
}

/// An integral number within `[min, max]`, or null.
///
/// Whole floats (`1.0`) are accepted; fractional ones are not.
fn integer_in(value: &Value, min: i64, max: i64) -> Value {
    let integer = match value.as_i64() {
        Some(i) => Some(i),
        None => value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
            .map(|f| f as i64),
    };
    match integer {
        Some(i) if (min..=max).contains(&i) => Value::from(i),
        _ => Value::Null,
    }
}
