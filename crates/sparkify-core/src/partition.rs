//! Hive-style partition paths.
//!
//! Partition values are encoded as `key=value` directory segments. Values are
//! percent-escaped so they never introduce extra segments, and a null value is
//! written as [`DEFAULT_PARTITION`].

use std::collections::HashMap;

/// Directory value standing in for a null partition value.
pub const DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

fn needs_escape(c: char) -> bool {
    c.is_control()
        || matches!(
            c,
            '"' | '#' | '%' | '\'' | '*' | '/' | ':' | '=' | '?' | '\\' | '{' | '[' | ']' | '^'
        )
}

/// Escape a partition value for use as a path segment.
pub fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if needs_escape(c) {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                escaped.push_str(&format!("%{byte:02X}"));
            }
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// Reverse [`escape_value`]. Malformed escapes are kept verbatim.
pub fn unescape_value(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            if let Ok(byte) = u8::from_str_radix(&value[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Build the relative directory for one combination of partition values.
///
/// ```
/// use sparkify_core::partition::partition_dir;
///
/// let dir = partition_dir(&[("year", Some("2018")), ("artist_id", None)]);
/// assert_eq!(dir, "year=2018/artist_id=__HIVE_DEFAULT_PARTITION__");
/// ```
pub fn partition_dir(values: &[(&str, Option<&str>)]) -> String {
    values
        .iter()
        .map(|(key, value)| match value {
            Some(value) => format!("{key}={}", escape_value(value)),
            None => format!("{key}={DEFAULT_PARTITION}"),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Extracts values for a fixed set of partition columns from file paths.
#[derive(Debug, Clone)]
pub struct PartitionExtractor {
    columns: Vec<String>,
}

impl PartitionExtractor {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    /// Extract partition values from a relative file path.
    ///
    /// Only whole `key=value` segments count. A column absent from the path is
    /// absent from the result; a column holding [`DEFAULT_PARTITION`] maps to
    /// `None`.
    pub fn extract(&self, path: &str) -> HashMap<String, Option<String>> {
        let mut values = HashMap::new();
        for segment in path.split('/') {
            let Some((key, value)) = segment.split_once('=') else {
                continue;
            };
            if !self.columns.iter().any(|c| c == key) {
                continue;
            }
            let value = (value != DEFAULT_PARTITION).then(|| unescape_value(value));
            values.insert(key.to_string(), value);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_dir_orders_as_given() {
        assert_eq!(
            partition_dir(&[("year", Some("2018")), ("month", Some("11"))]),
            "year=2018/month=11"
        );
    }

    #[test]
    fn test_escape_keeps_plain_values() {
        assert_eq!(escape_value("ARJIE2Y1187B994AB7"), "ARJIE2Y1187B994AB7");
        assert_eq!(escape_value("Los Angeles, CA"), "Los Angeles, CA");
    }

    #[test]
    fn test_escape_separators() {
        assert_eq!(escape_value("AC/DC"), "AC%2FDC");
        assert_eq!(escape_value("a=b"), "a%3Db");
        assert_eq!(escape_value("100%"), "100%25");
        assert_eq!(
            escape_value("2018-11-02 01:25:34"),
            "2018-11-02 01%3A25%3A34"
        );
    }

    #[test]
    fn test_unescape_reverses_escape() {
        for value in ["AC/DC", "a=b", "100%", "x:y#z", "plain"] {
            assert_eq!(unescape_value(&escape_value(value)), value);
        }
    }

    #[test]
    fn test_unescape_keeps_malformed_sequences() {
        assert_eq!(unescape_value("50%"), "50%");
        assert_eq!(unescape_value("%zz"), "%zz");
    }

    #[test]
    fn test_extract_configured_columns() {
        let extractor = PartitionExtractor::new(vec!["year".into(), "artist_id".into()]);
        let values = extractor.extract("year=2000/artist_id=AR1/part-00000.snappy.parquet");

        assert_eq!(values.len(), 2);
        assert_eq!(values.get("year"), Some(&Some("2000".to_string())));
        assert_eq!(values.get("artist_id"), Some(&Some("AR1".to_string())));
    }

    #[test]
    fn test_extract_default_partition_is_null() {
        let extractor = PartitionExtractor::new(vec!["year".into()]);
        let values = extractor.extract("year=__HIVE_DEFAULT_PARTITION__/part-00000.parquet");
        assert_eq!(values.get("year"), Some(&None));
    }

    #[test]
    fn test_extract_ignores_unknown_and_partial_keys() {
        let extractor = PartitionExtractor::new(vec!["year".into()]);
        let values = extractor.extract("fiscal_year=1999/month=11/part-00000.parquet");
        assert!(values.is_empty());
    }

    #[test]
    fn test_extract_unescapes() {
        let extractor = PartitionExtractor::new(vec!["artist_id".into()]);
        let values = extractor.extract("artist_id=AC%2FDC/part-00000.parquet");
        assert_eq!(values.get("artist_id"), Some(&Some("AC/DC".to_string())));
    }
}
