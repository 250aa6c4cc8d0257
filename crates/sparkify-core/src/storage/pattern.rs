//! Fixed-depth wildcard patterns over storage paths.
//!
//! A pattern such as `s3a://bucket/song_data/*/*/*/*.json` is split at the
//! first segment containing `*`: everything before it is the listing root,
//! the rest is matched against each listed path. `*` never crosses a `/`, so
//! the number of segments is fixed and deeper files are ignored.

use regex::Regex;

/// A listing root plus the matcher for paths relative to it.
#[derive(Debug, Clone)]
pub struct PathPattern {
    root: String,
    matcher: Option<Regex>,
}

impl PathPattern {
    /// Split a URL pattern into its listing root and relative glob.
    pub fn parse(pattern: &str) -> Result<Self, regex::Error> {
        let Some(wildcard_at) = pattern.find('*') else {
            return Ok(Self {
                root: pattern.to_string(),
                matcher: None,
            });
        };

        let split_at = pattern[..wildcard_at].rfind('/').map_or(0, |i| i + 1);
        let root = pattern[..split_at].to_string();
        let body = pattern[split_at..]
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("[^/]*");
        let matcher = Regex::new(&format!("^{body}$"))?;

        Ok(Self {
            root,
            matcher: Some(matcher),
        })
    }

    /// The URL to list from.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Whether a path relative to [`Self::root`] is selected.
    ///
    /// Without a wildcard every listed file is selected.
    pub fn matches(&self, relative_path: &str) -> bool {
        match &self.matcher {
            Some(matcher) => matcher.is_match(relative_path),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_song_data_pattern_depth() {
        let pattern = PathPattern::parse("s3a://udacity-dend/song_data/*/*/*/*.json").unwrap();

        assert_eq!(pattern.root(), "s3a://udacity-dend/song_data/");
        assert!(pattern.matches("A/A/A/TRAAAAW128F429D538.json"));
        assert!(!pattern.matches("A/A/TRAAAAW128F429D538.json"));
        assert!(!pattern.matches("A/A/A/B/TRAAAAW128F429D538.json"));
        assert!(!pattern.matches("A/A/A/TRAAAAW128F429D538.json.crc"));
    }

    #[test]
    fn test_log_data_pattern() {
        let pattern = PathPattern::parse("/data/in/log_data/*/*/*.json").unwrap();

        assert_eq!(pattern.root(), "/data/in/log_data/");
        assert!(pattern.matches("2018/11/2018-11-12-events.json"));
        assert!(!pattern.matches("2018/2018-11-12-events.json"));
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let pattern = PathPattern::parse("/in/*.json").unwrap();
        assert!(pattern.matches("a.json"));
        assert!(!pattern.matches("ajson"));
    }

    #[test]
    fn test_pattern_without_wildcard_matches_everything() {
        let pattern = PathPattern::parse("/out/songs").unwrap();
        assert_eq!(pattern.root(), "/out/songs");
        assert!(pattern.matches("year=2000/artist_id=AR1/part-00000.snappy.parquet"));
    }
}
