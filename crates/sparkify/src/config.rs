//! Configuration for the sparkify ETL.
//!
//! Loaded from YAML after environment variable interpolation, so
//! credentials can be written as `${AWS_ACCESS_KEY_ID}` and never stored in
//! the file itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use clap::Parser;
use serde::{Deserialize, Serialize};

use sparkify_core::config::{ParquetCompression, interpolate};
use sparkify_core::{ParquetWriterConfig, SessionConfig};

use crate::error::ConfigError;

/// Input root used when the config does not name one.
pub const DEFAULT_INPUT_DATA: &str = "s3a://udacity-dend/";
/// Output root used when the config does not name one.
pub const DEFAULT_OUTPUT_DATA: &str = "s3a://datalake-project-jin/output/";
/// Page value the client tags on every actual song playback.
pub const DEFAULT_PLAYBACK_PAGE: &str = "NextSong";

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "sparkify")]
#[command(about = "Build the songplays star schema from song and log JSON", long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(short, long, default_value = "dl.yaml")]
    pub config: PathBuf,

    /// Override the configured input root
    #[arg(long)]
    pub input: Option<String>,

    /// Override the configured output root
    #[arg(long)]
    pub output: Option<String>,
}

/// The two credential values for the object store.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field("aws_secret_access_key", &"***")
            .finish()
    }
}

/// JSON reader settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Maximum rows per decoded batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    8192
}

/// Parquet writer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    #[serde(default)]
    pub compression: ParquetCompression,
    /// Files are split once they reach this many rows.
    #[serde(default = "default_max_rows_per_file")]
    pub max_rows_per_file: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            compression: ParquetCompression::default(),
            max_rows_per_file: default_max_rows_per_file(),
        }
    }
}

fn default_max_rows_per_file() -> usize {
    1_000_000
}

/// Activity log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Value of `page` that marks a song playback.
    #[serde(default = "default_playback_page")]
    pub playback_page: String,
    /// Offset in which calendar fields of the time dimension are computed.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            playback_page: default_playback_page(),
            utc_offset: default_utc_offset(),
        }
    }
}

fn default_playback_page() -> String {
    DEFAULT_PLAYBACK_PAGE.to_string()
}

fn default_utc_offset() -> String {
    "+00:00".to_string()
}

/// Main configuration for sparkify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root holding `song_data/` and `log_data/`.
    #[serde(default = "default_input_data")]
    pub input_data: String,
    /// Root under which one directory per output table is written.
    #[serde(default = "default_output_data")]
    pub output_data: String,
    /// Object store credentials.
    #[serde(default)]
    pub keys: Option<Credentials>,
    /// Extra object store options (region, endpoint, ...).
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

fn default_input_data() -> String {
    DEFAULT_INPUT_DATA.to_string()
}

fn default_output_data() -> String {
    DEFAULT_OUTPUT_DATA.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_data: default_input_data(),
            output_data: default_output_data(),
            keys: None,
            storage_options: HashMap::new(),
            reader: ReaderConfig::default(),
            writer: WriterConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let result = interpolate(contents);
        if !result.is_ok() {
            return Err(ConfigError::EnvInterpolation {
                message: result.errors.join("\n"),
            });
        }

        let config: Config = serde_yaml::from_str(&result.text)
            .map_err(|source| ConfigError::YamlParse { source })?;

        config.validate()?;

        Ok(config)
    }

    /// Replace the input and output roots where given, then re-validate.
    pub fn with_overrides(
        mut self,
        input: Option<String>,
        output: Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(input) = input {
            self.input_data = input;
        }
        if let Some(output) = output {
            self.output_data = output;
        }
        self.validate()?;
        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_data.is_empty() {
            return Err(ConfigError::EmptyInputPath);
        }
        if self.output_data.is_empty() {
            return Err(ConfigError::EmptyOutputPath);
        }
        if self.reader.batch_size == 0 {
            return Err(ConfigError::ZeroSize {
                setting: "reader.batch_size".to_string(),
            });
        }
        if self.writer.max_rows_per_file == 0 {
            return Err(ConfigError::ZeroSize {
                setting: "writer.max_rows_per_file".to_string(),
            });
        }
        if self.events.playback_page.is_empty() {
            return Err(ConfigError::EmptyPlaybackPage);
        }
        self.utc_offset()?;
        Ok(())
    }

    /// The parsed `events.utc_offset`.
    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        self.events
            .utc_offset
            .parse::<FixedOffset>()
            .map_err(|_| ConfigError::InvalidUtcOffset {
                value: self.events.utc_offset.clone(),
            })
    }

    /// Session settings, with credentials passed as storage options.
    pub fn session_config(&self) -> SessionConfig {
        let mut storage_options = self.storage_options.clone();
        if let Some(keys) = &self.keys {
            storage_options.insert(
                "aws_access_key_id".to_string(),
                keys.aws_access_key_id.clone(),
            );
            storage_options.insert(
                "aws_secret_access_key".to_string(),
                keys.aws_secret_access_key.clone(),
            );
        }

        SessionConfig {
            storage_options,
            batch_size: self.reader.batch_size,
            writer: ParquetWriterConfig {
                compression: self.writer.compression,
                max_rows_per_file: self.writer.max_rows_per_file,
            },
        }
    }
}
