//! Sparkify: builds a star schema from song catalog and activity log JSON.
//!
//! This crate handles:
//! - Reading the song catalog against a declared schema
//! - Deriving the `songs`, `artists`, `users` and `time` dimensions
//! - Joining playback events into the `songplays` fact table
//! - Writing every table as Hive-partitioned Parquet with overwrite semantics

pub mod catalog;
pub mod config;
pub mod error;
pub mod fact;
pub mod log_events;
pub mod output;
pub mod pipeline;
pub mod schema;

pub use config::{CliArgs, Config};
pub use error::PipelineError;
pub use pipeline::{RunSummary, run};

pub use sparkify_core::tracing::init_tracing;
