//! Fact stage: joins playback events with the dimensions into `songplays`.
//!
//! Events are matched to songs by title and to artists by name. Both are
//! free-text equality: a case or whitespace difference drops the event, and
//! a title shared by several catalog songs multiplies it.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, FieldRef, Schema, SchemaRef};
use snafu::prelude::*;
use tracing::info;

use sparkify_core::{ParquetReadOptions, Session, Table, TableError, WriteSummary};

use crate::error::{PipelineError, ReadSnafu, TransformSnafu};
use crate::log_events::START_TIME;
use crate::output::{ARTISTS, OutputWriter, SONGPLAYS, SONGS};

/// Surrogate key column of the fact table.
pub const SONGPLAY_ID: &str = "songplay_id";

/// Joined columns of the fact table and their output names.
pub const SONGPLAY_COLUMNS: &[(&str, &str)] = &[
    (SONGPLAY_ID, "songplay_id"),
    (START_TIME, "start_time"),
    ("userId", "user_id"),
    ("level", "level"),
    ("song_id", "song_id"),
    ("artist_id", "artist_id"),
    ("sessionId", "session_id"),
    ("location", "location"),
    ("userAgent", "user_agent"),
    ("year", "year"),
    ("month", "month"),
];

fn partition_field(name: &str, data_type: DataType) -> FieldRef {
    Arc::new(Field::new(name, data_type, true))
}

/// Read options for `songs` as laid out on storage.
pub fn songs_read_options() -> ParquetReadOptions {
    let schema: SchemaRef = Arc::new(Schema::new(vec![
        Field::new("song_id", DataType::Utf8, true),
        Field::new("title", DataType::Utf8, true),
        Field::new("duration", DataType::Float64, true),
        Field::new("year", DataType::Int32, true),
        Field::new("artist_id", DataType::Utf8, true),
    ]));
    ParquetReadOptions {
        partition_columns: vec![
            partition_field("year", DataType::Int32),
            partition_field("artist_id", DataType::Utf8),
        ],
        schema: Some(schema),
    }
}

/// Read options for the unpartitioned `artists` table.
pub fn artists_read_options() -> ParquetReadOptions {
    let schema: SchemaRef = Arc::new(Schema::new(vec![
        Field::new("artist_id", DataType::Utf8, true),
        Field::new("name", DataType::Utf8, true),
        Field::new("location", DataType::Utf8, true),
        Field::new("latitude", DataType::Float64, true),
        Field::new("longitude", DataType::Float64, true),
    ]));
    ParquetReadOptions {
        partition_columns: vec![],
        schema: Some(schema),
    }
}

/// Build the fact table from playback events and the three dimensions.
///
/// The song side loses `year` and `artist_id` before they could collide,
/// so `artist_id` comes from the matched artist row and `year`/`month`
/// from the time dimension. The event's own `location` is kept.
pub fn songplays_table(
    events: &Table,
    songs: &Table,
    artists: &Table,
    time: &Table,
) -> Result<Table, TableError> {
    let songs = songs.drop_columns(&["year"])?;
    let with_songs = events
        .inner_join(&songs, "song", "title")?
        .drop_columns(&["artist_id"])?;

    let artists = artists.select(&["artist_id", "name"])?;
    let with_artists = with_songs.inner_join(&artists, "artist", "name")?;

    let with_time = with_artists.inner_join(time, START_TIME, START_TIME)?;

    with_time
        .with_monotonic_id(SONGPLAY_ID)?
        .select_as(SONGPLAY_COLUMNS)
}

/// Re-reads `songs` and `artists` and writes `songplays`.
pub struct FactBuilder<'a> {
    session: &'a Session,
    writer: &'a OutputWriter<'a>,
}

impl<'a> FactBuilder<'a> {
    pub fn new(session: &'a Session, writer: &'a OutputWriter<'a>) -> Self {
        Self { session, writer }
    }

    pub async fn run(&self, events: &Table, time: &Table) -> Result<WriteSummary, PipelineError> {
        let songs = self
            .session
            .read_parquet(&self.writer.url(&SONGS), &songs_read_options())
            .await
            .context(ReadSnafu { table: SONGS.name })?;
        let artists = self
            .session
            .read_parquet(&self.writer.url(&ARTISTS), &artists_read_options())
            .await
            .context(ReadSnafu {
                table: ARTISTS.name,
            })?;

        let songplays = songplays_table(events, &songs, &artists, time).context(TransformSnafu {
            table: SONGPLAYS.name,
        })?;
        info!(
            events = events.num_rows(),
            songplays = songplays.num_rows(),
            "Joined playback events"
        );

        self.writer.write(&SONGPLAYS, &songplays).await
    }
}
