//! Song catalog stage: builds the `songs` and `artists` dimensions.

use snafu::prelude::*;
use tracing::info;

use sparkify_core::storage::join_url;
use sparkify_core::{Session, Table, TableError, WriteSummary};

use crate::error::{PipelineError, ReadSnafu, TransformSnafu};
use crate::output::{ARTISTS, OutputWriter, SONGS};
use crate::schema::song_schema;

/// Catalog files sit exactly four directories below `song_data/`.
pub const SONG_DATA_PATTERN: &str = "song_data/*/*/*/*.json";

/// Columns of the `songs` dimension.
pub const SONG_COLUMNS: &[&str] = &["song_id", "title", "artist_id", "year", "duration"];

/// Catalog columns of the `artists` dimension and their output names.
pub const ARTIST_COLUMNS: &[(&str, &str)] = &[
    ("artist_id", "artist_id"),
    ("artist_name", "name"),
    ("artist_location", "location"),
    ("artist_latitude", "latitude"),
    ("artist_longitude", "longitude"),
];

/// Write summaries of the catalog stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogOutput {
    pub songs: WriteSummary,
    pub artists: WriteSummary,
}

/// One row per catalog record; duplicates are kept.
pub fn songs_table(catalog: &Table) -> Result<Table, TableError> {
    catalog.select(SONG_COLUMNS)
}

/// Renamed artist columns with exact duplicate rows collapsed.
pub fn artists_table(catalog: &Table) -> Result<Table, TableError> {
    catalog.select_as(ARTIST_COLUMNS)?.distinct()
}

/// Reads the song catalog and writes the `songs` and `artists` tables.
pub struct SongCatalogTransformer<'a> {
    session: &'a Session,
    input_root: &'a str,
    writer: &'a OutputWriter<'a>,
}

impl<'a> SongCatalogTransformer<'a> {
    pub fn new(session: &'a Session, input_root: &'a str, writer: &'a OutputWriter<'a>) -> Self {
        Self {
            session,
            input_root,
            writer,
        }
    }

    pub async fn run(&self) -> Result<CatalogOutput, PipelineError> {
        let pattern = join_url(self.input_root, SONG_DATA_PATTERN);
        let catalog = self
            .session
            .read_json(&pattern, Some(song_schema()))
            .await
            .context(ReadSnafu { table: "song_data" })?;
        info!(records = catalog.num_rows(), "Loaded song catalog");

        let songs = songs_table(&catalog).context(TransformSnafu { table: SONGS.name })?;
        let songs = self.writer.write(&SONGS, &songs).await?;

        let artists = artists_table(&catalog).context(TransformSnafu {
            table: ARTISTS.name,
        })?;
        let artists = self.writer.write(&ARTISTS, &artists).await?;

        Ok(CatalogOutput { songs, artists })
    }
}
