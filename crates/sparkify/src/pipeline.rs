//! Orchestration of one full rebuild.
//!
//! Stages run strictly in sequence. The fact stage re-reads `songs` and
//! `artists`, so the catalog stage must have finished writing first.

use std::time::Instant;

use tracing::info;

use sparkify_core::{Session, WriteSummary};

use crate::catalog::SongCatalogTransformer;
use crate::config::Config;
use crate::error::PipelineError;
use crate::fact::FactBuilder;
use crate::log_events::EventLogTransformer;
use crate::output::OutputWriter;

/// Write summaries of every output table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub songs: WriteSummary,
    pub artists: WriteSummary,
    pub users: WriteSummary,
    pub time: WriteSummary,
    pub songplays: WriteSummary,
}

impl RunSummary {
    /// `(table, summary)` pairs in write order.
    pub fn tables(&self) -> [(&'static str, &WriteSummary); 5] {
        [
            ("songs", &self.songs),
            ("artists", &self.artists),
            ("users", &self.users),
            ("time", &self.time),
            ("songplays", &self.songplays),
        ]
    }
}

/// Run the whole pipeline. Any error aborts the run; tables written before
/// the failure are left in place.
pub async fn run(config: Config) -> Result<RunSummary, PipelineError> {
    let start = Instant::now();
    let utc_offset = config.utc_offset()?;
    let session = Session::new(config.session_config());
    let writer = OutputWriter::new(&session, config.output_data.as_str());

    info!(
        input = %config.input_data,
        output = %config.output_data,
        "Starting sparkify run"
    );

    let catalog = SongCatalogTransformer::new(&session, &config.input_data, &writer)
        .run()
        .await?;

    let events = EventLogTransformer::new(
        &session,
        &config.input_data,
        &config.events.playback_page,
        utc_offset,
        &writer,
    )
    .run()
    .await?;

    let songplays = FactBuilder::new(&session, &writer)
        .run(&events.events, &events.time_table)
        .await?;

    let summary = RunSummary {
        songs: catalog.songs,
        artists: catalog.artists,
        users: events.users,
        time: events.time,
        songplays,
    };

    info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        songplays = summary.songplays.rows,
        "Finished sparkify run"
    );
    Ok(summary)
}
