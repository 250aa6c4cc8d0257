//! Sparkify CLI: one full rebuild of the star schema.

use std::process::ExitCode;

use clap::Parser;
use tracing::info;

use sparkify::{CliArgs, Config, init_tracing, run};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();

    info!("Loading config from {}", args.config.display());

    let config = match Config::from_file(&args.config)
        .and_then(|config| config.with_overrides(args.input, args.output))
    {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(summary) => {
            for (table, written) in summary.tables() {
                info!(
                    "  {}: {} rows in {} file(s)",
                    table, written.rows, written.files
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Pipeline failed: {e}");
            ExitCode::FAILURE
        }
    }
}
