use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

/// harvester - pulls items from a work queue and collects them through a
/// remote rendering service
#[derive(Debug, Parser)]
#[command(name = "harvester")]
#[command(version)]
#[command(long_about = r#"
Runs one harvest cycle: items are pulled from the work source, each one is
opened in a background rendering context, collected, uploaded and closed.
The run ends when the work source is empty, after too many consecutive pull
failures, or on Ctrl-C (live sessions are drained first).

The bearer token is read from the environment variable named by `token_env`
in the settings file (HARVESTER_TOKEN by default).

EXAMPLES:
  # Write a settings template, edit it, then run
  harvester --print-default-config > harvester.ron
  harvester --config harvester.ron --status-interval 10
"#)]
pub struct Cli {
    /// RON settings file
    #[arg(long, default_value = "harvester.ron")]
    pub config: PathBuf,

    /// Seconds between status lines in the log
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub status_interval: u64,

    /// Overrides `harvest.max_concurrency` from the settings file
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// off, error, warn, info, debug or trace
    #[arg(long, default_value_t = LevelFilter::Info)]
    pub log_level: LevelFilter,

    /// Print the default settings as RON and exit
    #[arg(long)]
    pub print_default_config: bool,
}
