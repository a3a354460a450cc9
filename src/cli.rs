use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file.
    #[arg(long, short, env = "CROWDWATCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP trigger (and the built-in schedule, if configured).
    Serve {
        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run one fetch, store and notify cycle and print its summary.
    Cycle,
    /// Import remote readings into the local database.
    Sync,
    /// Compare local and remote reading counts.
    Status,
    /// Print stored readings.
    Readings {
        /// Venue place reference; without it the latest local rows are shown.
        #[arg(long)]
        venue: Option<String>,
        /// Look-back window for `--venue`.
        #[arg(long, default_value_t = 24)]
        hours: i64,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}
