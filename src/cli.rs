use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "trackarr", version, about = "Media-library enrichment and subscription orchestrator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler, webhook listener and web API.
    Daemon,

    /// Run a single task to completion and exit.
    Once {
        /// Task key, e.g. "metadata-populate" or "process-watchlist".
        task: String,

        /// Deep mode: reprocess everything instead of only the diff.
        #[arg(long)]
        deep: bool,
    },

    /// Write a default config file next to the binary.
    Init,
}
