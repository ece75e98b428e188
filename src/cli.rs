//! CLI argument parsing for the contact-import-worker binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "contact-import-worker", about = "Chunked CSV contact import worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP cron endpoint (default if no subcommand given)
    Serve,
    /// Process one chunk of one upload job, print the summary and exit
    RunOnce,
    /// Run database migrations and exit
    Migrate,
    /// Create a pending upload job from a CSV file
    Enqueue {
        /// CSV file with a header row
        #[arg(long)]
        file: PathBuf,
        /// Email list the imported contacts join (repeatable)
        #[arg(long = "list")]
        lists: Vec<String>,
    },
}
