use clap::{Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Stream a task's changes to stdout, one record per line
    Run {
        #[arg(long, help = "Task configuration file (JSON)")]
        config: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        #[arg(long, help = "State directory, defaults to ~/.tributary")]
        state_dir: Option<PathBuf>,

        #[arg(long, help = "Stop after this many records have been delivered")]
        max_records: Option<usize>,

        #[arg(long, help = "Poll this JSON-lines file for signals, overrides signal_file")]
        signal_file: Option<PathBuf>,
    },
    /// Show the committed offset of a task
    Offsets {
        #[arg(long, help = "Task configuration file (JSON)")]
        config: PathBuf,

        #[arg(long, help = "State directory, defaults to ~/.tributary")]
        state_dir: Option<PathBuf>,

        #[arg(
            long,
            help = "If set, prints the offset as JSON instead of a table"
        )]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// The record as is
    Json,
    /// CloudEvents 1.0 structured mode
    Cloudevents,
}
