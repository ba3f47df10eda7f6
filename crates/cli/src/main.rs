use crate::{
    commands::{Commands, OutputFormat},
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use connectors::journal::JournalConnector;
use engine_config::TaskConfig;
use engine_core::offsets::OffsetBackingStore;
use engine_runtime::{connector::SourceConnector, task::CdcTask};
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod output;
mod shutdown;
mod state;

#[derive(Parser)]
#[command(name = "tributary", version, about = "Change data capture task runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    // Records go to stdout, logs to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run {
            config,
            format,
            state_dir,
            max_records,
            signal_file,
        } => {
            let shutdown = ShutdownCoordinator::new(CancellationToken::new());
            shutdown.register_handlers();
            match run(config, format, state_dir, max_records, signal_file, &shutdown).await {
                Ok(()) => shutdown
                    .requested()
                    .map_or(ExitCode::Success, ExitCode::from),
                Err(e) => {
                    error!(error = %e, "Task run failed");
                    ExitCode::GeneralError
                }
            }
        }
        Commands::Offsets {
            config,
            state_dir,
            json,
        } => match show_offsets(config, state_dir, json).await {
            Ok(()) => ExitCode::Success,
            Err(e) => {
                error!(error = %e, "Failed to read offsets");
                ExitCode::GeneralError
            }
        },
    };

    std::process::exit(code.as_i32());
}

async fn run(
    config: PathBuf,
    format: OutputFormat,
    state_dir: Option<PathBuf>,
    max_records: Option<usize>,
    signal_file: Option<PathBuf>,
    shutdown: &ShutdownCoordinator,
) -> Result<(), CliError> {
    let mut config = TaskConfig::load(&config).await?;
    if signal_file.is_some() {
        config.signal_file = signal_file;
    }
    let state_dir = state::state_dir(state_dir)?;
    let store = Arc::new(state::open_offset_store(&state_dir)?);

    let task = CdcTask::new(JournalConnector::new(), store);
    task.start(config).await?;

    let converter = output::converter(format, task.connector().name());
    let result = stream(&task, converter.as_ref(), max_records, shutdown.cancel_token()).await;

    task.stop().await;
    let metrics = task.metrics();
    info!(
        events = metrics.events_produced,
        heartbeats = metrics.heartbeats,
        polled = metrics.events_polled,
        skipped = metrics.events_skipped,
        retries = metrics.retry_count,
        signals = metrics.signals,
        "Task finished"
    );
    result
}

/// Polls, prints and commits until cancelled, failed or `max_records` reached.
async fn stream(
    task: &CdcTask<JournalConnector>,
    converter: &dyn engine_runtime::convert::RecordConverter,
    max_records: Option<usize>,
    cancel: CancellationToken,
) -> Result<(), CliError> {
    let mut stdout = tokio::io::stdout();
    let mut delivered = 0usize;

    loop {
        let records = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            polled = task.poll() => polled?,
        };
        if records.is_empty() {
            continue;
        }

        output::write_records(&records, converter, &mut stdout).await?;
        task.commit(&records).await?;
        delivered += records.len();

        if max_records.is_some_and(|max| delivered >= max) {
            info!(delivered, "Record limit reached");
            return Ok(());
        }
    }
}

async fn show_offsets(
    config: PathBuf,
    state_dir: Option<PathBuf>,
    as_json: bool,
) -> Result<(), CliError> {
    let config = TaskConfig::load(&config).await?;
    let store = state::open_offset_store(&state::state_dir(state_dir)?)?;
    let partition = config.partition();
    let offset = store.load(&partition).await?;

    if as_json {
        let json = serde_json::to_string_pretty(&offset)?;
        println!("{json}");
        return Ok(());
    }

    println!("Offset for task '{}' / partition '{partition}':", config.name);
    println!("-----------------------------");
    match offset {
        Some(offset) => {
            println!("{:<16} {}", "Commit LSN", offset.position.commit_lsn);
            println!("{:<16} {}", "Change LSN", offset.position.change_lsn);
            println!(
                "{:<16} {}",
                "Transaction",
                offset.transaction_id.as_deref().unwrap_or("n/a")
            );
            println!("{:<16} {}", "Event serial", offset.event_serial);
            println!("{:<16} {}", "Snapshot", offset.snapshot_in_progress);
            println!("{:<16} {}", "Recorded", offset.ts.to_rfc3339());
        }
        None => println!("{:<16} n/a", "Commit LSN"),
    }
    Ok(())
}
