//! cookpass-engine - Main entry point
//!
//! Runs the record analysis cookers over a delimited file, scheduling as
//! many passes as their dependencies require.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use cookpass_common::config::{TomlConfig, CONFIG_ENV_VAR};
use cookpass_common::events::{EventBus, SessionEvent};
use cookpass_engine::demo::{
    standard_cookers, DominantReport, KeyCounts, LineFileReader, RecordCount, SummaryReport,
    COUNT_PATH, DOMINANT_PATH, HISTOGRAM_PATH, SUMMARY_PATH,
};
use cookpass_engine::{CookerPath, ProcessingError, ProcessingSession, ResultStore, WatchProgress};
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status after an interrupt, as shells report SIGINT
const CANCELLED_EXIT_CODE: u8 = 130;

/// Command-line arguments for cookpass-engine
#[derive(Parser, Debug)]
#[command(name = "cookpass-engine")]
#[command(about = "Multi-pass record analysis")]
#[command(version)]
struct Args {
    /// Record file to analyse
    #[arg(short, long)]
    input: PathBuf,

    /// TOML configuration file
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Maximum passes the source may be read (overrides configuration)
    #[arg(long)]
    max_passes: Option<usize>,

    /// Separator between key and value
    #[arg(short, long, default_value_t = ',')]
    delimiter: char,

    /// Print the processing report as JSON instead of text
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = TomlConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut settings = config.session.clone();
    if let Some(max_passes) = args.max_passes {
        ensure!(max_passes > 0, "--max-passes must be at least 1");
        settings.max_passes = Some(max_passes);
    }

    info!(
        "Starting cookpass-engine on {} (delimiter {:?})",
        args.input.display(),
        args.delimiter
    );

    let event_bus = EventBus::new(settings.event_capacity);
    tokio::spawn(log_events(event_bus.subscribe()));

    let (progress_tx, progress_rx) = watch::channel(0u8);
    tokio::spawn(log_progress(progress_rx));

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let mut reader = LineFileReader::new(&args.input, args.delimiter);
    let mut session = ProcessingSession::with_settings(standard_cookers(), settings).with_event_bus(event_bus);

    match session
        .process_source(&mut reader, Arc::new(WatchProgress(progress_tx)), &cancel)
        .await
    {
        Ok(report) if args.json => {
            let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
            println!("{}", json);
            Ok(ExitCode::SUCCESS)
        }
        Ok(report) => {
            for disabled in &report.disabled {
                println!("disabled: {} ({})", disabled.path, disabled.reason);
            }
            for pass in &report.passes {
                println!(
                    "pass {}: {} cookers, {} records, {} corrupt, {} ms",
                    pass.pass,
                    pass.active_cookers,
                    pass.elements,
                    pass.corrupt,
                    pass.elapsed.as_millis()
                );
            }
            print_results(session.results());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => match failure_exit_code(&e) {
            Some(code) => {
                warn!(error = %e, "Processing cancelled");
                Ok(ExitCode::from(code))
            }
            None => Err(e).context("Processing failed"),
        },
    }
}

/// Status for failures that end the process without an error report
fn failure_exit_code(error: &ProcessingError) -> Option<u8> {
    match error {
        ProcessingError::Cancelled { .. } => Some(CANCELLED_EXIT_CODE),
        _ => None,
    }
}

/// Print the most complete result available
fn print_results(results: &ResultStore) {
    if let Some(summary) = results.get_as::<SummaryReport>(&CookerPath::from(SUMMARY_PATH)) {
        println!("{}", summary);
        return;
    }

    if let Some(count) = results.get_as::<RecordCount>(&CookerPath::from(COUNT_PATH)) {
        println!("records:        {}", count.total);
        println!("corrupt:        {}", count.corrupt);
    }
    if let Some(dominant) = results.get_as::<DominantReport>(&CookerPath::from(DOMINANT_PATH)) {
        if let Some(key) = &dominant.key {
            println!("dominant key:   {} ({} records)", key, dominant.occurrences);
        }
    } else if let Some(histogram) = results.get_as::<KeyCounts>(&CookerPath::from(HISTOGRAM_PATH)) {
        println!("distinct keys:  {}", histogram.0.len());
    }
}

async fn log_events(mut rx: broadcast::Receiver<SessionEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => debug!(
                session_id = %event.session_id(),
                event = event.event_type(),
                "Session event"
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Event logger lagged")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn log_progress(mut rx: watch::Receiver<u8>) {
    let mut last_logged = 0u8;
    while rx.changed().await.is_ok() {
        let percent = *rx.borrow_and_update();
        if percent >= last_logged.saturating_add(10) || (percent == 100 && last_logged < 100) {
            info!(percent, "Progress");
            last_logged = percent;
        }
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if signal::ctrl_c().await.is_ok() {
        info!("Received Ctrl+C, cancelling");
        cancel.cancel();
    }
}
