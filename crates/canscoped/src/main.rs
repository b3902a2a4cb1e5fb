//! canscoped - canscope daemon
//!
//! Connects the configured buses, runs the frame pipeline and records a trace
//! until interrupted.
//!
//! Usage:
//!   canscoped run [--config canscoped.toml] [--trace-dir DIR] [--format trc|binary]
//!   canscoped dump FILE
//!
//! Without a config file a single virtual bus is used.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use canscope_core::{NullCodec, PipelineEvent};
use canscope_pipeline::{read_trace, Pipeline, TextTraceWriter, TraceFormat};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::DaemonConfig;

/// How often the running daemon logs a status line
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "canscoped")]
#[command(author, version, about = "CAN bus monitor and trace recorder")]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect the configured buses and record until Ctrl-C
    Run {
        /// Configuration file path
        #[arg(short, long, env = "CANSCOPE_CONFIG")]
        config: Option<PathBuf>,

        /// Folder for trace files (overrides the config file)
        #[arg(long)]
        trace_dir: Option<PathBuf>,

        /// Trace file format: trc or binary
        #[arg(long)]
        format: Option<TraceFormat>,
    },

    /// Print a recorded trace file as text
    Dump {
        /// Trace file (.trc or .cstb)
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose {
        "canscoped=debug,canscope_pipeline=debug,canscope_bus=debug"
    } else {
        "canscoped=info,canscope_pipeline=info,canscope_bus=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Run {
            config,
            trace_dir,
            format,
        } => {
            let mut daemon_config = match &config {
                Some(path) => {
                    tracing::info!("Loading config from: {}", path.display());
                    DaemonConfig::load_from(path)?
                }
                None => {
                    tracing::info!("No config file provided, using a virtual bus");
                    DaemonConfig::default()
                }
            };
            daemon_config.merge_with_args(trace_dir.as_ref(), format);
            run(daemon_config).await
        }
        Commands::Dump { file } => dump(&file),
    }
}

async fn run(config: DaemonConfig) -> Result<()> {
    tracing::info!("Starting canscoped");

    let pipeline = Pipeline::with_filter(
        config.pipeline.clone(),
        Arc::new(NullCodec),
        config.rx_filter(),
    );

    for bus in &config.buses {
        pipeline.add_bus(bus);
    }
    let connected = pipeline.connections().connect_all();
    for (label, status) in pipeline.connections().statuses() {
        tracing::info!(bus = %label, status = %status, "Bus status");
    }
    if connected == 0 && !config.buses.is_empty() {
        tracing::warn!("No bus connected");
    }

    {
        let mut table = pipeline.tx_table().lock();
        for row in &config.tx_rows {
            table.add_row(row.clone());
        }
    }

    if config.record {
        if let Some(folder) = &config.pipeline.trace_folder {
            std::fs::create_dir_all(folder)
                .with_context(|| format!("Failed to create trace folder: {}", folder.display()))?;
        }
        pipeline.trace().lock().start();
    }

    let events = pipeline.subscribe();
    pipeline.start().context("Failed to start pipeline")?;

    let monitor = tokio::spawn(log_events(events));
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                tracing::info!("Interrupted, shutting down");
                break;
            }
            _ = status.tick() => log_status(&pipeline),
        }
    }

    tokio::task::block_in_place(|| pipeline.shutdown());
    monitor.abort();
    log_status(&pipeline);
    Ok(())
}

fn log_status(pipeline: &Pipeline) {
    let rows = pipeline.live().lock().len();
    let recorded = pipeline.trace().lock().message_count();
    let sent: u64 = pipeline.tx_table().lock().rows().iter().map(|r| r.count).sum();
    tracing::info!(rows, recorded, sent, "Status");
}

/// Log the pipeline notifications worth a line
async fn log_events(mut events: broadcast::Receiver<PipelineEvent>) {
    loop {
        match events.recv().await {
            Ok(PipelineEvent::TraceFileChanged { path: Some(path) }) => {
                tracing::info!(path = %path.display(), "Recording to file");
            }
            Ok(PipelineEvent::TraceRate { per_second }) => {
                tracing::debug!(per_second, "Trace rate");
            }
            Ok(PipelineEvent::ConnectionStatus { index, status }) => {
                tracing::info!(index, status = %status, "Connection status changed");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event monitor lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Print a trace file in the text trace layout
fn dump(path: &Path) -> Result<()> {
    let entries = read_trace(path)
        .with_context(|| format!("Failed to read trace: {}", path.display()))?;
    for entry in &entries {
        print!("{}", TextTraceWriter::format_line(entry));
    }
    tracing::info!(entries = entries.len(), "Dumped {}", path.display());
    Ok(())
}
