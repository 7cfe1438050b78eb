//! CLI entry point for spectro_daq
//!
//! Provides command-line access to:
//! - Running one acquisition from a configuration file
//! - Listing the producer drivers compiled into this binary
//!
//! # Usage
//!
//! Run for ten seconds (Ctrl-C stops early):
//! ```bash
//! spectro_daq run --config config/daq.toml --timeout 10
//! ```
//!
//! List drivers:
//! ```bash
//! spectro_daq drivers
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spectro_daq::config::{DaqConfig, DEFAULT_CONFIG_PATH};
use spectro_daq::logging::{self, OutputFormat, TracingConfig};
use spectro_daq::{CancellationToken, ProducerRegistry, SessionController, SummarySink};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "spectro_daq")]
#[command(about = "List-mode spectroscopy acquisition", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the configured producers and run one acquisition
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Run length in seconds (overrides session.timeout_secs)
        #[arg(long)]
        timeout: Option<u64>,

        /// Log output format: pretty, compact or json
        #[arg(long, default_value = "compact")]
        log_format: OutputFormat,
    },

    /// List registered producer drivers
    Drivers,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            timeout,
            log_format,
        } => run_acquisition(config, timeout, log_format).await,
        Commands::Drivers => {
            list_drivers();
            Ok(())
        }
    }
}

async fn run_acquisition(path: PathBuf, timeout: Option<u64>, format: OutputFormat) -> Result<()> {
    let config = DaqConfig::load_from(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    logging::init(TracingConfig::from_daq_config(&config)?.with_format(format))?;
    info!(application = %config.application.name, config = %path.display(), "configuration loaded");

    let registry = ProducerRegistry::with_builtin();
    let controller = SessionController::from_config(&config, &registry)?;
    controller.boot_all().await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received, stopping acquisition");
                    cancel.cancel();
                }
                Err(e) => warn!(error = %e, "cannot listen for Ctrl-C"),
            }
        });
    }

    let timeout = timeout
        .map(Duration::from_secs)
        .or_else(|| config.session.timeout());
    let sink = Arc::new(SummarySink::new());

    let result = controller.run_timed(timeout, &cancel, sink.clone()).await;
    controller.shutdown_all().await;
    let result = result?;

    println!("Run {} finished ({:?})", result.run_id, result.stop_reason);
    println!("  Producers:  {}", result.started.join(", "));
    println!("  Duration:   {:.3} s", result.elapsed.as_secs_f64());
    println!("  Spills:     {} in, {} out", result.report.spills_in, result.report.spills_out);
    println!("  Events:     {}", result.report.events_out);
    if result.report.decode_errors > 0 {
        println!("  Decode errors: {}", result.report.decode_errors);
    }
    for (channel, count) in sink.channel_counts() {
        println!("  Channel {channel:>3}: {count} events");
    }
    Ok(())
}

fn list_drivers() {
    let registry = ProducerRegistry::with_builtin();
    println!("Available producer drivers:");
    for (driver_type, name) in registry.factory_types() {
        println!("  {driver_type:<12} {name}");
    }
}
