//! sheet-counter - Production-line sheet counter
//!
//! Reads distances from an ultrasonic sensor behind an RFC 2217 serial server,
//! counts sheets with a two-threshold hysteresis rule and stores every accepted
//! sample against the machine and production order.
//!
//! # Usage
//!
//! ```bash
//! # Count with defaults / ./counter_config.toml
//! cargo run --release
//!
//! # Against the bundled simulator
//! cargo run --bin sensor-sim -- --port 5000 &
//! cargo run --release -- --endpoint socket://127.0.0.1:5000
//!
//! # Production report
//! cargo run --release -- report --kind throughput --format csv
//! ```
//!
//! # Environment Variables
//!
//! - `SHEET_COUNTER_CONFIG`: Path to the TOML config file
//! - `RUST_LOG`: Logging level (default: info)
//! - `RESET_DB`: Set to "true" to wipe the reading store on startup (for testing)

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sheet_counter::acquisition::SerialLink;
use sheet_counter::config::{defaults, CounterConfig, WriteFailurePolicy};
use sheet_counter::pipeline::{CountingSession, SessionSettings};
use sheet_counter::reporting::{self, ExportFormat, ReportKind};
use sheet_counter::storage::{ProcessLock, ReadingRecorder, ReadingStore};
use sheet_counter::types::ReadingFilter;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "sheet-counter")]
#[command(about = "Production-line sheet counter")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file (default: ./counter_config.toml if present)
    #[arg(long, env = "SHEET_COUNTER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Sensor endpoint, e.g. rfc2217://10.0.0.5:4001 or socket://host:port
    #[arg(long, env = "SHEET_COUNTER_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// Machine identifier stamped on readings
    #[arg(long, env = "SHEET_COUNTER_MACHINE_ID", global = true)]
    machine_id: Option<String>,

    /// Production order identifier stamped on readings
    #[arg(long, env = "SHEET_COUNTER_ORDER_ID", global = true)]
    order_id: Option<String>,

    /// Sheet is at the start position below this distance (cm)
    #[arg(long, global = true)]
    low_threshold: Option<f64>,

    /// Sheet is in transit above this distance (cm)
    #[arg(long, global = true)]
    high_threshold: Option<f64>,

    /// Reading store directory
    #[arg(long, env = "SHEET_COUNTER_STORAGE", global = true)]
    storage_path: Option<PathBuf>,

    /// What to do when a reading cannot be stored: skip or abort
    #[arg(long, global = true)]
    on_write_failure: Option<WriteFailurePolicy>,

    /// Wipe the reading store on startup.
    /// WARNING: This is destructive and cannot be undone!
    /// Can also be set via RESET_DB=true environment variable.
    #[arg(long)]
    reset_db: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Count sheets until Ctrl+C (default)
    Run,

    /// Export a production report from stored readings
    Report {
        /// Summary to build
        #[arg(long, value_enum, default_value = "orders")]
        kind: ReportKind,
        /// Output encoding
        #[arg(long, value_enum, default_value = "csv")]
        format: ExportFormat,
        /// Output directory
        #[arg(long, default_value = defaults::DEFAULT_REPORT_DIR)]
        out: PathBuf,
        /// Only readings from this machine
        #[arg(long)]
        machine: Option<String>,
        /// Only readings for this production order
        #[arg(long)]
        order: Option<String>,
        /// Only readings at or after this local time (YYYY-MM-DDTHH:MM:SS)
        #[arg(long, value_parser = parse_local_time)]
        from: Option<NaiveDateTime>,
        /// Only readings at or before this local time (YYYY-MM-DDTHH:MM:SS)
        #[arg(long, value_parser = parse_local_time)]
        to: Option<NaiveDateTime>,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

fn parse_local_time(raw: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| {
            chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .map_err(|e| format!("expected YYYY-MM-DDTHH:MM:SS: {e}"))
}

impl CliArgs {
    /// Layer CLI / env overrides over the loaded file, then re-validate.
    fn effective_config(&self) -> Result<CounterConfig> {
        let mut config = CounterConfig::load(self.config.as_deref())
            .context("Failed to load configuration")?;

        if let Some(endpoint) = &self.endpoint {
            config.link.endpoint.clone_from(endpoint);
        }
        if let Some(machine_id) = &self.machine_id {
            config.station.machine_id.clone_from(machine_id);
        }
        if let Some(order_id) = &self.order_id {
            config.station.production_order_id.clone_from(order_id);
        }
        if let Some(low) = self.low_threshold {
            config.detection.low_threshold_cm = low;
        }
        if let Some(high) = self.high_threshold {
            config.detection.high_threshold_cm = high;
        }
        if let Some(path) = &self.storage_path {
            config.storage.path.clone_from(path);
        }
        if let Some(policy) = self.on_write_failure {
            config.storage.write_failure_policy = policy;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

// ============================================================================
// Logging
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

// ============================================================================
// Database Reset
// ============================================================================

/// Check if database reset is requested via CLI flag or environment variable.
fn should_reset_db(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    std::env::var("RESET_DB")
        .map(|val| matches!(val.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Remove the reading store directory and everything in it.
fn reset_store(store_path: &Path) -> Result<()> {
    if !store_path.exists() {
        info!(path = %store_path.display(), "Reading store does not exist, nothing to reset");
        return Ok(());
    }

    warn!(path = %store_path.display(), "RESET_DB requested - wiping reading store");
    std::fs::remove_dir_all(store_path)
        .with_context(|| format!("Failed to remove reading store {}", store_path.display()))?;
    warn!("Reading store removed; a fresh one will be created");
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

async fn run_counter(config: CounterConfig, reset_db: bool) -> Result<()> {
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  sheet-counter {}", env!("CARGO_PKG_VERSION"));
    info!(
        "  Machine: {} | Order: {}",
        config.station.machine_id, config.station.production_order_id
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let _process_lock = ProcessLock::acquire(config.storage.data_dir())
        .context("Failed to acquire process lock")?;

    if reset_db {
        reset_store(&config.storage.path)?;
    }

    let store = ReadingStore::open(&config.storage.path).context("Failed to open reading store")?;
    let link = SerialLink::from_config(&config.link).context("Invalid sensor endpoint")?;
    let settings = SessionSettings::from_config(&config).context("Invalid thresholds")?;

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let report = CountingSession::new(link, store, settings, cancel_token)
        .run()
        .await;

    info!(
        sheets = report.final_state.sheet_count,
        samples = report.stats.samples_accepted,
        malformed = report.stats.malformed_samples,
        write_failures = report.stats.write_failures,
        reconnects = report.stats.reconnect_attempts,
        "Session summary"
    );
    if let Some(link) = &report.link_stats {
        info!(
            lines = link.lines_received,
            idle_timeouts = link.idle_timeouts,
            connections = link.connections,
            "Link summary"
        );
    }

    report
        .termination
        .into_result()
        .context("Counting session ended with a fault")?;
    info!("sheet-counter shutdown complete");
    Ok(())
}

fn run_report(
    config: &CounterConfig,
    kind: ReportKind,
    format: ExportFormat,
    out: &Path,
    filter: &ReadingFilter,
) -> Result<()> {
    let store = ReadingStore::open(&config.storage.path).context("Failed to open reading store")?;
    info!(backend = store.backend_name(), readings = store.count()?, "Reading store ready");

    let output = reporting::generate(&store, filter, kind, format, out)
        .context("Failed to generate report")?;
    println!("{} rows written to {}", output.rows, output.path.display());
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let config = args.effective_config()?;

    match &args.command {
        None | Some(SubCommand::Run) => {
            run_counter(config, should_reset_db(args.reset_db)).await
        }
        Some(SubCommand::Report {
            kind,
            format,
            out,
            machine,
            order,
            from,
            to,
        }) => {
            let filter = ReadingFilter {
                machine_id: machine.clone(),
                production_order_id: order.clone(),
                from: *from,
                to: *to,
            };
            run_report(&config, *kind, *format, out, &filter)
        }
        Some(SubCommand::ShowConfig) => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}
