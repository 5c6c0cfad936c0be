//! Distance Sensor Simulation
//!
//! Serves a TCP endpoint that behaves like an ultrasonic distance sensor behind
//! a serial server: one distance in centimeters per line, sheets passing as
//! near → far → near cycles with Gaussian jitter and the occasional garbage
//! line.
//!
//! # Usage
//! ```bash
//! ./sensor-sim --port 5000 --seed 7
//! ./sheet-counter --endpoint socket://127.0.0.1:5000
//!
//! # Telnet mode announces COM-PORT-OPTION so the RFC 2217 client path is exercised
//! ./sensor-sim --port 5000 --telnet
//! ./sheet-counter --endpoint rfc2217://127.0.0.1:5000
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use sheet_counter::acquisition::telnet::{cmd, opt};

// ============================================================================
// Sensor Geometry
// ============================================================================

/// Distance with a sheet resting at the start position (cm)
const NEAR_CM: f64 = 2.5;
/// Distance while the sheet is away (cm)
const FAR_CM: f64 = 140.0;
/// Somewhere between the thresholds, never counted on its own (cm)
const MID_CM: f64 = 50.0;

const GARBAGE: &[&str] = &["ERR", "", "12.3.4", "--", "E:05", "\u{fffd}\u{fffd}"];

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "sensor-sim")]
#[command(about = "Ultrasonic distance sensor simulation for sheet-counter testing")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "5000")]
    port: u16,

    /// Samples per second
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..=1000))]
    rate: u32,

    /// Samples per sheet cycle (near, mid, far, mid)
    #[arg(long, default_value = "12", value_parser = clap::value_parser!(u32).range(4..=10_000))]
    cycle: u32,

    /// Jitter standard deviation (cm)
    #[arg(long, default_value = "0.8")]
    noise: f64,

    /// Probability that a line is garbage instead of a distance
    #[arg(long, default_value = "0.02")]
    garbage: f64,

    /// Close each connection after this many lines (exercise reconnects)
    #[arg(long)]
    drop_after: Option<u64>,

    /// Announce telnet COM-PORT-OPTION on connect
    #[arg(long)]
    telnet: bool,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

// ============================================================================
// Signal Generator
// ============================================================================

/// Produces the line sequence for one connection.
struct SheetSignal {
    rng: StdRng,
    jitter: Normal<f64>,
    garbage_probability: f64,
    cycle: u32,
    position: u32,
    sheets_emitted: u64,
}

impl SheetSignal {
    fn new(seed: u64, noise: f64, garbage_probability: f64, cycle: u32) -> Result<Self> {
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            jitter: Normal::new(0.0, noise).context("Invalid --noise")?,
            garbage_probability: garbage_probability.clamp(0.0, 1.0),
            cycle,
            position: 0,
            sheets_emitted: 0,
        })
    }

    /// Distance profile: first half near, a mid sample, far, a mid sample.
    fn base_distance(&self) -> f64 {
        let quarter = self.cycle / 4;
        match self.position {
            p if p < quarter * 2 => NEAR_CM,
            p if p == quarter * 2 => MID_CM,
            p if p + 1 == self.cycle => MID_CM,
            _ => FAR_CM,
        }
    }

    fn next_line(&mut self) -> String {
        let line = if self.rng.gen_bool(self.garbage_probability) {
            GARBAGE[self.rng.gen_range(0..GARBAGE.len())].to_string()
        } else {
            let distance = (self.base_distance() + self.jitter.sample(&mut self.rng)).max(0.0);
            format!("{distance:.1}")
        };

        self.position += 1;
        if self.position >= self.cycle {
            self.position = 0;
            self.sheets_emitted += 1;
        }
        line
    }
}

// ============================================================================
// Connection Handling
// ============================================================================

async fn serve(mut stream: TcpStream, mut signal: SheetSignal, args: &Args) -> Result<()> {
    let peer = stream.peer_addr().ok();
    info!(?peer, "Client connected");

    if args.telnet {
        stream
            .write_all(&[cmd::IAC, cmd::WILL, opt::COM_PORT, cmd::IAC, cmd::WILL, opt::BINARY])
            .await?;
    }

    let (mut reader, mut writer) = stream.into_split();
    // Negotiation and control bytes from the client are read and ignored
    tokio::spawn(async move {
        let mut sink = [0u8; 256];
        while matches!(reader.read(&mut sink).await, Ok(n) if n > 0) {}
    });

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(args.rate)));
    let mut lines = 0u64;
    loop {
        ticker.tick().await;
        let line = signal.next_line();
        writer.write_all(format!("{line}\r\n").as_bytes()).await?;
        lines += 1;

        if args.drop_after.is_some_and(|limit| lines >= limit) {
            info!(?peer, lines, sheets = signal.sheets_emitted, "Dropping connection on purpose");
            return Ok(());
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let base_seed = args.seed.unwrap_or_else(|| thread_rng().gen());
    // Fail on bad parameters before accepting anyone
    SheetSignal::new(base_seed, args.noise, args.garbage, args.cycle)?;

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(
        %addr,
        seed = base_seed,
        rate = args.rate,
        cycle = args.cycle,
        telnet = args.telnet,
        "Sensor simulation listening"
    );

    let args = std::sync::Arc::new(args);
    let mut connection = 0u64;
    loop {
        let (stream, _) = listener.accept().await.context("Accept failed")?;
        let signal = SheetSignal::new(
            base_seed.wrapping_add(connection),
            args.noise,
            args.garbage,
            args.cycle,
        )?;
        connection += 1;

        let args = std::sync::Arc::clone(&args);
        tokio::spawn(async move {
            if let Err(e) = serve(stream, signal, &args).await {
                warn!(error = %e, "Client connection ended");
            }
        });
    }
}
