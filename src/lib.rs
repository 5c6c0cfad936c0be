//! sheet-counter: production-line sheet counting
//!
//! Turns a stream of distance readings from an ultrasonic sensor into a sheet
//! count and a durable per-sample record.
//!
//! ## Architecture
//!
//! - **Acquisition**: RFC 2217 / raw TCP serial link, line framing, sample parsing
//! - **Detection**: Two-threshold hysteresis sheet detector (pure state machine)
//! - **Storage**: sled-backed reading store behind a recorder trait
//! - **Pipeline**: Counting session supervisor (reconnect, cancellation, shutdown)
//! - **Reporting**: Order, throughput and daily summaries with CSV / JSON export

pub mod acquisition;
pub mod config;
pub mod detection;
pub mod pipeline;
pub mod reporting;
pub mod storage;
pub mod types;

// Re-export counter configuration
pub use config::CounterConfig;

// Re-export the detection core
pub use detection::{DetectorState, Position, SheetDetector, Thresholds};

// Re-export the session
pub use pipeline::{CountingSession, SessionReport, SessionSettings, Termination};

// Re-export storage
pub use storage::{InMemoryRecorder, PersistenceError, ReadingRecorder, ReadingStore};

// Re-export record types
pub use types::{Reading, ReadingFilter, StationIdentity, StoredReading};
