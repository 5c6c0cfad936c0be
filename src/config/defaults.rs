//! System-wide default constants.
//!
//! Centralises the numbers the counter falls back to when a config file is
//! silent. Grouped by subsystem for easy discovery.

// ============================================================================
// Station Identity
// ============================================================================

/// Machine identifier used when none is configured.
pub const DEFAULT_MACHINE_ID: &str = "maq001";

/// Production order used when none is configured.
pub const DEFAULT_PRODUCTION_ORDER_ID: &str = "OP00123";

// ============================================================================
// Sensor Link
// ============================================================================

/// Sensor endpoint. Bare `host:port` is treated as RFC 2217.
pub const DEFAULT_ENDPOINT: &str = "rfc2217://localhost:5000";

/// Serial line speed requested from the RFC 2217 server.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// How long a single fetch waits for a complete line before reporting idle (ms).
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 1_000;

/// Upper bound on a single TCP connect attempt (ms).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// First reconnect delay after a link failure (ms). Doubles per failed attempt.
pub const DEFAULT_RECONNECT_INITIAL_DELAY_MS: u64 = 1_000;

/// Reconnect delay cap (ms).
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// TCP keepalive idle time before the first probe (seconds).
pub const TCP_KEEPALIVE_TIME_SECS: u64 = 30;

/// Interval between TCP keepalive probes (seconds).
pub const TCP_KEEPALIVE_INTERVAL_SECS: u64 = 10;

/// Longest line the link will buffer before discarding it as garbage (bytes).
///
/// The sensor sends a handful of characters per sample; anything this long
/// means the stream lost its newlines.
pub const MAX_LINE_BYTES: usize = 4_096;

// ============================================================================
// Sheet Detection
// ============================================================================

/// Distance below which the sheet is considered back at the start (cm).
pub const DEFAULT_LOW_THRESHOLD_CM: f64 = 5.0;

/// Distance above which the sheet is considered in transit (cm).
pub const DEFAULT_HIGH_THRESHOLD_CM: f64 = 100.0;

// ============================================================================
// Storage
// ============================================================================

/// Default sled database path for persisted readings.
pub const DEFAULT_STORAGE_PATH: &str = "./data/readings.db";

// ============================================================================
// Reporting
// ============================================================================

/// Groups with less operating time than this are left out of throughput (hours).
///
/// One minute; avoids dividing by near-zero durations.
pub const MIN_OPERATING_HOURS_FOR_THROUGHPUT: f64 = 1.0 / 60.0;

/// Default directory for report exports.
pub const DEFAULT_REPORT_DIR: &str = "output";
