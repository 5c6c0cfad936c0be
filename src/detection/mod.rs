//! Sheet detection.
//!
//! Turns a stream of distance readings into discrete "sheet passed" events.
//! No I/O lives here; the run loop feeds readings in and keeps the state.

mod sheet_detector;

pub use sheet_detector::{DetectorState, Position, SheetDetector, ThresholdError, Thresholds};
