//! Hysteresis sheet detector.
//!
//! A sheet is counted only after the sensor has seen it far away (above the
//! HIGH threshold) and then back near the start (below the LOW threshold).
//! Readings inside the dead band between the two thresholds never change
//! state, which keeps jitter around either threshold from re-triggering.
//!
//! ```text
//!            distance > HIGH
//!   AT_START ───────────────▶ IN_TRANSIT
//!      ▲                          │
//!      └──────────────────────────┘
//!            distance < LOW   (count += 1)
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Threshold construction errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ThresholdError {
    #[error("thresholds must be finite (got low={low}, high={high})")]
    NotFinite { low: f64, high: f64 },

    #[error("low threshold ({low:.3} cm) must be below high threshold ({high:.3} cm)")]
    Inverted { low: f64, high: f64 },
}

/// Validated hysteresis band in centimeters. `low < high` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    low: f64,
    high: f64,
}

impl Thresholds {
    pub fn new(low: f64, high: f64) -> Result<Self, ThresholdError> {
        if !low.is_finite() || !high.is_finite() {
            return Err(ThresholdError::NotFinite { low, high });
        }
        if low >= high {
            return Err(ThresholdError::Inverted { low, high });
        }
        Ok(Self { low, high })
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low: crate::config::defaults::DEFAULT_LOW_THRESHOLD_CM,
            high: crate::config::defaults::DEFAULT_HIGH_THRESHOLD_CM,
        }
    }
}

/// Where the last confirmed excursion left the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Position {
    /// Near the sensor; waiting for a far reading
    #[default]
    AtStart,
    /// Seen far away; waiting to come back near
    InTransit,
}

/// Counting state for one session.
///
/// Plain `Copy` value: the run loop holds the only live instance and replaces
/// it with whatever [`SheetDetector::step`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetectorState {
    pub position: Position,
    pub sheet_count: u64,
}

impl DetectorState {
    /// Initial state: at start, nothing counted.
    pub const fn new() -> Self {
        Self {
            position: Position::AtStart,
            sheet_count: 0,
        }
    }
}

/// Pure step function over [`DetectorState`], parameterized by thresholds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SheetDetector {
    thresholds: Thresholds,
}

impl SheetDetector {
    pub const fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Apply one distance reading.
    ///
    /// Returns the next state and whether this reading completed a sheet.
    /// Both comparisons are strict: a reading exactly on a threshold is
    /// inside the dead band.
    #[must_use]
    pub fn step(&self, distance_cm: f64, state: DetectorState) -> (DetectorState, bool) {
        match state.position {
            Position::AtStart if distance_cm > self.thresholds.high => (
                DetectorState {
                    position: Position::InTransit,
                    ..state
                },
                false,
            ),
            Position::InTransit if distance_cm < self.thresholds.low => (
                DetectorState {
                    position: Position::AtStart,
                    sheet_count: state.sheet_count.saturating_add(1),
                },
                true,
            ),
            _ => (state, false),
        }
    }

    /// Fold a whole sequence of readings, starting from `state`.
    pub fn run<I>(&self, readings: I, state: DetectorState) -> DetectorState
    where
        I: IntoIterator<Item = f64>,
    {
        readings
            .into_iter()
            .fold(state, |s, d| self.step(d, s).0)
    }
}
