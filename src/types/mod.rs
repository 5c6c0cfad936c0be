//! Core data types shared across the counter.

mod reading;
mod sample;

pub use reading::{Reading, ReadingFilter, StationIdentity, StoredReading};
pub use sample::{DistanceSample, RawLine};
