//! Raw lines off the sensor link and the samples parsed from them.

use chrono::{DateTime, Local};

use crate::acquisition::{parse_distance, InvalidSampleFormat};

/// One line received from the link, with its arrival time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub arrived_at: DateTime<Local>,
    pub text: String,
}

impl RawLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self::at(Local::now(), text)
    }

    pub fn at(arrived_at: DateTime<Local>, text: impl Into<String>) -> Self {
        Self {
            arrived_at,
            text: text.into(),
        }
    }
}

/// A raw line paired with its parse outcome. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceSample {
    pub arrived_at: DateTime<Local>,
    pub raw: String,
    pub distance: Result<f64, InvalidSampleFormat>,
}

impl DistanceSample {
    pub fn parse(line: RawLine) -> Self {
        let distance = parse_distance(&line.text);
        Self {
            arrived_at: line.arrived_at,
            raw: line.text,
            distance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_keeps_arrival_time_and_raw_text() {
        let line = RawLine::new(" 42.5\r");
        let arrived = line.arrived_at;
        let sample = DistanceSample::parse(line);
        assert_eq!(sample.arrived_at, arrived);
        assert_eq!(sample.raw, " 42.5\r");
        assert_eq!(sample.distance, Ok(42.5));
    }

    #[test]
    fn test_sample_carries_parse_failure() {
        let sample = DistanceSample::parse(RawLine::new("ERR"));
        assert!(sample.distance.is_err());
    }
}
