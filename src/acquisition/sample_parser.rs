//! Distance sample parser.
//!
//! The sensor prints one distance in centimeters per line. Noise and partial
//! reads are routine, so a bad line is an ordinary `Err`, not an exception.

use thiserror::Error;

/// The line was not a single finite decimal number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid sample format: {raw:?}")]
pub struct InvalidSampleFormat {
    /// Trimmed line contents, kept for the warning log
    pub raw: String,
}

/// Parse one trimmed line into a distance in centimeters.
///
/// The whole trimmed line must be the number; trailing units, a second
/// decimal point, an empty line, `NaN` or infinities are all rejected.
pub fn parse_distance(line: &str) -> Result<f64, InvalidSampleFormat> {
    let trimmed = line.trim();
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(InvalidSampleFormat {
            raw: trimmed.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_numbers() {
        assert_eq!(parse_distance("42"), Ok(42.0));
        assert_eq!(parse_distance("3.5"), Ok(3.5));
        assert_eq!(parse_distance("120.25"), Ok(120.25));
        assert_eq!(parse_distance("-1.5"), Ok(-1.5));
        assert_eq!(parse_distance("0"), Ok(0.0));
    }

    #[test]
    fn test_surrounding_whitespace_is_trimmed() {
        assert_eq!(parse_distance("  12.0\r\n"), Ok(12.0));
        assert_eq!(parse_distance("\t7\t"), Ok(7.0));
    }

    #[test]
    fn test_malformed_lines() {
        for bad in ["abc", "", "   ", "12.3.4", "12cm", "1 2", "--3", "0x10", "12,5"] {
            let err = parse_distance(bad).unwrap_err();
            assert_eq!(err.raw, bad.trim(), "input {bad:?}");
        }
    }

    #[test]
    fn test_non_finite_values_rejected() {
        for bad in ["NaN", "nan", "inf", "-inf", "infinity", "1e400"] {
            assert!(parse_distance(bad).is_err(), "input {bad:?}");
        }
    }

    #[test]
    fn test_replacement_characters_rejected() {
        assert!(parse_distance("4\u{fffd}2").is_err());
    }
}
