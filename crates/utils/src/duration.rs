use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("invalid duration {0:?}")]
pub struct ParseDurationError(pub String);

/// Parse duration strings used in configuration: `"30s"`, `"5m"`, `"1h"`,
/// `"500ms"`. A bare number is seconds; the empty string is zero.
pub fn parse_duration(input: &str) -> Result<Duration, ParseDurationError> {
    let s = input.trim();
    if s.is_empty() || s == "0" {
        return Ok(Duration::ZERO);
    }

    let (value, unit) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let value: f64 = value
        .parse()
        .map_err(|_| ParseDurationError(input.to_string()))?;

    let secs = match unit.trim() {
        "ms" => value / 1000.0,
        "s" | "sec" => value,
        "m" | "min" => value * 60.0,
        "h" | "hr" => value * 3600.0,
        "d" => value * 86400.0,
        _ => return Err(ParseDurationError(input.to_string())),
    };
    if !secs.is_finite() || secs < 0.0 {
        return Err(ParseDurationError(input.to_string()));
    }
    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("").unwrap(), Duration::ZERO);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("10 fortnights").is_err());
    }
}
