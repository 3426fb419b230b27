//! Duration parsing utilities.

use crate::error::{Error, Result};
use std::time::Duration;

/// Parse a duration string like "250ms", "5s", "2m", "1h" or "1500".
/// Supports:
/// - Plain numbers (interpreted as milliseconds): "1500"
/// - Milliseconds suffix: "250ms"
/// - Seconds suffix: "5s"
/// - Minutes suffix: "2m"
/// - Hours suffix: "1h"
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::Config("Empty duration string".to_string()));
    }

    // "ms" must be checked before the single-letter suffixes
    if let Some(num_str) = s.strip_suffix("ms") {
        return Ok(Duration::from_millis(parse_number(num_str, "milliseconds")?));
    }
    if let Some(num_str) = s.strip_suffix('h') {
        return scaled_secs(parse_number(num_str, "hours")?, 3600, s);
    }
    if let Some(num_str) = s.strip_suffix('m') {
        return scaled_secs(parse_number(num_str, "minutes")?, 60, s);
    }
    if let Some(num_str) = s.strip_suffix('s') {
        return Ok(Duration::from_secs(parse_number(num_str, "seconds")?));
    }

    // No suffix - treat as milliseconds
    Ok(Duration::from_millis(parse_number(s, "duration")?))
}

fn scaled_secs(value: u64, factor: u64, input: &str) -> Result<Duration> {
    value
        .checked_mul(factor)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::Config(format!("Duration out of range: {input}")))
}

fn parse_number(num_str: &str, unit: &str) -> Result<u64> {
    num_str
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid {unit} value: {num_str}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_suffixes() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_duration_bare_millis() {
        assert_eq!(parse_duration("30000").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration(" 100 ").unwrap(), Duration::from_millis(100));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("1.5s").is_err());
    }

    #[test]
    fn test_parse_duration_overflow() {
        let hours = format!("{}h", u64::MAX / 60);
        assert!(matches!(
            parse_duration(&hours),
            Err(Error::Config(msg)) if msg.contains("out of range")
        ));
        let minutes = format!("{}m", u64::MAX);
        assert!(matches!(parse_duration(&minutes), Err(Error::Config(_))));
        assert_eq!(
            parse_duration(&format!("{}m", u64::MAX / 60)).unwrap(),
            Duration::from_secs(u64::MAX / 60 * 60)
        );
    }
}
