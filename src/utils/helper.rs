use chrono::Utc;
use std::time::Duration;
use crate::error::{Error, Result};

/// Window used by period queries when the caller gives none.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

/// Get current timestamp in milliseconds since epoch
pub fn current_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parses a period such as `30s`, `5m`, `1h30m`, `250ms` or `1.5h`.
/// A missing or empty value yields [`DEFAULT_PERIOD`].
pub fn parse_period(raw: Option<&str>) -> Result<Duration> {
    match raw.map(str::trim) {
        None | Some("") => Ok(DEFAULT_PERIOD),
        Some(text) => parse_duration(text),
    }
}

/// Duration syntax: one or more `<number><unit>` groups with units
/// `ns`, `us`, `µs`, `ms`, `s`, `m`, `h`. A bare `0` is accepted.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let invalid = || Error::InvalidPeriod(text.to_string());

    let body = text.strip_prefix('+').unwrap_or(text);
    if body.starts_with('-') {
        return Err(invalid());
    }
    if body == "0" {
        return Ok(Duration::ZERO);
    }
    if body.is_empty() {
        return Err(invalid());
    }

    let mut total_nanos = 0f64;
    let mut rest = body;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        let (number, tail) = rest.split_at(number_len);
        if number.is_empty() || number == "." {
            return Err(invalid());
        }
        let value: f64 = number.parse().map_err(|_| invalid())?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, remaining) = tail.split_at(unit_len);

        let nanos_per_unit = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };

        total_nanos += value * nanos_per_unit;
        rest = remaining;
    }

    if !total_nanos.is_finite() || total_nanos >= u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}
