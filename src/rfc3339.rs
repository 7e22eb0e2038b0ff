//! Conversions to and from RFC 3339 timestamp format.
//!
//! Times cross the wire as RFC 3339 strings at millisecond precision, UTC;
//! inside the library they are Unix seconds as `f64`. Fractions smaller than
//! a millisecond are truncated, never rounded, in both directions.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Converts a Unix time to an RFC 3339 timestamp in UTC
/// (`yyyy-mm-ddThh:mm:ss.sssZ`).
pub fn to_timestamp(unix_seconds: f64) -> String {
    let millis = (unix_seconds * 1000.0) as i64;
    let time = DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default();
    time.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Converts a Unix time to an RFC 3339 timestamp with a fixed zone offset,
/// given in hours east of UTC (`yyyy-mm-ddThh:mm:ss.sss[+-]hh:mm`).
pub fn to_timestamp_with_zone(unix_seconds: f64, offset_hours: f64) -> String {
    let shifted = to_timestamp(unix_seconds + offset_hours * 3600.0);
    let sign = if offset_hours < 0.0 { '-' } else { '+' };
    let zone_minutes = (offset_hours.abs() * 60.0) as i64;
    shifted.replace(
        'Z',
        &format!("{}{:02}:{:02}", sign, zone_minutes / 60, zone_minutes % 60),
    )
}

/// Parses an RFC 3339 timestamp into Unix seconds since the epoch.
///
/// Whitespace anywhere in the input is ignored. The result is always an
/// integer multiple of 0.001.
pub fn from_timestamp(timestamp: &str) -> Result<f64> {
    let compact: String = timestamp.split_whitespace().collect();
    let parsed = DateTime::parse_from_rfc3339(&compact)
        .map_err(|_| Error::MalformedTimestamp(timestamp.to_string()))?;
    Ok(parsed.timestamp_millis() as f64 / 1000.0)
}
