//! Time-service response formats.
//!
//! Each service reports "now" under different keys. A format is picked by
//! probing which keys are present, then parsed into UTC.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::clock::TimeSyncError;

/// Known response schemas, in probing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFormat {
    /// `{"utc_datetime": "2024-05-01T12:00:00.123456+00:00"}`
    UtcDatetime,
    /// `{"datetime": "2024-05-01T17:00:00.123+05:00", "utc_offset": "+05:00"}`
    LocalWithOffset,
    /// `{"dateTime": "2024-05-01T12:00:00.1234567"}` (UTC, no zone)
    DateTime,
    /// `{"currentDateTime": "2024-05-01T12:00Z"}`
    CurrentDateTime,
}

impl TimeFormat {
    /// Pick the format whose keys are present.
    pub fn detect(body: &Value) -> Option<Self> {
        let has = |key: &str| body.get(key).is_some_and(Value::is_string);
        if has("utc_datetime") {
            Some(TimeFormat::UtcDatetime)
        } else if has("datetime") && has("utc_offset") {
            Some(TimeFormat::LocalWithOffset)
        } else if has("dateTime") {
            Some(TimeFormat::DateTime)
        } else if has("currentDateTime") {
            Some(TimeFormat::CurrentDateTime)
        } else {
            None
        }
    }

    pub fn parse(&self, body: &Value) -> Result<DateTime<Utc>, TimeSyncError> {
        let field = |key: &str| {
            body.get(key)
                .and_then(Value::as_str)
                .ok_or(TimeSyncError::UnknownSchema)
        };
        match self {
            TimeFormat::UtcDatetime => parse_timestamp(field("utc_datetime")?),
            TimeFormat::DateTime => parse_timestamp(field("dateTime")?),
            TimeFormat::CurrentDateTime => parse_timestamp(field("currentDateTime")?),
            TimeFormat::LocalWithOffset => {
                let local = field("datetime")?;
                if let Ok(dt) = DateTime::parse_from_rfc3339(local) {
                    return Ok(dt.with_timezone(&Utc));
                }
                let offset = parse_utc_offset(field("utc_offset")?)?;
                let naive = parse_naive(local)?;
                offset
                    .from_local_datetime(&naive)
                    .single()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or_else(|| parse_error(local, "ambiguous local time"))
            }
        }
    }
}

/// Detect the schema of a time-service response and parse it to UTC.
pub fn parse_reported_time(body: &Value) -> Result<DateTime<Utc>, TimeSyncError> {
    TimeFormat::detect(body)
        .ok_or(TimeSyncError::UnknownSchema)?
        .parse(body)
}

fn parse_error(value: &str, reason: impl ToString) -> TimeSyncError {
    TimeSyncError::Parse {
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// ISO-8601 with or without fraction and zone. Zone-less values are UTC.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, TimeSyncError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Minute precision with zone, e.g. "2024-05-01T12:00Z".
    for pattern in ["%Y-%m-%dT%H:%M%#z", "%Y-%m-%dT%H:%MZ"] {
        if let Ok(dt) = DateTime::parse_from_str(value, pattern) {
            return Ok(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, pattern) {
            return Ok(naive.and_utc());
        }
    }
    parse_naive(value).map(|naive| naive.and_utc())
}

fn parse_naive(value: &str) -> Result<NaiveDateTime, TimeSyncError> {
    let trimmed = value.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M"))
        .map_err(|e| parse_error(value, e))
}

/// Parse "+05:00", "-0330", "+05" or "Z".
fn parse_utc_offset(value: &str) -> Result<FixedOffset, TimeSyncError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).ok_or_else(|| parse_error(value, "offset out of range"));
    }
    let (sign, digits) = match value.as_bytes().first() {
        Some(b'+') => (1, &value[1..]),
        Some(b'-') => (-1, &value[1..]),
        _ => return Err(parse_error(value, "missing sign")),
    };
    let digits: String = digits.chars().filter(|c| *c != ':').collect();
    let (hours, minutes) = match digits.len() {
        2 => (digits.as_str(), "0"),
        4 => (&digits[..2], &digits[2..]),
        _ => return Err(parse_error(value, "expected hh or hh:mm")),
    };
    let hours: i32 = hours.parse().map_err(|e| parse_error(value, e))?;
    let minutes: i32 = minutes.parse().map_err(|e| parse_error(value, e))?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| parse_error(value, "offset out of range"))
}
