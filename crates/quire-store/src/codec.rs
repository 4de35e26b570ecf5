//! Column encodings shared by the repositories.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use quire_types::Timestamp;

/// Fixed-width RFC 3339 (microseconds, `Z`), so text order is time order.
pub(crate) fn fmt_ts(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<Timestamp> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn parse_opt_ts(
    idx: usize,
    value: Option<String>,
) -> rusqlite::Result<Option<Timestamp>> {
    value.map(|v| parse_ts(idx, &v)).transpose()
}

pub(crate) fn parse_id<T: From<Uuid>>(idx: usize, value: &str) -> rusqlite::Result<T> {
    Uuid::parse_str(value)
        .map(T::from)
        .map_err(|e| conversion_error(idx, e))
}

/// Parse one of the closed enums stored as text.
pub(crate) fn parse_enum<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse::<T>().map_err(|e| conversion_error(idx, e))
}

pub(crate) fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}
