#![forbid(unsafe_code)]

use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub(crate) fn ts_ms_to_rfc3339(ts_ms: i64) -> String {
    let nanos = i128::from(ts_ms) * 1_000_000i128;
    let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    dt.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub(crate) fn opt_ts_ms_to_json(ts_ms: Option<i64>) -> Value {
    ts_ms
        .map(|ms| Value::String(ts_ms_to_rfc3339(ms)))
        .unwrap_or(Value::Null)
}
