//! Alias-tolerant field extraction over untyped provider data points.
//!
//! Every concept (start time, distance, ...) is described by a `FieldAliases`
//! table: an ordered list of key names tried in turn, first non-null wins.
//! Adding a provider variant means adding a name to a table, not a branch.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value;

/// One raw provider data point. The schema varies per provider.
pub type RawPoint = serde_json::Map<String, Value>;

/// Epoch values above this are milliseconds rather than seconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("missing field '{0}'")]
    Missing(&'static str),
    #[error("field '{0}' could not be parsed")]
    Invalid(&'static str),
}

/// A numeric reading with the unit it arrived in, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldAliases {
    pub concept: &'static str,
    pub names: &'static [&'static str],
}

impl FieldAliases {
    pub const fn new(concept: &'static str, names: &'static [&'static str]) -> Self {
        Self { concept, names }
    }

    pub fn value<'a>(&self, point: &'a RawPoint) -> Option<&'a Value> {
        self.names
            .iter()
            .filter_map(|name| point.get(*name))
            .find(|value| !value.is_null())
    }

    pub fn present(&self, point: &RawPoint) -> bool {
        self.value(point).is_some()
    }

    pub fn text<'a>(&self, point: &'a RawPoint) -> Option<&'a str> {
        self.names
            .iter()
            .filter_map(|name| point.get(*name).and_then(Value::as_str))
            .map(str::trim)
            .find(|text| !text.is_empty())
    }

    /// First alias that holds a usable number, bare or as `{qty, unit}`.
    pub fn quantity(&self, point: &RawPoint) -> Option<Quantity> {
        self.names
            .iter()
            .filter_map(|name| point.get(*name))
            .find_map(quantity)
    }

    pub fn number(&self, point: &RawPoint) -> Option<f64> {
        self.quantity(point).map(|q| q.value)
    }

    pub fn timestamp(
        &self,
        point: &RawPoint,
        default_tz: Tz,
    ) -> Result<DateTime<FixedOffset>, FieldError> {
        let value = self.value(point).ok_or(FieldError::Missing(self.concept))?;
        parse_timestamp(value, default_tz).ok_or(FieldError::Invalid(self.concept))
    }
}

pub const SAMPLE_TIME: FieldAliases = FieldAliases::new(
    "date",
    &[
        "date",
        "timestamp",
        "startDate",
        "start_date",
        "recordedAt",
        "recorded_at",
        "time",
        "calendar_date",
    ],
);

pub const SAMPLE_VALUE: FieldAliases = FieldAliases::new(
    "qty",
    &["qty", "value", "quantity", "Avg", "avg", "average", "count"],
);

pub const UNIT: FieldAliases = FieldAliases::new("units", &["units", "unit"]);

/// Interpret a JSON value as a number: bare number, numeric string, or an
/// object carrying `qty`/`value`.
pub fn quantity(value: &Value) -> Option<Quantity> {
    match value {
        Value::Number(n) => n.as_f64().map(|value| Quantity { value, unit: None }),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|value| Quantity { value, unit: None }),
        Value::Object(map) => {
            let inner = ["qty", "value", "quantity", "amount"]
                .iter()
                .filter_map(|key| map.get(*key))
                .find_map(|v| match v {
                    Value::Object(_) => None,
                    other => quantity(other),
                })?;
            let unit = UNIT.text(map).map(str::to_string);
            Some(Quantity {
                value: inner.value,
                unit,
            })
        }
        _ => None,
    }
}

/// Parse the timestamp shapes providers send, keeping the original offset so
/// local wall-clock rules (night keys, workout dates) stay correct.
pub fn parse_timestamp(value: &Value, default_tz: Tz) -> Option<DateTime<FixedOffset>> {
    match value {
        Value::String(s) => parse_timestamp_str(s.trim(), default_tz),
        Value::Number(n) => {
            let raw = n.as_f64()?;
            let millis = if raw.abs() >= EPOCH_MILLIS_THRESHOLD {
                raw as i64
            } else {
                (raw * 1000.0) as i64
            };
            let utc = Utc.timestamp_millis_opt(millis).single()?;
            Some(utc.with_timezone(&default_tz).fixed_offset())
        }
        _ => None,
    }
}

fn parse_timestamp_str(s: &str, default_tz: Tz) -> Option<DateTime<FixedOffset>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    for format in ["%Y-%m-%d %H:%M:%S %z", "%Y-%m-%d %H:%M:%S%.f %z", "%Y-%m-%dT%H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return localize(naive, default_tz);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return localize(date.and_hms_opt(0, 0, 0)?, default_tz);
    }
    if let Ok(epoch) = s.parse::<f64>() {
        return parse_timestamp(&serde_json::json!(epoch), default_tz);
    }
    None
}

fn localize(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<FixedOffset>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
}
