//! Payload format resolution: turn an arbitrary parsed webhook body into an
//! ordered list of metric envelopes.
//!
//! Providers change their payload shape independently of each other, so the
//! resolver tries a fixed sequence of shapes and, when nothing matches, fails
//! with enough context (top-level keys, truncated body) to add the new case.

use serde::Serialize;
use serde_json::Value;

use crate::fields::{RawPoint, UNIT};

/// Maximum characters of the raw body kept in a `FormatError`.
pub const RAW_SNAPSHOT_CHARS: usize = 500;

/// One named group of raw data points, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEnvelope {
    pub name: String,
    /// Envelope-level unit, used when a point carries none of its own
    pub units: Option<String>,
    pub data: Vec<RawPoint>,
    /// The envelope object itself, for shapes where the envelope is the point
    pub raw: RawPoint,
}

impl MetricEnvelope {
    pub fn from_object(raw: RawPoint) -> Self {
        let name = ["name", "type", "metric", "metricName", "metric_name"]
            .iter()
            .filter_map(|key| raw.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|name| !name.is_empty())
            .unwrap_or_default()
            .to_string();
        let units = UNIT.text(&raw).map(str::to_string);
        let data = raw
            .get("data")
            .and_then(Value::as_array)
            .map(|points| {
                points
                    .iter()
                    .filter_map(|p| p.as_object().cloned())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            name,
            units,
            data,
            raw,
        }
    }
}

/// Which resolution strategy matched. Logged for operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadShape {
    DataMetrics,
    Metrics,
    RootList,
    DataList,
    SingleObject,
    FallbackScan,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormatError {
    #[error("no array data found")]
    NoArrayData {
        received_keys: Vec<String>,
        raw_snapshot: String,
    },
}

impl FormatError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoArrayData { .. } => "no array data found",
        }
    }

    /// Diagnostic body for the 400 response.
    pub fn details(&self) -> Value {
        match self {
            Self::NoArrayData {
                received_keys,
                raw_snapshot,
            } => serde_json::json!({
                "reason": self.reason(),
                "receivedKeys": received_keys,
                "rawSnapshot": raw_snapshot,
            }),
        }
    }
}

/// Resolved payload: the matched shape plus envelopes in payload order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPayload {
    pub shape: PayloadShape,
    pub envelopes: Vec<MetricEnvelope>,
}

fn non_empty_list(value: Option<&Value>) -> Option<&Vec<Value>> {
    value.and_then(Value::as_array).filter(|list| !list.is_empty())
}

fn any_list(value: Option<&Value>) -> Option<&Vec<Value>> {
    value.and_then(Value::as_array)
}

/// Locate the metric list inside `root`. First match wins.
pub fn resolve_metric_list(root: &Value) -> Result<(PayloadShape, Vec<Value>), FormatError> {
    if let Some(data) = root.get("data").and_then(Value::as_object) {
        if let Some(metrics) = any_list(data.get("metrics")) {
            let mut list = metrics.clone();
            if let Some(workouts) = non_empty_list(data.get("workouts")) {
                list.push(serde_json::json!({"name": "workouts", "data": workouts}));
            }
            return Ok((PayloadShape::DataMetrics, list));
        }
    }
    if let Some(metrics) = any_list(root.get("metrics")) {
        return Ok((PayloadShape::Metrics, metrics.clone()));
    }
    if let Some(list) = root.as_array() {
        return Ok((PayloadShape::RootList, list.clone()));
    }
    if let Some(data) = any_list(root.get("data")) {
        return Ok((PayloadShape::DataList, data.clone()));
    }
    if let Some(object) = root.as_object() {
        let named = object.contains_key("name") || object.contains_key("type");
        let has_list = object.values().any(Value::is_array);
        if named && !has_list {
            return Ok((PayloadShape::SingleObject, vec![root.clone()]));
        }
        if let Some(list) = fallback_scan(object) {
            return Ok((PayloadShape::FallbackScan, list.clone()));
        }
    }
    Err(no_array_data(root))
}

/// First non-empty list in payload key order, then one level down.
fn fallback_scan(object: &RawPoint) -> Option<&Vec<Value>> {
    object
        .values()
        .find_map(|value| non_empty_list(Some(value)))
        .or_else(|| {
            object
                .values()
                .filter_map(Value::as_object)
                .find_map(|nested| nested.values().find_map(|v| non_empty_list(Some(v))))
        })
}

fn no_array_data(root: &Value) -> FormatError {
    let received_keys = root
        .as_object()
        .map(|object| object.keys().cloned().collect())
        .unwrap_or_default();
    let raw = root.to_string();
    let raw_snapshot = match raw.char_indices().nth(RAW_SNAPSHOT_CHARS) {
        Some((cut, _)) => format!("{}...", &raw[..cut]),
        None => raw,
    };
    FormatError::NoArrayData {
        received_keys,
        raw_snapshot,
    }
}

/// Resolve `root` into envelopes. Non-object list elements are dropped.
pub fn resolve_envelopes(root: &Value) -> Result<ResolvedPayload, FormatError> {
    let (shape, list) = resolve_metric_list(root)?;
    let envelopes = list
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(MetricEnvelope::from_object(map)),
            _ => None,
        })
        .collect();
    Ok(ResolvedPayload { shape, envelopes })
}
