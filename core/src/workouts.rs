//! Workout normalization: one raw provider point becomes one `WorkoutSession`.

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use uuid::Uuid;

use crate::fields::{FieldAliases, FieldError, Quantity, RawPoint, quantity};
use crate::records::{SampleSource, WorkoutSession};
use crate::units::{KM_TO_METERS, distance_to_meters, energy_to_kcal};

pub const OTHER: &str = "other";

const START: FieldAliases = FieldAliases::new(
    "start",
    &["start", "startDate", "start_date", "startTime", "start_time", "time_start"],
);
const END: FieldAliases = FieldAliases::new(
    "end",
    &["end", "endDate", "end_date", "endTime", "end_time", "time_end"],
);
const DURATION_SECONDS: FieldAliases = FieldAliases::new("duration", &["duration"]);
const DISTANCE: FieldAliases = FieldAliases::new(
    "distance",
    &["distance", "totalDistance", "total_distance", "distanceMeters"],
);
const CALORIES: FieldAliases = FieldAliases::new(
    "calories",
    &[
        "activeEnergyBurned",
        "active_energy_burned",
        "totalEnergyBurned",
        "total_energy_burned",
        "activeEnergy",
        "calories",
    ],
);
const AVG_HEART_RATE: FieldAliases = FieldAliases::new(
    "avgHeartRate",
    &["avgHeartRate", "avg_heart_rate", "averageHeartRate", "average_hr"],
);
const MAX_HEART_RATE: FieldAliases =
    FieldAliases::new("maxHeartRate", &["maxHeartRate", "max_heart_rate", "max_hr"]);
const HEART_RATE_SUMMARY: FieldAliases = FieldAliases::new("heartRate", &["heartRate", "heart_rate"]);
const SOURCE_ID: FieldAliases = FieldAliases::new(
    "id",
    &["id", "workoutId", "workout_id", "uuid", "sourceId", "source_id"],
);
const ACTIVITY_TYPE: FieldAliases = FieldAliases::new(
    "workoutType",
    &[
        "workoutType",
        "workout_type",
        "activityType",
        "activity_type",
        "sport",
        "type",
        "name",
    ],
);

/// Provider activity names, normalized to lowercase words.
const WORKOUT_TYPE_TABLE: &[(&str, &str)] = &[
    ("running", "running"),
    ("run", "running"),
    ("outdoor run", "running"),
    ("indoor run", "running"),
    ("treadmill", "running"),
    ("trail running", "running"),
    ("cycling", "cycling"),
    ("outdoor cycle", "cycling"),
    ("indoor cycle", "cycling"),
    ("biking", "cycling"),
    ("ride", "cycling"),
    ("walking", "walking"),
    ("walk", "walking"),
    ("outdoor walk", "walking"),
    ("indoor walk", "walking"),
    ("hiking", "hiking"),
    ("swimming", "swimming"),
    ("pool swim", "swimming"),
    ("open water swim", "swimming"),
    ("traditional strength training", "strength"),
    ("functional strength training", "strength"),
    ("strength training", "strength"),
    ("weight training", "strength"),
    ("yoga", "yoga"),
    ("hiit", "hiit"),
    ("high intensity interval training", "hiit"),
    ("rowing", "rowing"),
    ("indoor rowing", "rowing"),
    ("elliptical", "elliptical"),
    ("stair climbing", "stair-climbing"),
    ("stairs", "stair-climbing"),
    ("pilates", "pilates"),
];

const ENVELOPE_NAME_FALLBACKS: &[(&str, &str)] = &[
    ("cycling", "cycling"),
    ("running", "running"),
    ("walking", "walking"),
];

fn normalize_activity(raw: &str) -> String {
    raw.to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Look an activity name up in the fixed table.
pub fn canonical_workout_type(raw: &str) -> Option<&'static str> {
    let key = normalize_activity(raw);
    WORKOUT_TYPE_TABLE
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| *canonical)
}

fn activity_name(point: &RawPoint) -> Option<String> {
    let value = ACTIVITY_TYPE.value(point)?;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(sport) => ["name", "slug"]
            .iter()
            .find_map(|key| sport.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

/// Canonical type from the point itself, then the envelope name, then "other".
pub fn resolve_workout_type(point: &RawPoint, envelope_name: &str) -> String {
    if let Some(canonical) = activity_name(point).as_deref().and_then(canonical_workout_type) {
        return canonical.to_string();
    }
    let lower = envelope_name.to_lowercase();
    ENVELOPE_NAME_FALLBACKS
        .iter()
        .find(|(marker, _)| lower.contains(marker))
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| OTHER.to_string())
}

/// Meters. Bare numbers are meters; nested `{qty, unit}` defaults to km.
fn distance_meters(point: &RawPoint) -> Option<f64> {
    let value = DISTANCE.value(point)?;
    match value {
        Value::Object(_) => {
            let Quantity { value, unit } = quantity(value)?;
            Some(match unit.as_deref() {
                Some(unit) => distance_to_meters(value, Some(unit)),
                None => value * KM_TO_METERS,
            })
        }
        other => quantity(other).map(|q| q.value),
    }
}

fn calories(point: &RawPoint) -> Option<f64> {
    CALORIES
        .quantity(point)
        .map(|q| energy_to_kcal(q.value, q.unit.as_deref()))
}

fn heart_rate_summary(point: &RawPoint, key: &str) -> Option<f64> {
    HEART_RATE_SUMMARY
        .value(point)
        .and_then(Value::as_object)
        .and_then(|summary| summary.get(key))
        .and_then(quantity)
        .map(|q| q.value)
}

fn source_id(point: &RawPoint) -> Option<String> {
    match SOURCE_ID.value(point)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `start + seconds`, or `None` when the offset is not finite or leaves the
/// representable range.
fn end_after(start: DateTime<FixedOffset>, seconds: f64) -> Option<DateTime<FixedOffset>> {
    let millis = seconds * 1000.0;
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }
    let offset = TimeDelta::try_milliseconds(millis.round() as i64)?;
    start.checked_add_signed(offset)
}

/// Build a workout from one raw point. Missing start, or missing end with no
/// duration to derive it from, drops the point.
pub fn parse_workout(
    point: &RawPoint,
    envelope_name: &str,
    user_id: Uuid,
    source: SampleSource,
    default_tz: Tz,
) -> Result<WorkoutSession, FieldError> {
    let start = START.timestamp(point, default_tz)?;
    let end = match END.timestamp(point, default_tz) {
        Ok(end) => end,
        Err(FieldError::Missing(_)) => {
            let seconds = DURATION_SECONDS
                .number(point)
                .ok_or(FieldError::Missing("end"))?;
            end_after(start, seconds).ok_or(FieldError::Invalid("duration"))?
        }
        Err(err) => return Err(err),
    };
    if end < start {
        return Err(FieldError::Invalid("end"));
    }

    let duration = ((end - start).num_seconds() as f64 / 60.0).round() as i32;

    Ok(WorkoutSession {
        id: Uuid::now_v7(),
        user_id,
        workout_type: resolve_workout_type(point, envelope_name),
        start_time: start.with_timezone(&Utc),
        end_time: end.with_timezone(&Utc),
        local_date: start.date_naive(),
        duration,
        distance: distance_meters(point),
        calories: calories(point),
        avg_heart_rate: AVG_HEART_RATE
            .number(point)
            .or_else(|| heart_rate_summary(point, "avg")),
        max_heart_rate: MAX_HEART_RATE
            .number(point)
            .or_else(|| heart_rate_summary(point, "max")),
        source_type: source,
        source_id: source_id(point),
        training_schedule_id: None,
    })
}
