//! Signed aggregator webhook events: one event per call, carrying an
//! `event_type` and a flat `data` record.

use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::biomarkers::{sample, samples_from_point};
use crate::fields::{FieldAliases, FieldError, RawPoint, SAMPLE_TIME, UNIT, quantity};
use crate::kinds::BiomarkerKind;
use crate::records::{NormalizedBiomarkerSample, SampleSource, SleepNight, WorkoutSession};
use crate::sleep::{SleepSegment, build_nights};
use crate::workouts::parse_workout;

const SECONDS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    pub event_type: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub client_user_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyResource {
    Workouts,
    Sleep,
    HeartRate,
    Body,
    Glucose,
    BloodPressure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ConnectionLifecycle,
    BackfillComplete,
    DailyData(DailyResource),
    Unsupported,
}

impl DailyResource {
    fn parse(resource: &str) -> Option<Self> {
        match resource {
            "workouts" | "workout" => Some(Self::Workouts),
            "sleep" => Some(Self::Sleep),
            "heartrate" | "heart_rate" => Some(Self::HeartRate),
            "weight" | "body" => Some(Self::Body),
            "glucose" => Some(Self::Glucose),
            "blood_pressure" => Some(Self::BloodPressure),
            _ => None,
        }
    }
}

/// `provider.connection.*` → lifecycle, `historical.data.*` → backfill done,
/// `daily.data.<resource>.*` → data.
pub fn classify_event_type(event_type: &str) -> EventKind {
    let parts: Vec<&str> = event_type.trim().split('.').collect();
    match parts.as_slice() {
        ["provider", "connection", ..] => EventKind::ConnectionLifecycle,
        ["historical", "data", ..] => EventKind::BackfillComplete,
        ["daily", "data", resource, ..] => DailyResource::parse(resource)
            .map(EventKind::DailyData)
            .unwrap_or(EventKind::Unsupported),
        _ => EventKind::Unsupported,
    }
}

/// Canonical records produced by one daily-data event.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderRecords {
    Workout(WorkoutSession),
    Sleep(Vec<SleepNight>),
    Samples(Vec<NormalizedBiomarkerSample>),
}

const SLEEP_STAGE_SECONDS: [(&str, &str); 4] = [
    ("awake", "awake"),
    ("light", "core"),
    ("deep", "deep"),
    ("rem", "rem"),
];

const BODY_FIELDS: [(FieldAliases, BiomarkerKind, Option<&str>); 3] = [
    (
        FieldAliases::new("weight", &["weight", "body_mass"]),
        BiomarkerKind::Weight,
        Some("kg"),
    ),
    (
        FieldAliases::new("fat", &["fat", "body_fat", "body_fat_percentage"]),
        BiomarkerKind::BodyFatPercentage,
        None,
    ),
    (
        FieldAliases::new("lean_body_mass", &["lean_body_mass", "lean_mass"]),
        BiomarkerKind::LeanBodyMass,
        Some("kg"),
    ),
];

fn object(data: &Value) -> Result<&RawPoint, FieldError> {
    data.as_object().ok_or(FieldError::Missing("data"))
}

/// Flat record, or the list under `data`/`samples` when the event batches.
fn timeseries_points(data: &Value) -> Vec<&RawPoint> {
    let Some(record) = data.as_object() else {
        return Vec::new();
    };
    for key in ["data", "samples"] {
        if let Some(list) = record.get(key).and_then(Value::as_array) {
            return list.iter().filter_map(Value::as_object).collect();
        }
    }
    vec![record]
}

fn sleep_segment(record: &RawPoint, default_tz: Tz) -> Result<SleepSegment, FieldError> {
    // Stage durations arrive in seconds; the aggregator works in hours.
    let mut hours = record.clone();
    for (field, stage) in SLEEP_STAGE_SECONDS {
        let seconds = record.get(field).and_then(quantity).map(|q| q.value);
        hours.remove(field);
        if let Some(seconds) = seconds {
            hours.insert(stage.to_string(), serde_json::json!(seconds / SECONDS_PER_HOUR));
        }
    }
    SleepSegment::from_point(&hours, default_tz)
}

fn body_samples(
    record: &RawPoint,
    user_id: Uuid,
    default_tz: Tz,
) -> Result<Vec<NormalizedBiomarkerSample>, FieldError> {
    let recorded_at = SAMPLE_TIME
        .timestamp(record, default_tz)?
        .with_timezone(&chrono::Utc);
    let samples: Vec<_> = BODY_FIELDS
        .iter()
        .filter_map(|(aliases, kind, unit)| {
            aliases
                .number(record)
                .map(|value| sample(user_id, *kind, value, *unit, SampleSource::Vital, recorded_at))
        })
        .collect();
    if samples.is_empty() {
        return Err(FieldError::Missing("weight"));
    }
    Ok(samples)
}

fn timeseries_samples(
    data: &Value,
    kind: BiomarkerKind,
    default_unit: Option<&str>,
    user_id: Uuid,
    default_tz: Tz,
) -> Result<Vec<NormalizedBiomarkerSample>, FieldError> {
    let points = timeseries_points(data);
    if points.is_empty() {
        return Err(FieldError::Missing("data"));
    }
    let mut samples = Vec::new();
    let mut last_error = None;
    for point in points {
        match samples_from_point(point, kind, default_unit, user_id, SampleSource::Vital, default_tz)
        {
            Ok(mut produced) => samples.append(&mut produced),
            Err(err) => last_error = Some(err),
        }
    }
    match (samples.is_empty(), last_error) {
        (true, Some(err)) => Err(err),
        _ => Ok(samples),
    }
}

/// Map one daily-data record onto canonical records for `user_id`.
pub fn records_from_daily_data(
    resource: DailyResource,
    data: &Value,
    user_id: Uuid,
    default_tz: Tz,
) -> Result<ProviderRecords, FieldError> {
    match resource {
        DailyResource::Workouts => parse_workout(
            object(data)?,
            "",
            user_id,
            SampleSource::Vital,
            default_tz,
        )
        .map(ProviderRecords::Workout),
        DailyResource::Sleep => {
            let segment = sleep_segment(object(data)?, default_tz)?;
            Ok(ProviderRecords::Sleep(build_nights(
                user_id,
                SampleSource::Vital,
                vec![segment],
            )))
        }
        DailyResource::HeartRate => {
            timeseries_samples(data, BiomarkerKind::HeartRate, Some("bpm"), user_id, default_tz)
                .map(ProviderRecords::Samples)
        }
        DailyResource::Glucose => {
            let unit = object(data).ok().and_then(|r| UNIT.text(r));
            timeseries_samples(data, BiomarkerKind::BloodGlucose, unit, user_id, default_tz)
                .map(ProviderRecords::Samples)
        }
        DailyResource::BloodPressure => timeseries_samples(
            data,
            BiomarkerKind::BloodPressureSystolic,
            Some("mmHg"),
            user_id,
            default_tz,
        )
        .map(ProviderRecords::Samples),
        DailyResource::Body => body_samples(object(data)?, user_id, default_tz)
            .map(ProviderRecords::Samples),
    }
}
