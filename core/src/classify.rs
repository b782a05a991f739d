//! Shape-based classification of metric envelopes.
//!
//! Precedence is Workout, then Sleep, then Scalar. An envelope that satisfies
//! both the workout and the sleep heuristics is treated as a workout.

use serde::Serialize;
use serde_json::Value;

use crate::fields::{FieldAliases, RawPoint, SAMPLE_VALUE};
use crate::kinds::{BiomarkerKind, kind_for_metric_name};
use crate::payload::MetricEnvelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "class", content = "kind")]
pub enum Classification {
    Workout,
    Sleep,
    Scalar(BiomarkerKind),
    Unrecognized,
}

const WORKOUT_NAME_MARKERS: &[&str] = &["workout", "cycling", "running"];

const WORKOUT_TYPE: FieldAliases = FieldAliases::new("workoutType", &["workoutType", "workout_type"]);
const START_DATE: FieldAliases = FieldAliases::new("startDate", &["startDate", "start_date"]);
const START: FieldAliases = FieldAliases::new("start", &["start", "start_time", "startTime"]);
const DURATION: FieldAliases = FieldAliases::new("duration", &["duration"]);
const TOTAL_ENERGY: FieldAliases =
    FieldAliases::new("totalEnergyBurned", &["totalEnergyBurned", "total_energy_burned"]);
const ACTIVE_ENERGY: FieldAliases =
    FieldAliases::new("activeEnergyBurned", &["activeEnergyBurned", "active_energy_burned"]);

/// Fields whose presence marks a bare envelope object as a single workout.
const SINGLE_WORKOUT_MARKERS: &[FieldAliases] =
    &[START, START_DATE, DURATION, TOTAL_ENERGY, ACTIVE_ENERGY];

/// Fields that mark a sleep point as structured (stages or in-bed window).
const SLEEP_STRUCTURE: FieldAliases = FieldAliases::new(
    "sleep structure",
    &[
        "inBedStart",
        "in_bed_start",
        "sleepStart",
        "sleep_start",
        "deep",
        "rem",
        "core",
        "awake",
        "asleep",
        "totalSleep",
        "total_sleep",
    ],
);

fn looks_like_single_workout(raw: &RawPoint) -> bool {
    SINGLE_WORKOUT_MARKERS.iter().any(|alias| alias.present(raw))
}

fn point_looks_like_workout(point: &RawPoint) -> bool {
    WORKOUT_TYPE.present(point)
        || (START_DATE.present(point) && TOTAL_ENERGY.present(point))
        || (START.present(point) && DURATION.present(point))
        || (START.present(point) && ACTIVE_ENERGY.present(point))
}

fn name_looks_like_workout(name: &str) -> bool {
    let lower = name.to_lowercase();
    WORKOUT_NAME_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn is_bare_number_point(point: &RawPoint) -> bool {
    SAMPLE_VALUE.value(point).is_some_and(|v| !v.is_object()) && !SLEEP_STRUCTURE.present(point)
}

/// Give a lone workout object (no `data` list) a one-element `data` list made
/// of itself, so it flows through the same per-point path as batched ones.
pub fn synthesize_single_workout(envelope: &mut MetricEnvelope) {
    let has_data_list = envelope.raw.get("data").is_some_and(Value::is_array);
    if envelope.data.is_empty() && !has_data_list && looks_like_single_workout(&envelope.raw) {
        envelope.data = vec![envelope.raw.clone()];
    }
}

/// Decide how an envelope is processed. Call `synthesize_single_workout` first.
pub fn classify(envelope: &MetricEnvelope) -> Classification {
    let first = envelope.data.first();
    if name_looks_like_workout(&envelope.name) || first.is_some_and(point_looks_like_workout) {
        return Classification::Workout;
    }

    let mapped = kind_for_metric_name(&envelope.name);
    if envelope.name.to_lowercase().contains("sleep") {
        let bare_duration = first.is_some_and(is_bare_number_point);
        return match mapped {
            Some(BiomarkerKind::SleepHours) if bare_duration => {
                Classification::Scalar(BiomarkerKind::SleepHours)
            }
            _ => Classification::Sleep,
        };
    }

    match mapped {
        Some(kind) => Classification::Scalar(kind),
        None => Classification::Unrecognized,
    }
}

/// Synthesize then classify, returning the possibly rewritten envelope.
pub fn prepare(mut envelope: MetricEnvelope) -> (MetricEnvelope, Classification) {
    synthesize_single_workout(&mut envelope);
    let classification = classify(&envelope);
    (envelope, classification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: Value) -> MetricEnvelope {
        MetricEnvelope::from_object(value.as_object().cloned().unwrap())
    }

    #[test]
    fn workout_by_envelope_name() {
        for name in ["workouts", "Indoor Cycling", "RUNNING_SESSIONS"] {
            let env = envelope(json!({"name": name, "data": [{"foo": 1}]}));
            assert_eq!(classify(&env), Classification::Workout, "{name}");
        }
    }

    #[test]
    fn workout_by_first_point_shape_in_both_casings() {
        let cases = [
            json!({"workoutType": "yoga"}),
            json!({"workout_type": "yoga"}),
            json!({"startDate": "2024-01-15", "totalEnergyBurned": 300}),
            json!({"start_date": "2024-01-15", "total_energy_burned": 300}),
            json!({"start": "2024-01-15", "duration": 1800}),
            json!({"start_time": "2024-01-15", "duration": 1800}),
            json!({"start": "2024-01-15", "active_energy_burned": {"qty": 200}}),
        ];
        for point in cases {
            let env = envelope(json!({"name": "entries", "data": [point.clone()]}));
            assert_eq!(classify(&env), Classification::Workout, "{point}");
        }
    }

    #[test]
    fn lone_workout_object_is_synthesized() {
        let env = envelope(json!({
            "name": "Outdoor Walk",
            "start": "2024-01-15 07:00:00 +0000",
            "end": "2024-01-15 07:30:00 +0000",
            "duration": 1800
        }));
        let (env, class) = prepare(env);
        assert_eq!(class, Classification::Workout);
        assert_eq!(env.data.len(), 1);
        assert_eq!(env.data[0]["name"], json!("Outdoor Walk"));
    }

    #[test]
    fn envelope_with_empty_data_list_is_not_synthesized() {
        let env = envelope(json!({"name": "step_count", "duration": 5, "data": []}));
        let (env, _) = prepare(env);
        assert!(env.data.is_empty());
    }

    #[test]
    fn sleep_by_name() {
        let env = envelope(json!({"name": "sleep_analysis", "data": [{"inBedStart": "2024-01-15 23:00:00 +0000", "deep": 1.0}]}));
        assert_eq!(classify(&env), Classification::Sleep);
    }

    #[test]
    fn bare_sleep_duration_is_scalar() {
        let env = envelope(json!({"name": "sleep_hours", "data": [{"qty": 7.5, "date": "2024-01-15"}]}));
        assert_eq!(
            classify(&env),
            Classification::Scalar(BiomarkerKind::SleepHours)
        );

        let structured = envelope(json!({"name": "sleep_hours", "data": [{"qty": 7.5, "deep": 1.2}]}));
        assert_eq!(classify(&structured), Classification::Sleep);
    }

    #[test]
    fn workout_wins_over_sleep() {
        let env = envelope(json!({"name": "sleep_workout", "data": [{"inBedStart": "x"}]}));
        assert_eq!(classify(&env), Classification::Workout);
    }

    #[test]
    fn scalar_and_unrecognized() {
        let env = envelope(json!({"name": "blood_glucose", "data": [{"qty": 5.5}]}));
        assert_eq!(
            classify(&env),
            Classification::Scalar(BiomarkerKind::BloodGlucose)
        );

        let env = envelope(json!({"name": "FooBarMetric", "data": [{"qty": 1}]}));
        assert_eq!(classify(&env), Classification::Unrecognized);
    }
}
