//! Normalized records written by the pipeline and the counts reported per call.

use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::kinds::BiomarkerKind;

/// Where a stored record came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    /// Batch health-export app posting metric envelopes
    HealthExport,
    /// Signed aggregator webhook, one event per call
    Vital,
    /// Derived locally from other samples
    Calculated,
}

impl SampleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HealthExport => "health_export",
            Self::Vital => "vital",
            Self::Calculated => "calculated",
        }
    }
}

impl fmt::Display for SampleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "health_export" => Ok(Self::HealthExport),
            "vital" => Ok(Self::Vital),
            "calculated" => Ok(Self::Calculated),
            other => Err(format!("unknown sample source: {other}")),
        }
    }
}

/// One scalar biomarker reading in canonical units.
///
/// Identity is `(user_id, kind, recorded_at, source)`: a later write with the
/// same key overwrites the earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedBiomarkerSample {
    pub user_id: Uuid,
    pub kind: BiomarkerKind,
    pub value: f64,
    pub unit: String,
    pub source: SampleSource,
    pub recorded_at: DateTime<Utc>,
}

pub type SampleKey = (Uuid, BiomarkerKind, DateTime<Utc>, SampleSource);

impl NormalizedBiomarkerSample {
    pub fn key(&self) -> SampleKey {
        (self.user_id, self.kind, self.recorded_at, self.source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum SleepQuality {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl SleepQuality {
    pub fn from_score(score: i32) -> Self {
        match score {
            s if s >= 85 => Self::Excellent,
            s if s >= 75 => Self::Good,
            s if s >= 60 => Self::Fair,
            _ => Self::Poor,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poor => "Poor",
            Self::Fair => "Fair",
            Self::Good => "Good",
            Self::Excellent => "Excellent",
        }
    }
}

impl FromStr for SleepQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poor" => Ok(Self::Poor),
            "fair" => Ok(Self::Fair),
            "good" => Ok(Self::Good),
            "excellent" => Ok(Self::Excellent),
            other => Err(format!("unknown sleep quality: {other}")),
        }
    }
}

/// One logical night of sleep. Identity is `(user_id, night_date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SleepNight {
    pub user_id: Uuid,
    /// Calendar date of the evening the night started
    pub night_date: NaiveDate,
    pub bedtime: DateTime<Utc>,
    pub waketime: DateTime<Utc>,
    pub total_minutes: i32,
    pub awake_minutes: i32,
    pub light_minutes: i32,
    pub deep_minutes: i32,
    pub rem_minutes: i32,
    /// 0-100
    pub sleep_score: i32,
    pub quality: SleepQuality,
    pub source: SampleSource,
}

/// One workout. Workouts are atomic in source data and never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub workout_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Wall-clock date of `start_time` in the offset it was reported in
    pub local_date: NaiveDate,
    /// Minutes
    pub duration: i32,
    /// Meters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_heart_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_heart_rate: Option<f64>,
    pub source_type: SampleSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training_schedule_id: Option<Uuid>,
}

impl WorkoutSession {
    /// External dedup key: the provider id when present, otherwise type and
    /// start instant, which are stable across redeliveries.
    pub fn dedup_key(&self) -> String {
        match &self.source_id {
            Some(id) => id.clone(),
            None => format!("{}@{}", self.workout_type, self.start_time.to_rfc3339()),
        }
    }
}

/// A user goal. Owned elsewhere; ingestion only pushes `current_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub metric_type: String,
    pub current_value: Option<f64>,
    pub target_value: Option<f64>,
}

/// A planned training day that a workout may complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrainingScheduleEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub scheduled_date: NaiveDate,
    /// `None` matches any workout type
    pub workout_type: Option<String>,
    pub completed: bool,
}

/// Per-request write counts. Built by folding per-envelope results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestCounts {
    pub biomarkers_count: usize,
    pub sleep_sessions_count: usize,
    pub workout_sessions_count: usize,
}

impl AddAssign for IngestCounts {
    fn add_assign(&mut self, other: Self) {
        self.biomarkers_count += other.biomarkers_count;
        self.sleep_sessions_count += other.sleep_sessions_count;
        self.workout_sessions_count += other.workout_sessions_count;
    }
}

/// Response body of a successful ingestion call.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub success: bool,
    #[serde(flatten)]
    pub counts: IngestCounts,
}

impl From<IngestCounts> for IngestSummary {
    fn from(counts: IngestCounts) -> Self {
        Self {
            success: true,
            counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn quality_thresholds() {
        assert_eq!(SleepQuality::from_score(85), SleepQuality::Excellent);
        assert_eq!(SleepQuality::from_score(84), SleepQuality::Good);
        assert_eq!(SleepQuality::from_score(75), SleepQuality::Good);
        assert_eq!(SleepQuality::from_score(60), SleepQuality::Fair);
        assert_eq!(SleepQuality::from_score(59), SleepQuality::Poor);
    }

    #[test]
    fn counts_fold_with_add_assign() {
        let mut total = IngestCounts::default();
        total += IngestCounts {
            biomarkers_count: 2,
            ..Default::default()
        };
        total += IngestCounts {
            biomarkers_count: 1,
            workout_sessions_count: 1,
            sleep_sessions_count: 3,
        };
        assert_eq!(total.biomarkers_count, 3);
        assert_eq!(total.sleep_sessions_count, 3);
        assert_eq!(total.workout_sessions_count, 1);
    }

    #[test]
    fn summary_serializes_flat_camel_case() {
        let summary = IngestSummary::from(IngestCounts {
            biomarkers_count: 4,
            sleep_sessions_count: 1,
            workout_sessions_count: 0,
        });
        let json = serde_json::to_value(summary).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "success": true,
                "biomarkersCount": 4,
                "sleepSessionsCount": 1,
                "workoutSessionsCount": 0
            })
        );
    }

    #[test]
    fn dedup_key_prefers_provider_id() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 7, 0, 0).unwrap();
        let mut workout = WorkoutSession {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            workout_type: "running".to_string(),
            start_time: start,
            end_time: start,
            local_date: start.date_naive(),
            duration: 0,
            distance: None,
            calories: None,
            avg_heart_rate: None,
            max_heart_rate: None,
            source_type: SampleSource::HealthExport,
            source_id: None,
            training_schedule_id: None,
        };
        assert_eq!(workout.dedup_key(), "running@2024-01-15T07:00:00+00:00");
        workout.source_id = Some("abc".to_string());
        assert_eq!(workout.dedup_key(), "abc");
    }

    #[test]
    fn source_roundtrips_through_str() {
        for source in [
            SampleSource::HealthExport,
            SampleSource::Vital,
            SampleSource::Calculated,
        ] {
            assert_eq!(source.as_str().parse::<SampleSource>(), Ok(source));
        }
    }
}
