//! Sleep night aggregation.
//!
//! Wearable exports emit one row per sleep stage, not per night. Segments are
//! keyed to a night by their local bedtime hour, merged, scored when the
//! provider gave no score, and labelled.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use crate::fields::{FieldAliases, FieldError, RawPoint};
use crate::records::{SampleSource, SleepNight, SleepQuality};

/// Bedtimes at or after this local hour belong to that same evening's night.
pub const EVENING_CUTOFF_HOUR: u32 = 15;
pub const BASE_SCORE: i32 = 70;

const IN_BED_START: FieldAliases = FieldAliases::new(
    "inBedStart",
    &[
        "inBedStart",
        "in_bed_start",
        "sleepStart",
        "sleep_start",
        "bedtime_start",
        "startDate",
        "start_date",
        "start",
    ],
);
const IN_BED_END: FieldAliases = FieldAliases::new(
    "inBedEnd",
    &[
        "inBedEnd",
        "in_bed_end",
        "sleepEnd",
        "sleep_end",
        "bedtime_stop",
        "bedtime_end",
        "endDate",
        "end_date",
        "end",
    ],
);
const AWAKE: FieldAliases = FieldAliases::new("awake", &["awake"]);
const DEEP: FieldAliases = FieldAliases::new("deep", &["deep"]);
const REM: FieldAliases = FieldAliases::new("rem", &["rem"]);
const CORE: FieldAliases = FieldAliases::new("core", &["core", "light"]);
const ASLEEP: FieldAliases = FieldAliases::new("asleep", &["totalSleep", "total_sleep", "asleep"]);
const SCORE: FieldAliases = FieldAliases::new("sleepScore", &["sleepScore", "sleep_score", "score"]);

/// One raw sleep row. Stage durations are in hours.
#[derive(Debug, Clone, PartialEq)]
pub struct SleepSegment {
    pub in_bed_start: DateTime<FixedOffset>,
    pub in_bed_end: DateTime<FixedOffset>,
    pub awake_hours: f64,
    pub deep_hours: f64,
    pub rem_hours: f64,
    pub core_hours: f64,
    pub asleep_hours: Option<f64>,
    pub score: Option<f64>,
}

impl SleepSegment {
    pub fn from_point(point: &RawPoint, default_tz: Tz) -> Result<Self, FieldError> {
        let in_bed_start = IN_BED_START.timestamp(point, default_tz)?;
        let in_bed_end = IN_BED_END.timestamp(point, default_tz)?;
        if in_bed_end < in_bed_start {
            return Err(FieldError::Invalid("inBedEnd"));
        }
        Ok(Self {
            in_bed_start,
            in_bed_end,
            awake_hours: AWAKE.number(point).unwrap_or(0.0),
            deep_hours: DEEP.number(point).unwrap_or(0.0),
            rem_hours: REM.number(point).unwrap_or(0.0),
            core_hours: CORE.number(point).unwrap_or(0.0),
            asleep_hours: ASLEEP.number(point),
            score: SCORE.number(point),
        })
    }
}

/// Night a segment belongs to. Bedtimes before 15:00 local are shifted back
/// 12 hours so post-midnight rows land on the previous evening.
pub fn night_key(in_bed_start: DateTime<FixedOffset>) -> NaiveDate {
    if in_bed_start.hour() >= EVENING_CUTOFF_HOUR {
        in_bed_start.date_naive()
    } else {
        (in_bed_start - Duration::hours(12)).date_naive()
    }
}

/// Segments of one night, merged. Minutes are rounded once, after summing.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedNight {
    pub night_date: NaiveDate,
    pub bedtime: DateTime<FixedOffset>,
    pub waketime: DateTime<FixedOffset>,
    pub awake_minutes: i32,
    pub light_minutes: i32,
    pub deep_minutes: i32,
    pub rem_minutes: i32,
    pub total_minutes: i32,
    pub explicit_score: Option<f64>,
}

fn hours_to_minutes(hours: f64) -> i32 {
    (hours * 60.0).round() as i32
}

fn merge_group(night_date: NaiveDate, segments: &[SleepSegment]) -> Option<MergedNight> {
    let bedtime = segments.iter().map(|s| s.in_bed_start).min()?;
    let waketime = segments.iter().map(|s| s.in_bed_end).max()?;
    let awake: f64 = segments.iter().map(|s| s.awake_hours).sum();
    let deep: f64 = segments.iter().map(|s| s.deep_hours).sum();
    let rem: f64 = segments.iter().map(|s| s.rem_hours).sum();
    let core: f64 = segments.iter().map(|s| s.core_hours).sum();
    let explicit_score = segments
        .iter()
        .filter_map(|s| s.score)
        .fold(None, |best: Option<f64>, score| Some(best.map_or(score, |b| b.max(score))));

    let staged = deep + rem + core;
    let total_hours = if staged > 0.0 {
        staged
    } else {
        let asleep: f64 = segments.iter().filter_map(|s| s.asleep_hours).sum();
        if asleep > 0.0 {
            asleep
        } else {
            let span = (waketime - bedtime).num_seconds() as f64 / 3600.0;
            (span - awake).max(0.0)
        }
    };

    Some(MergedNight {
        night_date,
        bedtime,
        waketime,
        awake_minutes: hours_to_minutes(awake),
        light_minutes: hours_to_minutes(core),
        deep_minutes: hours_to_minutes(deep),
        rem_minutes: hours_to_minutes(rem),
        total_minutes: hours_to_minutes(total_hours),
        explicit_score,
    })
}

/// Group by night key and merge. Output is ordered by night.
pub fn merge_segments(segments: Vec<SleepSegment>) -> Vec<MergedNight> {
    let mut groups: BTreeMap<NaiveDate, Vec<SleepSegment>> = BTreeMap::new();
    for segment in segments {
        groups
            .entry(night_key(segment.in_bed_start))
            .or_default()
            .push(segment);
    }
    groups
        .iter()
        .filter_map(|(night, group)| merge_group(*night, group))
        .collect()
}

/// Local score for nights without a provider score.
pub fn compute_sleep_score(total_minutes: i32, deep_minutes: i32, rem_minutes: i32) -> i32 {
    let mut score = BASE_SCORE;
    let hours = total_minutes as f64 / 60.0;
    if (7.0..=9.0).contains(&hours) {
        score += 10;
    } else if (6.0..7.0).contains(&hours) {
        score += 5;
    } else if hours < 6.0 {
        score -= 10;
    }

    let (deep_fraction, rem_fraction) = if total_minutes > 0 {
        (
            deep_minutes as f64 / total_minutes as f64,
            rem_minutes as f64 / total_minutes as f64,
        )
    } else {
        (0.0, 0.0)
    };

    if (0.15..=0.25).contains(&deep_fraction) {
        score += 10;
    } else if deep_fraction < 0.10 {
        score -= 5;
    }
    if (0.18..=0.28).contains(&rem_fraction) {
        score += 10;
    } else if rem_fraction < 0.15 {
        score -= 5;
    }

    score.clamp(0, 100)
}

impl MergedNight {
    pub fn into_sleep_night(self, user_id: Uuid, source: SampleSource) -> SleepNight {
        let sleep_score = match self.explicit_score {
            Some(score) => (score.round() as i32).clamp(0, 100),
            None => compute_sleep_score(self.total_minutes, self.deep_minutes, self.rem_minutes),
        };
        SleepNight {
            user_id,
            night_date: self.night_date,
            bedtime: self.bedtime.with_timezone(&Utc),
            waketime: self.waketime.with_timezone(&Utc),
            total_minutes: self.total_minutes,
            awake_minutes: self.awake_minutes,
            light_minutes: self.light_minutes,
            deep_minutes: self.deep_minutes,
            rem_minutes: self.rem_minutes,
            sleep_score,
            quality: SleepQuality::from_score(sleep_score),
            source,
        }
    }
}

/// Full aggregation: merge, score and label one night per key.
pub fn build_nights(
    user_id: Uuid,
    source: SampleSource,
    segments: Vec<SleepSegment>,
) -> Vec<SleepNight> {
    merge_segments(segments)
        .into_iter()
        .map(|night| night.into_sleep_night(user_id, source))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<FixedOffset> {
        FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
    }

    fn segment(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>, deep: f64) -> SleepSegment {
        SleepSegment {
            in_bed_start: start,
            in_bed_end: end,
            awake_hours: 0.0,
            deep_hours: deep,
            rem_hours: 0.0,
            core_hours: 0.0,
            asleep_hours: None,
            score: None,
        }
    }

    #[test]
    fn bedtime_before_midnight_keys_to_same_day() {
        let key = night_key(at(2024, 1, 15, 23, 30));
        assert_eq!(key, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn bedtime_after_midnight_keys_to_previous_day() {
        let key = night_key(at(2024, 1, 15, 1, 0));
        assert_eq!(key, NaiveDate::from_ymd_opt(2024, 1, 14).unwrap());
    }

    #[test]
    fn night_key_uses_local_wall_clock_not_utc() {
        // 23:30 at -05:00 is 04:30 UTC the next day
        let start = at(2024, 1, 15, 23, 30);
        assert_eq!(start.with_timezone(&Utc).date_naive().to_string(), "2024-01-16");
        assert_eq!(night_key(start).to_string(), "2024-01-15");
    }

    #[test]
    fn stages_of_one_night_merge() {
        let nights = merge_segments(vec![
            segment(at(2024, 1, 15, 23, 30), at(2024, 1, 16, 3, 0), 1.0),
            segment(at(2024, 1, 16, 3, 0), at(2024, 1, 16, 6, 15), 0.5),
        ]);
        assert_eq!(nights.len(), 1);
        let night = &nights[0];
        assert_eq!(night.deep_minutes, 90);
        assert_eq!(night.bedtime, at(2024, 1, 15, 23, 30));
        assert_eq!(night.waketime, at(2024, 1, 16, 6, 15));
        assert_eq!(night.night_date.to_string(), "2024-01-15");
    }

    #[test]
    fn separate_nights_stay_separate() {
        let nights = merge_segments(vec![
            segment(at(2024, 1, 15, 23, 0), at(2024, 1, 16, 7, 0), 1.0),
            segment(at(2024, 1, 16, 22, 0), at(2024, 1, 17, 6, 0), 1.0),
        ]);
        assert_eq!(nights.len(), 2);
    }

    #[test]
    fn explicit_scores_take_the_max_and_win() {
        let mut a = segment(at(2024, 1, 15, 23, 0), at(2024, 1, 16, 3, 0), 1.0);
        a.score = Some(72.0);
        let mut b = segment(at(2024, 1, 16, 3, 0), at(2024, 1, 16, 7, 0), 1.0);
        b.score = Some(81.4);
        let nights = build_nights(Uuid::nil(), SampleSource::HealthExport, vec![a, b]);
        assert_eq!(nights[0].sleep_score, 81);
        assert_eq!(nights[0].quality, SleepQuality::Good);
    }

    #[test]
    fn computed_score_rewards_ideal_architecture() {
        // 8h total, 20% deep, 22.5% rem
        assert_eq!(compute_sleep_score(480, 96, 108), 100);
        // 8h total, no deep or rem data
        assert_eq!(compute_sleep_score(480, 0, 0), 70);
        // 5h, poor architecture
        assert_eq!(compute_sleep_score(300, 20, 30), 50);
        // 6.5h, middling stages
        assert_eq!(compute_sleep_score(390, 50, 64), 75);
        assert_eq!(compute_sleep_score(0, 0, 0), 50);
    }

    #[test]
    fn total_falls_back_to_in_bed_span_minus_awake() {
        let mut s = segment(at(2024, 1, 15, 23, 0), at(2024, 1, 16, 7, 0), 0.0);
        s.awake_hours = 0.5;
        let nights = merge_segments(vec![s]);
        assert_eq!(nights[0].total_minutes, 450);
        assert_eq!(nights[0].awake_minutes, 30);
    }

    #[test]
    fn parses_health_export_sleep_point() {
        let point = json!({
            "inBedStart": "2024-01-15 23:30:00 -0500",
            "inBedEnd": "2024-01-16 06:15:00 -0500",
            "core": 3.5,
            "deep": 1.25,
            "rem": 1.5,
            "awake": 0.25
        });
        let segment = SleepSegment::from_point(point.as_object().unwrap(), Tz::UTC).unwrap();
        assert_eq!(segment.in_bed_start, at(2024, 1, 15, 23, 30));
        assert_eq!(segment.core_hours, 3.5);
        assert_eq!(segment.score, None);

        let night = build_nights(Uuid::nil(), SampleSource::HealthExport, vec![segment]);
        assert_eq!(night[0].total_minutes, 375);
        assert_eq!(night[0].light_minutes, 210);
        assert_eq!(night[0].deep_minutes, 75);
        assert_eq!(night[0].rem_minutes, 90);
    }

    #[test]
    fn missing_window_is_a_field_error() {
        let point = json!({"inBedStart": "2024-01-15 23:30:00 -0500", "deep": 1.0});
        assert_eq!(
            SleepSegment::from_point(point.as_object().unwrap(), Tz::UTC),
            Err(FieldError::Missing("inBedEnd"))
        );
    }

    #[test]
    fn utc_times_are_preserved_on_output() {
        let nights = build_nights(
            Uuid::nil(),
            SampleSource::HealthExport,
            vec![segment(at(2024, 1, 15, 23, 30), at(2024, 1, 16, 6, 15), 1.0)],
        );
        assert_eq!(
            nights[0].bedtime,
            Utc.with_ymd_and_hms(2024, 1, 16, 4, 30, 0).unwrap()
        );
    }
}
