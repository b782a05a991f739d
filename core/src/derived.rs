//! Derived aggregates: values computed from already-ingested samples.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::biomarkers::sample;
use crate::kinds::BiomarkerKind;
use crate::records::{NormalizedBiomarkerSample, SampleSource};

/// Body-fat percentages outside this range are dropped as implausible.
pub const PLAUSIBLE_BODY_FAT: RangeInclusive<f64> = 0.0..=60.0;

/// `(weight - lean) / weight * 100`, or `None` when implausible.
pub fn body_fat_percentage(weight: f64, lean_mass: f64) -> Option<f64> {
    if weight <= 0.0 || !weight.is_finite() || !lean_mass.is_finite() {
        return None;
    }
    let percentage = (weight - lean_mass) * 100.0 / weight;
    PLAUSIBLE_BODY_FAT
        .contains(&percentage)
        .then_some(percentage)
}

#[derive(Default)]
struct DayReadings<'a> {
    weight: Option<&'a NormalizedBiomarkerSample>,
    lean: Option<&'a NormalizedBiomarkerSample>,
    has_body_fat: bool,
}

fn later<'a>(
    current: Option<&'a NormalizedBiomarkerSample>,
    candidate: &'a NormalizedBiomarkerSample,
) -> Option<&'a NormalizedBiomarkerSample> {
    match current {
        Some(existing) if existing.recorded_at >= candidate.recorded_at => Some(existing),
        _ => Some(candidate),
    }
}

/// Body-fat samples for every UTC date in `samples` that has a weight and a
/// lean mass reading but no body-fat reading yet. The latest reading of each
/// kind on that date is used. Results are stamped at 00:00 UTC of the date.
pub fn derive_body_fat_samples(
    user_id: Uuid,
    samples: &[NormalizedBiomarkerSample],
) -> Vec<NormalizedBiomarkerSample> {
    let mut days: BTreeMap<NaiveDate, DayReadings<'_>> = BTreeMap::new();
    for s in samples.iter().filter(|s| s.user_id == user_id) {
        let day = days.entry(s.recorded_at.date_naive()).or_default();
        match s.kind {
            BiomarkerKind::Weight => day.weight = later(day.weight, s),
            BiomarkerKind::LeanBodyMass => day.lean = later(day.lean, s),
            BiomarkerKind::BodyFatPercentage => day.has_body_fat = true,
            _ => {}
        }
    }

    days.into_iter()
        .filter(|(_, day)| !day.has_body_fat)
        .filter_map(|(date, day)| {
            let weight = day.weight?;
            let lean = day.lean?;
            let percentage = body_fat_percentage(weight.value, lean.value)?;
            let stamped: DateTime<Utc> = date.and_hms_opt(0, 0, 0)?.and_utc();
            Some(sample(
                user_id,
                BiomarkerKind::BodyFatPercentage,
                percentage,
                None,
                SampleSource::Calculated,
                stamped,
            ))
        })
        .collect()
}

/// Goal metric types touched by `kinds`, each with the kind whose latest
/// sample becomes the goal's current value.
pub fn goal_targets(kinds: &BTreeSet<BiomarkerKind>) -> BTreeMap<&'static str, BiomarkerKind> {
    kinds
        .iter()
        .map(|kind| (kind.goal_metric(), kind.goal_representative()))
        .collect()
}
