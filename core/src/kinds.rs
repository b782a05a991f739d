//! Biomarker kinds and the mapping from provider metric names onto them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Canonical biomarker vocabulary. Provider names are mapped onto these
/// kinds before anything is stored; storage uses the kebab-case form.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum BiomarkerKind {
    HeartRate,
    RestingHeartRate,
    HeartRateVariability,
    BloodGlucose,
    Weight,
    LeanBodyMass,
    BodyFatPercentage,
    Steps,
    ActiveEnergy,
    BloodPressureSystolic,
    BloodPressureDiastolic,
    OxygenSaturation,
    BodyTemperature,
    SleepHours,
}

impl BiomarkerKind {
    pub const ALL: [BiomarkerKind; 14] = [
        BiomarkerKind::HeartRate,
        BiomarkerKind::RestingHeartRate,
        BiomarkerKind::HeartRateVariability,
        BiomarkerKind::BloodGlucose,
        BiomarkerKind::Weight,
        BiomarkerKind::LeanBodyMass,
        BiomarkerKind::BodyFatPercentage,
        BiomarkerKind::Steps,
        BiomarkerKind::ActiveEnergy,
        BiomarkerKind::BloodPressureSystolic,
        BiomarkerKind::BloodPressureDiastolic,
        BiomarkerKind::OxygenSaturation,
        BiomarkerKind::BodyTemperature,
        BiomarkerKind::SleepHours,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeartRate => "heart-rate",
            Self::RestingHeartRate => "resting-heart-rate",
            Self::HeartRateVariability => "heart-rate-variability",
            Self::BloodGlucose => "blood-glucose",
            Self::Weight => "weight",
            Self::LeanBodyMass => "lean-body-mass",
            Self::BodyFatPercentage => "body-fat-percentage",
            Self::Steps => "steps",
            Self::ActiveEnergy => "active-energy",
            Self::BloodPressureSystolic => "blood-pressure-systolic",
            Self::BloodPressureDiastolic => "blood-pressure-diastolic",
            Self::OxygenSaturation => "oxygen-saturation",
            Self::BodyTemperature => "body-temperature",
            Self::SleepHours => "sleep-hours",
        }
    }

    /// Unit every stored sample of this kind is expressed in.
    pub fn canonical_unit(&self) -> &'static str {
        match self {
            Self::HeartRate | Self::RestingHeartRate => "bpm",
            Self::HeartRateVariability => "ms",
            Self::BloodGlucose => "mg/dL",
            Self::Weight | Self::LeanBodyMass => "lbs",
            Self::BodyFatPercentage | Self::OxygenSaturation => "%",
            Self::Steps => "steps",
            Self::ActiveEnergy => "kcal",
            Self::BloodPressureSystolic | Self::BloodPressureDiastolic => "mmHg",
            Self::BodyTemperature => "°F",
            Self::SleepHours => "hours",
        }
    }

    /// Goal `metricType` this kind feeds. Both blood-pressure kinds share one
    /// goal metric; the systolic reading is the representative value.
    pub fn goal_metric(&self) -> &'static str {
        match self {
            Self::BloodPressureSystolic | Self::BloodPressureDiastolic => "blood-pressure",
            other => other.as_str(),
        }
    }

    /// Kind whose latest sample is pushed to goals of `goal_metric()`.
    pub fn goal_representative(&self) -> BiomarkerKind {
        match self {
            Self::BloodPressureDiastolic => Self::BloodPressureSystolic,
            other => *other,
        }
    }
}

impl fmt::Display for BiomarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown biomarker kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for BiomarkerKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BiomarkerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Provider metric names, keyed by their alphanumeric-lowercase form so that
/// `heart_rate`, `Heart Rate` and `heartRate` all hit the same entry.
const METRIC_NAME_TABLE: &[(&str, BiomarkerKind)] = &[
    ("heartrate", BiomarkerKind::HeartRate),
    ("heartrateavg", BiomarkerKind::HeartRate),
    ("pulse", BiomarkerKind::HeartRate),
    ("restingheartrate", BiomarkerKind::RestingHeartRate),
    ("heartratevariability", BiomarkerKind::HeartRateVariability),
    ("heartratevariabilitysdnn", BiomarkerKind::HeartRateVariability),
    ("hrv", BiomarkerKind::HeartRateVariability),
    ("bloodglucose", BiomarkerKind::BloodGlucose),
    ("glucose", BiomarkerKind::BloodGlucose),
    ("weight", BiomarkerKind::Weight),
    ("bodymass", BiomarkerKind::Weight),
    ("weightbodymass", BiomarkerKind::Weight),
    ("leanbodymass", BiomarkerKind::LeanBodyMass),
    ("leanmass", BiomarkerKind::LeanBodyMass),
    ("bodyfatpercentage", BiomarkerKind::BodyFatPercentage),
    ("bodyfat", BiomarkerKind::BodyFatPercentage),
    ("steps", BiomarkerKind::Steps),
    ("stepcount", BiomarkerKind::Steps),
    ("activeenergy", BiomarkerKind::ActiveEnergy),
    ("activeenergyburned", BiomarkerKind::ActiveEnergy),
    ("activecalories", BiomarkerKind::ActiveEnergy),
    ("bloodpressure", BiomarkerKind::BloodPressureSystolic),
    ("bloodpressuresystolic", BiomarkerKind::BloodPressureSystolic),
    ("systolic", BiomarkerKind::BloodPressureSystolic),
    ("bloodpressurediastolic", BiomarkerKind::BloodPressureDiastolic),
    ("diastolic", BiomarkerKind::BloodPressureDiastolic),
    ("oxygensaturation", BiomarkerKind::OxygenSaturation),
    ("bloodoxygensaturation", BiomarkerKind::OxygenSaturation),
    ("spo2", BiomarkerKind::OxygenSaturation),
    ("bodytemperature", BiomarkerKind::BodyTemperature),
    ("temperature", BiomarkerKind::BodyTemperature),
    ("sleephours", BiomarkerKind::SleepHours),
    ("sleepduration", BiomarkerKind::SleepHours),
    ("sleeptime", BiomarkerKind::SleepHours),
];

fn lookup_key(name: &str) -> String {
    name.chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

/// Resolve a provider metric name to its canonical kind. Unknown names are
/// expected noise and return `None`.
pub fn kind_for_metric_name(name: &str) -> Option<BiomarkerKind> {
    let key = lookup_key(name);
    if key.is_empty() {
        return None;
    }
    METRIC_NAME_TABLE
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, kind)| *kind)
}
