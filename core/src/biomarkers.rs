//! Scalar biomarker samples from `qty`-style data points.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use crate::fields::{FieldAliases, FieldError, RawPoint, SAMPLE_TIME, SAMPLE_VALUE, UNIT};
use crate::kinds::BiomarkerKind;
use crate::records::{NormalizedBiomarkerSample, SampleSource};
use crate::units::convert;

const SYSTOLIC: FieldAliases = FieldAliases::new("systolic", &["systolic", "systolic_bp"]);
const DIASTOLIC: FieldAliases = FieldAliases::new("diastolic", &["diastolic", "diastolic_bp"]);

/// Build one canonical sample, converting `value` from `unit`.
pub fn sample(
    user_id: Uuid,
    kind: BiomarkerKind,
    value: f64,
    unit: Option<&str>,
    source: SampleSource,
    recorded_at: DateTime<Utc>,
) -> NormalizedBiomarkerSample {
    let converted = convert(value, unit, kind);
    NormalizedBiomarkerSample {
        user_id,
        kind,
        value: converted.value,
        unit: converted.unit.to_string(),
        source,
        recorded_at,
    }
}

/// Samples carried by one scalar data point.
///
/// A point holding both `systolic` and `diastolic` fans out into two samples
/// at the same instant, whatever kind the envelope mapped to.
pub fn samples_from_point(
    point: &RawPoint,
    kind: BiomarkerKind,
    envelope_unit: Option<&str>,
    user_id: Uuid,
    source: SampleSource,
    default_tz: Tz,
) -> Result<Vec<NormalizedBiomarkerSample>, FieldError> {
    let recorded_at = SAMPLE_TIME.timestamp(point, default_tz)?.with_timezone(&Utc);

    if let (Some(systolic), Some(diastolic)) = (SYSTOLIC.number(point), DIASTOLIC.number(point)) {
        return Ok(vec![
            sample(
                user_id,
                BiomarkerKind::BloodPressureSystolic,
                systolic,
                None,
                source,
                recorded_at,
            ),
            sample(
                user_id,
                BiomarkerKind::BloodPressureDiastolic,
                diastolic,
                None,
                source,
                recorded_at,
            ),
        ]);
    }

    let quantity = SAMPLE_VALUE
        .quantity(point)
        .ok_or(FieldError::Missing(SAMPLE_VALUE.concept))?;
    if !quantity.value.is_finite() {
        return Err(FieldError::Invalid(SAMPLE_VALUE.concept));
    }
    let unit = quantity
        .unit
        .as_deref()
        .or_else(|| UNIT.text(point))
        .or(envelope_unit);

    Ok(vec![sample(
        user_id,
        kind,
        quantity.value,
        unit,
        source,
        recorded_at,
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{Value, json};

    fn run(point: Value, kind: BiomarkerKind, unit: Option<&str>) -> Result<Vec<NormalizedBiomarkerSample>, FieldError> {
        samples_from_point(
            point.as_object().unwrap(),
            kind,
            unit,
            Uuid::nil(),
            SampleSource::HealthExport,
            Tz::UTC,
        )
    }

    #[test]
    fn blood_pressure_fans_out_at_one_instant() {
        let samples = run(
            json!({"systolic": 120, "diastolic": 80, "date": "2024-01-15T08:00:00Z"}),
            BiomarkerKind::BloodPressureSystolic,
            Some("mmHg"),
        )
        .unwrap();
        let expected_at = Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].kind, BiomarkerKind::BloodPressureSystolic);
        assert_eq!(samples[0].value, 120.0);
        assert_eq!(samples[1].kind, BiomarkerKind::BloodPressureDiastolic);
        assert_eq!(samples[1].value, 80.0);
        assert!(samples.iter().all(|s| s.recorded_at == expected_at));
        assert!(samples.iter().all(|s| s.unit == "mmHg"));
    }

    #[test]
    fn envelope_unit_applies_when_point_has_none() {
        let samples = run(
            json!({"qty": 70, "date": "2024-01-15 07:00:00 +0000"}),
            BiomarkerKind::Weight,
            Some("kg"),
        )
        .unwrap();
        assert!((samples[0].value - 154.3234).abs() < 0.01);
        assert_eq!(samples[0].unit, "lbs");
    }

    #[test]
    fn point_unit_overrides_envelope_unit() {
        let samples = run(
            json!({"qty": 180, "units": "lb", "date": "2024-01-15"}),
            BiomarkerKind::Weight,
            Some("kg"),
        )
        .unwrap();
        assert_eq!(samples[0].value, 180.0);
    }

    #[test]
    fn aggregated_heart_rate_uses_avg() {
        let samples = run(
            json!({"Min": 55, "Avg": 68, "Max": 110, "date": "2024-01-15 07:00:00 +0000"}),
            BiomarkerKind::HeartRate,
            Some("count/min"),
        )
        .unwrap();
        assert_eq!(samples[0].value, 68.0);
        assert_eq!(samples[0].unit, "bpm");
    }

    #[test]
    fn missing_date_or_value_is_a_field_error() {
        assert_eq!(
            run(json!({"qty": 1}), BiomarkerKind::Steps, None),
            Err(FieldError::Missing("date"))
        );
        assert_eq!(
            run(json!({"date": "2024-01-15"}), BiomarkerKind::Steps, None),
            Err(FieldError::Missing("qty"))
        );
    }
}
