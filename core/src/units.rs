//! Unit conversion into the canonical storage unit of each biomarker kind.
//!
//! Unknown or missing source units are treated as already canonical.

use crate::kinds::BiomarkerKind;

pub const KG_TO_LBS: f64 = 2.20462;
pub const MMOL_L_TO_MG_DL: f64 = 18.018;
pub const KM_TO_METERS: f64 = 1000.0;
pub const MILES_TO_METERS: f64 = 1609.344;
pub const KJ_PER_KCAL: f64 = 4.184;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Converted {
    pub value: f64,
    pub unit: &'static str,
}

fn normalize_unit(unit: &str) -> String {
    unit.trim().to_lowercase().replace(' ', "")
}

fn is_kilograms(unit: &str) -> bool {
    matches!(unit, "kg" | "kgs" | "kilogram" | "kilograms")
}

fn is_mmol_per_liter(unit: &str) -> bool {
    matches!(unit, "mmol/l" | "mmol" | "mmoll" | "mmol/liter")
}

fn is_celsius(unit: &str) -> bool {
    matches!(unit, "degc" | "°c" | "c" | "celsius" | "ºc")
}

/// Convert `value` reported in `source_unit` into the canonical unit of `kind`.
pub fn convert(value: f64, source_unit: Option<&str>, kind: BiomarkerKind) -> Converted {
    let target = kind.canonical_unit();
    let Some(unit) = source_unit.map(normalize_unit) else {
        return Converted { value, unit: target };
    };

    let value = match kind {
        BiomarkerKind::Weight | BiomarkerKind::LeanBodyMass if is_kilograms(&unit) => {
            value * KG_TO_LBS
        }
        BiomarkerKind::BloodGlucose if is_mmol_per_liter(&unit) => value * MMOL_L_TO_MG_DL,
        BiomarkerKind::BodyTemperature if is_celsius(&unit) => value * 9.0 / 5.0 + 32.0,
        _ => value,
    };

    Converted { value, unit: target }
}

/// Distance in meters. Bare numbers are meters; a unit of `km` or `mi`
/// scales accordingly.
pub fn distance_to_meters(value: f64, unit: Option<&str>) -> f64 {
    match unit.map(normalize_unit).as_deref() {
        Some("km" | "kilometer" | "kilometers") => value * KM_TO_METERS,
        Some("mi" | "mile" | "miles") => value * MILES_TO_METERS,
        _ => value,
    }
}

/// Energy in kcal. Only kilojoules are rescaled.
pub fn energy_to_kcal(value: f64, unit: Option<&str>) -> f64 {
    match unit.map(normalize_unit).as_deref() {
        Some("kj" | "kilojoule" | "kilojoules") => value / KJ_PER_KCAL,
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kilograms_become_pounds() {
        let converted = convert(70.0, Some("kg"), BiomarkerKind::Weight);
        assert!((converted.value - 154.32).abs() < 0.01);
        assert_eq!(converted.unit, "lbs");

        let lean = convert(60.0, Some("KG"), BiomarkerKind::LeanBodyMass);
        assert!((lean.value - 132.277).abs() < 0.01);
    }

    #[test]
    fn mmol_glucose_becomes_mg_dl() {
        let converted = convert(5.5, Some("mmol/L"), BiomarkerKind::BloodGlucose);
        assert!((converted.value - 99.1).abs() < 0.1);
        assert_eq!(converted.unit, "mg/dL");
    }

    #[test]
    fn celsius_becomes_fahrenheit() {
        let converted = convert(37.0, Some("degC"), BiomarkerKind::BodyTemperature);
        assert!((converted.value - 98.6).abs() < 1e-9);
        assert_eq!(converted.unit, "°F");
    }

    #[test]
    fn unknown_or_missing_units_pass_through() {
        let converted = convert(72.0, Some("count/min"), BiomarkerKind::HeartRate);
        assert_eq!(converted, Converted { value: 72.0, unit: "bpm" });

        let converted = convert(180.0, None, BiomarkerKind::Weight);
        assert_eq!(converted, Converted { value: 180.0, unit: "lbs" });

        let converted = convert(99.0, Some("furlongs"), BiomarkerKind::BloodGlucose);
        assert_eq!(converted.value, 99.0);
    }

    #[test]
    fn distance_scales_by_unit() {
        assert_eq!(distance_to_meters(5.0, Some("km")), 5000.0);
        assert_eq!(distance_to_meters(5000.0, None), 5000.0);
        assert!((distance_to_meters(1.0, Some("mi")) - 1609.344).abs() < 1e-9);
    }

    #[test]
    fn kilojoules_scale_to_kcal() {
        assert!((energy_to_kcal(418.4, Some("kJ")) - 100.0).abs() < 1e-9);
        assert_eq!(energy_to_kcal(250.0, Some("kcal")), 250.0);
    }
}
