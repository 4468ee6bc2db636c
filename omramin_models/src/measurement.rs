use derive_more::Display;
use serde::{Deserialize, Serialize};
use stack_string::{format_sstr, StackString};
use std::fmt;
use time::OffsetDateTime;
use time_tz::{timezones::db::UTC, OffsetDateTimeExt};

use omramin_lib::iso_8601_datetime;

/// A weigh-in as returned by the OMRON cloud.  Body composition readings the
/// scale did not take carry the provider's -1 sentinel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WeightMeasurement {
    #[serde(with = "iso_8601_datetime")]
    pub timestamp: OffsetDateTime,
    pub weight_kg: f64,
    pub bmi: f64,
    pub body_fat_pct: f64,
    pub skeletal_muscle_pct: f64,
    pub resting_metabolism: f64,
    pub visceral_fat_level: f64,
    pub metabolic_age: i64,
}

impl WeightMeasurement {
    #[must_use]
    pub fn new(timestamp: OffsetDateTime, weight_kg: f64) -> Self {
        Self {
            timestamp,
            weight_kg,
            bmi: -1.0,
            body_fat_pct: -1.0,
            skeletal_muscle_pct: -1.0,
            resting_metabolism: -1.0,
            visceral_fat_level: -1.0,
            metabolic_age: -1,
        }
    }
}

impl fmt::Display for WeightMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "weigh-in: {} kg", self.weight_kg)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BpMeasurement {
    #[serde(with = "iso_8601_datetime")]
    pub timestamp: OffsetDateTime,
    pub systolic_mmhg: i64,
    pub diastolic_mmhg: i64,
    pub pulse_bpm: i64,
    pub irregular_heartbeat: bool,
    pub movement_detected: bool,
    pub cuff_wrap_ok: bool,
}

impl BpMeasurement {
    #[must_use]
    pub fn new(
        timestamp: OffsetDateTime,
        systolic_mmhg: i64,
        diastolic_mmhg: i64,
        pulse_bpm: i64,
    ) -> Self {
        Self {
            timestamp,
            systolic_mmhg,
            diastolic_mmhg,
            pulse_bpm,
            irregular_heartbeat: false,
            movement_detected: false,
            cuff_wrap_ok: true,
        }
    }
}

impl fmt::Display for BpMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "blood pressure ({}/{} mmHg, {} bpm)",
            self.systolic_mmhg, self.diastolic_mmhg, self.pulse_bpm
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Measurement {
    Weight(WeightMeasurement),
    BloodPressure(BpMeasurement),
}

impl Measurement {
    #[must_use]
    pub fn timestamp(&self) -> OffsetDateTime {
        match self {
            Self::Weight(wm) => wm.timestamp,
            Self::BloodPressure(bp) => bp.timestamp,
        }
    }

    #[must_use]
    pub fn kind(&self) -> MeasurementKind {
        match self {
            Self::Weight(_) => MeasurementKind::Weight,
            Self::BloodPressure(_) => MeasurementKind::BloodPressure,
        }
    }

    #[must_use]
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::from_datetime(self.timestamp())
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weight(wm) => wm.fmt(f),
            Self::BloodPressure(bp) => bp.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementKind {
    Weight,
    BloodPressure,
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weight => f.write_str("weigh-in"),
            Self::BloodPressure => f.write_str("blood pressure"),
        }
    }
}

/// Deterministic duplicate-detection key, the UTC calendar date joined with
/// the UTC unix-seconds value.  Derived from the timestamp alone, so a record
/// re-sent with a corrected value under the same timestamp maps to the same
/// key and is treated as already present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
pub struct IdentityKey(StackString);

impl IdentityKey {
    #[must_use]
    pub fn from_datetime(timestamp: OffsetDateTime) -> Self {
        let utc = timestamp.to_timezone(UTC);
        Self(format_sstr!("{}:{}", utc.date(), utc.unix_timestamp()))
    }
}

#[cfg(test)]
mod tests {
    use time::{macros::datetime, Duration};

    use crate::measurement::{
        BpMeasurement, IdentityKey, Measurement, MeasurementKind, WeightMeasurement,
    };

    #[test]
    fn test_identity_key_format() {
        let key = IdentityKey::from_datetime(datetime!(2024-01-15 10:32:25 +01:00));
        assert_eq!(key.to_string(), "2024-01-15:1705311145");
    }

    #[test]
    fn test_identity_key_is_offset_independent() {
        let local = IdentityKey::from_datetime(datetime!(2024-01-15 10:32:25 +01:00));
        let utc = IdentityKey::from_datetime(datetime!(2024-01-15 09:32:25 UTC));
        assert_eq!(local, utc);
    }

    #[test]
    fn test_identity_keys_distinct_for_distinct_timestamps() {
        let base = datetime!(2024-01-15 09:32:25 UTC);
        let keys: Vec<_> = (0..100)
            .map(|i| IdentityKey::from_datetime(base + Duration::seconds(i)))
            .collect();
        for (i, key) in keys.iter().enumerate() {
            for other in &keys[i + 1..] {
                assert_ne!(key, other);
            }
        }
    }

    #[test]
    fn test_measurement_accessors() {
        let wm = Measurement::Weight(WeightMeasurement::new(
            datetime!(2024-01-15 09:32:25 UTC),
            73.5,
        ));
        assert_eq!(wm.kind(), MeasurementKind::Weight);
        assert_eq!(wm.identity_key().to_string(), "2024-01-15:1705311145");

        let bp = Measurement::BloodPressure(BpMeasurement::new(
            datetime!(2024-01-15 09:32:25 UTC),
            120,
            80,
            62,
        ));
        assert_eq!(bp.kind(), MeasurementKind::BloodPressure);
        assert_eq!(bp.to_string(), "blood pressure (120/80 mmHg, 62 bpm)");
    }

    #[test]
    fn test_measurement_serde_tag() {
        let wm = Measurement::Weight(WeightMeasurement::new(
            datetime!(2024-01-15 09:32:25 UTC),
            73.5,
        ));
        let js = serde_json::to_string(&wm).unwrap();
        assert!(js.contains(r#""kind":"weight""#));
        assert!(js.contains(r#""timestamp":"2024-01-15T09:32:25Z""#));
        let wm2: Measurement = serde_json::from_str(&js).unwrap();
        assert_eq!(wm, wm2);
    }
}
