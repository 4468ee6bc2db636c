use serde::{Deserialize, Serialize};
use stack_string::StackString;
use std::collections::HashSet;
use time::macros::format_description;
use time_tz::{timezones::db::UTC, OffsetDateTimeExt};

use omramin_lib::errors::OmraminError as Error;
use omramin_models::measurement::{IdentityKey, WeightMeasurement};

use crate::garmin_connect_timestamp::GarminConnectTimestamp;

/// Response of the weigh-in range endpoint, reduced to the identity keys of
/// the contained weight metrics.
#[derive(Deserialize, Debug)]
pub struct GarminWeightRangeResponse {
    #[serde(rename = "dailyWeightSummaries", default)]
    pub daily_weight_summaries: Vec<DailyWeightSummary>,
}

#[derive(Deserialize, Debug)]
pub struct DailyWeightSummary {
    #[serde(rename = "allWeightMetrics", default)]
    pub all_weight_metrics: Vec<WeightMetric>,
}

#[derive(Deserialize, Debug)]
pub struct WeightMetric {
    #[serde(rename = "samplePk")]
    pub sample_pk: i64,
    #[serde(rename = "timestampGMT")]
    pub timestamp_gmt: GarminConnectTimestamp,
}

impl GarminWeightRangeResponse {
    #[must_use]
    pub fn identity_keys(&self) -> HashSet<IdentityKey> {
        self.daily_weight_summaries
            .iter()
            .flat_map(|summary| &summary.all_weight_metrics)
            .map(|metric| IdentityKey::from_datetime(metric.timestamp_gmt.into()))
            .collect()
    }
}

/// Weigh-in upload payload, absent body-composition readings are omitted.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GarminWeightUpload {
    date_timestamp: StackString,
    gmt_timestamp: StackString,
    unit_key: &'static str,
    value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    bmi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    percent_fat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    muscle_mass: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    basal_met: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metabolic_age: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    visceral_fat_rating: Option<f64>,
}

fn optional(value: f64) -> Option<f64> {
    (value >= 0.0).then_some(value)
}

impl GarminWeightUpload {
    /// # Errors
    /// Returns error if timestamp formatting fails
    pub fn from_measurement(wm: &WeightMeasurement) -> Result<Self, Error> {
        let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].00");
        let date_timestamp = wm.timestamp.format(format)?.into();
        let gmt_timestamp = wm.timestamp.to_timezone(UTC).format(format)?.into();
        Ok(Self {
            date_timestamp,
            gmt_timestamp,
            unit_key: "kg",
            value: wm.weight_kg,
            bmi: optional(wm.bmi),
            percent_fat: optional(wm.body_fat_pct),
            muscle_mass: optional(wm.skeletal_muscle_pct),
            basal_met: optional(wm.resting_metabolism),
            metabolic_age: (wm.metabolic_age >= 0).then_some(wm.metabolic_age),
            visceral_fat_rating: optional(wm.visceral_fat_level),
        })
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use omramin_lib::errors::OmraminError as Error;
    use omramin_models::measurement::{IdentityKey, WeightMeasurement};

    use crate::garmin_weight_data::{GarminWeightRangeResponse, GarminWeightUpload};

    #[test]
    fn test_identity_keys_from_range_response() -> Result<(), Error> {
        let buf = r#"{
            "dailyWeightSummaries": [
                {
                    "summaryDate": "2024-01-15",
                    "allWeightMetrics": [
                        {"samplePk": 1, "timestampGMT": 1705311145000, "weight": 73500.0},
                        {"samplePk": 2, "timestampGMT": 1705311200000, "weight": 73600.0}
                    ]
                },
                {
                    "summaryDate": "2024-01-16",
                    "allWeightMetrics": [
                        {"samplePk": 3, "timestampGMT": 1705397545000, "weight": 73400.0}
                    ]
                }
            ]
        }"#;
        let response: GarminWeightRangeResponse = serde_json::from_str(buf)?;
        let keys = response.identity_keys();
        assert_eq!(keys.len(), 3);
        assert!(keys.contains(&IdentityKey::from_datetime(datetime!(2024-01-15 09:32:25 UTC))));
        Ok(())
    }

    #[test]
    fn test_empty_range_response() -> Result<(), Error> {
        let response: GarminWeightRangeResponse = serde_json::from_str("{}")?;
        assert!(response.identity_keys().is_empty());
        Ok(())
    }

    #[test]
    fn test_upload_payload_omits_sentinels() -> Result<(), Error> {
        let wm = WeightMeasurement::new(datetime!(2024-01-15 10:32:25 +01:00), 73.5);
        let upload = GarminWeightUpload::from_measurement(&wm)?;
        let js = serde_json::to_string(&upload)?;
        assert!(js.contains(r#""dateTimestamp":"2024-01-15T10:32:25.00""#));
        assert!(js.contains(r#""gmtTimestamp":"2024-01-15T09:32:25.00""#));
        assert!(js.contains(r#""unitKey":"kg""#));
        assert!(js.contains(r#""value":73.5"#));
        assert!(!js.contains("bmi"));
        assert!(!js.contains("percentFat"));
        Ok(())
    }

    #[test]
    fn test_upload_payload_keeps_readings() -> Result<(), Error> {
        let wm = WeightMeasurement {
            bmi: 22.4,
            body_fat_pct: 22.3,
            ..WeightMeasurement::new(datetime!(2024-01-15 10:32:25 +01:00), 73.5)
        };
        let upload = GarminWeightUpload::from_measurement(&wm)?;
        let js = serde_json::to_string(&upload)?;
        assert!(js.contains(r#""bmi":22.4"#));
        assert!(js.contains(r#""percentFat":22.3"#));
        Ok(())
    }
}
