use serde::{Deserialize, Serialize};
use stack_string::{format_sstr, StackString};
use std::collections::HashSet;
use time::macros::format_description;
use time_tz::{timezones::db::UTC, OffsetDateTimeExt};

use omramin_lib::{
    errors::OmraminError as Error, iso_8601_datetime::convert_str_to_datetime,
};
use omramin_models::measurement::{BpMeasurement, IdentityKey};

/// Response of the blood-pressure range endpoint, reduced to the identity
/// keys of the contained measurements.
#[derive(Deserialize, Debug)]
pub struct GarminBpRangeResponse {
    #[serde(rename = "measurementSummaries", default)]
    pub measurement_summaries: Vec<BpSummary>,
}

#[derive(Deserialize, Debug)]
pub struct BpSummary {
    #[serde(default)]
    pub measurements: Vec<BpMetric>,
}

#[derive(Deserialize, Debug)]
pub struct BpMetric {
    pub version: i64,
    /// naive UTC timestamp, e.g. `2024-01-15T09:32:25.0`
    #[serde(rename = "measurementTimestampGMT")]
    pub measurement_timestamp_gmt: StackString,
}

impl GarminBpRangeResponse {
    /// # Errors
    /// Returns error if a measurement timestamp cannot be parsed
    pub fn identity_keys(&self) -> Result<HashSet<IdentityKey>, Error> {
        self.measurement_summaries
            .iter()
            .flat_map(|summary| &summary.measurements)
            .map(|metric| {
                let datetime = convert_str_to_datetime(&format_sstr!(
                    "{}Z",
                    metric.measurement_timestamp_gmt
                ))?;
                Ok(IdentityKey::from_datetime(datetime))
            })
            .collect()
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GarminBpUpload {
    measurement_timestamp_local: StackString,
    #[serde(rename = "measurementTimestampGMT")]
    measurement_timestamp_gmt: StackString,
    systolic: i64,
    diastolic: i64,
    pulse: i64,
    source_type: &'static str,
}

impl GarminBpUpload {
    /// # Errors
    /// Returns error if timestamp formatting fails
    pub fn from_measurement(bp: &BpMeasurement) -> Result<Self, Error> {
        let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].00");
        Ok(Self {
            measurement_timestamp_local: bp.timestamp.format(format)?.into(),
            measurement_timestamp_gmt: bp.timestamp.to_timezone(UTC).format(format)?.into(),
            systolic: bp.systolic_mmhg,
            diastolic: bp.diastolic_mmhg,
            pulse: bp.pulse_bpm,
            source_type: "MANUAL",
        })
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use omramin_lib::errors::OmraminError as Error;
    use omramin_models::measurement::{BpMeasurement, IdentityKey};

    use crate::garmin_bp_data::{GarminBpRangeResponse, GarminBpUpload};

    #[test]
    fn test_identity_keys_from_range_response() -> Result<(), Error> {
        let buf = r#"{
            "measurementSummaries": [
                {
                    "summaryDate": "2024-01-15",
                    "measurements": [
                        {"version": 10, "measurementTimestampGMT": "2024-01-15T09:32:25.0"},
                        {"version": 11, "measurementTimestampGMT": "2024-01-15T20:05:00.0"}
                    ]
                }
            ]
        }"#;
        let response: GarminBpRangeResponse = serde_json::from_str(buf)?;
        let keys = response.identity_keys()?;
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&IdentityKey::from_datetime(datetime!(2024-01-15 09:32:25 UTC))));
        Ok(())
    }

    #[test]
    fn test_empty_range_response() -> Result<(), Error> {
        let response: GarminBpRangeResponse = serde_json::from_str("{}")?;
        assert!(response.identity_keys()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_upload_payload() -> Result<(), Error> {
        let bp = BpMeasurement::new(datetime!(2024-01-15 10:32:25 +01:00), 121, 82, 64);
        let upload = GarminBpUpload::from_measurement(&bp)?;
        let js = serde_json::to_string(&upload)?;
        assert!(js.contains(r#""measurementTimestampLocal":"2024-01-15T10:32:25.00""#));
        assert!(js.contains(r#""measurementTimestampGMT":"2024-01-15T09:32:25.00""#));
        assert!(js.contains(r#""systolic":121"#));
        assert!(js.contains(r#""sourceType":"MANUAL""#));
        Ok(())
    }
}
