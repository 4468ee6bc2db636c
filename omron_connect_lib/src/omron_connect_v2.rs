use async_trait::async_trait;
use log::debug;
use reqwest::{header::HeaderMap, Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stack_string::{format_sstr, StackString};
use time::{OffsetDateTime, UtcOffset};

use omramin_lib::errors::OmraminError as Error;
use omramin_models::{
    device::{DeviceCategory, OmronDevice},
    measurement::{BpMeasurement, Measurement, WeightMeasurement},
    sync_window::SyncWindow,
};

use crate::omron_connect_client::OmronConnect;

const APP_NAME: &str = "OCM";
const USER_AGENT: &str =
    "Foresight/7.20.0 (com.omronhealthcare.omronconnect; build:37; iOS 15.8.3) Alamofire/5.9.1";

#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "emailAddress")]
    email_address: &'a str,
    password: &'a str,
    country: &'a str,
    app: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    app: &'a str,
    #[serde(rename = "emailAddress")]
    email_address: &'a str,
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(rename = "accessToken")]
    access_token: StackString,
    #[serde(rename = "refreshToken")]
    refresh_token: StackString,
}

#[derive(Deserialize)]
struct SyncResponse<T> {
    data: Vec<T>,
}

fn neg_one() -> f64 {
    -1.0
}

fn one() -> i64 {
    1
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct WeightRecord {
    #[serde(rename = "userNumberInDevice")]
    user_number_in_device: i64,
    #[serde(rename = "measurementDate")]
    measurement_date: i64,
    #[serde(rename = "isManualEntry", default)]
    is_manual_entry: i64,
    /// seconds east of UTC
    #[serde(rename = "timeZone", default)]
    time_zone: i64,
    #[serde(default)]
    weight: f64,
    #[serde(rename = "weightInLbs", default)]
    weight_in_lbs: f64,
    #[serde(rename = "bmiValue", default = "neg_one")]
    bmi_value: f64,
    #[serde(rename = "bodyFatPercentage", default = "neg_one")]
    body_fat_percentage: f64,
    #[serde(rename = "restingMetabolism", default = "neg_one")]
    resting_metabolism: f64,
    #[serde(rename = "skeletalMusclePercentage", default = "neg_one")]
    skeletal_muscle_percentage: f64,
    #[serde(rename = "visceralFatLevel", default = "neg_one")]
    visceral_fat_level: f64,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct BpRecord {
    #[serde(rename = "userNumberInDevice")]
    user_number_in_device: i64,
    #[serde(rename = "measurementDate")]
    measurement_date: i64,
    #[serde(rename = "isManualEntry", default)]
    is_manual_entry: i64,
    #[serde(rename = "timeZone", default)]
    time_zone: i64,
    systolic: i64,
    diastolic: i64,
    pulse: i64,
    #[serde(rename = "irregularHB", default)]
    irregular_hb: i64,
    #[serde(rename = "movementDetect", default)]
    movement_detect: i64,
    #[serde(rename = "cuffWrapDetect", default = "one")]
    cuff_wrap_detect: i64,
}

fn record_datetime(epoch_ms: i64, tz_offset_seconds: i64) -> Result<OffsetDateTime, Error> {
    let utc = OffsetDateTime::from_unix_timestamp(epoch_ms / 1000)?;
    let offset = UtcOffset::from_whole_seconds(tz_offset_seconds as i32)?;
    Ok(utc.to_offset(offset))
}

/// Drop records for other user slots, past the window end and entered
/// manually on the phone.
fn in_scope(user_number: i64, measurement_date: i64, is_manual: i64, device_user: u8, end_ms: i64) -> bool {
    if user_number != i64::from(device_user) {
        debug!("skipping user: {device_user} != {user_number}");
        return false;
    }
    if measurement_date > end_ms {
        debug!("skipping date: {measurement_date} > {end_ms}");
        return false;
    }
    if is_manual != 0 {
        debug!("skipping manual entry");
        return false;
    }
    true
}

pub(crate) fn filter_weight_records(
    records: Vec<WeightRecord>,
    device_user: u8,
    end_ms: i64,
) -> Result<Vec<Measurement>, Error> {
    let mut measurements = Vec::new();
    for record in records {
        if !in_scope(
            record.user_number_in_device,
            record.measurement_date,
            record.is_manual_entry,
            device_user,
            end_ms,
        ) {
            continue;
        }
        let mut weight_kg = record.weight;
        if weight_kg <= 0.0 && record.weight_in_lbs > 0.0 {
            weight_kg = record.weight_in_lbs * 0.453_592;
        }
        measurements.push(Measurement::Weight(WeightMeasurement {
            timestamp: record_datetime(record.measurement_date, record.time_zone)?,
            weight_kg,
            bmi: record.bmi_value,
            body_fat_pct: record.body_fat_percentage,
            skeletal_muscle_pct: record.skeletal_muscle_percentage,
            resting_metabolism: record.resting_metabolism,
            visceral_fat_level: record.visceral_fat_level,
            metabolic_age: -1,
        }));
    }
    Ok(measurements)
}

pub(crate) fn filter_bp_records(
    records: Vec<BpRecord>,
    device_user: u8,
    end_ms: i64,
) -> Result<Vec<Measurement>, Error> {
    let mut measurements = Vec::new();
    for record in records {
        if !in_scope(
            record.user_number_in_device,
            record.measurement_date,
            record.is_manual_entry,
            device_user,
            end_ms,
        ) {
            continue;
        }
        measurements.push(Measurement::BloodPressure(BpMeasurement {
            timestamp: record_datetime(record.measurement_date, record.time_zone)?,
            systolic_mmhg: record.systolic,
            diastolic_mmhg: record.diastolic,
            pulse_bpm: record.pulse,
            irregular_heartbeat: record.irregular_hb != 0,
            movement_detected: record.movement_detect != 0,
            cuff_wrap_ok: record.cuff_wrap_detect != 0,
        }));
    }
    Ok(measurements)
}

/// Client for the API generation served from the oi-api.ohiomron hosts.
/// Every POST body carries a `Checksum` header holding the SHA-256 hex
/// digest of the body, which is why bodies are serialized by hand.
pub struct OmronConnectV2 {
    server: StackString,
    client: Client,
    access_token: Option<StackString>,
    email: StackString,
}

impl OmronConnectV2 {
    #[must_use]
    pub fn new(server: &str) -> Self {
        Self {
            server: server.into(),
            client: Client::new(),
            access_token: None,
            email: "".into(),
        }
    }

    fn auth_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", USER_AGENT.parse()?);
        let access_token = self.access_token.as_ref().ok_or(Error::AuthExpired)?;
        headers.insert("authorization", access_token.as_str().parse()?);
        Ok(headers)
    }

    async fn login_request<T: Serialize>(&mut self, body: &T) -> Result<StackString, Error> {
        let buf = serde_json::to_vec(body)?;
        let checksum: String = Sha256::digest(&buf)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();

        let mut headers = HeaderMap::new();
        headers.insert("user-agent", USER_AGENT.parse()?);
        headers.insert("content-type", "application/json".parse()?);
        headers.insert("Checksum", checksum.parse()?);
        if let Some(access_token) = &self.access_token {
            headers.insert("authorization", access_token.as_str().parse()?);
        }

        let url = format_sstr!("{}/app/login", self.server);
        let response = self
            .client
            .post(url.as_str())
            .headers(headers)
            .body(buf)
            .send()
            .await?;
        if response.status().is_client_error() {
            return Err(Error::AuthFailed(format_sstr!("{}", response.status())));
        }
        let login: LoginResponse = response.error_for_status()?.json().await?;
        self.access_token.replace(login.access_token);
        Ok(login.refresh_token)
    }

    async fn sync_page<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        last_synced_ms: i64,
    ) -> Result<Vec<T>, Error> {
        let url = format_sstr!(
            "{}/app/v2/sync/{endpoint}?nextpaginationKey=0&lastSyncedTime={last_synced_ms}&phoneIdentifier=",
            self.server
        );
        let response = self
            .client
            .get(url.as_str())
            .headers(self.auth_headers()?)
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::AuthExpired);
        }
        let response: SyncResponse<T> = response.error_for_status()?.json().await?;
        Ok(response.data)
    }
}

#[async_trait]
impl OmronConnect for OmronConnectV2 {
    async fn login(
        &mut self,
        email: &str,
        password: &str,
        country: &str,
    ) -> Result<StackString, Error> {
        self.email = email.into();
        self.login_request(&LoginRequest {
            email_address: email,
            password,
            country,
            app: APP_NAME,
        })
        .await
    }

    async fn refresh(&mut self, refresh_token: &str) -> Result<StackString, Error> {
        let email = self.email.clone();
        self.login_request(&RefreshRequest {
            app: APP_NAME,
            email_address: &email,
            refresh_token,
        })
        .await
    }

    async fn get_measurements(
        &self,
        device: &OmronDevice,
        window: &SyncWindow,
    ) -> Result<Vec<Measurement>, Error> {
        let start_ms = window.start_epoch_millis();
        let end_ms = window.end_epoch_millis();
        match device.category {
            DeviceCategory::Scale => {
                let records = self.sync_page("weight", start_ms).await?;
                filter_weight_records(records, device.user, end_ms)
            }
            DeviceCategory::Bpm => {
                let records = self.sync_page("bp", start_ms).await?;
                filter_bp_records(records, device.user, end_ms)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use omramin_lib::errors::OmraminError as Error;
    use omramin_models::measurement::Measurement;

    use crate::omron_connect_v2::{
        filter_bp_records, filter_weight_records, BpRecord, WeightRecord,
    };

    fn weight_records() -> Result<Vec<WeightRecord>, Error> {
        let buf = r#"[
            {
                "userNumberInDevice": 1,
                "measurementDate": 1705311145000,
                "isManualEntry": 0,
                "timeZone": 3600,
                "weight": 73.5,
                "weightInLbs": 162.0,
                "bmiValue": 22.4,
                "bodyFatPercentage": 22.3,
                "restingMetabolism": 1650.0,
                "skeletalMusclePercentage": 34.1,
                "visceralFatLevel": 7.0
            },
            {
                "userNumberInDevice": 2,
                "measurementDate": 1705311150000,
                "isManualEntry": 0,
                "timeZone": 3600,
                "weight": 80.0,
                "weightInLbs": 176.4
            },
            {
                "userNumberInDevice": 1,
                "measurementDate": 1705311155000,
                "isManualEntry": 1,
                "timeZone": 3600,
                "weight": 74.0,
                "weightInLbs": 163.1
            },
            {
                "userNumberInDevice": 1,
                "measurementDate": 1905311145000,
                "isManualEntry": 0,
                "timeZone": 3600,
                "weight": 75.0,
                "weightInLbs": 165.3
            },
            {
                "userNumberInDevice": 1,
                "measurementDate": 1705311160000,
                "isManualEntry": 0,
                "timeZone": 3600,
                "weight": 0.0,
                "weightInLbs": 162.0
            }
        ]"#;
        serde_json::from_str(buf).map_err(Into::into)
    }

    #[test]
    fn test_filter_weight_records() -> Result<(), Error> {
        let measurements = filter_weight_records(weight_records()?, 1, 1800000000000)?;
        // other user slots, manual entries and dates past the window end
        // are all dropped
        assert_eq!(measurements.len(), 2);
        let Measurement::Weight(wm) = &measurements[0] else {
            panic!("expected a weigh-in");
        };
        assert_abs_diff_eq!(wm.weight_kg, 73.5);
        assert_abs_diff_eq!(wm.bmi, 22.4);
        assert_eq!(wm.metabolic_age, -1);
        assert_eq!(wm.timestamp.offset().whole_seconds(), 3600);

        // a zero weight falls back to the lbs reading
        let Measurement::Weight(wm) = &measurements[1] else {
            panic!("expected a weigh-in");
        };
        assert_abs_diff_eq!(wm.weight_kg, 162.0 * 0.453_592, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_filter_bp_records() -> Result<(), Error> {
        let buf = r#"[
            {
                "userNumberInDevice": 1,
                "measurementDate": 1705311145000,
                "isManualEntry": 0,
                "timeZone": -18000,
                "systolic": 121,
                "diastolic": 82,
                "pulse": 64,
                "irregularHB": 0,
                "movementDetect": 1,
                "cuffWrapDetect": 1
            },
            {
                "userNumberInDevice": 3,
                "measurementDate": 1705311150000,
                "systolic": 130,
                "diastolic": 85,
                "pulse": 70
            }
        ]"#;
        let records: Vec<BpRecord> = serde_json::from_str(buf)?;
        let measurements = filter_bp_records(records, 1, 1800000000000)?;
        assert_eq!(measurements.len(), 1);
        let Measurement::BloodPressure(bp) = &measurements[0] else {
            panic!("expected a blood pressure measurement");
        };
        assert_eq!(bp.systolic_mmhg, 121);
        assert_eq!(bp.diastolic_mmhg, 82);
        assert_eq!(bp.pulse_bpm, 64);
        assert!(!bp.irregular_heartbeat);
        assert!(bp.movement_detected);
        assert!(bp.cuff_wrap_ok);
        assert_eq!(bp.timestamp.offset().whole_hours(), -5);
        Ok(())
    }
}
