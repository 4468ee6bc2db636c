use async_trait::async_trait;
use log::{debug, error};
use reqwest::{header::HeaderMap, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stack_string::{format_sstr, StackString};
use std::collections::HashMap;
use time::OffsetDateTime;
use time_tz::{timezones::get_by_name, OffsetDateTimeExt};

use omramin_lib::errors::OmraminError as Error;
use omramin_models::{
    device::{DeviceCategory, OmronDevice},
    measurement::{BpMeasurement, Measurement, WeightMeasurement},
    sync_window::SyncWindow,
};

use crate::omron_connect_client::OmronConnect;

const APP_ID: &str = "lou30y2xfa9f";
const API_KEY: &str = "392a4bdff8af4141944d30ca8e3cc860";
const OGSC_APP_VERSION: &str = "010.003.00001";
const OGSC_SDK_VERSION: &str = "000.101";
const USER_AGENT: &str = "OmronConnect/010.003.00001.001 CFNetwork/1335.0.3.4 Darwin/21.6.0)";

/// Weight unit codes carried in the body-index subtype field.
mod weight_unit {
    pub const G: i64 = 8192;
    pub const KG: i64 = 8195;
    pub const LB: i64 = 8208;
    pub const ST: i64 = 8224;
}

/// Body-index value-type codes, the subset this client consumes.
mod value_type {
    pub const MMHG_MAX: &str = "1";
    pub const MMHG_MIN: &str = "2";
    pub const BPM: &str = "3";
    pub const ARRHYTHMIA_FLAG: &str = "6";
    pub const BODY_MOTION_FLAG: &str = "7";
    pub const KEEP_UP_CHECK: &str = "8";
    pub const KG: &str = "257";
    pub const BODY_FAT_PER: &str = "259";
    pub const BASAL_METABOLISM: &str = "260";
    pub const RATE_SKELETAL_MUSCLE: &str = "261";
    pub const BMI: &str = "262";
    pub const BIOLOGICAL_AGE: &str = "263";
    pub const VISCERAL_FAT: &str = "264";
}

#[must_use]
pub fn convert_weight_to_kg(weight: f64, unit: i64) -> f64 {
    match unit {
        weight_unit::G => weight / 1000.0,
        weight_unit::LB => weight * 0.453_592_37,
        weight_unit::ST => weight * 6.350_293_18,
        _ => weight,
    }
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'a str,
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    access_token: StackString,
    refresh_token: StackString,
}

#[derive(Serialize)]
struct MeasureDataRequest {
    #[serde(rename = "containCorrectedDataFlag")]
    contain_corrected_data_flag: u8,
    #[serde(rename = "containAllDataTypeFlag")]
    contain_all_data_type_flag: u8,
    #[serde(rename = "deviceCategory")]
    device_category: &'static str,
    #[serde(rename = "deviceSerialID")]
    device_serial_id: StackString,
    #[serde(rename = "userNumberInDevice")]
    user_number_in_device: u8,
    #[serde(rename = "searchDateFrom")]
    search_date_from: i64,
    #[serde(rename = "searchDateTo")]
    search_date_to: i64,
}

#[derive(Deserialize, Debug)]
struct MeasureDataResponse {
    #[serde(rename = "returnedValue")]
    returned_value: Value,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ReturnedValue {
    #[serde(rename = "deviceModelList")]
    device_model_list: Option<Vec<DeviceModel>>,
}

#[derive(Deserialize, Debug)]
struct DeviceModel {
    #[serde(rename = "deviceSerialIDList")]
    device_serial_id_list: Vec<DeviceSerialEntry>,
}

#[derive(Deserialize, Debug)]
struct DeviceSerialEntry {
    #[serde(rename = "deviceSerialID")]
    device_serial_id: StackString,
    #[serde(rename = "measureList", default)]
    measure_list: Vec<MeasureEntry>,
}

#[derive(Deserialize, Debug)]
struct MeasureEntry {
    #[serde(rename = "measureDateTo")]
    measure_date_to: i64,
    #[serde(rename = "timeZone", default)]
    time_zone: StackString,
    #[serde(rename = "bodyIndexList", default)]
    body_index_list: HashMap<StackString, BodyIndex>,
}

/// `[value, subtype, unknown, measurementId]` tuples keyed by value-type code.
#[derive(Deserialize, Debug)]
struct BodyIndex(i64, i64, i64, i64);

impl MeasureEntry {
    fn index_value(&self, code: &str) -> Option<i64> {
        self.body_index_list.get(code).map(|index| index.0)
    }

    fn index_subtype(&self, code: &str) -> Option<i64> {
        self.body_index_list.get(code).map(|index| index.1)
    }

    fn index_scaled(&self, code: &str, divisor: f64) -> f64 {
        self.index_value(code)
            .map_or(-1.0, |value| value as f64 / divisor)
    }

    fn datetime(&self) -> Result<OffsetDateTime, Error> {
        let utc = OffsetDateTime::from_unix_timestamp(self.measure_date_to / 1000)?;
        match get_by_name(&self.time_zone) {
            Some(tz) => Ok(utc.to_timezone(tz)),
            None => Ok(utc),
        }
    }

    fn scale_measurement(&self) -> Result<Option<WeightMeasurement>, Error> {
        let Some(raw_weight) = self.index_value(value_type::KG) else {
            return Ok(None);
        };
        let unit = self
            .index_subtype(value_type::KG)
            .unwrap_or(weight_unit::KG);
        let weight_kg = convert_weight_to_kg(raw_weight as f64 / 100.0, unit);

        Ok(Some(WeightMeasurement {
            timestamp: self.datetime()?,
            weight_kg,
            bmi: self.index_scaled(value_type::BMI, 10.0),
            body_fat_pct: self.index_scaled(value_type::BODY_FAT_PER, 10.0),
            skeletal_muscle_pct: self.index_scaled(value_type::RATE_SKELETAL_MUSCLE, 10.0),
            resting_metabolism: self.index_scaled(value_type::BASAL_METABOLISM, 1.0),
            visceral_fat_level: self.index_scaled(value_type::VISCERAL_FAT, 10.0),
            metabolic_age: self.index_value(value_type::BIOLOGICAL_AGE).unwrap_or(-1),
        }))
    }

    fn bp_measurement(&self) -> Result<Option<BpMeasurement>, Error> {
        let (Some(systolic), Some(diastolic), Some(pulse)) = (
            self.index_value(value_type::MMHG_MAX),
            self.index_value(value_type::MMHG_MIN),
            self.index_value(value_type::BPM),
        ) else {
            return Ok(None);
        };

        Ok(Some(BpMeasurement {
            timestamp: self.datetime()?,
            systolic_mmhg: systolic,
            diastolic_mmhg: diastolic,
            pulse_bpm: pulse,
            irregular_heartbeat: self
                .index_value(value_type::ARRHYTHMIA_FLAG)
                .unwrap_or(0)
                != 0,
            movement_detected: self
                .index_value(value_type::BODY_MOTION_FLAG)
                .unwrap_or(0)
                != 0,
            cuff_wrap_ok: self.index_value(value_type::KEEP_UP_CHECK).unwrap_or(1) != 0,
        }))
    }
}

impl ReturnedValue {
    pub(crate) fn into_measurements(
        self,
        device: &OmronDevice,
    ) -> Result<Vec<Measurement>, Error> {
        let mut measurements = Vec::new();
        let Some(device_model_list) = self.device_model_list else {
            return Ok(measurements);
        };
        let serial = device.serial();
        for device_model in device_model_list {
            for entry in device_model.device_serial_id_list {
                if entry.device_serial_id != serial {
                    continue;
                }
                for measure in &entry.measure_list {
                    match device.category {
                        DeviceCategory::Scale => {
                            if let Some(wm) = measure.scale_measurement()? {
                                measurements.push(Measurement::Weight(wm));
                            }
                        }
                        DeviceCategory::Bpm => {
                            if let Some(bp) = measure.bp_measurement()? {
                                measurements.push(Measurement::BloodPressure(bp));
                            }
                        }
                    }
                }
                break;
            }
        }
        Ok(measurements)
    }
}

/// Client for the Kii-backed API generation served from
/// data-sg.omronconnect.com.
pub struct OmronConnectV1 {
    server: StackString,
    client: Client,
    access_token: Option<StackString>,
}

impl OmronConnectV1 {
    #[must_use]
    pub fn new(server: &str) -> Self {
        Self {
            server: server.into(),
            client: Client::new(),
            access_token: None,
        }
    }

    fn base_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert("User-Agent", USER_AGENT.parse()?);
        headers.insert("X-OGSC-SDK-Version", OGSC_SDK_VERSION.parse()?);
        headers.insert("X-OGSC-App-Version", OGSC_APP_VERSION.parse()?);
        headers.insert("X-Kii-AppID", APP_ID.parse()?);
        headers.insert("X-Kii-AppKey", API_KEY.parse()?);
        Ok(headers)
    }

    fn auth_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = self.base_headers()?;
        let access_token = self.access_token.as_ref().ok_or(Error::AuthExpired)?;
        headers.insert(
            "authorization",
            format_sstr!("Bearer {access_token}").parse()?,
        );
        Ok(headers)
    }

    async fn token_request<T: Serialize>(&mut self, body: &T) -> Result<StackString, Error> {
        let url = format_sstr!("{}/api/oauth2/token", self.server);
        let response = self
            .client
            .post(url.as_str())
            .headers(self.base_headers()?)
            .json(body)
            .send()
            .await?;
        if response.status().is_client_error() {
            return Err(Error::AuthFailed(format_sstr!("{}", response.status())));
        }
        let auth: AuthResponse = response.error_for_status()?.json().await?;
        self.access_token.replace(auth.access_token);
        Ok(auth.refresh_token)
    }
}

#[async_trait]
impl OmronConnect for OmronConnectV1 {
    async fn login(
        &mut self,
        email: &str,
        password: &str,
        _country: &str,
    ) -> Result<StackString, Error> {
        self.token_request(&AuthRequest {
            username: email,
            password,
        })
        .await
    }

    async fn refresh(&mut self, refresh_token: &str) -> Result<StackString, Error> {
        self.token_request(&RefreshRequest {
            grant_type: "refresh_token",
            refresh_token,
        })
        .await
    }

    async fn get_measurements(
        &self,
        device: &OmronDevice,
        window: &SyncWindow,
    ) -> Result<Vec<Measurement>, Error> {
        let body = MeasureDataRequest {
            contain_corrected_data_flag: 1,
            contain_all_data_type_flag: 1,
            device_category: device.category.api_code(),
            device_serial_id: device.serial(),
            user_number_in_device: device.user,
            search_date_from: window.start_epoch_millis(),
            search_date_to: window.end_epoch_millis(),
        };
        let url = format_sstr!(
            "{}/api/apps/{APP_ID}/server-code/versions/current/measureData",
            self.server
        );
        let response = self
            .client
            .post(url.as_str())
            .headers(self.auth_headers()?)
            .json(&body)
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::AuthExpired);
        }
        let response: MeasureDataResponse = response.error_for_status()?.json().await?;
        debug!("{response:?}");

        let returned_value = match response.returned_value {
            Value::Array(mut values) if !values.is_empty() => values.remove(0),
            value @ Value::Object(_) => value,
            _ => return Ok(Vec::new()),
        };
        if let Some(code) = returned_value.get("errorCode") {
            error!("get_measurements -> {code}");
            return Ok(Vec::new());
        }

        let returned_value: ReturnedValue = serde_json::from_value(returned_value)?;
        returned_value.into_measurements(device)
    }
}
