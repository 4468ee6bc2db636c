use btleplug::Error as BtleplugError;
use http::header::InvalidHeaderValue;
use rand::distr::uniform::Error as RandUniformError;
use reqwest::Error as ReqwestError;
use reqwest_oauth1::Error as ReqwestOauth1Error;
use serde_json::Error as SerdeJsonError;
use stack_string::StackString;
use std::{
    num::{ParseFloatError, ParseIntError, TryFromIntError},
    str::ParseBoolError,
};
use thiserror::Error;
use time::error::{
    ComponentRange as TimeComponentRange, Format as TimeFormatError, Parse as TimeParseError,
};
use time_tz::system::Error as TzError;
use url::ParseError as UrlParseError;

#[derive(Error, Debug)]
pub enum OmraminError {
    #[error("Device {0} is already registered")]
    DuplicateDevice(StackString),
    #[error("No device found matching: {0}")]
    DeviceNotFound(StackString),
    #[error("Device config is corrupt: {0}")]
    CorruptConfig(StackString),
    #[error("Authentication failed: {0}")]
    AuthFailed(StackString),
    #[error("Session expired")]
    AuthExpired,
    #[error("Measurement service unavailable: {0}")]
    SourceUnavailable(StackString),
    #[error("Upload rejected: {0}")]
    UploadRejected(StackString),
    #[error("Pairing scan timed out")]
    PairingTimeout,
    #[error("Pairing scan cancelled")]
    PairingCancelled,
    #[error("BtleplugError {0}")]
    BtleplugError(Box<BtleplugError>),
    #[error("InvalidHeaderValue {0}")]
    InvalidHeaderValue(#[from] InvalidHeaderValue),
    #[error("ReqwestError {0}")]
    ReqwestError(#[from] ReqwestError),
    #[error("ReqwestOauth1Error {0}")]
    ReqwestOauth1Error(Box<ReqwestOauth1Error>),
    #[error("SerdeJsonError {0}")]
    SerdeJsonError(#[from] SerdeJsonError),
    #[error("TimeComponentRange {0}")]
    TimeComponentRange(Box<TimeComponentRange>),
    #[error("TimeFormatError {0}")]
    TimeFormatError(#[from] TimeFormatError),
    #[error("TimeParseError {0}")]
    TimeParseError(Box<TimeParseError>),
    #[error("TzError {0}")]
    TzError(#[from] TzError),
    #[error("RandUniformError {0}")]
    RandUniformError(#[from] RandUniformError),
    #[error("ParseIntError {0}")]
    ParseIntError(#[from] ParseIntError),
    #[error("ParseFloatError {0}")]
    ParseFloatError(#[from] ParseFloatError),
    #[error("ParseBoolError {0}")]
    ParseBoolError(#[from] ParseBoolError),
    #[error("TryFromIntError {0}")]
    TryFromIntError(#[from] TryFromIntError),
    #[error("UrlParseError {0}")]
    UrlParseError(#[from] UrlParseError),
    #[error("io Error {0}")]
    IoError(#[from] std::io::Error),
    #[error("{0}")]
    StaticCustomError(&'static str),
    #[error("{0}")]
    CustomError(StackString),
}

impl OmraminError {
    /// Whether a retry with backoff can be expected to help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ReqwestError(_) | Self::IoError(_))
    }
}

impl From<BtleplugError> for OmraminError {
    fn from(value: BtleplugError) -> Self {
        Self::BtleplugError(value.into())
    }
}

impl From<ReqwestOauth1Error> for OmraminError {
    fn from(value: ReqwestOauth1Error) -> Self {
        Self::ReqwestOauth1Error(value.into())
    }
}

impl From<TimeComponentRange> for OmraminError {
    fn from(value: TimeComponentRange) -> Self {
        Self::TimeComponentRange(value.into())
    }
}

impl From<TimeParseError> for OmraminError {
    fn from(value: TimeParseError) -> Self {
        Self::TimeParseError(value.into())
    }
}

#[cfg(test)]
mod test {
    use crate::errors::OmraminError as Error;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::DuplicateDevice("00:5F:BF:11:22:33".into()).to_string(),
            "Device 00:5F:BF:11:22:33 is already registered"
        );
        assert_eq!(
            Error::DeviceNotFound("scale".into()).to_string(),
            "No device found matching: scale"
        );
        assert_eq!(Error::AuthExpired.to_string(), "Session expired");
        assert_eq!(Error::PairingTimeout.to_string(), "Pairing scan timed out");
        assert_eq!(
            Error::PairingCancelled.to_string(),
            "Pairing scan cancelled"
        );
    }

    #[test]
    fn test_is_transient() {
        let err = Error::from(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "timed out",
        ));
        assert!(err.is_transient());
        assert!(!Error::AuthExpired.is_transient());
        assert!(!Error::UploadRejected("bad value".into()).is_transient());
        assert!(!Error::CustomError("nope".into()).is_transient());
    }
}
