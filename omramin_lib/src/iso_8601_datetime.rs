use serde::{de, Deserialize, Deserializer, Serializer};
use stack_string::StackString;
use time::{
    format_description::well_known::Rfc3339,
    macros::{datetime, format_description},
    OffsetDateTime,
};
use time_tz::{timezones::db::UTC, OffsetDateTimeExt};

use crate::errors::OmraminError as Error;

#[must_use]
pub fn sentinel_datetime() -> OffsetDateTime {
    datetime!(0000-01-01 00:00:00).assume_utc()
}

#[must_use]
pub fn convert_datetime_to_str(datetime: OffsetDateTime) -> StackString {
    datetime
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
        ))
        .unwrap_or_else(|_| String::new())
        .into()
}

/// # Errors
/// Return error if `Rfc3339` parsing fails
pub fn convert_str_to_datetime(s: &str) -> Result<OffsetDateTime, Error> {
    OffsetDateTime::parse(&s.replace('Z', "+00:00"), &Rfc3339)
        .map(|x| x.to_timezone(UTC))
        .map_err(Into::into)
}

/// # Errors
/// Returns error if serialization fails
pub fn serialize<S>(date: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&convert_datetime_to_str(*date))
}

/// # Errors
/// Returns error if deserialization fails
pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    convert_str_to_datetime(&s).map_err(de::Error::custom)
}

#[cfg(test)]
mod tests {
    use crate::{
        errors::OmraminError as Error,
        iso_8601_datetime::{convert_datetime_to_str, convert_str_to_datetime},
    };

    #[test]
    fn test_convert_str_to_datetime() -> Result<(), Error> {
        let datetime = convert_str_to_datetime("2024-01-15T15:43:07-04:00")?;
        assert_eq!(convert_datetime_to_str(datetime), "2024-01-15T19:43:07Z");
        Ok(())
    }

    #[test]
    fn test_convert_round_trip() -> Result<(), Error> {
        let datetime = convert_str_to_datetime("2024-01-15T19:43:07Z")?;
        assert_eq!(convert_datetime_to_str(datetime), "2024-01-15T19:43:07Z");
        Ok(())
    }
}
