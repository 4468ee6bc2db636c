use derive_more::{Display, Into};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Millisecond unix epoch timestamp as the Garmin Connect API returns it.
#[derive(Into, Copy, Clone, Debug, Serialize, Deserialize, Display)]
#[serde(from = "i64")]
pub struct GarminConnectTimestamp(OffsetDateTime);

impl From<i64> for GarminConnectTimestamp {
    fn from(timestamp_ms: i64) -> Self {
        let timestamp: i64 = timestamp_ms / 1000;
        let datetime = OffsetDateTime::from_unix_timestamp(timestamp)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
            + Duration::milliseconds(timestamp_ms - timestamp * 1000);
        Self(datetime)
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use crate::garmin_connect_timestamp::GarminConnectTimestamp;

    #[test]
    fn test_from_millis() {
        let timestamp = GarminConnectTimestamp::from(1705311145500);
        let datetime: OffsetDateTime = timestamp.into();
        assert_eq!(datetime.unix_timestamp(), 1705311145);
        assert_eq!(datetime.millisecond(), 500);
    }
}
