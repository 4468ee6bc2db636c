use log::debug;
use time::{Duration, OffsetDateTime, Time};
use time_tz::{system, timezones::db::UTC, OffsetDateTimeExt};

use omramin_lib::errors::OmraminError as Error;

/// Half-open datetime range `[start, end)` covering whole local days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl SyncWindow {
    /// Window spanning `days` full local calendar days ending today.  The end
    /// is the local midnight of tomorrow so the current day is always covered
    /// in full, not just up to `now`.  Falls back to UTC days when the system
    /// timezone cannot be determined.
    /// # Errors
    /// Returns error if the window cannot be computed
    pub fn from_days(days: usize, now: OffsetDateTime) -> Result<Self, Error> {
        let days = days.max(1);
        let local = match system::get_timezone() {
            Ok(tz) => now.to_timezone(tz),
            Err(e) => {
                debug!("no system timezone ({e}), using UTC");
                now.to_timezone(UTC)
            }
        };
        let start = (local - Duration::days(days as i64 - 1)).replace_time(Time::MIDNIGHT);
        let end = (local + Duration::days(1)).replace_time(Time::MIDNIGHT);
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn start_epoch_millis(&self) -> i64 {
        self.start.unix_timestamp() * 1000
    }

    #[must_use]
    pub fn end_epoch_millis(&self) -> i64 {
        self.end.unix_timestamp() * 1000
    }

    #[must_use]
    pub fn contains(&self, timestamp: OffsetDateTime) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

#[cfg(test)]
mod tests {
    use time::{macros::datetime, Duration, Time};

    use omramin_lib::errors::OmraminError as Error;

    use crate::sync_window::SyncWindow;

    #[test]
    fn test_single_day_window_covers_the_whole_day() -> Result<(), Error> {
        let now = datetime!(2024-01-15 13:21:07 UTC);
        let window = SyncWindow::from_days(1, now)?;
        assert_eq!(window.start.time(), Time::MIDNIGHT);
        assert_eq!(window.end.time(), Time::MIDNIGHT);
        assert_eq!(window.end - window.start, Duration::days(1));
        assert!(window.contains(now));
        // the end covers the entire current day, not just "now"
        assert!(window.end > now);
        Ok(())
    }

    #[test]
    fn test_five_day_window_spans_five_calendar_days() -> Result<(), Error> {
        let now = datetime!(2024-01-15 13:21:07 UTC);
        let window = SyncWindow::from_days(5, now)?;
        assert_eq!(window.end - window.start, Duration::days(5));
        assert!(window.start <= now);
        assert!(window.contains(now));
        Ok(())
    }

    #[test]
    fn test_zero_days_is_clamped_to_one() -> Result<(), Error> {
        let now = datetime!(2024-01-15 13:21:07 UTC);
        let window = SyncWindow::from_days(0, now)?;
        assert_eq!(window.end - window.start, Duration::days(1));
        Ok(())
    }

    #[test]
    fn test_epoch_millis_ordering() -> Result<(), Error> {
        let now = datetime!(2024-01-15 13:21:07 UTC);
        let window = SyncWindow::from_days(3, now)?;
        assert!(window.start_epoch_millis() < window.end_epoch_millis());
        assert_eq!(
            window.end_epoch_millis() - window.start_epoch_millis(),
            3 * 24 * 3600 * 1000
        );
        Ok(())
    }
}
