// Date-range selection for the event log.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;

use crate::error::CoreError;

/// Inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Which window the log view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeMode {
    Today,
    /// Six days back through the end of today.
    Last7Days,
    /// User-picked days, both inclusive.
    Custom { start: NaiveDate, end: NaiveDate },
}

impl RangeMode {
    /// Resolve to concrete bounds in the time zone of `now`.
    pub fn resolve<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<TimeRange, CoreError> {
        let tz = now.timezone();
        let today = now.date_naive();
        let (first, last) = match *self {
            Self::Today => (today, today),
            Self::Last7Days => {
                let first = today
                    .checked_sub_days(Days::new(6))
                    .ok_or_else(|| CoreError::validation("date out of range"))?;
                (first, today)
            }
            Self::Custom { start, end } => {
                if start > end {
                    return Err(CoreError::validation(format!(
                        "range start {start} is after its end {end}"
                    )));
                }
                (start, end)
            }
        };

        Ok(TimeRange {
            start: start_of_day(&tz, first)?,
            end: end_of_day(&tz, last)?,
        })
    }
}

fn start_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Result<DateTime<Utc>, CoreError> {
    tz.from_local_datetime(&date.and_time(NaiveTime::MIN))
        .earliest()
        .map(|at| at.with_timezone(&Utc))
        .ok_or_else(|| CoreError::validation(format!("{date} has no local midnight")))
}

fn end_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Result<DateTime<Utc>, CoreError> {
    let last_milli = NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
        .ok_or_else(|| CoreError::Internal("invalid end-of-day time".into()))?;
    tz.from_local_datetime(&date.and_time(last_milli))
        .latest()
        .map(|at| at.with_timezone(&Utc))
        .ok_or_else(|| CoreError::validation(format!("{date} has no local end of day")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::FixedOffset;

    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn today_spans_the_local_day() {
        let now = at(2025, 3, 10, 15, 30);
        let range = RangeMode::Today.resolve(&now).unwrap();
        assert_eq!(range.start, at(2025, 3, 10, 0, 0));
        assert_eq!(
            range.end,
            Utc.with_ymd_and_hms(2025, 3, 10, 23, 59, 59).unwrap()
                + chrono::Duration::milliseconds(999)
        );
        assert!(range.contains(now));
    }

    #[test]
    fn last_seven_days_ends_tonight() {
        let now = at(2025, 3, 10, 9, 0);
        let range = RangeMode::Last7Days.resolve(&now).unwrap();
        assert_eq!(range.start, at(2025, 3, 4, 0, 0));
        assert!(range.end > at(2025, 3, 10, 23, 59));
        assert!(range.end < at(2025, 3, 11, 0, 0));
    }

    #[test]
    fn local_offset_shifts_bounds() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = at(2025, 3, 10, 23, 30).with_timezone(&tz);
        // Already March 11th locally.
        let range = RangeMode::Today.resolve(&now).unwrap();
        assert_eq!(range.start, at(2025, 3, 10, 22, 0));
    }

    #[test]
    fn custom_is_inclusive_and_ordered() {
        let now = at(2025, 3, 10, 9, 0);
        let day = |d| NaiveDate::from_ymd_opt(2025, 3, d).unwrap();

        let single = RangeMode::Custom {
            start: day(5),
            end: day(5),
        }
        .resolve(&now)
        .unwrap();
        assert!(single.contains(at(2025, 3, 5, 0, 0)));
        assert!(single.contains(at(2025, 3, 5, 23, 59)));
        assert!(!single.contains(at(2025, 3, 6, 0, 0)));

        let backwards = RangeMode::Custom {
            start: day(6),
            end: day(5),
        }
        .resolve(&now);
        assert!(matches!(backwards, Err(CoreError::ValidationFailed { .. })));
    }
}
