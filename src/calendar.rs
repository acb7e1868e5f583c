use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::model::{MINUTE_MS, Ms, Span};

/// Maps absolute instants to the site's wall clock.
///
/// The portal runs in a single office timezone, so a fixed UTC offset is
/// enough: work hours and recurrence dates are local, booking timestamps are
/// absolute Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset_ms: Ms,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::UTC
    }
}

impl Calendar {
    pub const UTC: Calendar = Calendar { offset_ms: 0 };

    pub fn with_offset_minutes(minutes: i32) -> Self {
        Self {
            offset_ms: minutes as Ms * MINUTE_MS,
        }
    }

    pub fn offset_minutes(&self) -> i32 {
        (self.offset_ms / MINUTE_MS) as i32
    }

    /// Local wall-clock time of an instant.
    pub fn local(&self, t: Ms) -> NaiveDateTime {
        DateTime::from_timestamp_millis(t + self.offset_ms)
            .map(|dt| dt.naive_utc())
            .unwrap_or_default()
    }

    /// Absolute instant of a local wall-clock time.
    pub fn instant(&self, local: NaiveDateTime) -> Ms {
        local.and_utc().timestamp_millis() - self.offset_ms
    }

    pub fn date_of(&self, t: Ms) -> NaiveDate {
        self.local(t).date()
    }

    pub fn time_of(&self, t: Ms) -> NaiveTime {
        self.local(t).time()
    }

    pub fn at(&self, date: NaiveDate, time: NaiveTime) -> Ms {
        self.instant(date.and_time(time))
    }

    /// `[00:00, next 00:00)` of a local date.
    pub fn day_span(&self, date: NaiveDate) -> Span {
        let start = self.at(date, NaiveTime::MIN);
        Span::new(start, start + Duration::days(1).num_milliseconds())
    }

    /// Monday of the week containing `date`.
    pub fn week_start(date: NaiveDate) -> NaiveDate {
        date - Duration::days(date.weekday().num_days_from_monday() as i64)
    }

    pub fn month_start(date: NaiveDate) -> NaiveDate {
        date.with_day(1).unwrap_or(date)
    }
}
