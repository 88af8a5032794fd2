//! # Cron Expressions
//!
//! Five-field schedules: `minute hour day-of-month month day-of-week`,
//! parsed and evaluated by [`croner`].
//!
//! Day-of-week runs 0–7 with both 0 and 7 meaning Sunday. When both day
//! fields are restricted a time matches if *either* matches, as in classic
//! cron. Seconds are not part of the syntax; every schedule fires at second 0.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let schedule = CronSchedule::parse("0 2 * * *")?;
//! let next = schedule.next_after(&chrono::Local::now());
//! ```

use crate::{CoreError, Result};
use chrono::{DateTime, TimeZone, Timelike};
use croner::Cron;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

const FIELD_COUNT: usize = 5;

#[derive(Clone)]
pub struct CronSchedule {
    expression: String,
    cron: Arc<Cron>,
}

impl CronSchedule {
    /// Parse a five-field expression.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidSchedule`] for a wrong field count or any field
    /// the parser rejects.
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |message: String| CoreError::InvalidSchedule {
            expression: expression.to_string(),
            message,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != FIELD_COUNT {
            return Err(invalid(format!(
                "expected {} fields, found {}",
                FIELD_COUNT,
                fields.len()
            )));
        }

        let expression = fields.join(" ");
        let cron = Cron::new(&expression)
            .parse()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            expression,
            cron: Arc::new(cron),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether the schedule fires in the minute containing `at`
    pub fn matches<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        at.with_second(0)
            .and_then(|minute| minute.with_nanosecond(0))
            .and_then(|minute| self.cron.is_time_matching(&minute).ok())
            .unwrap_or(false)
    }

    /// First fire time strictly after `after`, in the same time zone.
    ///
    /// Returns `None` when the schedule never fires again, e.g. `0 0 31 2 *`.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.cron.find_next_occurrence(after, false).ok()
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for CronSchedule {}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.expression).finish()
    }
}

impl FromStr for CronSchedule {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_daily_at_two() {
        let schedule = CronSchedule::parse("0 2 * * *").unwrap();
        assert_eq!(
            schedule.next_after(&utc(2025, 1, 31, 1, 30)),
            Some(utc(2025, 1, 31, 2, 0))
        );
        assert_eq!(
            schedule.next_after(&utc(2025, 1, 31, 2, 0)),
            Some(utc(2025, 2, 1, 2, 0))
        );
        assert!(schedule.matches(&utc(2025, 3, 4, 2, 0)));
        assert!(schedule.matches(&(utc(2025, 3, 4, 2, 0) + chrono::Duration::seconds(30))));
        assert!(!schedule.matches(&utc(2025, 3, 4, 2, 1)));
    }

    #[test]
    fn test_hourly() {
        let schedule = CronSchedule::parse("0 * * * *").unwrap();
        assert_eq!(
            schedule.next_after(&utc(2025, 12, 31, 23, 59)),
            Some(utc(2026, 1, 1, 0, 0))
        );
    }

    #[test]
    fn test_steps_ranges_and_lists() {
        let schedule = CronSchedule::parse("*/15 8-10 * * 1-5").unwrap();
        // Friday 10:50 -> Monday 08:00
        assert_eq!(
            schedule.next_after(&utc(2025, 1, 31, 10, 50)),
            Some(utc(2025, 2, 3, 8, 0))
        );
        assert!(schedule.matches(&utc(2025, 2, 3, 9, 45)));

        let schedule = CronSchedule::parse("5,35 10-20/5 * * *").unwrap();
        assert!(schedule.matches(&utc(2025, 2, 3, 15, 35)));
        assert!(!schedule.matches(&utc(2025, 2, 3, 16, 5)));
    }

    #[test]
    fn test_sunday_is_zero_and_seven() {
        let zero = CronSchedule::parse("0 0 * * 0").unwrap();
        let seven = CronSchedule::parse("0 0 * * 7").unwrap();
        // 2025-02-02 is a Sunday
        let sunday = utc(2025, 2, 2, 0, 0);
        assert!(zero.matches(&sunday));
        assert!(seven.matches(&sunday));
        assert_eq!(zero.next_after(&utc(2025, 1, 31, 0, 0)), Some(sunday));
    }

    #[test]
    fn test_day_fields_use_or_when_both_restricted() {
        // 13th of the month or any Friday
        let schedule = CronSchedule::parse("0 0 13 * 5").unwrap();
        assert!(schedule.matches(&utc(2025, 1, 13, 0, 0))); // Monday the 13th
        assert!(schedule.matches(&utc(2025, 1, 17, 0, 0))); // Friday
        assert!(!schedule.matches(&utc(2025, 1, 14, 0, 0)));

        // Only day of month restricted
        let schedule = CronSchedule::parse("0 0 13 * *").unwrap();
        assert!(!schedule.matches(&utc(2025, 1, 17, 0, 0)));
    }

    #[test]
    fn test_leap_day() {
        let schedule = CronSchedule::parse("0 0 29 2 *").unwrap();
        assert_eq!(
            schedule.next_after(&utc(2025, 3, 1, 0, 0)),
            Some(utc(2028, 2, 29, 0, 0))
        );
    }

    #[test]
    fn test_keeps_time_zone() {
        let berlin = FixedOffset::east_opt(3600).unwrap();
        let after = berlin.with_ymd_and_hms(2025, 1, 31, 1, 0, 0).unwrap();
        let next = CronSchedule::parse("0 2 * * *").unwrap().next_after(&after).unwrap();
        assert_eq!(next, berlin.with_ymd_and_hms(2025, 1, 31, 2, 0, 0).unwrap());
        assert_eq!(next.with_timezone(&Utc), utc(2025, 1, 31, 1, 0));
    }

    #[test]
    fn test_rejects_invalid_expressions() {
        for expression in [
            "0 2 * *",
            "0 2 * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 8",
            "a * * * *",
            "",
        ] {
            assert!(
                matches!(
                    CronSchedule::parse(expression),
                    Err(CoreError::InvalidSchedule { .. })
                ),
                "{expression:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_display_normalizes_whitespace() {
        let schedule: CronSchedule = "0  2 * *   *".parse().unwrap();
        assert_eq!(schedule.to_string(), "0 2 * * *");
        assert_eq!(schedule, CronSchedule::parse("0 2 * * *").unwrap());
    }
}
