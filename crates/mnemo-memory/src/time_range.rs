//! Time period resolution.
//!
//! Turns the period tokens accepted by recall, reflection and progress
//! tracking into absolute half-open UTC intervals. Resolution is a pure
//! function of the token and an explicit `now`.
//!
//! | token                     | interval                                        |
//! |---------------------------|-------------------------------------------------|
//! | `today`                   | `[today 00:00, now)`                            |
//! | `yesterday`               | `[yesterday 00:00, today 00:00)`                |
//! | `last_week`               | `[now - 7d, now)`                               |
//! | `last_month`              | `[now - 30d, now)`                              |
//! | `last_year`               | `[now - 365d, now)`                             |
//! | `YYYY-MM-DD:YYYY-MM-DD`   | `[start 00:00, end 00:00)`                      |
//! | `RFC3339/RFC3339`         | `[start, end)` exactly                          |

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// A parsed period token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Today,
    Yesterday,
    LastWeek,
    LastMonth,
    LastYear,
    /// UTC midnights, end exclusive.
    Dates { start: NaiveDate, end: NaiveDate },
    /// Exact instants, end exclusive.
    Instants {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl Period {
    /// Parse a period token.
    pub fn parse(token: &str) -> Result<Self> {
        let token = token.trim();
        let invalid = || MemoryError::InvalidPeriod(token.to_string());

        match token.to_lowercase().as_str() {
            "today" => return Ok(Self::Today),
            "yesterday" => return Ok(Self::Yesterday),
            "last_week" => return Ok(Self::LastWeek),
            "last_month" => return Ok(Self::LastMonth),
            "last_year" => return Ok(Self::LastYear),
            _ => {}
        }

        if let Some((a, b)) = token.split_once('/') {
            let start = DateTime::parse_from_rfc3339(a.trim()).map_err(|_| invalid())?;
            let end = DateTime::parse_from_rfc3339(b.trim()).map_err(|_| invalid())?;
            let (start, end) = (start.with_timezone(&Utc), end.with_timezone(&Utc));
            if start >= end {
                return Err(invalid());
            }
            return Ok(Self::Instants { start, end });
        }

        if let Some((a, b)) = token.split_once(':') {
            let start = NaiveDate::parse_from_str(a.trim(), "%Y-%m-%d").map_err(|_| invalid())?;
            let end = NaiveDate::parse_from_str(b.trim(), "%Y-%m-%d").map_err(|_| invalid())?;
            if start >= end {
                return Err(invalid());
            }
            return Ok(Self::Dates { start, end });
        }

        Err(invalid())
    }

    /// Resolve against `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> TimeRange {
        let today = now.date_naive();
        match *self {
            Self::Today => TimeRange::new(midnight(today), now),
            Self::Yesterday => TimeRange::new(midnight(today - Duration::days(1)), midnight(today)),
            Self::LastWeek => TimeRange::new(now - Duration::days(7), now),
            Self::LastMonth => TimeRange::new(now - Duration::days(30), now),
            Self::LastYear => TimeRange::new(now - Duration::days(365), now),
            Self::Dates { start, end } => TimeRange::new(midnight(start), midnight(end)),
            Self::Instants { start, end } => TimeRange::new(start, end),
        }
    }
}

/// Parse and resolve a period token in one step.
pub fn resolve_period(token: &str, now: DateTime<Utc>) -> Result<TimeRange> {
    Ok(Period::parse(token)?.resolve(now))
}

/// Half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whether `t` falls inside the interval.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} .. {}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

fn midnight(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Day streaks over a set of active UTC days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streaks {
    /// Consecutive active days ending today, or yesterday if today is idle.
    pub current: u32,
    /// Longest run of consecutive active days.
    pub longest: u32,
}

/// Compute current and longest streaks.
pub fn streaks(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> Streaks {
    let mut longest = 0u32;
    let mut run = 0u32;
    let mut prev: Option<NaiveDate> = None;
    for &day in days {
        run = match prev {
            Some(p) if p + Duration::days(1) == day => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        prev = Some(day);
    }

    let anchor = if days.contains(&today) {
        Some(today)
    } else if days.contains(&(today - Duration::days(1))) {
        Some(today - Duration::days(1))
    } else {
        None
    };

    let mut current = 0u32;
    if let Some(mut day) = anchor {
        while days.contains(&day) {
            current += 1;
            day -= Duration::days(1);
        }
    }

    Streaks { current, longest }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_today_and_yesterday() {
        let now = at(2024, 3, 15, 14);
        let today = resolve_period("today", now).unwrap();
        assert_eq!(today.start, at(2024, 3, 15, 0));
        assert_eq!(today.end, now);
        assert!(today.contains(at(2024, 3, 15, 13)));
        assert!(!today.contains(now));
        assert!(!today.contains(at(2024, 3, 15, 15)));
        assert!(!today.contains(at(2024, 3, 14, 23)));

        let yesterday = resolve_period("yesterday", now).unwrap();
        assert_eq!(yesterday.start, at(2024, 3, 14, 0));
        assert_eq!(yesterday.end, at(2024, 3, 15, 0));
    }

    #[test]
    fn test_rolling_windows() {
        let now = at(2024, 3, 15, 14);
        let week = resolve_period("last_week", now).unwrap();
        assert_eq!(week.start, at(2024, 3, 8, 14));
        assert_eq!(week.end, now);
        assert!(week.contains(at(2024, 3, 8, 14)));
        assert!(!week.contains(at(2024, 3, 8, 13)));
        assert!(!week.contains(at(2024, 3, 15, 20)));

        let month = resolve_period("LAST_MONTH", now).unwrap();
        assert_eq!(month.start, now - Duration::days(30));

        let year = resolve_period("last_year", now).unwrap();
        assert_eq!(year.start, now - Duration::days(365));
    }

    #[test]
    fn test_date_range_end_exclusive() {
        let now = at(2024, 3, 15, 14);
        let range = resolve_period("2024-01-01:2024-01-31", now).unwrap();
        assert_eq!(range.start, at(2024, 1, 1, 0));
        assert_eq!(range.end, at(2024, 1, 31, 0));
        assert!(range.contains(at(2024, 1, 30, 23)));
        assert!(!range.contains(at(2024, 1, 31, 12)));
    }

    #[test]
    fn test_instant_range() {
        let now = at(2024, 3, 15, 14);
        let range =
            resolve_period("2024-03-01T10:00:00Z/2024-03-01T12:00:00+00:00", now).unwrap();
        assert_eq!(range.start, at(2024, 3, 1, 10));
        assert_eq!(range.end, at(2024, 3, 1, 12));
    }

    #[test]
    fn test_invalid_periods() {
        let now = at(2024, 3, 15, 14);
        for token in [
            "soon",
            "",
            "2024-13-01:2024-12-31",
            "2024-02-01:2024-01-01",
            "2024-01-01:2024-01-01",
            "2024-03-01T12:00:00Z/2024-03-01T10:00:00Z",
            "last_decade",
        ] {
            let err = resolve_period(token, now).unwrap_err();
            assert!(matches!(err, MemoryError::InvalidPeriod(_)), "{token}");
        }
    }

    #[test]
    fn test_streaks() {
        let today = day(2024, 3, 15);
        let days: BTreeSet<_> = [
            day(2024, 3, 1),
            day(2024, 3, 2),
            day(2024, 3, 3),
            day(2024, 3, 4),
            day(2024, 3, 13),
            day(2024, 3, 14),
        ]
        .into_iter()
        .collect();
        let s = streaks(&days, today);
        assert_eq!(s.current, 2);
        assert_eq!(s.longest, 4);

        let s = streaks(&days, day(2024, 3, 20));
        assert_eq!(s.current, 0);

        assert_eq!(streaks(&BTreeSet::new(), today), Streaks::default());
    }
}
