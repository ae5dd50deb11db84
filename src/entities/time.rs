//! Relative period resolution.
//!
//! Periods resolve against a reference date into an inclusive
//! `[start, end]` day range. Weeks start on Sunday.

use std::sync::LazyLock;

use chrono::{Datelike, Days, Months, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Comparison, TimeRange};

/// Used when a period cannot be understood.
pub const DEFAULT_PERIOD: &str = "last 30 days";

static LAST_N: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:the\s+)?(?:last|past|previous)\s+(\d+\s+)?(day|week|month|quarter|year)s?$")
        .unwrap()
});

static THIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:this|current)\s+(week|month|quarter|year)$").unwrap());

static TO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(week|month|quarter|year)\s+to\s+date$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Unit {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(Unit::Day),
            "week" => Some(Unit::Week),
            "month" => Some(Unit::Month),
            "quarter" => Some(Unit::Quarter),
            "year" => Some(Unit::Year),
            _ => None,
        }
    }
}

/// Inclusive calendar-day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedTimeRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ResolvedTimeRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Resolve an extracted range. The second value is a warning when the
    /// period was not understood and the default was used instead.
    pub fn resolve(range: &TimeRange, today: NaiveDate) -> (Self, Option<String>) {
        match (range.start, range.end) {
            (Some(start), Some(end)) => return (Self::new(start, end), None),
            (Some(start), None) => return (Self::new(start, today), None),
            _ => {}
        }

        let period = range.relative_period.as_deref().unwrap_or(DEFAULT_PERIOD);
        match Self::parse_relative(period, today) {
            Some(resolved) => (resolved, None),
            None => {
                let fallback = Self::parse_relative(DEFAULT_PERIOD, today)
                    .unwrap_or_else(|| Self::new(today, today));
                (
                    fallback,
                    Some(format!(
                        "Time period '{}' not understood; using {}",
                        period, DEFAULT_PERIOD
                    )),
                )
            }
        }
    }

    /// Parse a relative period such as `last 7 days` or `month to date`.
    pub fn parse_relative(period: &str, today: NaiveDate) -> Option<Self> {
        let text = period.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        let text = match text.as_str() {
            "ytd" => "year to date".to_string(),
            "qtd" => "quarter to date".to_string(),
            "mtd" => "month to date".to_string(),
            "wtd" => "week to date".to_string(),
            _ => text,
        };

        match text.as_str() {
            "today" => return Some(Self::new(today, today)),
            "yesterday" => {
                let y = sub_days(today, 1);
                return Some(Self::new(y, y));
            }
            _ => {}
        }

        if let Some(caps) = LAST_N.captures(&text) {
            let n: u32 = caps
                .get(1)
                .map_or(Some(1), |m| m.as_str().trim().parse().ok())?;
            let unit = Unit::parse(caps.get(2)?.as_str())?;
            return Some(Self::new(back(today, unit, n)?, today));
        }

        if let Some(caps) = THIS.captures(&text) {
            let unit = Unit::parse(caps.get(1)?.as_str())?;
            let start = period_start(today, unit);
            let end = sub_days(forward(start, unit, 1), 1);
            return Some(Self::new(start, end));
        }

        if let Some(caps) = TO_DATE.captures(&text) {
            let unit = Unit::parse(caps.get(1)?.as_str())?;
            return Some(Self::new(period_start(today, unit), today));
        }

        None
    }

    /// Whether the range reaches `today`, so its data can still change.
    pub fn touches(&self, today: NaiveDate) -> bool {
        self.end >= today
    }

    pub fn days(&self) -> u64 {
        (self.end - self.start).num_days().unsigned_abs() + 1
    }

    /// The range to compare against.
    pub fn shift(&self, comparison: Comparison) -> Self {
        match comparison {
            Comparison::YearOverYear => Self::new(
                back_or_min(self.start, Unit::Year),
                back_or_min(self.end, Unit::Year),
            ),
            Comparison::MonthOverMonth => Self::new(
                back_or_min(self.start, Unit::Month),
                back_or_min(self.end, Unit::Month),
            ),
            Comparison::PreviousPeriod => {
                let len = self.days();
                Self::new(sub_days(self.start, len), sub_days(self.end, len))
            }
        }
    }
}

fn sub_days(date: NaiveDate, n: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(n)).unwrap_or(NaiveDate::MIN)
}

fn back_or_min(date: NaiveDate, unit: Unit) -> NaiveDate {
    back(date, unit, 1).unwrap_or(NaiveDate::MIN)
}

/// `None` when the count or the resulting date is out of range.
fn back(date: NaiveDate, unit: Unit, n: u32) -> Option<NaiveDate> {
    match unit {
        Unit::Day => date.checked_sub_days(Days::new(n as u64)),
        Unit::Week => date.checked_sub_days(Days::new(7 * n as u64)),
        Unit::Month => date.checked_sub_months(Months::new(n)),
        Unit::Quarter => date.checked_sub_months(Months::new(n.checked_mul(3)?)),
        Unit::Year => date.checked_sub_months(Months::new(n.checked_mul(12)?)),
    }
}

fn forward(date: NaiveDate, unit: Unit, n: u32) -> NaiveDate {
    match unit {
        Unit::Day => date.checked_add_days(Days::new(n as u64)),
        Unit::Week => date.checked_add_days(Days::new(7 * n as u64)),
        Unit::Month => date.checked_add_months(Months::new(n)),
        Unit::Quarter => n
            .checked_mul(3)
            .and_then(|m| date.checked_add_months(Months::new(m))),
        Unit::Year => n
            .checked_mul(12)
            .and_then(|m| date.checked_add_months(Months::new(m))),
    }
    .unwrap_or(NaiveDate::MAX)
}

fn period_start(today: NaiveDate, unit: Unit) -> NaiveDate {
    let first_of = |month: u32| NaiveDate::from_ymd_opt(today.year(), month, 1).unwrap_or(today);
    match unit {
        Unit::Day => today,
        Unit::Week => sub_days(today, today.weekday().num_days_from_sunday() as u64),
        Unit::Month => first_of(today.month()),
        Unit::Quarter => first_of((today.month() - 1) / 3 * 3 + 1),
        Unit::Year => first_of(1),
    }
}
