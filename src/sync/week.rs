use std::fmt;

use chrono::{Datelike, Duration, NaiveDate};

/// Monday-to-Sunday ISO week, serialized as `"{monday}_{sunday}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WeekKey {
    from: NaiveDate,
    to: NaiveDate,
}

impl WeekKey {
    pub fn containing(date: NaiveDate) -> Self {
        let from = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
        Self {
            from,
            to: from + Duration::days(6),
        }
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    pub fn parse(key: &str) -> Option<Self> {
        let (from, to) = key.split_once('_')?;
        let from = NaiveDate::parse_from_str(from, "%Y-%m-%d").ok()?;
        let to = NaiveDate::parse_from_str(to, "%Y-%m-%d").ok()?;
        let week = Self::containing(from);
        (week.from == from && week.to == to).then_some(week)
    }
}

impl fmt::Display for WeekKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}",
            self.from.format("%Y-%m-%d"),
            self.to.format("%Y-%m-%d")
        )
    }
}
