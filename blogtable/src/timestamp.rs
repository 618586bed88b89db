// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of blogtable.
//
// blogtable is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// blogtable is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with blogtable.  If not,
// see <http://www.gnu.org/licenses/>.

//! # timestamp
//!
//! Sortable, fixed-width timestamps.
//!
//! Timestamps show up all over the key scheme (comment & vote sort keys are sequences of them), and
//! the whole scheme depends on lexicographic order agreeing with chronological order. That holds
//! only if every timestamp is rendered at the same width, in the same zone: [Timestamp] is always
//! UTC, always millisecond precision, and always rendered as `YYYY-MM-DDTHH:MM:SS.mmmZ`.

use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Datelike, NaiveDateTime, SubsecRound, Utc};
use snafu::{prelude::*, Backtrace};

use crate::attr::Value;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{text} is not a timestamp of the form YYYY-MM-DDTHH:MM:SS.mmmZ"))]
    BadTimestamp { text: String, backtrace: Backtrace },
}

/// strftime-style format for [Timestamp]; always renders as 24 characters (for years 0-9999)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// The rendered width of every [Timestamp]
pub const TIMESTAMP_WIDTH: usize = 24;

/// A UTC instant, truncated to the millisecond
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Timestamp {
        Timestamp::from(Utc::now())
    }
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
    /// The ISO-8601 week-numbering year & week in which this instant falls
    pub fn iso_week(&self) -> (i32, u32) {
        let week = self.0.iso_week();
        (week.year(), week.week())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Timestamp(value.trunc_subsecs(3))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    // chrono is lenient about the width of some fields on parse, so insist that the text
    // round-trips exactly.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| Timestamp(naive.and_utc()))
            .filter(|ts| ts.to_string() == s)
            .context(BadTimestampSnafu { text: s })
    }
}

impl From<&Timestamp> for Value {
    fn from(value: &Timestamp) -> Self {
        Value::String(value.to_string())
    }
}

impl From<Timestamp> for Value {
    fn from(value: Timestamp) -> Self {
        Value::String(value.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use chrono::TimeZone;

    #[test]
    fn format() {
        let ts = Timestamp::from(
            Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap()
                + chrono::Duration::microseconds(42_999),
        );
        assert_eq!(ts.to_string(), "2024-03-09T07:05:01.042Z");
        assert_eq!(ts.to_string().len(), TIMESTAMP_WIDTH);
        assert_eq!("2024-03-09T07:05:01.042Z".parse::<Timestamp>().unwrap(), ts);

        assert!("2024-03-09T07:05:01Z".parse::<Timestamp>().is_err());
        assert!("2024-03-09T07:05:01.042+00:00".parse::<Timestamp>().is_err());
        assert!("2024-3-09T07:05:01.042Z".parse::<Timestamp>().is_err());
        assert!("2024-13-09T07:05:01.042Z".parse::<Timestamp>().is_err());
    }

    #[test]
    fn order() {
        let a = "2024-03-09T07:05:01.042Z".parse::<Timestamp>().unwrap();
        let b = "2024-03-09T07:05:01.043Z".parse::<Timestamp>().unwrap();
        let c = "2025-01-01T00:00:00.000Z".parse::<Timestamp>().unwrap();
        assert!(a < b && b < c);
        assert!(a.to_string() < b.to_string() && b.to_string() < c.to_string());
    }

    #[test]
    fn weeks() {
        // December 30, 2024 is in week one of 2025
        let ts = "2024-12-30T12:00:00.000Z".parse::<Timestamp>().unwrap();
        assert_eq!(ts.iso_week(), (2025, 1));
    }
}
