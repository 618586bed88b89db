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

//! # analytics
//!
//! Site-analytics entities: visitors (by IP address), pages, and per-page weekly view counts.
//!
//! | Entity   | PartitionKey   | SortKey             | Index1                             |
//! |----------|----------------|---------------------|------------------------------------|
//! | Visitor  | `VISITOR#<ip>` | `#VISITOR`          |                                    |
//! | Page     | `PAGE#<slug>`  | `#PAGE`             |                                    |
//! | PageWeek | `PAGE#<slug>`  | `#WEEK#<yyyy>#<ww>` | `#WEEK#<yyyy>#<ww>` / `PAGE#<slug>` |
//!
//! Index 1 on [PageWeek] lets us pull every page viewed in a given week with a single query.

use std::{fmt::Display, net::IpAddr};

use snafu::prelude::*;

use crate::{
    attr::{Item, ItemExt},
    entities::{
        timestamp_attr, AttrSnafu, BadIpSnafu, BadWeekSnafu, BadYearSnafu, Entity, Result, Slug,
        SLUG, TITLE,
    },
    storage::Key,
    timestamp::Timestamp,
};

pub const FIRST_VISIT: &str = "FirstVisit";
pub const IP: &str = "Ip";
pub const LAST_VISIT: &str = "LastVisit";
pub const NUMBER_SESSIONS: &str = "NumberSessions";
pub const NUMBER_VIEWS: &str = "NumberViews";
pub const WEEK: &str = "Week";
pub const YEAR: &str = "Year";

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Visitor                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Visitor {
    ip: IpAddr,
    first_visit: Timestamp,
    last_visit: Timestamp,
    number_sessions: u64,
}

impl Visitor {
    /// A visitor on their first visit
    pub fn new(ip: IpAddr, at: &Timestamp) -> Visitor {
        Visitor {
            ip,
            first_visit: *at,
            last_visit: *at,
            number_sessions: 1,
        }
    }
    pub fn key(ip: &IpAddr) -> Key {
        Key::new(format!("VISITOR#{}", ip), "#VISITOR")
    }
    pub fn ip(&self) -> &IpAddr {
        &self.ip
    }
    pub fn first_visit(&self) -> &Timestamp {
        &self.first_visit
    }
    pub fn last_visit(&self) -> &Timestamp {
        &self.last_visit
    }
    pub fn number_sessions(&self) -> u64 {
        self.number_sessions
    }
}

impl Entity for Visitor {
    const TYPE: &'static str = "Visitor";

    fn primary_key(&self) -> Key {
        Visitor::key(&self.ip)
    }
    fn attributes(&self) -> Item {
        Item::from([
            (IP.to_owned(), self.ip.to_string().into()),
            (FIRST_VISIT.to_owned(), self.first_visit.into()),
            (LAST_VISIT.to_owned(), self.last_visit.into()),
            (NUMBER_SESSIONS.to_owned(), self.number_sessions.into()),
        ])
    }
    fn from_attributes(item: &Item) -> Result<Self> {
        let text = item.string(IP).context(AttrSnafu)?;
        Ok(Visitor {
            ip: text.parse::<IpAddr>().context(BadIpSnafu { text })?,
            first_visit: timestamp_attr(item, FIRST_VISIT)?,
            last_visit: timestamp_attr(item, LAST_VISIT)?,
            number_sessions: item.number(NUMBER_SESSIONS).context(AttrSnafu)?,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Page                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Page {
    slug: Slug,
    title: String,
    number_views: u64,
}

fn page_partition(slug: &Slug) -> String {
    format!("PAGE#{}", slug)
}

impl Page {
    pub fn new(slug: &Slug, title: &str) -> Page {
        Page {
            slug: slug.clone(),
            title: title.to_owned(),
            number_views: 0,
        }
    }
    pub fn key(slug: &Slug) -> Key {
        Key::new(page_partition(slug), "#PAGE")
    }
    pub fn slug(&self) -> &Slug {
        &self.slug
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn number_views(&self) -> u64 {
        self.number_views
    }
}

impl Entity for Page {
    const TYPE: &'static str = "Page";

    fn primary_key(&self) -> Key {
        Page::key(&self.slug)
    }
    fn attributes(&self) -> Item {
        Item::from([
            (SLUG.to_owned(), (&self.slug).into()),
            (TITLE.to_owned(), self.title.as_str().into()),
            (NUMBER_VIEWS.to_owned(), self.number_views.into()),
        ])
    }
    fn from_attributes(item: &Item) -> Result<Self> {
        Ok(Page {
            slug: Slug::new(item.string(SLUG).context(AttrSnafu)?)?,
            title: item.string(TITLE).context(AttrSnafu)?.to_owned(),
            number_views: item.number(NUMBER_VIEWS).context(AttrSnafu)?,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            IsoWeek                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An ISO-8601 week: a week-numbering year in 0-9999 & a week in 1-53
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct IsoWeek {
    year: i32,
    week: u32,
}

impl IsoWeek {
    pub fn new(year: i32, week: u32) -> Result<IsoWeek> {
        ensure!((0..=9999).contains(&year), BadYearSnafu { year });
        ensure!((1..=53).contains(&week), BadWeekSnafu { week });
        Ok(IsoWeek { year, week })
    }
    /// The week in which `ts` falls
    pub fn of(ts: &Timestamp) -> Result<IsoWeek> {
        let (year, week) = ts.iso_week();
        IsoWeek::new(year, week)
    }
    pub fn year(&self) -> i32 {
        self.year
    }
    pub fn week(&self) -> u32 {
        self.week
    }
    /// The index-1 partition gathering every page's views for this week
    pub fn partition(&self) -> String {
        format!("#WEEK#{}", self)
    }
}

impl Display for IsoWeek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}#{:02}", self.year, self.week)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            PageWeek                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The number of times a page was viewed during one ISO week
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PageWeek {
    slug: Slug,
    week: IsoWeek,
    number_views: u64,
}

impl PageWeek {
    pub fn new(slug: &Slug, week: IsoWeek, number_views: u64) -> PageWeek {
        PageWeek {
            slug: slug.clone(),
            week,
            number_views,
        }
    }
    pub fn key(slug: &Slug, week: &IsoWeek) -> Key {
        Key::new(page_partition(slug), week.partition())
    }
    pub fn slug(&self) -> &Slug {
        &self.slug
    }
    pub fn week(&self) -> &IsoWeek {
        &self.week
    }
    pub fn number_views(&self) -> u64 {
        self.number_views
    }
}

impl Entity for PageWeek {
    const TYPE: &'static str = "PageWeek";

    fn primary_key(&self) -> Key {
        PageWeek::key(&self.slug, &self.week)
    }
    fn index1_key(&self) -> Option<Key> {
        Some(Key::new(self.week.partition(), page_partition(&self.slug)))
    }
    fn attributes(&self) -> Item {
        Item::from([
            (SLUG.to_owned(), (&self.slug).into()),
            (YEAR.to_owned(), self.week.year.into()),
            (WEEK.to_owned(), self.week.week.into()),
            (NUMBER_VIEWS.to_owned(), self.number_views.into()),
        ])
    }
    fn from_attributes(item: &Item) -> Result<Self> {
        Ok(PageWeek {
            slug: Slug::new(item.string(SLUG).context(AttrSnafu)?)?,
            week: IsoWeek::new(
                item.number(YEAR).context(AttrSnafu)?,
                item.number(WEEK).context(AttrSnafu)?,
            )?,
            number_views: item.number(NUMBER_VIEWS).context(AttrSnafu)?,
        })
    }
}
