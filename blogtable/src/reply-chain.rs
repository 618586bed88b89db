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

//! # Reply Chains
//!
//! ## Introduction
//!
//! Every comment & every vote on a post lives in that post's index-1 partition (`POST#<slug>`). The
//! interesting part is the sort key. A comment's index-1 sort key spells out the path from the top
//! of the post down to the comment itself:
//!
//! ```text
//! #COMMENT#<ancestor 1>#COMMENT#<ancestor 2>...#COMMENT#<own timestamp>
//! ```
//!
//! and a vote's spells out the path to the comment voted upon, followed by the vote's own
//! timestamp:
//!
//! ```text
//! #COMMENT#<ancestor 1>...#COMMENT#<voted-on comment>#VOTE#<own timestamp>
//! ```
//!
//! The list of ancestor timestamps is the "reply chain". Since [Timestamp]s render at a fixed
//! width, an ascending scan of the partition yields every comment after all of its ancestors, which
//! is to say in depth-first pre-order. That's what lets the tree be rebuilt in a single pass
//! (see [tree]).
//!
//! [tree]: crate::tree

use std::fmt::Display;

use lazy_static::lazy_static;
use regex::Regex;
use snafu::{prelude::*, Backtrace};

use crate::{
    attr::Value,
    timestamp::{self, Timestamp},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("A vote must name at least one comment in its reply chain"))]
    EmptyVoteChain { backtrace: Backtrace },
    #[snafu(display("{key} is not a well-formed comment or vote sort key"))]
    Malformed { key: String, backtrace: Backtrace },
    #[snafu(display(
        "Reply chains must be strictly increasing, but {later} doesn't follow {earlier}"
    ))]
    NotIncreasing {
        earlier: Timestamp,
        later: Timestamp,
        backtrace: Backtrace,
    },
    #[snafu(display("Bad timestamp in a reply chain: {source}"))]
    Timestamp { source: timestamp::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

pub const COMMENT_SEGMENT: &str = "#COMMENT#";
pub const VOTE_SEGMENT: &str = "#VOTE#";

// The pattern for a single, rendered `Timestamp`
macro_rules! ts_pattern {
    () => {
        r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}Z"
    };
}

lazy_static! {
    static ref WELL_FORMED: Regex = Regex::new(concat!(
        "^(?:#COMMENT#", ts_pattern!(), ")+(?:#VOTE#", ts_pattern!(), ")?$"
    )).unwrap(/* known good */);
    static ref SEGMENT: Regex = Regex::new(concat!(
        "#(COMMENT|VOTE)#(", ts_pattern!(), ")"
    )).unwrap(/* known good */);
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           ReplyChain                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The ordered list of ancestor comment timestamps leading from the top level of a post down to a
/// comment or vote
///
/// Correct-by-construction: the timestamps are strictly increasing. A reply can't pre-date its
/// parent.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ReplyChain(Vec<Timestamp>);

fn check_increasing(chain: &[Timestamp]) -> Result<()> {
    match chain.windows(2).find(|pair| pair[0] >= pair[1]) {
        Some(pair) => NotIncreasingSnafu {
            earlier: pair[0],
            later: pair[1],
        }
        .fail(),
        None => Ok(()),
    }
}

impl ReplyChain {
    pub fn new(ancestors: Vec<Timestamp>) -> Result<ReplyChain> {
        check_increasing(&ancestors)?;
        Ok(ReplyChain(ancestors))
    }
    /// The (empty) chain of a top-level comment
    pub fn top_level() -> ReplyChain {
        ReplyChain(Vec::new())
    }
    /// The chain of a reply to (or vote on) the comment posted at `parent`, whose own chain is
    /// `self`
    pub fn child(&self, parent: Timestamp) -> Result<ReplyChain> {
        if let Some(last) = self.last() {
            ensure!(
                parent > *last,
                NotIncreasingSnafu {
                    earlier: *last,
                    later: parent
                }
            );
        }
        let mut ancestors = self.0.clone();
        ancestors.push(parent);
        Ok(ReplyChain(ancestors))
    }
    // Callers guarantee that `own` follows every member of `self`.
    pub(crate) fn extend_trusted(&self, own: Timestamp) -> ReplyChain {
        let mut ancestors = self.0.clone();
        ancestors.push(own);
        ReplyChain(ancestors)
    }
    /// The chain with its last member removed, along with that member
    pub fn split_last(&self) -> Option<(ReplyChain, Timestamp)> {
        self.0
            .split_last()
            .map(|(last, rest)| (ReplyChain(rest.to_vec()), *last))
    }
    pub fn ancestors(&self) -> &[Timestamp] {
        &self.0
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn last(&self) -> Option<&Timestamp> {
        self.0.last()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn starts_with(&self, prefix: &ReplyChain) -> bool {
        self.0.starts_with(&prefix.0)
    }
    /// Parse a chain from its stored form (a list of rendered timestamps)
    pub fn from_strs<'a, I: IntoIterator<Item = &'a str>>(strs: I) -> Result<ReplyChain> {
        strs.into_iter()
            .map(|s| s.parse::<Timestamp>().context(TimestampSnafu))
            .collect::<Result<Vec<Timestamp>>>()
            .and_then(ReplyChain::new)
    }
}

impl From<&ReplyChain> for Value {
    fn from(value: &ReplyChain) -> Self {
        Value::List(value.0.iter().map(Value::from).collect())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      encoding & decoding                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// What sort of item an index-1 sort key belongs to
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Kind {
    Comment,
    Vote,
}

impl Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Kind::Comment => write!(f, "comment"),
            Kind::Vote => write!(f, "vote"),
        }
    }
}

/// Produce the index-1 sort key for an item of sort `kind` at `own` with ancestors `chain`
///
/// This doesn't check that a vote has a non-empty chain; [Vote] does that on construction, so
/// every [Vote] can render its key infallibly. Everyone else should use [encode_comment] or
/// [encode_vote].
///
/// [Vote]: crate::entities::Vote
pub(crate) fn encode(chain: &ReplyChain, own: &Timestamp, kind: Kind) -> String {
    use std::fmt::Write;
    let mut key = String::with_capacity(
        (chain.len() + 1) * (COMMENT_SEGMENT.len() + timestamp::TIMESTAMP_WIDTH),
    );
    chain.ancestors().iter().for_each(|t| {
        let _ = write!(key, "{}{}", COMMENT_SEGMENT, t);
    });
    let tag = match kind {
        Kind::Comment => COMMENT_SEGMENT,
        Kind::Vote => VOTE_SEGMENT,
    };
    let _ = write!(key, "{}{}", tag, own);
    key
}

pub fn encode_comment(chain: &ReplyChain, own: &Timestamp) -> String {
    encode(chain, own, Kind::Comment)
}

// A vote may share its comment's timestamp (the automatic self up-vote does), but may not
// precede it
fn check_vote(chain: &ReplyChain, own: &Timestamp) -> Result<()> {
    let last = chain.last().context(EmptyVoteChainSnafu)?;
    ensure!(
        own >= last,
        NotIncreasingSnafu {
            earlier: *last,
            later: *own
        }
    );
    Ok(())
}

/// Produce the index-1 sort key for a vote; fails if `chain` is empty (you can't vote on nothing)
/// or if `own` precedes the comment voted upon
pub fn encode_vote(chain: &ReplyChain, own: &Timestamp) -> Result<String> {
    check_vote(chain, own)?;
    Ok(encode(chain, own, Kind::Vote))
}

/// The index-1 sort-key prefix selecting the comment at `own` together with all of its replies
/// (to any depth) and every vote on any of them
///
/// Since timestamps are fixed-width, no other comment's key can share this prefix.
pub fn subtree_prefix(chain: &ReplyChain, own: &Timestamp) -> String {
    encode_comment(chain, own)
}

/// A decoded index-1 sort key
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Decoded {
    pub kind: Kind,
    /// For comments, the comment's ancestors; for votes, the ancestors of the vote (the last of
    /// which is the comment voted upon)
    pub ancestors: ReplyChain,
    pub own: Timestamp,
}

pub fn decode(key: &str) -> Result<Decoded> {
    ensure!(WELL_FORMED.is_match(key), MalformedSnafu { key });

    let mut comments = Vec::new();
    let mut vote = None;
    for caps in SEGMENT.captures_iter(key) {
        let ts = caps[2].parse::<Timestamp>().context(TimestampSnafu)?;
        match &caps[1] {
            "COMMENT" => comments.push(ts),
            _ => vote = Some(ts),
        }
    }

    match vote {
        Some(own) => {
            let ancestors = ReplyChain::new(comments)?;
            check_vote(&ancestors, &own)?;
            Ok(Decoded {
                kind: Kind::Vote,
                ancestors,
                own,
            })
        }
        None => {
            // The comment's own timestamp must follow all of its ancestors', too
            check_increasing(&comments)?;
            // The well-formedness check guarantees at least one comment segment
            let own = comments.pop().context(MalformedSnafu { key })?;
            Ok(Decoded {
                kind: Kind::Comment,
                ancestors: ReplyChain(comments),
                own,
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        s.parse::<Timestamp>().unwrap()
    }

    const T1: &str = "2024-05-01T10:00:00.000Z";
    const T2: &str = "2024-05-01T11:30:00.250Z";
    const T3: &str = "2024-05-02T08:15:42.007Z";

    #[test]
    fn scenarios() {
        // Top-level comment
        let top = ReplyChain::top_level();
        let key = encode_comment(&top, &ts(T1));
        assert_eq!(key, format!("#COMMENT#{}", T1));
        let decoded = decode(&key).unwrap();
        assert_eq!(decoded.kind, Kind::Comment);
        assert!(decoded.ancestors.is_empty());
        assert_eq!(decoded.own, ts(T1));

        // A reply to it
        let reply = top.child(ts(T1)).unwrap();
        let key = encode_comment(&reply, &ts(T2));
        assert_eq!(key, format!("#COMMENT#{}#COMMENT#{}", T1, T2));
        let decoded = decode(&key).unwrap();
        assert_eq!(decoded.ancestors.ancestors(), &[ts(T1)]);
        assert_eq!(decoded.own, ts(T2));

        // A vote on the reply
        let vote = reply.child(ts(T2)).unwrap();
        let key = encode_vote(&vote, &ts(T3)).unwrap();
        assert_eq!(key, format!("#COMMENT#{}#COMMENT#{}#VOTE#{}", T1, T2, T3));
        let decoded = decode(&key).unwrap();
        assert_eq!(decoded.kind, Kind::Vote);
        assert_eq!(decoded.ancestors.ancestors(), &[ts(T1), ts(T2)]);
        assert_eq!(decoded.own, ts(T3));
    }

    #[test]
    fn empty_vote_chain() {
        assert!(matches!(
            encode_vote(&ReplyChain::top_level(), &ts(T1)),
            Err(Error::EmptyVoteChain { .. })
        ));
    }

    #[test]
    fn chains_must_increase() {
        assert!(ReplyChain::new(vec![ts(T2), ts(T1)]).is_err());
        assert!(ReplyChain::new(vec![ts(T1), ts(T1)]).is_err());
        assert!(ReplyChain::new(vec![ts(T1), ts(T2)]).unwrap().child(ts(T1)).is_err());
        // A comment can't precede its parent...
        assert!(decode(&format!("#COMMENT#{}#COMMENT#{}", T2, T1)).is_err());
        // but a vote may share its comment's timestamp
        assert!(decode(&format!("#COMMENT#{}#VOTE#{}", T1, T1)).is_ok());
    }

    #[test]
    fn malformed() {
        for key in [
            "",
            "#POST",
            "#VOTE#2024-05-01T10:00:00.000Z",
            "#COMMENT#2024-05-01T10:00:00.000Z#",
            "#COMMENT#2024-05-01T10:00:00Z",
            "#COMMENT#2024-05-01T10:00:00.000Z#VOTE#2024-05-01T10:00:00.000Z#VOTE#2024-05-01T10:00:00.000Z",
            "#COMMENT#2024-05-01T10:00:00.000Z#VOTE#2024-05-01T10:00:00.000Z#COMMENT#2024-05-01T11:00:00.000Z",
        ] {
            assert!(
                matches!(decode(key), Err(Error::Malformed { .. })),
                "{key} should be malformed"
            );
        }
    }

    // If chain `c1` is a proper prefix of chain `c2`, everything keyed under `c1` sorts before
    // everything keyed under `c2`
    #[test]
    fn prefixes_sort_first() {
        let times = [
            "2024-01-01T00:00:00.000Z",
            "2024-01-01T00:00:00.001Z",
            "2024-02-01T00:00:00.000Z",
            "2030-12-31T23:59:59.999Z",
        ]
        .iter()
        .map(|s| ts(s))
        .collect::<Vec<Timestamp>>();
        let mut chain = ReplyChain::top_level();
        let mut prev: Option<String> = None;
        for t in &times {
            let key = encode_comment(&chain, t);
            if let Some(prev) = prev {
                assert!(prev < key, "{prev} should precede {key}");
            }
            // A vote on this comment follows the comment itself
            let vote = encode_vote(&chain.child(*t).unwrap(), t).unwrap();
            assert!(key < vote);
            prev = Some(key);
            chain = chain.child(*t).unwrap();
        }

        // A deep reply to an early comment sorts before a later top-level comment
        let early_reply = encode_comment(
            &ReplyChain::new(vec![times[0]]).unwrap(),
            &times[3],
        );
        let later_top = encode_comment(&ReplyChain::top_level(), &times[1]);
        assert!(early_reply < later_top);
    }

    #[test]
    fn subtree() {
        let chain = ReplyChain::new(vec![ts(T1)]).unwrap();
        let prefix = subtree_prefix(&chain, &ts(T2));
        let vote = encode_vote(&chain.child(ts(T2)).unwrap(), &ts(T3)).unwrap();
        let sibling = encode_comment(&chain, &ts(T3));
        assert!(vote.starts_with(&prefix));
        assert!(!sibling.starts_with(&prefix));
    }
}
