// Copyright (C) 2024-2025 Michael Herstine <sp1ff@pobox.com>
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

//! # blogtable Entities
//!
//! ## Introduction
//!
//! This module defines the entities the blog stores, along with the refined types out of which
//! they're built. Every entity lives in the one table, so every entity knows how to name itself
//! there: its primary key, whichever secondary-index keys it participates in, & its attributes
//! (see [Entity]).
//!
//! The key scheme:
//!
//! | Entity  | PartitionKey | SortKey              | Index1                           | Index2                  |
//! |---------|--------------|----------------------|----------------------------------|-------------------------|
//! | Blog    | `#BLOG`      | `#BLOG`              |                                  |                         |
//! | User    | `USER#<n>`   | `#USER`              | `NAME#<name>` / `#USER`          | `#USER` / `USER#<n>`    |
//! | Post    | `#POST`      | `POST#<slug>`        | `POST#<slug>` / `#POST`          | `#POST` / `DATE#<date>` |
//! | Project | `#PROJECT`   | `PROJECT#<slug>`     |                                  | `#PROJECT` / `DATE#..`  |
//! | Comment | `USER#<n>`   | `#COMMENT#<date>`    | `POST#<slug>` / reply-chain key  |                         |
//! | Vote    | `USER#<n>`   | `#VOTE#<date>`       | `POST#<slug>` / reply-chain key  |                         |
//!
//! The site-analytics entities are in [analytics].
//!
//! [analytics]: crate::analytics

use std::{fmt::Display, ops::Deref, str::FromStr};

use email_address::EmailAddress;
use lazy_static::lazy_static;
use regex::Regex;
use snafu::{prelude::*, Backtrace};
use tracing::warn;

use crate::{
    attr::{self, Item, ItemExt, Value},
    reply_chain::{self, encode, Kind, ReplyChain},
    storage::{
        Key, INDEX1_PARTITION_KEY, INDEX1_SORT_KEY, INDEX2_PARTITION_KEY, INDEX2_SORT_KEY, TYPE,
    },
    timestamp::{self, Timestamp},
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to read an attribute: {source}"))]
    Attr { source: attr::Error },
    #[snafu(display("{email} is not a valid e-mail address"))]
    BadEmail { email: String, backtrace: Backtrace },
    #[snafu(display("{text} is not a valid IP address"))]
    BadIp {
        text: String,
        source: std::net::AddrParseError,
        backtrace: Backtrace,
    },
    #[snafu(display("{text} is not a valid slug"))]
    BadSlug { text: String, backtrace: Backtrace },
    #[snafu(display("{text} is not a valid user number"))]
    BadUserNumber { text: String, backtrace: Backtrace },
    #[snafu(display("{name} is not a valid blogtable username"))]
    BadUsername { name: String, backtrace: Backtrace },
    #[snafu(display("{week} is not an ISO week number (1-53)"))]
    BadWeek { week: u32, backtrace: Backtrace },
    #[snafu(display("{year} is not a four-digit year"))]
    BadYear { year: i32, backtrace: Backtrace },
    #[snafu(display("The {what} may not be empty"))]
    EmptyText {
        what: &'static str,
        backtrace: Backtrace,
    },
    #[snafu(display("Bad reply chain: {source}"))]
    ReplyChain { source: reply_chain::Error },
    #[snafu(display("Bad timestamp: {source}"))]
    Timestamp { source: timestamp::Error },
    #[snafu(display("Expected an item of type {expected}; got {actual}"))]
    WrongType {
        expected: &'static str,
        actual: String,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        attribute names                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

pub const DATE_ADDED: &str = "DateAdded";
pub const DATE_JOINED: &str = "DateJoined";
pub const DESCRIPTION: &str = "Description";
pub const EMAIL: &str = "Email";
pub const NUMBER_COMMENTS: &str = "NumberComments";
pub const NUMBER_POSTS: &str = "NumberPosts";
pub const NUMBER_PROJECTS: &str = "NumberProjects";
pub const NUMBER_USERS: &str = "NumberUsers";
pub const NUMBER_VOTES: &str = "NumberVotes";
pub const REPLY_CHAIN: &str = "ReplyChain";
pub const SLUG: &str = "Slug";
pub const TEXT: &str = "Text";
pub const TITLE: &str = "Title";
pub const UP: &str = "Up";
pub const USER_COMMENT_NUMBER: &str = "UserCommentNumber";
pub const USER_NAME: &str = "UserName";
pub const USER_NUMBER: &str = "UserNumber";
/// A comment's net score (up-votes less down-votes)
pub const VOTE: &str = "Vote";
pub const VOTE_NUMBER: &str = "VoteNumber";

pub(crate) fn timestamp_attr(item: &Item, name: &str) -> Result<Timestamp> {
    item.string(name)
        .context(AttrSnafu)?
        .parse::<Timestamp>()
        .context(TimestampSnafu)
}

/// Read a denormalized counter; one that has drifted below zero reads as zero
pub(crate) fn counter_attr(item: &Item, name: &str) -> Result<u64> {
    let n: i64 = item.number(name).context(AttrSnafu)?;
    match u64::try_from(n) {
        Ok(n) => Ok(n),
        Err(_) => {
            warn!("Counter {} holds {}; reading it as zero", name, n);
            Ok(0)
        }
    }
}

fn chain_attr(item: &Item) -> Result<ReplyChain> {
    ReplyChain::from_strs(item.strings(REPLY_CHAIN).context(AttrSnafu)?).context(ReplyChainSnafu)
}

fn non_empty(text: &str, what: &'static str) -> Result<String> {
    ensure!(!text.trim().is_empty(), EmptyTextSnafu { what });
    Ok(text.to_owned())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Entity                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Something that can be stored in the blog's table
///
/// Implementors supply their keys & non-key attributes; [Entity::to_item] & [Entity::from_item]
/// take care of the rest. The law is `from_item(&e.to_item()) == e`.
pub trait Entity: Sized {
    /// The value of the `Type` attribute on every item of this kind
    const TYPE: &'static str;

    fn primary_key(&self) -> Key;
    fn index1_key(&self) -> Option<Key> {
        None
    }
    fn index2_key(&self) -> Option<Key> {
        None
    }
    /// The entity's attributes, exclusive of keys & type
    fn attributes(&self) -> Item;
    fn from_attributes(item: &Item) -> Result<Self>;

    fn to_item(&self) -> Item {
        let mut item = self.primary_key().to_item();
        if let Some(key) = self.index1_key() {
            item.insert(INDEX1_PARTITION_KEY.to_owned(), key.partition.into());
            item.insert(INDEX1_SORT_KEY.to_owned(), key.sort.into());
        }
        if let Some(key) = self.index2_key() {
            item.insert(INDEX2_PARTITION_KEY.to_owned(), key.partition.into());
            item.insert(INDEX2_SORT_KEY.to_owned(), key.sort.into());
        }
        item.insert(TYPE.to_owned(), Self::TYPE.into());
        item.extend(self.attributes());
        item
    }
    fn from_item(item: &Item) -> Result<Self> {
        let actual = item.string(TYPE).context(AttrSnafu)?;
        ensure!(
            actual == Self::TYPE,
            WrongTypeSnafu {
                expected: Self::TYPE,
                actual
            }
        );
        Self::from_attributes(item)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           UserNumber                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Users are numbered sequentially, from one, in the order in which they join
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UserNumber(u32);

impl UserNumber {
    pub fn new(n: u32) -> UserNumber {
        UserNumber(n)
    }
    pub fn get(&self) -> u32 {
        self.0
    }
}

// Zero-padded so that users sort by number
impl Display for UserNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:010}", self.0)
    }
}

impl FromStr for UserNumber {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse::<u32>()
            .ok()
            .map(UserNumber)
            .context(BadUserNumberSnafu { text: s })
    }
}

impl From<UserNumber> for Value {
    fn from(value: UserNumber) -> Self {
        Value::from(value.0)
    }
}

fn user_partition(n: &UserNumber) -> String {
    format!("USER#{}", n)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Slug                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

lazy_static! {
    static ref SLUG_RE: Regex = Regex::new("^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap(/* known good */);
    static ref USERNAME: Regex = Regex::new("^[a-zA-Z][-_.a-zA-Z0-9]+$").unwrap(/* known good */);
}

pub const MAX_SLUG_LENGTH: usize = 128;

/// A refined type representing the URL-friendly name of a post, project or page
///
/// Slugs are lower-case ASCII alphanumeric words separated by single hyphens, at most
/// [MAX_SLUG_LENGTH] characters.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Slug(String);

impl Slug {
    pub fn new(text: &str) -> Result<Slug> {
        (text.len() <= MAX_SLUG_LENGTH && SLUG_RE.is_match(text))
            .then_some(Slug(text.to_owned()))
            .context(BadSlugSnafu { text })
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for Slug {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for Slug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Slug {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Slug::new(s)
    }
}

impl From<&Slug> for Value {
    fn from(value: &Slug) -> Self {
        Value::from(value.0.as_str())
    }
}

/// The index-1 partition holding a post and everything said about it
pub fn post_partition(slug: &Slug) -> String {
    format!("POST#{}", slug)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Username                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

pub const MIN_USERNAME_LENGTH: usize = 2;
pub const MAX_USERNAME_LENGTH: usize = 64;

fn check_username(s: &str) -> bool {
    s.is_ascii()
        && s.len() >= MIN_USERNAME_LENGTH
        && s.len() <= MAX_USERNAME_LENGTH
        && USERNAME.is_match(s)
}

/// A refined type representing a blogtable username
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Username(String);

impl Username {
    /// Construct a [Username] from a `&str`
    ///
    /// Usernames must be ASCII, from two to sixty-four characters in length, and must match the
    /// regex "^[a-zA-Z][-_.a-zA-Z0-9]+$".
    pub fn new(name: &str) -> Result<Username> {
        check_username(name)
            .then_some(Username(name.to_owned()))
            .context(BadUsernameSnafu { name })
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for Username {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Username {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Username::new(s)
    }
}

impl From<&Username> for Value {
    fn from(value: &Username) -> Self {
        Value::from(value.0.as_str())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           UserEmail                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A refined type representing an e-mail address
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UserEmail(String);

impl UserEmail {
    pub fn new(email: &str) -> Result<UserEmail> {
        EmailAddress::is_valid(email)
            .then_some(UserEmail(email.to_string()))
            .context(BadEmailSnafu { email })
    }
}

impl Deref for UserEmail {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for UserEmail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Blog                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Blog-wide counters; there is exactly one of these per table
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Blog {
    pub number_users: u64,
    pub number_posts: u64,
    pub number_projects: u64,
}

impl Blog {
    pub fn key() -> Key {
        Key::new("#BLOG", "#BLOG")
    }
}

impl Entity for Blog {
    const TYPE: &'static str = "Blog";

    fn primary_key(&self) -> Key {
        Blog::key()
    }
    fn attributes(&self) -> Item {
        Item::from([
            (NUMBER_USERS.to_owned(), self.number_users.into()),
            (NUMBER_POSTS.to_owned(), self.number_posts.into()),
            (NUMBER_PROJECTS.to_owned(), self.number_projects.into()),
        ])
    }
    fn from_attributes(item: &Item) -> Result<Self> {
        Ok(Blog {
            number_users: counter_attr(item, NUMBER_USERS)?,
            number_posts: counter_attr(item, NUMBER_POSTS)?,
            number_projects: counter_attr(item, NUMBER_PROJECTS)?,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              User                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct User {
    number: UserNumber,
    name: Username,
    email: UserEmail,
    date_joined: Timestamp,
    number_comments: u64,
    number_votes: u64,
}

impl User {
    pub fn new(
        number: UserNumber,
        name: &Username,
        email: &UserEmail,
        date_joined: &Timestamp,
    ) -> User {
        User {
            number,
            name: name.clone(),
            email: email.clone(),
            date_joined: *date_joined,
            number_comments: 0,
            number_votes: 0,
        }
    }
    pub fn key(number: &UserNumber) -> Key {
        Key::new(user_partition(number), "#USER")
    }
    /// Index-1 partition under which a user can be found by name
    pub fn name_partition(name: &Username) -> String {
        format!("NAME#{}", name)
    }
    pub fn number(&self) -> UserNumber {
        self.number
    }
    pub fn name(&self) -> &Username {
        &self.name
    }
    pub fn email(&self) -> &UserEmail {
        &self.email
    }
    pub fn date_joined(&self) -> &Timestamp {
        &self.date_joined
    }
    pub fn number_comments(&self) -> u64 {
        self.number_comments
    }
    pub fn number_votes(&self) -> u64 {
        self.number_votes
    }
}

impl Entity for User {
    const TYPE: &'static str = "User";

    fn primary_key(&self) -> Key {
        User::key(&self.number)
    }
    fn index1_key(&self) -> Option<Key> {
        Some(Key::new(User::name_partition(&self.name), "#USER"))
    }
    fn index2_key(&self) -> Option<Key> {
        Some(Key::new("#USER", user_partition(&self.number)))
    }
    fn attributes(&self) -> Item {
        Item::from([
            (USER_NUMBER.to_owned(), self.number.into()),
            (USER_NAME.to_owned(), (&self.name).into()),
            (EMAIL.to_owned(), self.email.0.as_str().into()),
            (DATE_JOINED.to_owned(), self.date_joined.into()),
            (NUMBER_COMMENTS.to_owned(), self.number_comments.into()),
            (NUMBER_VOTES.to_owned(), self.number_votes.into()),
        ])
    }
    fn from_attributes(item: &Item) -> Result<Self> {
        Ok(User {
            number: UserNumber(item.number(USER_NUMBER).context(AttrSnafu)?),
            name: Username::new(item.string(USER_NAME).context(AttrSnafu)?)?,
            email: UserEmail::new(item.string(EMAIL).context(AttrSnafu)?)?,
            date_joined: timestamp_attr(item, DATE_JOINED)?,
            number_comments: counter_attr(item, NUMBER_COMMENTS)?,
            number_votes: counter_attr(item, NUMBER_VOTES)?,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Post                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Post {
    slug: Slug,
    title: String,
    date_added: Timestamp,
    number_comments: u64,
}

impl Post {
    pub fn new(slug: &Slug, title: &str, date_added: &Timestamp) -> Result<Post> {
        Ok(Post {
            slug: slug.clone(),
            title: non_empty(title, "post title")?,
            date_added: *date_added,
            number_comments: 0,
        })
    }
    pub fn key(slug: &Slug) -> Key {
        Key::new("#POST", post_partition(slug))
    }
    pub fn slug(&self) -> &Slug {
        &self.slug
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn date_added(&self) -> &Timestamp {
        &self.date_added
    }
    pub fn number_comments(&self) -> u64 {
        self.number_comments
    }
}

/// The sort key of the post row within its own index-1 partition
pub const POST_SORT_KEY: &str = "#POST";

impl Entity for Post {
    const TYPE: &'static str = "Post";

    fn primary_key(&self) -> Key {
        Post::key(&self.slug)
    }
    fn index1_key(&self) -> Option<Key> {
        Some(Key::new(post_partition(&self.slug), POST_SORT_KEY))
    }
    fn index2_key(&self) -> Option<Key> {
        Some(Key::new("#POST", format!("DATE#{}", self.date_added)))
    }
    fn attributes(&self) -> Item {
        Item::from([
            (SLUG.to_owned(), (&self.slug).into()),
            (TITLE.to_owned(), self.title.as_str().into()),
            (DATE_ADDED.to_owned(), self.date_added.into()),
            (NUMBER_COMMENTS.to_owned(), self.number_comments.into()),
        ])
    }
    fn from_attributes(item: &Item) -> Result<Self> {
        Ok(Post {
            slug: Slug::new(item.string(SLUG).context(AttrSnafu)?)?,
            title: item.string(TITLE).context(AttrSnafu)?.to_owned(),
            date_added: timestamp_attr(item, DATE_ADDED)?,
            number_comments: counter_attr(item, NUMBER_COMMENTS)?,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Project                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Project {
    slug: Slug,
    title: String,
    description: String,
    date_added: Timestamp,
}

impl Project {
    pub fn new(
        slug: &Slug,
        title: &str,
        description: &str,
        date_added: &Timestamp,
    ) -> Result<Project> {
        Ok(Project {
            slug: slug.clone(),
            title: non_empty(title, "project title")?,
            description: description.to_owned(),
            date_added: *date_added,
        })
    }
    pub fn key(slug: &Slug) -> Key {
        Key::new("#PROJECT", format!("PROJECT#{}", slug))
    }
    pub fn slug(&self) -> &Slug {
        &self.slug
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn description(&self) -> &str {
        &self.description
    }
    pub fn date_added(&self) -> &Timestamp {
        &self.date_added
    }
}

impl Entity for Project {
    const TYPE: &'static str = "Project";

    fn primary_key(&self) -> Key {
        Project::key(&self.slug)
    }
    fn index2_key(&self) -> Option<Key> {
        Some(Key::new("#PROJECT", format!("DATE#{}", self.date_added)))
    }
    fn attributes(&self) -> Item {
        Item::from([
            (SLUG.to_owned(), (&self.slug).into()),
            (TITLE.to_owned(), self.title.as_str().into()),
            (DESCRIPTION.to_owned(), self.description.as_str().into()),
            (DATE_ADDED.to_owned(), self.date_added.into()),
        ])
    }
    fn from_attributes(item: &Item) -> Result<Self> {
        Ok(Project {
            slug: Slug::new(item.string(SLUG).context(AttrSnafu)?)?,
            title: item.string(TITLE).context(AttrSnafu)?.to_owned(),
            description: item.string(DESCRIPTION).context(AttrSnafu)?.to_owned(),
            date_added: timestamp_attr(item, DATE_ADDED)?,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Comment                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A comment on a post, or a reply to another comment
///
/// `reply_chain` holds the timestamps of the comment's ancestors, outermost first; it's empty for
/// a top-level comment. `vote` & `number_votes` are denormalized from the comment's [Vote]s.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Comment {
    user_number: UserNumber,
    user_comment_number: u64,
    user_name: Username,
    slug: Slug,
    text: String,
    vote: i64,
    number_votes: u64,
    date_added: Timestamp,
    reply_chain: ReplyChain,
}

impl Comment {
    /// Construct a new comment, with no votes
    ///
    /// Fails if `text` is blank, or if `date_added` doesn't follow every member of `reply_chain`.
    pub fn new(
        user: &User,
        user_comment_number: u64,
        slug: &Slug,
        text: &str,
        date_added: &Timestamp,
        reply_chain: &ReplyChain,
    ) -> Result<Comment> {
        let text = non_empty(text, "comment text")?;
        // Checks ordering
        reply_chain.child(*date_added).context(ReplyChainSnafu)?;
        Ok(Comment {
            user_number: user.number(),
            user_comment_number,
            user_name: user.name().clone(),
            slug: slug.clone(),
            text,
            vote: 0,
            number_votes: 0,
            date_added: *date_added,
            reply_chain: reply_chain.clone(),
        })
    }
    pub fn key(user: &UserNumber, date_added: &Timestamp) -> Key {
        Key::new(user_partition(user), format!("#COMMENT#{}", date_added))
    }
    /// Account for a new vote on this comment
    pub fn record_vote(&mut self, up: bool) {
        self.number_votes += 1;
        self.vote += if up { 1 } else { -1 };
    }
    /// The chain shared by every reply to, & vote on, this comment
    pub fn thread(&self) -> ReplyChain {
        self.reply_chain.extend_trusted(self.date_added)
    }
    pub fn user_number(&self) -> UserNumber {
        self.user_number
    }
    pub fn user_comment_number(&self) -> u64 {
        self.user_comment_number
    }
    pub fn user_name(&self) -> &Username {
        &self.user_name
    }
    pub fn slug(&self) -> &Slug {
        &self.slug
    }
    pub fn text(&self) -> &str {
        &self.text
    }
    /// Net score: up-votes less down-votes
    pub fn vote(&self) -> i64 {
        self.vote
    }
    pub fn number_votes(&self) -> u64 {
        self.number_votes
    }
    pub fn date_added(&self) -> &Timestamp {
        &self.date_added
    }
    pub fn reply_chain(&self) -> &ReplyChain {
        &self.reply_chain
    }
}

impl Entity for Comment {
    const TYPE: &'static str = "Comment";

    fn primary_key(&self) -> Key {
        Comment::key(&self.user_number, &self.date_added)
    }
    fn index1_key(&self) -> Option<Key> {
        Some(Key::new(
            post_partition(&self.slug),
            encode(&self.reply_chain, &self.date_added, Kind::Comment),
        ))
    }
    fn attributes(&self) -> Item {
        Item::from([
            (USER_NUMBER.to_owned(), self.user_number.into()),
            (
                USER_COMMENT_NUMBER.to_owned(),
                self.user_comment_number.into(),
            ),
            (USER_NAME.to_owned(), (&self.user_name).into()),
            (SLUG.to_owned(), (&self.slug).into()),
            (TEXT.to_owned(), self.text.as_str().into()),
            (VOTE.to_owned(), self.vote.into()),
            (NUMBER_VOTES.to_owned(), self.number_votes.into()),
            (DATE_ADDED.to_owned(), self.date_added.into()),
            (REPLY_CHAIN.to_owned(), (&self.reply_chain).into()),
        ])
    }
    fn from_attributes(item: &Item) -> Result<Self> {
        let date_added = timestamp_attr(item, DATE_ADDED)?;
        let reply_chain = chain_attr(item)?;
        reply_chain.child(date_added).context(ReplyChainSnafu)?;
        Ok(Comment {
            user_number: UserNumber(item.number(USER_NUMBER).context(AttrSnafu)?),
            user_comment_number: item.number(USER_COMMENT_NUMBER).context(AttrSnafu)?,
            user_name: Username::new(item.string(USER_NAME).context(AttrSnafu)?)?,
            slug: Slug::new(item.string(SLUG).context(AttrSnafu)?)?,
            text: item.string(TEXT).context(AttrSnafu)?.to_owned(),
            vote: item.number(VOTE).context(AttrSnafu)?,
            number_votes: counter_attr(item, NUMBER_VOTES)?,
            date_added,
            reply_chain,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Vote                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An up- or down-vote on a comment
///
/// A vote's `reply_chain` is the voted-upon comment's chain followed by that comment's own
/// timestamp, so it's never empty.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Vote {
    user_number: UserNumber,
    user_name: Username,
    slug: Slug,
    vote_number: u64,
    up: bool,
    date_added: Timestamp,
    reply_chain: ReplyChain,
}

impl Vote {
    pub fn new(
        user: &User,
        vote_number: u64,
        slug: &Slug,
        up: bool,
        date_added: &Timestamp,
        reply_chain: &ReplyChain,
    ) -> Result<Vote> {
        check_vote_chain(reply_chain, date_added)?;
        Ok(Vote {
            user_number: user.number(),
            user_name: user.name().clone(),
            slug: slug.clone(),
            vote_number,
            up,
            date_added: *date_added,
            reply_chain: reply_chain.clone(),
        })
    }
    /// A vote on `comment`
    pub fn on(
        comment: &Comment,
        user: &User,
        vote_number: u64,
        up: bool,
        date_added: &Timestamp,
    ) -> Result<Vote> {
        Vote::new(
            user,
            vote_number,
            comment.slug(),
            up,
            date_added,
            &comment.thread(),
        )
    }
    pub fn key(user: &UserNumber, date_added: &Timestamp) -> Key {
        Key::new(user_partition(user), format!("#VOTE#{}", date_added))
    }
    pub fn user_number(&self) -> UserNumber {
        self.user_number
    }
    pub fn user_name(&self) -> &Username {
        &self.user_name
    }
    pub fn slug(&self) -> &Slug {
        &self.slug
    }
    pub fn vote_number(&self) -> u64 {
        self.vote_number
    }
    pub fn up(&self) -> bool {
        self.up
    }
    pub fn date_added(&self) -> &Timestamp {
        &self.date_added
    }
    pub fn reply_chain(&self) -> &ReplyChain {
        &self.reply_chain
    }
}

// A vote's chain must name a comment, & a vote can't pre-date the comment on which it's cast
fn check_vote_chain(chain: &ReplyChain, date_added: &Timestamp) -> Result<()> {
    reply_chain::encode_vote(chain, date_added)
        .map(|_| ())
        .context(ReplyChainSnafu)
}

impl Entity for Vote {
    const TYPE: &'static str = "Vote";

    fn primary_key(&self) -> Key {
        Vote::key(&self.user_number, &self.date_added)
    }
    fn index1_key(&self) -> Option<Key> {
        Some(Key::new(
            post_partition(&self.slug),
            encode(&self.reply_chain, &self.date_added, Kind::Vote),
        ))
    }
    fn attributes(&self) -> Item {
        Item::from([
            (USER_NUMBER.to_owned(), self.user_number.into()),
            (USER_NAME.to_owned(), (&self.user_name).into()),
            (SLUG.to_owned(), (&self.slug).into()),
            (VOTE_NUMBER.to_owned(), self.vote_number.into()),
            (UP.to_owned(), self.up.into()),
            (DATE_ADDED.to_owned(), self.date_added.into()),
            (REPLY_CHAIN.to_owned(), (&self.reply_chain).into()),
        ])
    }
    fn from_attributes(item: &Item) -> Result<Self> {
        let date_added = timestamp_attr(item, DATE_ADDED)?;
        let reply_chain = chain_attr(item)?;
        check_vote_chain(&reply_chain, &date_added)?;
        Ok(Vote {
            user_number: UserNumber(item.number(USER_NUMBER).context(AttrSnafu)?),
            user_name: Username::new(item.string(USER_NAME).context(AttrSnafu)?)?,
            slug: Slug::new(item.string(SLUG).context(AttrSnafu)?)?,
            vote_number: item.number(VOTE_NUMBER).context(AttrSnafu)?,
            up: item.boolean(UP).context(AttrSnafu)?,
            date_added,
            reply_chain,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Row                                               //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Any item that can appear in a post's index-1 partition
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Row {
    Post(Post),
    Comment(Comment),
    Vote(Vote),
}

impl Row {
    pub fn from_item(item: &Item) -> Result<Row> {
        match item.string(TYPE).context(AttrSnafu)? {
            t if t == Post::TYPE => Ok(Row::Post(Post::from_attributes(item)?)),
            t if t == Comment::TYPE => Ok(Row::Comment(Comment::from_attributes(item)?)),
            t if t == Vote::TYPE => Ok(Row::Vote(Vote::from_attributes(item)?)),
            actual => WrongTypeSnafu {
                expected: "Post, Comment or Vote",
                actual,
            }
            .fail(),
        }
    }
}
