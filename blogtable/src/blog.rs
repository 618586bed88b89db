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

//! # The blog
//!
//! ## Introduction
//!
//! [Blog] is the front door: one method per thing an application wants to do with its users,
//! posts, projects, comments, votes & site analytics. It owns nothing but an [Arc] on some
//! [Store], so it's cheap to clone & share across tasks.
//!
//! ## Creation
//!
//! Every creation path is a single transaction. Adding a comment, for instance, writes the
//! comment, its author's automatic up-vote, the author's counters & the post's comment count
//! together. Sequence numbers (user numbers, & each user's comment & vote ordinals) are read from
//! the relevant counter beforehand, and the transaction insists that the counter hasn't moved in
//! the meantime. If it has, the caller gets [Error::Conflict] & is free to try again.
//!
//! ## Removal
//!
//! Removals are delegated to [cascade]; see there for what happens when a removal spans more than
//! one transaction.

use std::{
    net::IpAddr,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use snafu::{prelude::*, Backtrace, IntoError};
use tracing::{debug, info};

use crate::{
    analytics::{IsoWeek, Page, PageWeek, Visitor, LAST_VISIT, NUMBER_SESSIONS, NUMBER_VIEWS},
    attr::{self, Item, ItemExt},
    cascade::{self, Plan, Removal, Summary},
    entities::{
        self, post_partition, Comment, Entity, Post, Project, Slug, User, UserEmail, UserNumber,
        Username, Vote, NUMBER_COMMENTS, NUMBER_POSTS, NUMBER_PROJECTS, NUMBER_USERS,
        NUMBER_VOTES, VOTE,
    },
    reply_chain::{encode_comment, subtree_prefix, ReplyChain},
    storage::{self, Condition, Index, Key, Store, Update, WriteOp, PARTITION_KEY, SORT_KEY},
    timestamp::Timestamp,
    tree::{self, Forest, PostTree, Tally},
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{key} already exists"))]
    AlreadyExists { key: Key, backtrace: Backtrace },
    #[snafu(display("{source}"))]
    Cascade { source: cascade::Error },
    #[snafu(display("{key} was modified concurrently; try again"))]
    Conflict { key: Key, backtrace: Backtrace },
    #[snafu(display("The stored reply tree is inconsistent: {source}"))]
    Consistency { source: tree::Error },
    #[snafu(display("Counter {name} on {key} couldn't be read: {source}"))]
    Counter {
        key: Key,
        name: String,
        source: attr::Error,
    },
    #[snafu(display("The item at {key} couldn't be decoded: {source}"))]
    Decode {
        key: Key,
        source: entities::Error,
    },
    #[snafu(display("{key} does not exist"))]
    DoesNotExist { key: Key, backtrace: Backtrace },
    #[snafu(display("{source}"))]
    Storage { source: storage::Error },
    #[snafu(display("User numbers are exhausted"))]
    TooManyUsers { backtrace: Backtrace },
    #[snafu(display("{source}"))]
    Validation { source: entities::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

// Translate a failed precondition on `key` into the façade's terms
fn precondition(key: Key, condition: Option<&Condition>) -> Error {
    match condition {
        Some(Condition::NotExists) => AlreadyExistsSnafu { key }.build(),
        Some(Condition::Unchanged(_)) => ConflictSnafu { key }.build(),
        _ => DoesNotExistSnafu { key }.build(),
    }
}

// Examine a transaction failure for the first operation that caused it
fn diagnose(err: &storage::Error, ops: &[WriteOp]) -> Option<Error> {
    let storage::Error::TransactionCancelled { reasons, .. } = err else {
        return None;
    };
    let reason = reasons.iter().find(|r| r.failed())?;
    let op = ops.get(reason.index)?;
    let key = op.key()?;
    if reason.condition_failed() {
        Some(precondition(key, op.condition()))
    } else if reason.code.as_deref() == Some("TransactionConflict") {
        Some(ConflictSnafu { key }.build())
    } else {
        None
    }
}

fn single_op_error(err: storage::Error, condition: Option<&Condition>) -> Error {
    match err {
        storage::Error::ConditionFailed { key, .. } => precondition(key, condition),
        err => StorageSnafu.into_error(err),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Clock                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Source of the timestamps [Blog] stamps on new entities
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// The system clock, nudged forward a millisecond whenever it would otherwise repeat (or go back
/// on) a reading
///
/// Comments & votes are keyed by timestamp, and a reply must post-date its parent, so two
/// readings from the same [Blog] must never coincide.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicI64,
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = Utc::now().timestamp_millis();
        let prev = match self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(wall.max(last + 1))
            }) {
            Ok(prev) | Err(prev) => prev,
        };
        DateTime::<Utc>::from_timestamp_millis(wall.max(prev + 1))
            .map(Timestamp::from)
            .unwrap_or_else(Timestamp::now)
    }
}

/// A visit more than this long after the visitor's last begins a new session
pub const SESSION_TIMEOUT_MINUTES: i64 = 30;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Audit                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A comment whose denormalized vote counters disagree with its vote rows
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Mismatch {
    pub key: Key,
    pub stored: Tally,
    pub counted: Tally,
}

/// The result of checking a post's counters against its rows
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Audit {
    /// The post's `NumberComments` & the number of comment rows actually present, if they differ
    pub post_comments: Option<(u64, u64)>,
    pub comments: Vec<Mismatch>,
}

impl Audit {
    pub fn is_consistent(&self) -> bool {
        self.post_comments.is_none() && self.comments.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Blog                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone)]
pub struct Blog {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    transaction_limit: usize,
}

impl Blog {
    pub fn new(store: Arc<dyn Store>, transaction_limit: usize) -> Blog {
        Blog::with_clock(store, transaction_limit, Arc::new(SystemClock::default()))
    }
    pub fn with_clock(
        store: Arc<dyn Store>,
        transaction_limit: usize,
        clock: Arc<dyn Clock>,
    ) -> Blog {
        Blog {
            store,
            clock,
            transaction_limit,
        }
    }
    /// This [Blog], but submitting removals in transactions of at most `limit` operations
    pub fn with_transaction_limit(&self, limit: usize) -> Blog {
        Blog {
            transaction_limit: limit,
            ..self.clone()
        }
    }
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    async fn fetch<E: Entity>(&self, key: &Key) -> Result<Option<E>> {
        self.store
            .get_item(key)
            .await
            .context(StorageSnafu)?
            .map(|item| E::from_item(&item).context(DecodeSnafu { key: key.clone() }))
            .transpose()
    }
    async fn require<E: Entity>(&self, key: &Key) -> Result<E> {
        self.fetch(key)
            .await?
            .context(DoesNotExistSnafu { key: key.clone() })
    }
    async fn put<E: Entity>(&self, entity: &E) -> Result<()> {
        let condition = Condition::NotExists;
        self.store
            .put_item(entity.to_item(), Some(condition.clone()))
            .await
            .map_err(|err| single_op_error(err, Some(&condition)))
    }
    async fn list<E: Entity>(
        &self,
        index: Index,
        partition: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<E>> {
        self.store
            .query(index, partition, prefix, true)
            .await
            .context(StorageSnafu)?
            .iter()
            .map(|item| {
                E::from_item(item).context(DecodeSnafu {
                    key: Key::of(item).unwrap_or_else(|| Key::new(partition, "")),
                })
            })
            .collect()
    }
    async fn transact(&self, ops: Vec<WriteOp>) -> Result<()> {
        debug!("Submitting a transaction of {} operations", ops.len());
        match self.store.transact_write(ops.clone()).await {
            Ok(()) => Ok(()),
            Err(err) => match diagnose(&err, &ops) {
                Some(diagnosis) => Err(diagnosis),
                None => Err(StorageSnafu.into_error(err)),
            },
        }
    }
    async fn cascade(&self, plan: &Plan) -> Result<Summary> {
        let mut removal = Removal::new(self.store.clone(), self.transaction_limit);
        removal.stage(plan).context(CascadeSnafu)?;
        removal.commit().await.context(CascadeSnafu)
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    //                                          blog row                                          //
    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Write the blog-wide counters row, with every counter at zero
    pub async fn init_blog(&self) -> Result<()> {
        self.put(&entities::Blog::default()).await?;
        info!("Initialized the blog counters");
        Ok(())
    }
    pub async fn get_blog(&self) -> Result<entities::Blog> {
        self.require(&entities::Blog::key()).await
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    //                                           users                                            //
    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Sign-up a new user; the user is numbered one past the current user count
    pub async fn add_user(&self, name: &Username, email: &UserEmail) -> Result<User> {
        // The name index can't enforce uniqueness; this is best-effort
        ensure!(
            self.get_user_by_name(name).await?.is_none(),
            AlreadyExistsSnafu {
                key: Key::new(User::name_partition(name), "#USER")
            }
        );
        let blog = self.get_blog().await?;
        let number = u32::try_from(blog.number_users + 1)
            .ok()
            .context(TooManyUsersSnafu)?;
        let user = User::new(UserNumber::new(number), name, email, &self.clock.now());
        self.transact(vec![
            WriteOp::Put {
                item: user.to_item(),
                condition: Some(Condition::NotExists),
            },
            WriteOp::Update {
                key: entities::Blog::key(),
                update: Update::new().add(NUMBER_USERS, 1),
                condition: Some(Condition::Unchanged(vec![(
                    NUMBER_USERS.to_owned(),
                    blog.number_users.into(),
                )])),
            },
        ])
        .await?;
        info!("Added user {} ({})", user.name(), user.number());
        Ok(user)
    }
    pub async fn get_user(&self, number: &UserNumber) -> Result<User> {
        self.require(&User::key(number)).await
    }
    pub async fn get_user_by_name(&self, name: &Username) -> Result<Option<User>> {
        Ok(self
            .list::<User>(Index::Index1, &User::name_partition(name), None)
            .await?
            .into_iter()
            .next())
    }
    /// Every user, in order of user number
    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.list(Index::Index2, "#USER", None).await
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    //                                    posts & projects                                        //
    ////////////////////////////////////////////////////////////////////////////////////////////////

    pub async fn add_post(&self, slug: &Slug, title: &str) -> Result<Post> {
        let post = Post::new(slug, title, &self.clock.now()).context(ValidationSnafu)?;
        self.transact(vec![
            WriteOp::Put {
                item: post.to_item(),
                condition: Some(Condition::NotExists),
            },
            WriteOp::Update {
                key: entities::Blog::key(),
                update: Update::new().add(NUMBER_POSTS, 1),
                condition: Some(Condition::Exists),
            },
        ])
        .await?;
        info!("Added post {}", slug);
        Ok(post)
    }
    /// Retrieve a post along with its entire reply tree
    pub async fn get_post(&self, slug: &Slug) -> Result<PostTree> {
        let items = self
            .store
            .query(Index::Index1, &post_partition(slug), None, true)
            .await
            .context(StorageSnafu)?;
        ensure!(
            !items.is_empty(),
            DoesNotExistSnafu {
                key: Post::key(slug)
            }
        );
        PostTree::from_items(slug, &items).context(ConsistencySnafu)
    }
    /// Every post, oldest first
    pub async fn list_posts(&self) -> Result<Vec<Post>> {
        self.list(Index::Index2, "#POST", None).await
    }
    /// Remove a post, with every comment & vote on it
    pub async fn remove_post(&self, slug: &Slug) -> Result<Summary> {
        let tree = self.get_post(slug).await?;
        let summary = self.cascade(&Plan::for_post(&tree)).await?;
        info!(
            "Removed post {} ({} comments, {} votes)",
            slug,
            tree.forest.comment_count(),
            tree.forest.vote_count()
        );
        Ok(summary)
    }

    pub async fn add_project(
        &self,
        slug: &Slug,
        title: &str,
        description: &str,
    ) -> Result<Project> {
        let project =
            Project::new(slug, title, description, &self.clock.now()).context(ValidationSnafu)?;
        self.transact(vec![
            WriteOp::Put {
                item: project.to_item(),
                condition: Some(Condition::NotExists),
            },
            WriteOp::Update {
                key: entities::Blog::key(),
                update: Update::new().add(NUMBER_PROJECTS, 1),
                condition: Some(Condition::Exists),
            },
        ])
        .await?;
        info!("Added project {}", slug);
        Ok(project)
    }
    pub async fn get_project(&self, slug: &Slug) -> Result<Project> {
        self.require(&Project::key(slug)).await
    }
    /// Every project, oldest first
    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        self.list(Index::Index2, "#PROJECT", None).await
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    //                                     comments & votes                                       //
    ////////////////////////////////////////////////////////////////////////////////////////////////

    async fn post_comment(
        &self,
        author: &UserNumber,
        slug: &Slug,
        text: &str,
        chain: &ReplyChain,
        parent: Option<Key>,
    ) -> Result<Comment> {
        let user = self.get_user(author).await?;
        let now = self.clock.now();
        let mut comment = Comment::new(&user, user.number_comments() + 1, slug, text, &now, chain)
            .context(ValidationSnafu)?;
        let vote = Vote::on(&comment, &user, user.number_votes() + 1, true, &now)
            .context(ValidationSnafu)?;
        comment.record_vote(true);

        let mut ops = vec![
            WriteOp::Put {
                item: comment.to_item(),
                condition: Some(Condition::NotExists),
            },
            WriteOp::Put {
                item: vote.to_item(),
                condition: Some(Condition::NotExists),
            },
            WriteOp::Update {
                key: User::key(author),
                update: Update::new().add(NUMBER_COMMENTS, 1).add(NUMBER_VOTES, 1),
                condition: Some(Condition::Unchanged(vec![
                    (NUMBER_COMMENTS.to_owned(), user.number_comments().into()),
                    (NUMBER_VOTES.to_owned(), user.number_votes().into()),
                ])),
            },
            WriteOp::Update {
                key: Post::key(slug),
                update: Update::new().add(NUMBER_COMMENTS, 1),
                condition: Some(Condition::Exists),
            },
        ];
        if let Some(key) = parent {
            ops.push(WriteOp::Check {
                key,
                condition: Condition::Exists,
            });
        }
        self.transact(ops).await?;
        info!(
            "{} commented on {} at {}",
            user.name(),
            slug,
            comment.date_added()
        );
        Ok(comment)
    }

    /// Comment on a post; the author's up-vote is cast along with it
    pub async fn add_comment(
        &self,
        author: &UserNumber,
        slug: &Slug,
        text: &str,
    ) -> Result<Comment> {
        self.post_comment(author, slug, text, &ReplyChain::top_level(), None)
            .await
    }
    /// Reply to `parent`; the author's up-vote is cast along with it
    pub async fn add_reply(
        &self,
        author: &UserNumber,
        parent: &Comment,
        text: &str,
    ) -> Result<Comment> {
        self.post_comment(
            author,
            parent.slug(),
            text,
            &parent.thread(),
            Some(parent.primary_key()),
        )
        .await
    }
    pub async fn get_comment(
        &self,
        author: &UserNumber,
        date_added: &Timestamp,
    ) -> Result<Comment> {
        self.require(&Comment::key(author, date_added)).await
    }
    /// Retrieve the comment at `chain` & `own` on `slug`, with all its replies & votes
    ///
    /// The comment is the sole root of the returned forest.
    pub async fn get_thread(
        &self,
        slug: &Slug,
        chain: &ReplyChain,
        own: &Timestamp,
    ) -> Result<Forest> {
        let items = self
            .store
            .query(
                Index::Index1,
                &post_partition(slug),
                Some(&subtree_prefix(chain, own)),
                true,
            )
            .await
            .context(StorageSnafu)?;
        let forest = Forest::from_items(&items, chain).context(ConsistencySnafu)?;
        ensure!(
            forest.root(own).is_some(),
            DoesNotExistSnafu {
                key: Key::new(post_partition(slug), encode_comment(chain, own))
            }
        );
        Ok(forest)
    }
    /// Remove a comment along with every reply to it, & every vote on any of them
    pub async fn remove_comment(&self, comment: &Comment) -> Result<Summary> {
        let forest = self
            .get_thread(comment.slug(), comment.reply_chain(), comment.date_added())
            .await?;
        self.cascade(&Plan::for_subtree(comment.slug(), &forest))
            .await
    }
    /// Finish a removal that failed part-way; `remaining` is as reported by
    /// [cascade::Error::PartiallyCompleted]
    pub async fn resume_removal(&self, remaining: Vec<WriteOp>) -> Result<Summary> {
        let mut removal = Removal::new(self.store.clone(), self.transaction_limit);
        removal.stage_operations(remaining).context(CascadeSnafu)?;
        removal.commit().await.context(CascadeSnafu)
    }

    pub async fn add_vote(&self, voter: &UserNumber, comment: &Comment, up: bool) -> Result<Vote> {
        let user = self.get_user(voter).await?;
        let vote = Vote::on(comment, &user, user.number_votes() + 1, up, &self.clock.now())
            .context(ValidationSnafu)?;
        self.transact(vec![
            WriteOp::Put {
                item: vote.to_item(),
                condition: Some(Condition::NotExists),
            },
            WriteOp::Update {
                key: User::key(voter),
                update: Update::new().add(NUMBER_VOTES, 1),
                condition: Some(Condition::Unchanged(vec![(
                    NUMBER_VOTES.to_owned(),
                    user.number_votes().into(),
                )])),
            },
            WriteOp::Update {
                key: comment.primary_key(),
                update: Update::new()
                    .add(NUMBER_VOTES, 1)
                    .add(VOTE, if up { 1 } else { -1 }),
                condition: Some(Condition::Exists),
            },
        ])
        .await?;
        debug!(
            "{} voted {} on {}",
            user.name(),
            if up { "up" } else { "down" },
            comment.date_added()
        );
        Ok(vote)
    }
    pub async fn get_vote(&self, voter: &UserNumber, date_added: &Timestamp) -> Result<Vote> {
        self.require(&Vote::key(voter, date_added)).await
    }
    /// Withdraw a vote, adjusting the voted-on comment & the voter
    pub async fn remove_vote(&self, vote: &Vote) -> Result<Summary> {
        let (chain, own) = vote
            .reply_chain()
            .split_last()
            .context(DoesNotExistSnafu {
                key: vote.primary_key(),
            })?;
        let forest = self.get_thread(vote.slug(), &chain, &own).await?;
        let node = forest
            .root(&own)
            .map(|id| forest.node(id))
            .filter(|node| node.vote(vote.date_added()).is_some())
            .context(DoesNotExistSnafu {
                key: vote.primary_key(),
            })?;
        self.cascade(&Plan::for_vote(node.comment(), vote)).await
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    //                                         analytics                                          //
    ////////////////////////////////////////////////////////////////////////////////////////////////

    pub async fn add_page(&self, slug: &Slug, title: &str) -> Result<Page> {
        let page = Page::new(slug, title);
        self.put(&page).await?;
        Ok(page)
    }
    pub async fn get_page(&self, slug: &Slug) -> Result<Page> {
        self.require(&Page::key(slug)).await
    }
    /// Count one view of page `slug`, both overall & for the current week; returns the week
    pub async fn record_page_view(&self, slug: &Slug) -> Result<IsoWeek> {
        let week = IsoWeek::of(&self.clock.now()).context(ValidationSnafu)?;
        // The weekly row springs into being on its first view
        let weekly = PageWeek::new(slug, week, 0)
            .to_item()
            .into_iter()
            .filter(|(name, _)| ![PARTITION_KEY, SORT_KEY, NUMBER_VIEWS].contains(&name.as_str()))
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .fold(Update::new(), |update, (name, value)| update.set(&name, value))
            .add(NUMBER_VIEWS, 1);
        self.transact(vec![
            WriteOp::Update {
                key: Page::key(slug),
                update: Update::new().add(NUMBER_VIEWS, 1),
                condition: Some(Condition::Exists),
            },
            WriteOp::Update {
                key: PageWeek::key(slug, &week),
                update: weekly,
                condition: None,
            },
        ])
        .await?;
        Ok(week)
    }
    pub async fn get_page_week(&self, slug: &Slug, week: &IsoWeek) -> Result<PageWeek> {
        self.require(&PageWeek::key(slug, week)).await
    }
    /// View counts for every page viewed during `week`
    pub async fn pages_for_week(&self, week: &IsoWeek) -> Result<Vec<PageWeek>> {
        self.list(Index::Index1, &week.partition(), None).await
    }
    /// Note a visit from `ip`; a visit more than [SESSION_TIMEOUT_MINUTES] after the last one
    /// counts as a new session
    pub async fn record_visit(&self, ip: IpAddr) -> Result<Visitor> {
        let key = Visitor::key(&ip);
        let now = self.clock.now();
        let (update, condition) = match self.fetch::<Visitor>(&key).await? {
            None => (
                Visitor::new(ip, &now)
                    .to_item()
                    .into_iter()
                    .filter(|(name, _)| name != PARTITION_KEY && name != SORT_KEY)
                    .sorted_by(|a, b| a.0.cmp(&b.0))
                    .fold(Update::new(), |update, (name, value)| update.set(&name, value)),
                Condition::NotExists,
            ),
            Some(prev) => {
                let mut update = Update::new().set(LAST_VISIT, now);
                if *now.as_datetime() - *prev.last_visit().as_datetime()
                    > Duration::minutes(SESSION_TIMEOUT_MINUTES)
                {
                    update = update.add(NUMBER_SESSIONS, 1);
                }
                (
                    update,
                    Condition::Unchanged(vec![(LAST_VISIT.to_owned(), prev.last_visit().into())]),
                )
            }
        };
        let item = self
            .store
            .update_item(&key, &update, Some(condition))
            .await
            .map_err(|err| match err {
                // Whichever way the condition failed, someone else got there first
                storage::Error::ConditionFailed { key, .. } => ConflictSnafu { key }.build(),
                err => StorageSnafu.into_error(err),
            })?;
        Visitor::from_item(&item).context(DecodeSnafu { key })
    }
    pub async fn get_visitor(&self, ip: &IpAddr) -> Result<Visitor> {
        self.require(&Visitor::key(ip)).await
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    //                                          counters                                          //
    ////////////////////////////////////////////////////////////////////////////////////////////////

    async fn adjust_counter(&self, key: &Key, name: &str, delta: i64) -> Result<i64> {
        let condition = Condition::Exists;
        let item: Item = self
            .store
            .update_item(key, &Update::new().add(name, delta), Some(condition.clone()))
            .await
            .map_err(|err| single_op_error(err, Some(&condition)))?;
        item.number(name).context(CounterSnafu {
            key: key.clone(),
            name,
        })
    }
    /// Atomically add one to counter `name` on the item at `key`; returns the new value
    pub async fn increment_counter(&self, key: &Key, name: &str) -> Result<i64> {
        self.adjust_counter(key, name, 1).await
    }
    /// Atomically subtract one from counter `name` on the item at `key`; returns the new value
    pub async fn decrement_counter(&self, key: &Key, name: &str) -> Result<i64> {
        self.adjust_counter(key, name, -1).await
    }

    /// Compare a post's denormalized counters to its rows
    ///
    /// Nothing is repaired; that's up to the caller.
    pub async fn audit_post_counters(&self, slug: &Slug) -> Result<Audit> {
        let tree = self.get_post(slug).await?;
        let counted = tree.forest.comment_count() as u64;
        let stored = tree.post.number_comments();
        let comments = tree
            .forest
            .nodes()
            .filter_map(|node| {
                let counted = node.recount();
                let stored = Tally {
                    number_votes: node.comment().number_votes(),
                    vote: node.comment().vote(),
                };
                (counted != stored).then(|| Mismatch {
                    key: node.comment().primary_key(),
                    stored,
                    counted,
                })
            })
            .collect::<Vec<Mismatch>>();
        Ok(Audit {
            post_comments: (stored != counted).then_some((stored, counted)),
            comments,
        })
    }
}
