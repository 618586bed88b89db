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

//! # Cascading Removal
//!
//! ## Introduction
//!
//! Removing a comment means removing every reply to it (to any depth) & every vote cast on any of
//! them, and then fixing up every counter that counted them: each author's `NumberComments` &
//! `NumberVotes`, and the post's `NumberComments`. Removing a post means all that for every
//! comment on the post, plus the post row itself.
//!
//! This is done in two steps. A [Plan] is drawn up from the reply tree: the rows to be deleted, in
//! post-order (so no reply outlives its parent, should we fail part-way). [Removal::stage] then
//! turns that into a flat list of [WriteOp]s, folding the counter adjustments into one update per
//! affected user rather than one per deleted row. [Removal::commit] submits that list in chunks no
//! larger than the transaction limit, in order.
//!
//! Each chunk is atomic; the removal as a whole is not. If a chunk after the first fails, the
//! earlier chunks stand, and the caller gets back [Error::PartiallyCompleted] carrying the
//! operations that were never applied. Those may be handed to [Removal::stage_operations] on a
//! fresh [Removal] to finish the job.
//!
//! Every delete & update carries an existence condition. A delete's condition fails once it's been
//! applied, but an update's doesn't, so [aggregate] orders the operations such that every
//! transaction deletes at least one row, & [Removal] won't stage a list that doesn't. Re-submitting
//! any part of a removal that has already committed therefore fails rather than driving counters
//! below their true values.

use std::{collections::BTreeMap, fmt::Display, sync::Arc};

use snafu::{prelude::*, Backtrace};
use tracing::{debug, info, warn};

use crate::{
    entities::{
        Blog, Comment, Entity, Post, Slug, User, UserNumber, Vote, NUMBER_COMMENTS, NUMBER_POSTS,
        NUMBER_VOTES, VOTE,
    },
    storage::{self, Condition, Store, Update, WriteOp, TRANSACTION_LIMIT},
    tree::{Forest, PostTree},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("This removal has already been staged"))]
    AlreadyStaged { backtrace: Backtrace },
    #[snafu(display("This removal is {phase}; only a batched removal can be committed"))]
    NotStaged { phase: Phase, backtrace: Backtrace },
    #[snafu(display(
        "The removal committed {committed} of {total} transactions before failing: {source}"
    ))]
    PartiallyCompleted {
        committed: usize,
        total: usize,
        /// The operations never applied, in their original order
        remaining: Vec<WriteOp>,
        source: storage::Error,
    },
    #[snafu(display(
        "{operations} operations can't be laid out in transactions of {limit} such that each one \
         deletes a row"
    ))]
    Unguarded {
        operations: usize,
        limit: usize,
        backtrace: Backtrace,
    },
    #[snafu(display("Transaction {chunk} of {of} failed; nothing was removed: {source}"))]
    Transaction {
        chunk: usize,
        of: usize,
        source: storage::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Plan                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One row slated for deletion
#[derive(Clone, Debug, PartialEq)]
pub enum Doomed {
    Comment(Comment),
    Vote(Vote),
}

#[derive(Clone, Debug, PartialEq)]
enum Target {
    /// The post & everything on it
    Post(Post),
    /// A comment sub-tree on this post
    Subtree(Slug),
    /// A single vote on this comment
    Vote(Comment),
}

/// Everything a removal will delete
#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    target: Target,
    doomed: Vec<Doomed>,
}

// Each comment's votes, then the comment, children before parents
fn doom_forest(forest: &Forest) -> Vec<Doomed> {
    forest
        .post_order()
        .into_iter()
        .flat_map(|id| {
            let node = forest.node(id);
            node.votes()
                .cloned()
                .map(Doomed::Vote)
                .chain(std::iter::once(Doomed::Comment(node.comment().clone())))
                .collect::<Vec<Doomed>>()
        })
        .collect()
}

impl Plan {
    /// Remove a post along with every comment & vote on it
    pub fn for_post(tree: &PostTree) -> Plan {
        Plan {
            target: Target::Post(tree.post.clone()),
            doomed: doom_forest(&tree.forest),
        }
    }
    /// Remove every comment in `forest` (a sub-tree of the post named by `slug`), along with
    /// every vote on them
    pub fn for_subtree(slug: &Slug, forest: &Forest) -> Plan {
        Plan {
            target: Target::Subtree(slug.clone()),
            doomed: doom_forest(forest),
        }
    }
    /// Remove a single vote on `comment`
    pub fn for_vote(comment: &Comment, vote: &Vote) -> Plan {
        Plan {
            target: Target::Vote(comment.clone()),
            doomed: vec![Doomed::Vote(vote.clone())],
        }
    }
    pub fn doomed(&self) -> &[Doomed] {
        &self.doomed
    }
    pub fn comment_count(&self) -> usize {
        self.doomed
            .iter()
            .filter(|d| matches!(d, Doomed::Comment(_)))
            .count()
    }
    pub fn vote_count(&self) -> usize {
        self.doomed.len() - self.comment_count()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          aggregation                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, Default)]
struct Decrements {
    comments: i64,
    votes: i64,
}

fn delete(key: storage::Key) -> WriteOp {
    WriteOp::Delete {
        key,
        condition: Some(Condition::Exists),
    }
}

fn adjust(key: storage::Key, update: Update) -> WriteOp {
    WriteOp::Update {
        key,
        update,
        condition: Some(Condition::Exists),
    }
}

/// Turn a [Plan] into the operations that carry it out, for transactions of at most `limit`
/// operations
///
/// The deletions come in plan order. The counter updates (one per affected user, in user-number
/// order, then the post-level fix-up) follow them, except that each consecutive run of `limit`
/// operations keeps at least one deletion; updates move up as far as that requires.
pub fn aggregate(plan: &Plan, limit: usize) -> Vec<WriteOp> {
    let mut per_user: BTreeMap<UserNumber, Decrements> = BTreeMap::new();
    let mut deletes = Vec::with_capacity(plan.doomed.len() + 1);
    let mut comments = 0i64;
    for doomed in &plan.doomed {
        match doomed {
            Doomed::Comment(c) => {
                deletes.push(delete(c.primary_key()));
                per_user.entry(c.user_number()).or_default().comments += 1;
                comments += 1;
            }
            Doomed::Vote(v) => {
                deletes.push(delete(v.primary_key()));
                per_user.entry(v.user_number()).or_default().votes += 1;
            }
        }
    }

    let mut updates = Vec::with_capacity(per_user.len() + 1);
    updates.extend(per_user.into_iter().map(|(user, dec)| {
        let mut update = Update::new();
        if dec.comments != 0 {
            update = update.add(NUMBER_COMMENTS, -dec.comments);
        }
        if dec.votes != 0 {
            update = update.add(NUMBER_VOTES, -dec.votes);
        }
        adjust(User::key(&user), update)
    }));

    match &plan.target {
        Target::Post(post) => {
            deletes.push(delete(post.primary_key()));
            updates.push(adjust(Blog::key(), Update::new().add(NUMBER_POSTS, -1)));
        }
        Target::Subtree(slug) => {
            if comments != 0 {
                updates.push(adjust(
                    Post::key(slug),
                    Update::new().add(NUMBER_COMMENTS, -comments),
                ));
            }
        }
        Target::Vote(comment) => {
            let net = plan
                .doomed
                .iter()
                .map(|d| match d {
                    Doomed::Vote(v) if v.up() => -1,
                    Doomed::Vote(_) => 1,
                    Doomed::Comment(_) => 0,
                })
                .sum::<i64>();
            updates.push(adjust(
                comment.primary_key(),
                Update::new()
                    .add(NUMBER_VOTES, -(plan.doomed.len() as i64))
                    .add(VOTE, net),
            ));
        }
    }
    interleave(deletes, updates, limit.max(1))
}

// `deletes` then `updates`, but with no run of `limit` operations left without a delete (so long
// as there are deletes enough to go round)
fn interleave(deletes: Vec<WriteOp>, updates: Vec<WriteOp>, limit: usize) -> Vec<WriteOp> {
    let total = deletes.len() + updates.len();
    let transactions = total.div_ceil(limit);
    let mut left = deletes.len();
    let mut ops = Vec::with_capacity(total);
    let mut deletes = deletes.into_iter();
    let mut updates = updates.into_iter();
    for i in 0..transactions {
        // Hold back one delete for each transaction still to come
        let take = left.saturating_sub(transactions - i - 1).min(limit);
        left -= take;
        ops.extend(deletes.by_ref().take(take));
        ops.extend(updates.by_ref().take(limit - take));
    }
    // Anything left over means there weren't enough deletes; [Removal] will refuse it
    ops.extend(deletes);
    ops.extend(updates);
    ops
}

/// Fail unless every transaction `ops` would be committed in deletes at least one row
fn check_guarded(ops: &[WriteOp], limit: usize) -> Result<()> {
    ensure!(
        ops.chunks(limit)
            .all(|chunk| chunk.iter().any(|op| matches!(op, WriteOp::Delete { .. }))),
        UnguardedSnafu {
            operations: ops.len(),
            limit
        }
    );
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Removal                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The smallest transaction a [Removal] will use
///
/// A plan touches at most one more counter row than it deletes rows, so three operations per
/// transaction is always enough to give every transaction a delete.
pub const MIN_TRANSACTION_LIMIT: usize = 3;

/// Where a [Removal] stands
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    Pending,
    Aggregating,
    Batched,
    /// Submitting transaction `chunk` (one-based) of `of`
    Committing { chunk: usize, of: usize },
    Done,
    Failed,
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Pending => write!(f, "pending"),
            Phase::Aggregating => write!(f, "aggregating"),
            Phase::Batched => write!(f, "batched"),
            Phase::Committing { chunk, of } => write!(f, "committing {} of {}", chunk, of),
            Phase::Done => write!(f, "done"),
            Phase::Failed => write!(f, "failed"),
        }
    }
}

/// What a completed [Removal] did
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Summary {
    pub transactions: usize,
    pub operations: usize,
}

/// A cascading removal, from staging through commit
pub struct Removal {
    store: Arc<dyn Store>,
    limit: usize,
    phase: Phase,
    ops: Vec<WriteOp>,
}

impl Removal {
    /// `limit` is the maximum number of operations per transaction; it's clamped to
    /// [MIN_TRANSACTION_LIMIT]..=[TRANSACTION_LIMIT]
    pub fn new(store: Arc<dyn Store>, limit: usize) -> Removal {
        Removal {
            store,
            limit: limit.clamp(MIN_TRANSACTION_LIMIT, TRANSACTION_LIMIT),
            phase: Phase::Pending,
            ops: Vec::new(),
        }
    }
    pub fn phase(&self) -> &Phase {
        &self.phase
    }
    pub fn operations(&self) -> &[WriteOp] {
        &self.ops
    }
    /// The transactions [Removal::commit] will submit, in order
    pub fn chunks(&self) -> std::slice::Chunks<'_, WriteOp> {
        self.ops.chunks(self.limit)
    }
    pub fn stage(&mut self, plan: &Plan) -> Result<()> {
        ensure!(self.phase == Phase::Pending, AlreadyStagedSnafu);
        self.phase = Phase::Aggregating;
        let ops = aggregate(plan, self.limit);
        debug!(
            "Staged the removal of {} comments & {} votes in {} operations",
            plan.comment_count(),
            plan.vote_count(),
            ops.len()
        );
        self.batch(ops)
    }
    /// Stage operations directly; this is how one resumes a partially completed removal
    pub fn stage_operations(&mut self, ops: Vec<WriteOp>) -> Result<()> {
        ensure!(self.phase == Phase::Pending, AlreadyStagedSnafu);
        self.batch(ops)
    }
    fn batch(&mut self, ops: Vec<WriteOp>) -> Result<()> {
        if let Err(err) = check_guarded(&ops, self.limit) {
            self.phase = Phase::Failed;
            return Err(err);
        }
        self.ops = ops;
        self.phase = Phase::Batched;
        Ok(())
    }
    pub async fn commit(&mut self) -> Result<Summary> {
        ensure!(
            self.phase == Phase::Batched,
            NotStagedSnafu {
                phase: self.phase.clone()
            }
        );
        let total = self.ops.len().div_ceil(self.limit);
        for (i, chunk) in self.ops.chunks(self.limit).enumerate() {
            self.phase = Phase::Committing {
                chunk: i + 1,
                of: total,
            };
            debug!(
                "Committing transaction {} of {} ({} operations)",
                i + 1,
                total,
                chunk.len()
            );
            if let Err(err) = self.store.transact_write(chunk.to_vec()).await {
                self.phase = Phase::Failed;
                if i == 0 {
                    return Err(err).context(TransactionSnafu {
                        chunk: 1usize,
                        of: total,
                    });
                }
                let remaining = self.ops[i * self.limit..].to_vec();
                warn!(
                    "Removal failed after {} of {} transactions; {} operations remain",
                    i,
                    total,
                    remaining.len()
                );
                return Err(err).context(PartiallyCompletedSnafu {
                    committed: i,
                    total,
                    remaining,
                });
            }
        }
        self.phase = Phase::Done;
        info!(
            "Removal complete: {} operations in {} transactions",
            self.ops.len(),
            total
        );
        Ok(Summary {
            transactions: total,
            operations: self.ops.len(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{
        attr::ItemExt,
        entities::{UserEmail, Username},
        memory,
        reply_chain::ReplyChain,
        storage::Key,
        timestamp::Timestamp,
    };

    use chrono::{Duration, TimeZone, Utc};

    fn user(n: u32) -> User {
        let name = format!("user{}", n);
        User::new(
            UserNumber::new(n),
            &Username::new(&name).unwrap(),
            &UserEmail::new(&format!("{}@example.com", name)).unwrap(),
            &Timestamp::from(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        )
    }

    fn at(minutes: i64) -> Timestamp {
        Timestamp::from(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes),
        )
    }

    // One top-level comment with 29 nested replies (a chain of threads) and 10 votes, spread
    // over five authors
    fn big_subtree(slug: &Slug) -> (Vec<Comment>, Vec<Vote>) {
        let users = (1..=5).map(user).collect::<Vec<User>>();
        let mut comments = Vec::new();
        let mut chain = ReplyChain::top_level();
        for i in 0..30 {
            // Every third comment replies to the previous one; the rest are siblings under it
            let c = Comment::new(
                &users[i % 5],
                i as u64,
                slug,
                "text",
                &at(i as i64),
                &chain,
            )
            .unwrap();
            if i % 3 == 0 {
                chain = c.thread();
            }
            comments.push(c);
        }
        let votes = comments
            .iter()
            .take(10)
            .enumerate()
            .map(|(i, c)| {
                let voter = &users[(i + 1) % 5];
                Vote::on(c, voter, i as u64, i % 2 == 0, &at(100 + i as i64)).unwrap()
            })
            .collect::<Vec<Vote>>();
        (comments, votes)
    }

    #[test]
    fn thirty_comments_ten_votes() {
        let slug = Slug::new("big").unwrap();
        let (comments, votes) = big_subtree(&slug);
        let mut items = comments.iter().map(|c| c.to_item()).collect::<Vec<_>>();
        items.extend(votes.iter().map(|v| v.to_item()));
        // Forest::build wants index-1 order
        items.sort_by(|a, b| {
            a.string(crate::storage::INDEX1_SORT_KEY)
                .unwrap()
                .cmp(b.string(crate::storage::INDEX1_SORT_KEY).unwrap())
        });
        let forest = Forest::from_items(&items, &ReplyChain::top_level()).unwrap();
        assert_eq!(forest.comment_count(), 30);
        assert_eq!(forest.vote_count(), 10);

        let plan = Plan::for_subtree(&slug, &forest);
        let ops = aggregate(&plan, 25);
        // 40 deletes, 5 user updates & one post update
        assert_eq!(ops.len(), 46);
        assert_eq!(
            ops.iter()
                .filter(|op| matches!(op, WriteOp::Delete { .. }))
                .count(),
            40
        );
        assert_eq!(
            ops.iter()
                .filter(|op| matches!(op, WriteOp::Update { .. }))
                .count(),
            6
        );
        assert!(ops
            .iter()
            .all(|op| op.condition() == Some(&Condition::Exists)));

        let mut removal = Removal::new(Arc::new(memory::Store::new()), 25);
        removal.stage(&plan).unwrap();
        let sizes = removal.chunks().map(|c| c.len()).collect::<Vec<usize>>();
        assert_eq!(sizes, vec![25, 21]);
        // Concatenating the chunks gives back the plan
        assert_eq!(removal.chunks().flatten().cloned().collect::<Vec<_>>(), ops);
    }

    #[test]
    fn post_order_deletes() {
        let slug = Slug::new("small").unwrap();
        let alice = user(1);
        let bob = user(2);
        let c1 = Comment::new(&alice, 1, &slug, "top", &at(0), &ReplyChain::top_level()).unwrap();
        let v1 = Vote::on(&c1, &alice, 1, true, &at(0)).unwrap();
        let c2 = Comment::new(&bob, 1, &slug, "reply", &at(1), &c1.thread()).unwrap();
        let v2 = Vote::on(&c2, &alice, 2, false, &at(2)).unwrap();
        let forest = Forest::from_items(
            &[c1.to_item(), v1.to_item(), c2.to_item(), v2.to_item()],
            &ReplyChain::top_level(),
        )
        .unwrap();
        let plan = Plan::for_subtree(&slug, &forest);
        assert_eq!(
            plan.doomed(),
            &[
                Doomed::Vote(v2.clone()),
                Doomed::Comment(c2.clone()),
                Doomed::Vote(v1.clone()),
                Doomed::Comment(c1.clone()),
            ]
        );
        let ops = aggregate(&plan, 25);
        assert_eq!(
            &ops[4..],
            &[
                WriteOp::Update {
                    key: alice.primary_key(),
                    update: Update::new().add(NUMBER_COMMENTS, -1).add(NUMBER_VOTES, -2),
                    condition: Some(Condition::Exists),
                },
                WriteOp::Update {
                    key: bob.primary_key(),
                    update: Update::new().add(NUMBER_COMMENTS, -1),
                    condition: Some(Condition::Exists),
                },
                WriteOp::Update {
                    key: Post::key(&slug),
                    update: Update::new().add(NUMBER_COMMENTS, -2),
                    condition: Some(Condition::Exists),
                },
            ]
        );
    }

    #[test]
    fn single_vote() {
        let slug = Slug::new("small").unwrap();
        let alice = user(1);
        let c1 = Comment::new(&alice, 1, &slug, "top", &at(0), &ReplyChain::top_level()).unwrap();
        let down = Vote::on(&c1, &user(2), 1, false, &at(3)).unwrap();
        let ops = aggregate(&Plan::for_vote(&c1, &down), 25);
        assert_eq!(
            ops,
            vec![
                WriteOp::Delete {
                    key: down.primary_key(),
                    condition: Some(Condition::Exists)
                },
                WriteOp::Update {
                    key: Key::new("USER#0000000002", "#USER"),
                    update: Update::new().add(NUMBER_VOTES, -1),
                    condition: Some(Condition::Exists),
                },
                WriteOp::Update {
                    key: c1.primary_key(),
                    update: Update::new().add(NUMBER_VOTES, -1).add(VOTE, 1),
                    condition: Some(Condition::Exists),
                },
            ]
        );
    }

    fn deletes(ops: &[WriteOp]) -> usize {
        ops.iter()
            .filter(|op| matches!(op, WriteOp::Delete { .. }))
            .count()
    }

    #[test]
    fn every_transaction_deletes() {
        let d = |i: usize| delete(Key::new(format!("D#{}", i), "#D"));
        let u = |i: usize| adjust(Key::new(format!("U#{}", i), "#U"), Update::new().add(VOTE, -1));

        // Four deletes & two updates, four at a time: the updates may not all go last
        let ops = interleave(vec![d(0), d(1), d(2), d(3)], vec![u(0), u(1)], 4);
        assert_eq!(ops, vec![d(0), d(1), d(2), u(0), d(3), u(1)]);

        // Plenty of deletes leaves things as they were
        let ops = interleave((0..40).map(d).collect(), (0..6).map(u).collect(), 25);
        let mut expected = (0..40).map(d).collect::<Vec<WriteOp>>();
        expected.extend((0..6).map(u));
        assert_eq!(ops, expected);

        // Seventy deletes & six updates: the updates move up into the third transaction
        let ops = interleave((0..70).map(d).collect(), (0..6).map(u).collect(), 25);
        let chunks = ops.chunks(25).collect::<Vec<&[WriteOp]>>();
        assert_eq!(
            chunks.iter().map(|c| c.len()).collect::<Vec<usize>>(),
            vec![25, 25, 25, 1]
        );
        assert!(chunks.iter().all(|c| deletes(c) > 0));
        assert_eq!(chunks[3], &[d(69)]);
        assert!(check_guarded(&ops, 25).is_ok());

        // A single vote at the smallest limit
        let ops = interleave(vec![d(0)], vec![u(0), u(1)], MIN_TRANSACTION_LIMIT);
        assert!(check_guarded(&ops, MIN_TRANSACTION_LIMIT).is_ok());

        // Too few deletes to go round
        let ops = interleave(vec![d(0)], vec![u(0), u(1), u(2)], 3);
        assert_eq!(ops.len(), 4);
        assert!(matches!(
            check_guarded(&ops, 3),
            Err(Error::Unguarded { .. })
        ));
    }

    #[tokio::test]
    async fn unguarded_operations_are_refused() {
        let d = delete(Key::new("D#0", "#D"));
        let u = |i: usize| adjust(Key::new(format!("U#{}", i), "#U"), Update::new().add(VOTE, -1));
        let mut removal = Removal::new(Arc::new(memory::Store::new()), 3);
        // The second transaction would hold nothing but updates
        assert!(matches!(
            removal.stage_operations(vec![d.clone(), u(0), u(1), u(2)]),
            Err(Error::Unguarded { .. })
        ));
        assert_eq!(removal.phase(), &Phase::Failed);

        let mut removal = Removal::new(Arc::new(memory::Store::new()), 3);
        removal.stage_operations(vec![u(0), d, u(1)]).unwrap();
        assert_eq!(removal.phase(), &Phase::Batched);
    }

    #[tokio::test]
    async fn replaying_a_resumed_tail_fails() {
        let store = Arc::new(memory::Store::new());
        let doomed = (0..4)
            .map(|i| Key::new(format!("K#{}", i), "#K"))
            .collect::<Vec<Key>>();
        for key in &doomed {
            store.put_item(key.to_item(), None).await.unwrap();
        }
        let counters = [Key::new("C#0", "#C"), Key::new("C#1", "#C")];
        for key in &counters {
            let mut item = key.to_item();
            item.insert(NUMBER_COMMENTS.to_owned(), crate::attr::Value::number(2));
            store.put_item(item, None).await.unwrap();
        }
        let ops = interleave(
            doomed.iter().cloned().map(delete).collect(),
            counters
                .iter()
                .cloned()
                .map(|key| adjust(key, Update::new().add(NUMBER_COMMENTS, -2)))
                .collect(),
            4,
        );

        store.fail_transaction(2);
        let mut removal = Removal::new(store.clone(), 4);
        removal.stage_operations(ops).unwrap();
        let remaining = match removal.commit().await {
            Err(Error::PartiallyCompleted { remaining, .. }) => remaining,
            other => panic!("Expected a partial failure; got {other:?}"),
        };
        assert_eq!(deletes(&remaining), 1);

        let mut resumed = Removal::new(store.clone(), 4);
        resumed.stage_operations(remaining.clone()).unwrap();
        resumed.commit().await.unwrap();

        // Once more changes nothing
        let mut again = Removal::new(store.clone(), 4);
        again.stage_operations(remaining).unwrap();
        match again.commit().await {
            Err(Error::Transaction { source, .. }) => assert!(source.is_condition_failure()),
            other => panic!("Expected a failed condition; got {other:?}"),
        }
        for key in &counters {
            let item = store.get_item(key).await.unwrap().unwrap();
            assert_eq!(item.number::<i64>(NUMBER_COMMENTS).unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn phases() {
        let mut removal = Removal::new(Arc::new(memory::Store::new()), 25);
        assert_eq!(removal.phase(), &Phase::Pending);
        assert!(matches!(
            removal.commit().await,
            Err(Error::NotStaged { .. })
        ));
        removal.stage_operations(Vec::new()).unwrap();
        assert_eq!(removal.phase(), &Phase::Batched);
        assert!(removal.stage_operations(Vec::new()).is_err());
        let summary = removal.commit().await.unwrap();
        assert_eq!(summary.transactions, 0);
        assert_eq!(removal.phase(), &Phase::Done);
    }

    #[tokio::test]
    async fn partial_failure() {
        let store = Arc::new(memory::Store::new());
        // Thirty deletes of items that exist
        let keys = (0..30)
            .map(|i| Key::new(format!("K#{:02}", i), "#K"))
            .collect::<Vec<Key>>();
        for key in &keys {
            store.put_item(key.to_item(), None).await.unwrap();
        }
        let ops = keys.iter().cloned().map(delete).collect::<Vec<WriteOp>>();

        // Fail the second transaction
        store.fail_transaction(2);
        let mut removal = Removal::new(store.clone(), 25);
        removal.stage_operations(ops.clone()).unwrap();
        let err = removal.commit().await.unwrap_err();
        assert_eq!(removal.phase(), &Phase::Failed);
        let remaining = match err {
            Error::PartiallyCompleted {
                committed,
                total,
                remaining,
                ..
            } => {
                assert_eq!(committed, 1);
                assert_eq!(total, 2);
                remaining
            }
            err => panic!("Expected a partial failure; got {err:?}"),
        };
        assert_eq!(remaining, ops[25..].to_vec());
        assert!(store.get_item(&keys[0]).await.unwrap().is_none());
        assert!(store.get_item(&keys[29]).await.unwrap().is_some());

        // Resume
        let mut resumed = Removal::new(store.clone(), 25);
        resumed.stage_operations(remaining).unwrap();
        assert_eq!(resumed.commit().await.unwrap().operations, 5);
        assert!(store.get_item(&keys[29]).await.unwrap().is_none());

        // And everything's gone, so doing it all again fails up front
        let mut again = Removal::new(store.clone(), 25);
        again.stage_operations(ops).unwrap();
        assert!(matches!(
            again.commit().await,
            Err(Error::Transaction { chunk: 1, of: 2, .. })
        ));
    }
}
