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

//! # Reply Trees
//!
//! ## Introduction
//!
//! A single ascending query on a post's index-1 partition returns the post's comments & votes
//! ordered by their reply-chain keys, which is to say with every comment appearing after all of
//! its ancestors & every vote appearing after the comment on which it was cast. [Forest::build]
//! relies on that to rebuild the reply tree in one forward pass.
//!
//! The post row itself sorts under `#POST`, which (in byte order) comes *after* every `#COMMENT#`
//! key, so it's picked out wherever it appears rather than expected first.
//!
//! A row's place in the tree is read from its index-1 sort key. The comment & vote entities carry
//! their reply chains as attributes, too; a row whose attribute disagrees with its key is a
//! consistency error rather than something to be put wherever one of them says.
//!
//! Nodes live in an arena ([Forest::nodes]) & refer to one another by [NodeId]; a node's replies
//! & votes are keyed by timestamp so iteration is always chronological.

use std::collections::BTreeMap;

use snafu::{prelude::*, Backtrace};
use tracing::debug;

use crate::{
    attr::{Item, ItemExt},
    entities::{self, Comment, Entity, Post, Row, Slug, Vote},
    reply_chain::{self, Kind, ReplyChain},
    storage::INDEX1_SORT_KEY,
    timestamp::Timestamp,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to decode a row of the reply tree: {source}"))]
    Decode { source: entities::Error },
    #[snafu(display("The {kind} at {key} appears more than once"))]
    Duplicate {
        kind: Kind,
        key: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to read the index-1 sort key of a row: {source}"))]
    Key { source: crate::attr::Error },
    #[snafu(display("The index-1 sort key {key} can't be decoded: {source}"))]
    KeyDecode {
        key: String,
        source: reply_chain::Error,
    },
    #[snafu(display("The {kind} filed under {key} says it belongs at {found}"))]
    KeyMismatch {
        kind: Kind,
        key: String,
        found: String,
        backtrace: Backtrace,
    },
    #[snafu(display("More than one post row was found for {slug}"))]
    MultiplePosts { slug: Slug, backtrace: Backtrace },
    #[snafu(display("No post row was found for {slug}"))]
    NoPost { slug: Slug, backtrace: Backtrace },
    #[snafu(display("The {kind} at {key} refers to an ancestor that wasn't seen"))]
    Orphan {
        kind: Kind,
        key: String,
        backtrace: Backtrace,
    },
    #[snafu(display("The {kind} at {key} lies outside the sub-tree being rebuilt"))]
    OutsideSubtree {
        kind: Kind,
        key: String,
        backtrace: Backtrace,
    },
    #[snafu(display("The row at {key} belongs to post {found}, not {expected}"))]
    WrongPost {
        key: String,
        found: Slug,
        expected: Slug,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Handle to a [Node] within its [Forest]
pub type NodeId = usize;

/// A comment, the votes cast on it, & its replies
#[derive(Clone, Debug)]
pub struct Node {
    comment: Comment,
    votes: BTreeMap<Timestamp, Vote>,
    replies: BTreeMap<Timestamp, NodeId>,
}

/// A comment's vote count & net score, as tallied from its vote rows
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Tally {
    pub number_votes: u64,
    pub vote: i64,
}

impl Node {
    pub fn comment(&self) -> &Comment {
        &self.comment
    }
    pub fn votes(&self) -> impl Iterator<Item = &Vote> {
        self.votes.values()
    }
    pub fn vote(&self, at: &Timestamp) -> Option<&Vote> {
        self.votes.get(at)
    }
    pub fn replies(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.replies.values().copied()
    }
    pub fn reply(&self, at: &Timestamp) -> Option<NodeId> {
        self.replies.get(at).copied()
    }
    /// Tally this comment's votes from the vote rows themselves (as opposed to the denormalized
    /// counters on the comment)
    pub fn recount(&self) -> Tally {
        self.votes.values().fold(Tally::default(), |acc, v| Tally {
            number_votes: acc.number_votes + 1,
            vote: acc.vote + if v.up() { 1 } else { -1 },
        })
    }
}

fn key_of<E: Entity>(e: &E) -> String {
    e.index1_key().map(|k| k.sort).unwrap_or_default()
}

// The sort key under which `item` was found must be the one its attributes call for
fn check_key(
    item: &Item,
    kind: Kind,
    ancestors: &ReplyChain,
    own: &Timestamp,
    rendered: String,
) -> Result<()> {
    let key = item.string(INDEX1_SORT_KEY).context(KeySnafu)?;
    let decoded = reply_chain::decode(key).context(KeyDecodeSnafu { key })?;
    ensure!(
        decoded.kind == kind && &decoded.ancestors == ancestors && &decoded.own == own,
        KeyMismatchSnafu {
            kind,
            key,
            found: rendered,
        }
    );
    Ok(())
}

/// Decode `item`; for comments & votes, check that the row's sort key agrees with its attributes
fn decode_row(item: &Item) -> Result<Row> {
    let row = Row::from_item(item).context(DecodeSnafu)?;
    match &row {
        Row::Post(_) => (),
        Row::Comment(c) => check_key(
            item,
            Kind::Comment,
            c.reply_chain(),
            c.date_added(),
            key_of(c),
        )?,
        Row::Vote(v) => check_key(item, Kind::Vote, v.reply_chain(), v.date_added(), key_of(v))?,
    }
    Ok(row)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Forest                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Every comment thread under some base chain
///
/// The base is empty for a whole post; for a sub-tree, it's the chain of the comment at the root
/// of the sub-tree.
#[derive(Clone, Debug, Default)]
pub struct Forest {
    base: ReplyChain,
    nodes: Vec<Node>,
    roots: BTreeMap<Timestamp, NodeId>,
}

impl Forest {
    /// Rebuild the forest from rows in ascending index-1 sort-key order
    ///
    /// Every row's chain must begin with `base`. Post rows are the caller's business & are
    /// rejected here.
    pub fn build<I: IntoIterator<Item = Row>>(rows: I, base: &ReplyChain) -> Result<Forest> {
        let mut forest = Forest {
            base: base.clone(),
            ..Default::default()
        };
        for row in rows {
            match row {
                Row::Comment(comment) => forest.add_comment(comment)?,
                Row::Vote(vote) => forest.add_vote(vote)?,
                Row::Post(post) => {
                    return OutsideSubtreeSnafu {
                        kind: Kind::Comment,
                        key: key_of(&post),
                    }
                    .fail()
                }
            }
        }
        debug!(
            "Rebuilt a forest of {} comments & {} votes",
            forest.comment_count(),
            forest.vote_count()
        );
        Ok(forest)
    }
    /// Decode `items` & rebuild the forest from them
    pub fn from_items(items: &[Item], base: &ReplyChain) -> Result<Forest> {
        let rows = items.iter().map(decode_row).collect::<Result<Vec<Row>>>()?;
        Forest::build(rows, base)
    }

    // The portion of `chain` below the base, or `None` if `chain` doesn't begin with the base
    fn relative<'a>(&self, chain: &'a ReplyChain) -> Option<&'a [Timestamp]> {
        chain
            .starts_with(&self.base)
            .then(|| &chain.ancestors()[self.base.len()..])
    }

    fn add_comment(&mut self, comment: Comment) -> Result<()> {
        let key = key_of(&comment);
        let path = self
            .relative(comment.reply_chain())
            .context(OutsideSubtreeSnafu {
                kind: Kind::Comment,
                key: &key,
            })?
            .to_vec();
        let own = *comment.date_added();
        let id = self.nodes.len();
        // An empty relative path makes this a root; otherwise the path names the parent
        let siblings = if path.is_empty() {
            &mut self.roots
        } else {
            let parent = self.find(&path).context(OrphanSnafu {
                kind: Kind::Comment,
                key: &key,
            })?;
            &mut self.nodes[parent].replies
        };
        ensure!(
            !siblings.contains_key(&own),
            DuplicateSnafu {
                kind: Kind::Comment,
                key
            }
        );
        siblings.insert(own, id);
        self.nodes.push(Node {
            comment,
            votes: BTreeMap::new(),
            replies: BTreeMap::new(),
        });
        Ok(())
    }

    fn add_vote(&mut self, vote: Vote) -> Result<()> {
        let key = key_of(&vote);
        let path = self
            .relative(vote.reply_chain())
            .filter(|path| !path.is_empty())
            .context(OutsideSubtreeSnafu {
                kind: Kind::Vote,
                key: &key,
            })?
            .to_vec();
        let target = self.find(&path).context(OrphanSnafu {
            kind: Kind::Vote,
            key: &key,
        })?;
        let votes = &mut self.nodes[target].votes;
        let own = *vote.date_added();
        ensure!(
            !votes.contains_key(&own),
            DuplicateSnafu {
                kind: Kind::Vote,
                key
            }
        );
        votes.insert(own, vote);
        Ok(())
    }

    /// Look up the comment whose thread (ancestors followed by own timestamp), relative to the
    /// base, is `path`
    pub fn find(&self, path: &[Timestamp]) -> Option<NodeId> {
        let (first, rest) = path.split_first()?;
        rest.iter().try_fold(*self.roots.get(first)?, |id, t| {
            self.nodes[id].replies.get(t).copied()
        })
    }
    /// Look up the comment whose full chain is `chain` & which was posted at `own`
    pub fn find_comment(&self, chain: &ReplyChain, own: &Timestamp) -> Option<&Node> {
        let mut path = self.relative(chain)?.to_vec();
        path.push(*own);
        self.find(&path).map(|id| &self.nodes[id])
    }
    pub fn base(&self) -> &ReplyChain {
        &self.base
    }
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }
    pub fn root(&self, at: &Timestamp) -> Option<NodeId> {
        self.roots.get(at).copied()
    }
    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.roots.values().copied()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    pub fn comment_count(&self) -> usize {
        self.nodes.len()
    }
    pub fn vote_count(&self) -> usize {
        self.nodes.iter().map(|n| n.votes.len()).sum()
    }
    /// Every node, children before parents, siblings in chronological order
    pub fn post_order(&self) -> Vec<NodeId> {
        fn visit(forest: &Forest, id: NodeId, out: &mut Vec<NodeId>) {
            forest.nodes[id]
                .replies
                .values()
                .for_each(|child| visit(forest, *child, out));
            out.push(id);
        }
        let mut out = Vec::with_capacity(self.nodes.len());
        self.roots
            .values()
            .for_each(|root| visit(self, *root, &mut out));
        out
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            PostTree                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A post along with everything said about it
#[derive(Clone, Debug)]
pub struct PostTree {
    pub post: Post,
    pub forest: Forest,
}

impl PostTree {
    /// Rebuild from the full contents of the post's index-1 partition, in ascending order
    pub fn from_items(slug: &Slug, items: &[Item]) -> Result<PostTree> {
        let mut post = None;
        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            let row = decode_row(item)?;
            let found = match &row {
                Row::Post(p) => p.slug(),
                Row::Comment(c) => c.slug(),
                Row::Vote(v) => v.slug(),
            };
            ensure!(
                found == slug,
                WrongPostSnafu {
                    key: item_sort_key(&row),
                    found: found.clone(),
                    expected: slug.clone(),
                }
            );
            match row {
                Row::Post(p) => {
                    ensure!(post.is_none(), MultiplePostsSnafu { slug: slug.clone() });
                    post = Some(p);
                }
                other => rows.push(other),
            }
        }
        let post = post.context(NoPostSnafu { slug: slug.clone() })?;
        Ok(PostTree {
            post,
            forest: Forest::build(rows, &ReplyChain::top_level())?,
        })
    }
}

fn item_sort_key(row: &Row) -> String {
    match row {
        Row::Post(p) => key_of(p),
        Row::Comment(c) => key_of(c),
        Row::Vote(v) => key_of(v),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{
        attr::Value,
        entities::{User, UserEmail, UserNumber, Username},
    };

    fn ts(s: &str) -> Timestamp {
        s.parse::<Timestamp>().unwrap()
    }

    fn user(n: u32, name: &str) -> User {
        User::new(
            UserNumber::new(n),
            &Username::new(name).unwrap(),
            &UserEmail::new(&format!("{}@example.com", name)).unwrap(),
            &ts("2024-01-01T00:00:00.000Z"),
        )
    }

    struct Fixture {
        slug: Slug,
        post: Post,
        c1: Comment,
        c2: Comment,
        v3: Vote,
    }

    fn fixture() -> Fixture {
        let alice = user(1, "alice");
        let bob = user(2, "bob");
        let slug = Slug::new("hello").unwrap();
        let post = Post::new(&slug, "Hello", &ts("2024-05-01T00:00:00.000Z")).unwrap();
        let c1 = Comment::new(
            &alice,
            1,
            &slug,
            "top",
            &ts("2024-05-01T10:00:00.000Z"),
            &ReplyChain::top_level(),
        )
        .unwrap();
        let c2 = Comment::new(
            &bob,
            1,
            &slug,
            "reply",
            &ts("2024-05-01T11:00:00.000Z"),
            &c1.thread(),
        )
        .unwrap();
        let v3 = Vote::on(&c2, &alice, 1, true, &ts("2024-05-01T12:00:00.000Z")).unwrap();
        Fixture {
            slug,
            post,
            c1,
            c2,
            v3,
        }
    }

    #[test]
    fn smoke() {
        let f = fixture();
        let items = vec![
            f.post.to_item(),
            f.c1.to_item(),
            f.c2.to_item(),
            f.v3.to_item(),
        ];
        let tree = PostTree::from_items(&f.slug, &items).unwrap();
        assert_eq!(tree.post, f.post);
        let forest = &tree.forest;
        assert_eq!(forest.comment_count(), 2);
        assert_eq!(forest.vote_count(), 1);

        let t1 = *f.c1.date_added();
        let t2 = *f.c2.date_added();
        let t3 = *f.v3.date_added();
        let root = forest.node(forest.root(&t1).unwrap());
        assert_eq!(root.comment(), &f.c1);
        let reply = forest.node(root.reply(&t2).unwrap());
        assert_eq!(reply.comment(), &f.c2);
        assert_eq!(reply.vote(&t3).unwrap(), &f.v3);
        assert_eq!(
            reply.recount(),
            Tally {
                number_votes: 1,
                vote: 1
            }
        );

        // Post row last (as it would sort in byte order) works just as well
        let items = vec![
            f.c1.to_item(),
            f.c2.to_item(),
            f.v3.to_item(),
            f.post.to_item(),
        ];
        let tree = PostTree::from_items(&f.slug, &items).unwrap();
        assert_eq!(tree.forest.post_order().len(), 2);
        assert_eq!(
            tree.forest
                .find_comment(&ReplyChain::top_level(), &t1)
                .unwrap()
                .comment(),
            &f.c1
        );
    }

    #[test]
    fn consistency_errors() {
        let f = fixture();
        // The reply without its parent
        assert!(matches!(
            PostTree::from_items(&f.slug, &[f.post.to_item(), f.c2.to_item()]),
            Err(Error::Orphan { .. })
        ));
        // Vote without its comment
        assert!(matches!(
            PostTree::from_items(&f.slug, &[f.post.to_item(), f.c1.to_item(), f.v3.to_item()]),
            Err(Error::Orphan { .. })
        ));
        assert!(matches!(
            PostTree::from_items(&f.slug, &[f.c1.to_item()]),
            Err(Error::NoPost { .. })
        ));
        assert!(matches!(
            PostTree::from_items(&f.slug, &[f.post.to_item(), f.post.to_item()]),
            Err(Error::MultiplePosts { .. })
        ));
        assert!(matches!(
            PostTree::from_items(&f.slug, &[f.post.to_item(), f.c1.to_item(), f.c1.to_item()]),
            Err(Error::Duplicate { .. })
        ));
    }

    #[test]
    fn keys_must_agree_with_attributes() {
        let f = fixture();
        // The reply, filed under its proper key, but claiming to be a top-level comment
        let mut c2 = f.c2.to_item();
        c2.insert(
            entities::REPLY_CHAIN.to_owned(),
            Value::from(Vec::<Value>::new()),
        );
        assert!(matches!(
            PostTree::from_items(&f.slug, &[f.post.to_item(), f.c1.to_item(), c2]),
            Err(Error::KeyMismatch {
                kind: Kind::Comment,
                ..
            })
        ));

        // The vote, filed under the top-level comment rather than the reply
        let mut v3 = f.v3.to_item();
        v3.insert(
            INDEX1_SORT_KEY.to_owned(),
            reply_chain::encode(&f.c1.thread(), f.v3.date_added(), Kind::Vote).into(),
        );
        let items = [f.post.to_item(), f.c1.to_item(), f.c2.to_item(), v3];
        assert!(matches!(
            PostTree::from_items(&f.slug, &items),
            Err(Error::KeyMismatch { kind: Kind::Vote, .. })
        ));

        let mut garbled = f.c1.to_item();
        garbled.insert(INDEX1_SORT_KEY.to_owned(), "#COMMENT#yesterday".into());
        assert!(matches!(
            Forest::from_items(&[garbled], &ReplyChain::top_level()),
            Err(Error::KeyDecode { .. })
        ));

        let mut keyless = f.c1.to_item();
        keyless.remove(INDEX1_SORT_KEY);
        assert!(matches!(
            Forest::from_items(&[keyless], &ReplyChain::top_level()),
            Err(Error::Key { .. })
        ));
    }

    #[test]
    fn subtrees() {
        let f = fixture();
        // Rebuild just the sub-tree rooted at the reply
        let forest = Forest::from_items(&[f.c2.to_item(), f.v3.to_item()], f.c2.reply_chain())
            .unwrap();
        assert_eq!(forest.comment_count(), 1);
        let root = forest.node(forest.root(f.c2.date_added()).unwrap());
        assert_eq!(root.votes().count(), 1);

        // The top-level comment isn't in that sub-tree
        assert!(matches!(
            Forest::from_items(&[f.c1.to_item()], f.c2.reply_chain()),
            Err(Error::OutsideSubtree { .. })
        ));
    }

    #[test]
    fn post_order() {
        let alice = user(1, "alice");
        let slug = Slug::new("hello").unwrap();
        let comment = |n: u64, text: &str, at: &str, chain: &ReplyChain| {
            Comment::new(&alice, n, &slug, text, &ts(at), chain).unwrap()
        };
        let a = comment(1, "a", "2024-05-01T10:00:00.000Z", &ReplyChain::top_level());
        let b = comment(2, "b", "2024-05-01T10:01:00.000Z", &a.thread());
        let c = comment(3, "c", "2024-05-01T10:02:00.000Z", &b.thread());
        let d = comment(4, "d", "2024-05-01T10:03:00.000Z", &ReplyChain::top_level());
        let forest = Forest::build(
            vec![
                Row::Comment(a.clone()),
                Row::Comment(b.clone()),
                Row::Comment(c.clone()),
                Row::Comment(d.clone()),
            ],
            &ReplyChain::top_level(),
        )
        .unwrap();
        let order = forest
            .post_order()
            .into_iter()
            .map(|id| forest.node(id).comment().text().to_owned())
            .collect::<Vec<String>>();
        assert_eq!(order, vec!["c", "b", "a", "d"]);
    }
}
