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

//! Comment threads: how they're keyed, & how they're put back together.

use std::sync::Arc;

use blogtable::{
    attr::ItemExt,
    blog::Error,
    entities::{post_partition, Entity, Slug, POST_SORT_KEY},
    reply_chain::{decode, encode_comment, ReplyChain},
    storage::{Index, Key, INDEX1_SORT_KEY},
};
use libtest_mimic::Failed;

use crate::{sign_up, Helper};

/// A comment, a reply to it & a vote on the reply: check each one's index-1 sort key, then
/// rebuild the post from its index-1 partition
pub async fn thread_keys_and_tree(helper: Arc<dyn Helper>) -> Result<(), Failed> {
    let blog = helper.blog();
    let erin = sign_up(&blog, "threads-erin").await?;
    let frank = sign_up(&blog, "threads-frank").await?;
    let slug = Slug::new("threads-keys")?;
    blog.add_post(&slug, "Thread keys").await?;

    let c1 = blog.add_comment(&erin.number(), &slug, "t1").await?;
    let t1 = *c1.date_added();
    let c2 = blog.add_reply(&frank.number(), &c1, "t2").await?;
    let t2 = *c2.date_added();
    let v3 = blog.add_vote(&erin.number(), &c2, true).await?;
    let t3 = *v3.date_added();
    assert!(t1 < t2 && t2 < t3);

    let sort_key = |key: Option<Key>| key.map(|k| k.sort).unwrap_or_default();
    assert_eq!(sort_key(c1.index1_key()), format!("#COMMENT#{}", t1));
    assert_eq!(sort_key(c2.index1_key()), format!("#COMMENT#{}#COMMENT#{}", t1, t2));
    assert_eq!(
        sort_key(v3.index1_key()),
        format!("#COMMENT#{}#COMMENT#{}#VOTE#{}", t1, t2, t3)
    );
    let decoded = decode(&sort_key(c1.index1_key()))?;
    assert_eq!(decoded.ancestors, ReplyChain::top_level());
    assert_eq!(decoded.own, t1);

    // What's actually stored agrees
    let items = blog
        .store()
        .query(Index::Index1, &post_partition(&slug), None, true)
        .await?;
    let stored = items
        .iter()
        .map(|item| item.string(INDEX1_SORT_KEY).map(str::to_owned))
        .collect::<Result<Vec<String>, _>>()?;
    assert!(stored.contains(&sort_key(v3.index1_key())));
    // Ancestors first: every comment precedes its replies & its votes
    assert!(stored.windows(2).all(|w| w[0] < w[1]));

    let tree = blog.get_post(&slug).await?;
    let root = tree.forest.node(tree.forest.root(&t1).ok_or("no root t1")?);
    let reply = tree
        .forest
        .node(root.reply(&t2).ok_or("no reply t2 under t1")?);
    assert_eq!(reply.comment().text(), c2.text());
    // frank's automatic up-vote, plus erin's
    assert_eq!(
        (reply.comment().vote(), reply.comment().number_votes()),
        (2, 2)
    );
    assert_eq!(reply.vote(&t3), Some(&v3));

    // Nothing dropped, nothing duplicated: every row but the post's is a node or a vote
    assert_eq!(
        tree.forest.comment_count() + tree.forest.vote_count(),
        items.len() - 1
    );
    assert_eq!(tree.forest.comment_count(), 2);
    // Two automatic up-votes, plus erin's
    assert_eq!(tree.forest.vote_count(), 3);
    assert_eq!(tree.post.number_comments(), 2);
    Ok(())
}

/// A live query on a post's partition returns every comment after all of its ancestors, every vote
/// after the comment voted upon, & the post's own row last
pub async fn partition_order(helper: Arc<dyn Helper>) -> Result<(), Failed> {
    let blog = helper.blog();
    let ivan = sign_up(&blog, "threads-ivan").await?;
    let jill = sign_up(&blog, "threads-jill").await?;
    let slug = Slug::new("threads-order")?;
    blog.add_post(&slug, "Order").await?;

    let first = blog.add_comment(&ivan.number(), &slug, "first").await?;
    let second = blog.add_comment(&jill.number(), &slug, "second").await?;
    let reply = blog.add_reply(&jill.number(), &first, "reply").await?;
    blog.add_vote(&jill.number(), &first, true).await?;
    let deeper = blog.add_reply(&ivan.number(), &reply, "deeper").await?;
    blog.add_vote(&ivan.number(), &second, false).await?;
    blog.add_reply(&ivan.number(), &second, "late").await?;
    blog.add_vote(&jill.number(), &deeper, true).await?;

    let keys = blog
        .store()
        .query(Index::Index1, &post_partition(&slug), None, true)
        .await?
        .iter()
        .map(|item| item.string(INDEX1_SORT_KEY).map(str::to_owned))
        .collect::<Result<Vec<String>, _>>()?;
    // Five comments, each with its author's up-vote, three more votes & the post
    assert_eq!(keys.len(), 14);
    assert_eq!(keys.last().map(String::as_str), Some(POST_SORT_KEY));

    for (i, key) in keys[..keys.len() - 1].iter().enumerate() {
        let decoded = decode(key)?;
        // For a vote, the last of these is the comment voted upon
        let mut chain = ReplyChain::top_level();
        for t in decoded.ancestors.ancestors() {
            let above = encode_comment(&chain, t);
            let at = keys
                .iter()
                .position(|k| k == &above)
                .ok_or_else(|| format!("{} was returned without {}", key, above))?;
            assert!(at < i, "{} came back before {}", key, above);
            chain = chain.child(*t)?;
        }
    }
    Ok(())
}

/// Fetching a single thread gives that comment as the sole root, along with everything under it
pub async fn threads_and_votes(helper: Arc<dyn Helper>) -> Result<(), Failed> {
    let blog = helper.blog();
    let gina = sign_up(&blog, "threads-gina").await?;
    let hank = sign_up(&blog, "threads-hank").await?;
    let slug = Slug::new("threads-votes")?;
    blog.add_post(&slug, "Votes").await?;

    let top = blog.add_comment(&gina.number(), &slug, "top").await?;
    let other = blog.add_comment(&hank.number(), &slug, "other").await?;
    let reply = blog.add_reply(&hank.number(), &top, "reply").await?;
    let nested = blog.add_reply(&gina.number(), &reply, "nested").await?;
    let down = blog.add_vote(&hank.number(), &top, false).await?;
    blog.add_vote(&hank.number(), &nested, true).await?;

    let thread = blog
        .get_thread(&slug, top.reply_chain(), top.date_added())
        .await?;
    assert_eq!(thread.roots().count(), 1);
    assert!(thread.root(other.date_added()).is_none());
    assert_eq!(thread.comment_count(), 3);
    // Three automatic up-votes & two of hank's
    assert_eq!(thread.vote_count(), 5);
    let root = thread.node(thread.root(top.date_added()).ok_or("no root")?);
    assert_eq!((root.comment().vote(), root.comment().number_votes()), (0, 2));
    assert_eq!(root.recount().vote, 0);

    let inner = blog
        .get_thread(&slug, reply.reply_chain(), reply.date_added())
        .await?;
    assert_eq!(inner.comment_count(), 2);
    assert!(inner
        .find(&[*reply.date_added(), *nested.date_added()])
        .is_some());

    let hank = blog.get_user(&hank.number()).await?;
    assert_eq!((hank.number_comments(), hank.number_votes()), (2, 4));
    assert_eq!(down.vote_number(), 3);

    // Withdraw hank's down-vote
    let summary = blog.remove_vote(&down).await?;
    assert_eq!(summary.operations, 3);
    let top = blog.get_comment(&gina.number(), top.date_added()).await?;
    assert_eq!((top.vote(), top.number_votes()), (1, 1));
    assert!(matches!(
        blog.get_vote(&hank.number(), down.date_added()).await,
        Err(Error::DoesNotExist { .. })
    ));
    assert!(blog.audit_post_counters(&slug).await?.is_consistent());

    assert!(matches!(
        blog.get_thread(&slug, top.reply_chain(), down.date_added())
            .await,
        Err(Error::DoesNotExist { .. })
    ));
    Ok(())
}
