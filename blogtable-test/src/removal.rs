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

//! Cascading removal of comments, votes & posts.

use std::{collections::HashMap, sync::Arc};

use blogtable::{
    attr::Value,
    blog::{Blog, Error},
    cascade::{self, aggregate, Plan, Removal},
    entities::{Comment, Entity, Post, Slug, User, UserNumber, REPLY_CHAIN},
    storage::{WriteOp, TRANSACTION_LIMIT},
    tree,
};
use libtest_mimic::Failed;

use crate::{sign_up, Helper};

// Each user's (comment count, vote count), by user number
async fn tallies(blog: &Blog, users: &[User]) -> Result<HashMap<UserNumber, (u64, u64)>, Failed> {
    let mut tallies = HashMap::new();
    for user in users {
        let user = blog.get_user(&user.number()).await?;
        tallies.insert(user.number(), (user.number_comments(), user.number_votes()));
    }
    Ok(tallies)
}

/// Remove a three-deep thread with votes from three users; every row under it goes, & every
/// counter comes down by what was removed
pub async fn remove_comment_cascade(helper: Arc<dyn Helper>) -> Result<(), Failed> {
    let blog = helper.blog();
    let ivy = sign_up(&blog, "removal-ivy").await?;
    let jack = sign_up(&blog, "removal-jack").await?;
    let kate = sign_up(&blog, "removal-kate").await?;
    let users = [ivy.clone(), jack.clone(), kate.clone()];
    let slug = Slug::new("removal-cascade")?;
    blog.add_post(&slug, "Cascade").await?;

    let c1 = blog.add_comment(&ivy.number(), &slug, "c1").await?;
    let c2 = blog.add_reply(&jack.number(), &c1, "c2").await?;
    let c3 = blog.add_reply(&kate.number(), &c2, "c3").await?;
    blog.add_vote(&kate.number(), &c1, false).await?;
    blog.add_vote(&ivy.number(), &c2, true).await?;
    let survivor = blog.add_comment(&jack.number(), &slug, "elsewhere").await?;

    let before = tallies(&blog, &users).await?;
    let comments_before = blog.get_post(&slug).await?.post.number_comments();
    assert_eq!(comments_before, 4);

    let summary = blog.remove_comment(&c1).await?;
    // Three comments & five votes, three users & the post
    assert_eq!(summary.operations, 12);
    assert_eq!(summary.transactions, 1);

    let after = tallies(&blog, &users).await?;
    let (comments, votes) = users.iter().fold((0, 0), |(c, v), user| {
        let (cb, vb) = before[&user.number()];
        let (ca, va) = after[&user.number()];
        (c + cb - ca, v + vb - va)
    });
    assert_eq!((comments, votes), (3, 5));
    assert_eq!(after[&ivy.number()], (0, 0));
    assert_eq!(after[&jack.number()], (1, 1));
    assert_eq!(after[&kate.number()], (0, 0));

    let tree = blog.get_post(&slug).await?;
    assert_eq!(tree.post.number_comments(), comments_before - 3);
    assert_eq!(tree.forest.comment_count(), 1);
    assert!(tree.forest.root(survivor.date_added()).is_some());
    for c in [&c1, &c2, &c3] {
        assert!(matches!(
            blog.get_comment(&c.user_number(), c.date_added()).await,
            Err(Error::DoesNotExist { .. })
        ));
    }
    assert!(blog.audit_post_counters(&slug).await?.is_consistent());
    Ok(())
}

// Thirty comments from five users, all descended from the first (every third comment starts a
// new level), with ten further votes on the first ten
async fn big_thread(
    blog: &Blog,
    prefix: &str,
    slug: &Slug,
) -> Result<(Vec<User>, Vec<Comment>), Failed> {
    let mut users = Vec::with_capacity(5);
    for i in 0..5 {
        users.push(sign_up(blog, &format!("{}-{}", prefix, i)).await?);
    }
    blog.add_post(slug, "A long thread").await?;
    let mut comments: Vec<Comment> = Vec::with_capacity(30);
    let mut parent: Option<Comment> = None;
    for i in 0..30 {
        let author = users[i % 5].number();
        let text = format!("comment {}", i);
        let comment = match &parent {
            None => blog.add_comment(&author, slug, &text).await?,
            Some(parent) => blog.add_reply(&author, parent, &text).await?,
        };
        if i % 3 == 0 {
            parent = Some(comment.clone());
        }
        comments.push(comment);
    }
    for (i, comment) in comments.iter().take(10).enumerate() {
        blog.add_vote(&users[(i + 1) % 5].number(), comment, i % 2 == 0)
            .await?;
    }
    Ok((users, comments))
}

/// A sub-tree too big for one transaction is removed in as few as will hold it, with one counter
/// update per user
pub async fn large_subtree_removal(helper: Arc<dyn Helper>) -> Result<(), Failed> {
    let blog = helper.blog();
    let slug = Slug::new("removal-large")?;
    let (users, comments) = big_thread(&blog, "removal-large", &slug).await?;
    let root = &comments[0];

    let forest = blog
        .get_thread(&slug, root.reply_chain(), root.date_added())
        .await?;
    assert_eq!(forest.comment_count(), 30);
    // Every comment's automatic up-vote, plus the ten
    assert_eq!(forest.vote_count(), 40);

    let plan = Plan::for_subtree(&slug, &forest);
    let ops = aggregate(&plan, TRANSACTION_LIMIT);
    let deletes = ops
        .iter()
        .filter(|op| matches!(op, WriteOp::Delete { .. }))
        .count();
    assert_eq!(deletes, 70);
    // Five users & the post
    assert_eq!(ops.len() - deletes, 6);

    let mut removal = Removal::new(blog.store().clone(), TRANSACTION_LIMIT);
    removal.stage(&plan)?;
    assert_eq!(
        removal.chunks().map(|c| c.len()).collect::<Vec<usize>>(),
        vec![25, 25, 25, 1]
    );
    assert_eq!(
        removal.chunks().flatten().cloned().collect::<Vec<WriteOp>>(),
        ops
    );
    // The counter updates move up into the third transaction, so the last still deletes a row
    assert!(removal
        .chunks()
        .all(|c| c.iter().any(|op| matches!(op, WriteOp::Delete { .. }))));

    let summary = blog.remove_comment(root).await?;
    assert_eq!(summary.operations, 76);
    assert_eq!(summary.transactions, 4);

    for user in &users {
        let user = blog.get_user(&user.number()).await?;
        assert_eq!((user.number_comments(), user.number_votes()), (0, 0));
    }
    let tree = blog.get_post(&slug).await?;
    assert_eq!(tree.post.number_comments(), 0);
    assert!(tree.forest.is_empty());
    Ok(())
}

/// A smaller transaction limit means more transactions
pub async fn small_batches(helper: Arc<dyn Helper>) -> Result<(), Failed> {
    let blog = helper.blog().with_transaction_limit(4);
    let lee = sign_up(&blog, "removal-lee").await?;
    let mia = sign_up(&blog, "removal-mia").await?;
    let slug = Slug::new("removal-batches")?;
    blog.add_post(&slug, "Batches").await?;
    let top = blog.add_comment(&lee.number(), &slug, "top").await?;
    blog.add_reply(&lee.number(), &top, "first").await?;
    blog.add_reply(&mia.number(), &top, "second").await?;

    let summary = blog.remove_comment(&top).await?;
    // Six deletes, two users & the post, four at a time
    assert_eq!(summary.operations, 9);
    assert_eq!(summary.transactions, 3);
    assert!(blog.audit_post_counters(&slug).await?.is_consistent());
    Ok(())
}

/// Once a removal has committed, re-running it fails on a precondition & changes nothing
pub async fn idempotent_removal(helper: Arc<dyn Helper>) -> Result<(), Failed> {
    let blog = helper.blog().with_transaction_limit(TRANSACTION_LIMIT);
    let nora = sign_up(&blog, "removal-nora").await?;
    let slug = Slug::new("removal-twice")?;
    blog.add_post(&slug, "Twice").await?;
    let top = blog.add_comment(&nora.number(), &slug, "top").await?;
    blog.add_reply(&nora.number(), &top, "reply").await?;

    let forest = blog
        .get_thread(&slug, top.reply_chain(), top.date_added())
        .await?;
    let ops = aggregate(&Plan::for_subtree(&slug, &forest), TRANSACTION_LIMIT);
    blog.resume_removal(ops.clone()).await?;
    let nora_after = blog.get_user(&nora.number()).await?;
    assert_eq!(
        (nora_after.number_comments(), nora_after.number_votes()),
        (0, 0)
    );

    match blog.resume_removal(ops.clone()).await {
        Err(Error::Cascade {
            source: cascade::Error::Transaction { source, .. },
        }) => assert!(source.is_condition_failure()),
        other => return Err(format!("expected a failed precondition, got {:?}", other).into()),
    }
    for op in ops
        .into_iter()
        .filter(|op| matches!(op, WriteOp::Delete { .. }))
    {
        let res = blog.store().transact_write(vec![op]).await;
        assert!(matches!(res, Err(err) if err.is_condition_failure()));
    }
    // The failed re-run was all-or-nothing
    assert_eq!(blog.get_user(&nora.number()).await?, nora_after);
    assert_eq!(blog.get_post(&slug).await?.post.number_comments(), 0);
    Ok(())
}

/// A removal that fails part-way reports what's left, & can be finished from there
pub async fn partial_removal_and_resume(helper: Arc<dyn Helper>) -> Result<(), Failed> {
    let blog = helper.blog().with_transaction_limit(3);
    let olga = sign_up(&blog, "removal-olga").await?;
    let slug = Slug::new("removal-flaky")?;
    blog.add_post(&slug, "Flaky").await?;
    let top = blog.add_comment(&olga.number(), &slug, "top").await?;
    blog.add_reply(&olga.number(), &top, "reply").await?;

    // Six operations in two transactions; the second fails
    helper.fail_transaction(2)?;
    let remaining = match blog.remove_comment(&top).await {
        Err(Error::Cascade {
            source:
                cascade::Error::PartiallyCompleted {
                    committed,
                    total,
                    remaining,
                    ..
                },
        }) => {
            assert_eq!((committed, total), (1, 2));
            remaining
        }
        other => return Err(format!("expected a partial failure, got {:?}", other).into()),
    };
    assert_eq!(remaining.len(), 3);
    // Rows are gone, but the counters haven't caught up
    assert!(!blog.audit_post_counters(&slug).await?.is_consistent());

    let summary = blog.resume_removal(remaining.clone()).await?;
    assert_eq!(summary.operations, 3);
    let tree = blog.get_post(&slug).await?;
    assert_eq!(tree.post.number_comments(), 0);
    assert!(tree.forest.is_empty());
    let olga = blog.get_user(&olga.number()).await?;
    assert_eq!((olga.number_comments(), olga.number_votes()), (0, 0));

    // Resuming a second time must not take the counters down again
    match blog.resume_removal(remaining).await {
        Err(Error::Cascade {
            source: cascade::Error::Transaction { source, .. },
        }) => assert!(source.is_condition_failure()),
        other => return Err(format!("expected a failed precondition, got {:?}", other).into()),
    }
    assert_eq!(blog.get_user(&olga.number()).await?, olga);
    assert_eq!(blog.get_post(&slug).await?.post.number_comments(), 0);
    assert!(blog.audit_post_counters(&slug).await?.is_consistent());
    Ok(())
}

/// A row filed under a key that disagrees with its own reply chain stops a removal before
/// anything is written
pub async fn inconsistent_thread_blocks_removal(helper: Arc<dyn Helper>) -> Result<(), Failed> {
    let blog = helper.blog();
    let rita = sign_up(&blog, "removal-rita").await?;
    let slug = Slug::new("removal-inconsistent")?;
    blog.add_post(&slug, "Inconsistent").await?;
    let top = blog.add_comment(&rita.number(), &slug, "top").await?;
    let reply = blog.add_reply(&rita.number(), &top, "reply").await?;

    // The reply claims to be a top-level comment, but is still filed under `top`
    let mut item = blog
        .store()
        .get_item(&reply.primary_key())
        .await?
        .ok_or("no row for the reply")?;
    item.insert(REPLY_CHAIN.to_owned(), Value::from(Vec::<Value>::new()));
    blog.store().put_item(item, None).await?;

    let rita = blog.get_user(&rita.number()).await?;
    assert!(matches!(
        blog.remove_comment(&top).await,
        Err(Error::Consistency {
            source: tree::Error::KeyMismatch { .. }
        })
    ));
    assert!(matches!(
        blog.remove_post(&slug).await,
        Err(Error::Consistency { .. })
    ));

    // Nothing was removed, & no counter moved
    blog.get_comment(&rita.number(), top.date_added()).await?;
    blog.get_comment(&rita.number(), reply.date_added()).await?;
    assert!(blog
        .store()
        .get_item(&Post::key(&slug))
        .await?
        .is_some());
    assert_eq!(blog.get_user(&rita.number()).await?, rita);
    Ok(())
}

/// Removing a post takes its whole comment tree with it
pub async fn remove_post_cascade(helper: Arc<dyn Helper>) -> Result<(), Failed> {
    let blog = helper.blog();
    let pat = sign_up(&blog, "removal-pat").await?;
    let quinn = sign_up(&blog, "removal-quinn").await?;
    let slug = Slug::new("removal-post")?;
    blog.add_post(&slug, "Doomed").await?;
    let posts_before = blog.get_blog().await?.number_posts;
    let top = blog.add_comment(&pat.number(), &slug, "top").await?;
    let reply = blog.add_reply(&quinn.number(), &top, "reply").await?;
    blog.add_vote(&pat.number(), &reply, true).await?;
    blog.add_comment(&quinn.number(), &slug, "second").await?;

    let summary = blog.remove_post(&slug).await?;
    // Three comments & four votes, two users, the post & the blog counter
    assert_eq!(summary.operations, 11);
    assert!(matches!(
        blog.get_post(&slug).await,
        Err(Error::DoesNotExist { .. })
    ));
    assert_eq!(blog.get_blog().await?.number_posts, posts_before - 1);
    for user in [&pat, &quinn] {
        let user = blog.get_user(&user.number()).await?;
        assert_eq!((user.number_comments(), user.number_votes()), (0, 0));
    }
    assert!(matches!(
        blog.remove_post(&slug).await,
        Err(Error::DoesNotExist { .. })
    ));
    Ok(())
}
