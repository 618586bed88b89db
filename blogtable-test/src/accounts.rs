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

//! Users, posts & projects.

use std::sync::Arc;

use blogtable::{
    blog::Error,
    entities::{Post, Slug, UserEmail, UserNumber, Username},
};
use libtest_mimic::Failed;

use crate::{sign_up, Helper};

/// Users are numbered consecutively, & names are unique
pub async fn users_and_names(helper: Arc<dyn Helper>) -> Result<(), Failed> {
    let blog = helper.blog();
    let before = blog.get_blog().await?.number_users;

    let carol = sign_up(&blog, "accounts-carol").await?;
    let dave = sign_up(&blog, "accounts-dave").await?;
    assert_eq!(carol.number(), UserNumber::new(before as u32 + 1));
    assert_eq!(dave.number(), UserNumber::new(before as u32 + 2));
    assert_eq!(
        (carol.number_comments(), carol.number_votes()),
        (0, 0)
    );

    let res = blog
        .add_user(
            carol.name(),
            &UserEmail::new("someone-else@example.com")?,
        )
        .await;
    assert!(matches!(res, Err(Error::AlreadyExists { .. })));

    assert_eq!(blog.get_user(&dave.number()).await?, dave);
    assert_eq!(
        blog.get_user_by_name(carol.name()).await?,
        Some(carol.clone())
    );
    assert_eq!(
        blog.get_user_by_name(&Username::new("accounts-nobody")?)
            .await?,
        None
    );
    let everyone = blog.list_users().await?;
    let carol_at = everyone.iter().position(|u| *u == carol);
    let dave_at = everyone.iter().position(|u| *u == dave);
    assert!(matches!((carol_at, dave_at), (Some(c), Some(d)) if c < d));
    assert_eq!(blog.get_blog().await?.number_users, before + 2);

    assert!(matches!(
        blog.get_user(&UserNumber::new(u32::MAX)).await,
        Err(Error::DoesNotExist { .. })
    ));
    Ok(())
}

/// Posts & projects are created once, counted on the blog row & listed oldest first
pub async fn posts_and_projects(helper: Arc<dyn Helper>) -> Result<(), Failed> {
    let blog = helper.blog();
    let before = blog.get_blog().await?;

    let first = Slug::new("accounts-first-post")?;
    let second = Slug::new("accounts-second-post")?;
    let p1 = blog.add_post(&first, "First post").await?;
    let p2 = blog.add_post(&second, "Second post").await?;
    assert!(matches!(
        blog.add_post(&first, "Again").await,
        Err(Error::AlreadyExists { key, .. }) if key == Post::key(&first)
    ));
    assert!(matches!(
        blog.add_post(&Slug::new("accounts-untitled")?, "").await,
        Err(Error::Validation { .. })
    ));

    let tree = blog.get_post(&first).await?;
    assert_eq!(tree.post, p1);
    assert_eq!(tree.post.number_comments(), 0);
    assert!(tree.forest.is_empty());

    let posts = blog.list_posts().await?;
    let at1 = posts.iter().position(|p| *p == p1);
    let at2 = posts.iter().position(|p| *p == p2);
    assert!(matches!((at1, at2), (Some(a), Some(b)) if a < b));

    let slug = Slug::new("accounts-project")?;
    let project = blog
        .add_project(&slug, "A project", "Something I built")
        .await?;
    assert_eq!(blog.get_project(&slug).await?, project);
    assert!(blog.list_projects().await?.contains(&project));
    assert!(matches!(
        blog.add_project(&slug, "A project", "Twice").await,
        Err(Error::AlreadyExists { .. })
    ));

    let after = blog.get_blog().await?;
    assert_eq!(after.number_posts, before.number_posts + 2);
    assert_eq!(after.number_projects, before.number_projects + 1);
    Ok(())
}
