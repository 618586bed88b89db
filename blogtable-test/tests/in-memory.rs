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

//! # in-memory
//!
//! The integration tests, run against the in-memory store. Each test gets a fresh store of its
//! own, so these may run in parallel.

use std::sync::Arc;

use blogtable::{blog::Blog, memory, storage::TRANSACTION_LIMIT};
use blogtable_test::{
    accounts::{posts_and_projects, users_and_names},
    analytics::{page_views, visitors},
    removal::{
        idempotent_removal, inconsistent_thread_blocks_removal, large_subtree_removal,
        partial_removal_and_resume, remove_comment_cascade, remove_post_cascade, small_batches,
    },
    threads::{partition_order, thread_keys_and_tree, threads_and_votes},
    Helper,
};
use common::{configure_logging, BlogTest, Configuration};
use itertools::Itertools;
use libtest_mimic::{Arguments, Failed, Trial};
use snafu::{prelude::*, Snafu};
use tokio::runtime::Runtime;

mod common;

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Error obtaining test configuration: {source}"))]
    Configuration { source: common::Error },
    #[snafu(display("Failed to build a tokio runtime: {source}"))]
    Runtime { source: std::io::Error },
}

type Result<T> = std::result::Result<T, Error>;

struct InMemory {
    store: Arc<memory::Store>,
    blog: Blog,
}

impl InMemory {
    async fn new() -> std::result::Result<InMemory, Failed> {
        let store = Arc::new(memory::Store::new());
        let blog = Blog::new(store.clone(), TRANSACTION_LIMIT);
        blog.init_blog().await?;
        Ok(InMemory { store, blog })
    }
}

impl Helper for InMemory {
    fn blog(&self) -> Blog {
        self.blog.clone()
    }
    fn fail_transaction(&self, n: usize) -> std::result::Result<(), Failed> {
        self.store.fail_transaction(n);
        Ok(())
    }
}

inventory::submit!(BlogTest {
    name: "000users_and_names",
    test_fn: |helper| Box::pin(users_and_names(helper)),
});

inventory::submit!(BlogTest {
    name: "001posts_and_projects",
    test_fn: |helper| Box::pin(posts_and_projects(helper)),
});

inventory::submit!(BlogTest {
    name: "010thread_keys_and_tree",
    test_fn: |helper| Box::pin(thread_keys_and_tree(helper)),
});

inventory::submit!(BlogTest {
    name: "011threads_and_votes",
    test_fn: |helper| Box::pin(threads_and_votes(helper)),
});

inventory::submit!(BlogTest {
    name: "012partition_order",
    test_fn: |helper| Box::pin(partition_order(helper)),
});

inventory::submit!(BlogTest {
    name: "020remove_comment_cascade",
    test_fn: |helper| Box::pin(remove_comment_cascade(helper)),
});

inventory::submit!(BlogTest {
    name: "021large_subtree_removal",
    test_fn: |helper| Box::pin(large_subtree_removal(helper)),
});

inventory::submit!(BlogTest {
    name: "022small_batches",
    test_fn: |helper| Box::pin(small_batches(helper)),
});

inventory::submit!(BlogTest {
    name: "023idempotent_removal",
    test_fn: |helper| Box::pin(idempotent_removal(helper)),
});

inventory::submit!(BlogTest {
    name: "024partial_removal_and_resume",
    test_fn: |helper| Box::pin(partial_removal_and_resume(helper)),
});

inventory::submit!(BlogTest {
    name: "025remove_post_cascade",
    test_fn: |helper| Box::pin(remove_post_cascade(helper)),
});

inventory::submit!(BlogTest {
    name: "026inconsistent_thread_blocks_removal",
    test_fn: |helper| Box::pin(inconsistent_thread_blocks_removal(helper)),
});

inventory::submit!(BlogTest {
    name: "030page_views",
    test_fn: |helper| Box::pin(page_views(helper)),
});

inventory::submit!(BlogTest {
    name: "031visitors",
    test_fn: |helper| Box::pin(visitors(helper)),
});

fn main() -> Result<()> {
    // libtest-mimic wants synchronous test functions, so we build the runtime ourselves & block
    // on it in each trial.
    let rt = Arc::new(Runtime::new().context(RuntimeSnafu)?);

    let config = Configuration::new()
        .context(ConfigurationSnafu)?
        .unwrap_or_default();
    configure_logging(&config).context(ConfigurationSnafu)?;

    let args = Arguments::from_args();
    let conclusion = libtest_mimic::run(
        &args,
        inventory::iter::<BlogTest>
            .into_iter()
            .sorted_by_key(|t| t.name)
            .map(|test| {
                Trial::test(test.name, {
                    let rt = rt.clone();
                    move || {
                        rt.block_on(async {
                            let helper: Arc<dyn Helper> = Arc::new(InMemory::new().await?);
                            (test.test_fn)(helper).await
                        })
                    }
                })
            })
            .collect(),
    );

    conclusion.exit();
}
