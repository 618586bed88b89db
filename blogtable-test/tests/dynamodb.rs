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

//! # dynamodb
//!
//! The integration tests, run against DynamoDB (or anything speaking its protocol, like
//! DynamoDB Local or ScyllaDB's Alternator interface). Where to find it comes from the file named
//! by `BLOGTABLE_TEST_CONFIG`; absent that, every test is reported as ignored.
//!
//! Unless told otherwise, the table is dropped & re-created before the tests run, and dropped
//! again after.

use std::sync::Arc;

use blogtable::{
    blog::{self, Blog},
    dynamodb::{self, Client},
    dynamodb_schemas::{self, create_schema, drop_schema},
};
use blogtable_test::{
    accounts::{posts_and_projects, users_and_names},
    analytics::{page_views, visitors},
    removal::{
        idempotent_removal, inconsistent_thread_blocks_removal, large_subtree_removal,
        remove_comment_cascade, remove_post_cascade, small_batches,
    },
    threads::{partition_order, thread_keys_and_tree, threads_and_votes},
    Helper,
};
use common::{configure_logging, BlogTest, Configuration};
use itertools::Itertools;
use libtest_mimic::{Arguments, Trial};
use snafu::{prelude::*, Snafu};
use tokio::runtime::Runtime;
use tracing::{info, warn};

mod common;

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("While creating the DDB client, {source}"))]
    Client { source: dynamodb::Error },
    #[snafu(display("Error obtaining test configuration: {source}"))]
    Configuration { source: common::Error },
    #[snafu(display("Failed to seed the blog counters: {source}"))]
    InitBlog { source: blog::Error },
    #[snafu(display("Failed to build a tokio runtime: {source}"))]
    Runtime { source: std::io::Error },
    #[snafu(display("While setting up the table, {source}"))]
    Schema { source: dynamodb_schemas::Error },
}

type Result<T> = std::result::Result<T, Error>;

struct Dynamo {
    blog: Blog,
}

impl Helper for Dynamo {
    fn blog(&self) -> Blog {
        self.blog.clone()
    }
}

async fn setup(cfg: &Configuration) -> Result<(Arc<Client>, Arc<Dynamo>)> {
    let names = cfg.blogtable.table_names();
    let client = Arc::new(
        Client::new(
            cfg.blogtable.location(),
            cfg.blogtable.credentials(),
            &names,
        )
        .await
        .context(ClientSnafu)?,
    );
    if !cfg.no_setup {
        // The table may well not be there
        if let Err(err) = drop_schema(client.sdk(), &names).await {
            info!("Not dropping {}: {}", names.table, err);
        }
        create_schema(client.sdk(), &names)
            .await
            .context(SchemaSnafu)?;
    }
    let blog = Blog::new(client.clone(), cfg.blogtable.transaction_limit());
    match blog.init_blog().await {
        Ok(()) | Err(blog::Error::AlreadyExists { .. }) => (),
        Err(err) => return Err(err).context(InitBlogSnafu),
    }
    Ok((client, Arc::new(Dynamo { blog })))
}

// No fault injection here, so no `partial_removal_and_resume`

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
    let rt = Arc::new(Runtime::new().context(RuntimeSnafu)?);

    // We have no way to augment the set of command-line arguments this program will accept, so
    // we'll examine an environment variable to determine where to get our configuration:
    let config = Configuration::new().context(ConfigurationSnafu)?;

    let mut args = Arguments::from_args();

    let fixture = match &config {
        Some(cfg) => {
            configure_logging(cfg).context(ConfigurationSnafu)?;
            Some(rt.block_on(setup(cfg))?)
        }
        None => {
            eprintln!("BLOGTABLE_TEST_CONFIG is not set; ignoring the DynamoDB tests.");
            None
        }
    };

    // The tests share one table (& one blog counters row), so they can't run simultaneously.
    if !matches!(args.test_threads, Some(1)) {
        eprintln!("Overriding --test-threads to 1.");
        args.test_threads = Some(1);
    }

    let conclusion = libtest_mimic::run(
        &args,
        inventory::iter::<BlogTest>
            .into_iter()
            .sorted_by_key(|t| t.name)
            .map(|test| match &fixture {
                Some((_, helper)) => Trial::test(test.name, {
                    let rt = rt.clone();
                    let helper: Arc<dyn Helper> = helper.clone();
                    move || rt.block_on((test.test_fn)(helper))
                }),
                None => Trial::test(test.name, || Ok(())).with_ignored_flag(true),
            })
            .collect(),
    );

    if let (Some(cfg), Some((client, _))) = (&config, &fixture) {
        if !cfg.no_teardown {
            if let Err(err) = rt.block_on(drop_schema(client.sdk(), &cfg.blogtable.table_names()))
            {
                warn!("Failed to drop {}: {}", cfg.blogtable.table_names().table, err);
            }
        }
    }

    conclusion.exit();
}
