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

//! # The blogtable Integration Tests
//!
//! # Introduction
//!
//! The default `cargo test` harness has no notion of fixtures: there's no way to say "stand up a
//! table, run these tests against it, then tear it down." So the integration tests in this crate
//! opt out of it:
//!
//! ```toml
//! [[test]]
//!     name = "dynamodb"
//!     harness = false
//! ```
//!
//! and provide their own `main()`, using [libtest-mimic] to honor the usual command-line
//! arguments & produce the usual output.
//!
//! [libtest-mimic]: https://docs.rs/libtest-mimic/latest/libtest_mimic/index.html
//!
//! # Project Structure
//!
//! The test logic itself lives in this library, & knows nothing about which back-end it's
//! running against. Each test takes a [Helper], through which it obtains the [Blog] under test
//! (and, where the back-end supports it, injects faults).
//!
//! Code relating to the test framework itself (e.g. the `BlogTest` struct) belongs in
//! `tests/common`. The integration test programs themselves (one per back-end) go in `tests`,
//! where each registers whichever of these tests its back-end can support.
//!
//! Since the DynamoDB tests all share one table, no test may assume it has the table to itself:
//! each uses its own user names & slugs, and checks counters relative to where they started.

use blogtable::{
    blog::Blog,
    entities::{User, UserEmail, Username},
};
use libtest_mimic::Failed;

pub mod accounts;
pub mod analytics;
pub mod removal;
pub mod threads;

/// Implementations of this trait will be passed to each test function to give them access to the
/// back-end under test. Each integration test program provides one.
pub trait Helper: Send + Sync {
    /// The blog under test
    ///
    /// Successive calls must hand back clones of the same [Blog], so that every caller shares one
    /// clock.
    fn blog(&self) -> Blog;
    /// Arrange for the `n`th transaction submitted from now on (counting from one) to be cancelled
    fn fail_transaction(&self, _n: usize) -> Result<(), Failed> {
        Err("this back-end doesn't support fault injection".into())
    }
}

/// Sign-up `name`, with a made-up e-mail address
pub async fn sign_up(blog: &Blog, name: &str) -> Result<User, Failed> {
    Ok(blog
        .add_user(
            &Username::new(name)?,
            &UserEmail::new(&format!("{}@example.com", name))?,
        )
        .await?)
}
