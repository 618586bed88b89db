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

use std::{env, fs, future::Future, io, pin::Pin, sync::Arc};

use blogtable::config::ConfigV1;
use blogtable_test::Helper;
use libtest_mimic::Failed;
use serde::Deserialize;
use snafu::{prelude::*, IntoError};
use tap::Pipe;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to parse {pth}: {source}"))]
    De {
        pth: String,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to read BLOGTABLE_TEST_CONFIG: {source}"))]
    Env { source: std::env::VarError },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    Filter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to read {pth}: {source}"))]
    Read { pth: String, source: std::io::Error },
    #[snafu(display("Failed to set the global tracing subscriber: {source}"))]
    SetGlobalDefault {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Common test configuration
///
/// ```toml
/// logging = true
/// no-teardown = true
///
/// [blogtable]
/// table-name = "blogtable-test"
/// location = ["http://localhost:8000"]
/// credentials = ["AKID", "sekrit"]
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Configuration {
    pub logging: bool,
    /// Use the table as it stands, rather than dropping & re-creating it
    pub no_setup: bool,
    /// Leave the table in place once the tests are done
    pub no_teardown: bool,
    pub blogtable: ConfigV1,
}

impl Configuration {
    /// Obtain a [Configuration]
    ///
    /// Check the `BLOGTABLE_TEST_CONFIG` environment variable; if defined, attempt to parse a
    /// [Configuration] from the file named therein; else return None.
    pub fn new() -> Result<Option<Configuration>> {
        match env::var("BLOGTABLE_TEST_CONFIG") {
            Ok(f) => fs::read_to_string(&f)
                .context(ReadSnafu { pth: f.clone() })?
                .pipe(|s| toml::from_str::<Configuration>(&s))
                .context(DeSnafu { pth: f.clone() })
                .map(Some),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(err) => Err(EnvSnafu.into_error(err)),
        }
    }
}

pub fn configure_logging(cfg: &Configuration) -> Result<()> {
    if cfg.logging {
        let filter = EnvFilter::builder()
            .with_default_directive(Level::DEBUG.into())
            .from_env()
            .context(FilterSnafu)?;
        tracing::subscriber::set_global_default(
            Registry::default()
                .with(fmt::Layer::default().compact().with_writer(io::stdout))
                .with(filter),
        )
        .context(SetGlobalDefaultSnafu)?;
    }
    Ok(())
}

pub type TestFn =
    fn(Arc<dyn Helper>) -> Pin<Box<dyn Future<Output = std::result::Result<(), Failed>> + Send>>;

pub struct BlogTest {
    pub name: &'static str,
    pub test_fn: TestFn,
}

inventory::collect!(BlogTest);
