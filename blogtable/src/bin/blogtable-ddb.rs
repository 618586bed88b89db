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

//! # blogtable-ddb
//!
//! Create the blogtable table (along with its two global secondary indexes) in DynamoDB, or in
//! ScyllaDB over the Alternator interface, & seed it with the blog counters row.
//!
//! Table & index names come from the configuration file, if one is given; the location &
//! credentials may be given either there or on the command line (the latter wins).

use std::{fmt::Display, io, path::PathBuf, sync::Arc};

use clap::{crate_authors, crate_version, value_parser, Arg, ArgAction, ArgMatches, Command};
use either::Either;
use itertools::Itertools;
use secrecy::SecretString;
use snafu::{prelude::*, Backtrace};
use tap::Pipe;
use tracing::{info, Level};
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    EnvFilter, Layer, Registry,
};
use url::Url;

use blogtable::{
    blog::{self, Blog},
    config::{self, parse_config, ConfigV1},
    dynamodb::{self, Client},
    dynamodb_schemas::{self, create_schema, drop_schema},
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        crate error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Application error type
#[derive(Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
    Client { source: dynamodb::Error },
    #[snafu(display("{source}"))]
    Config { source: config::Error },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to seed the blog counters: {source}"))]
    InitBlog { source: blog::Error },
    #[snafu(display("No sub-command given; try --help"))]
    NoSubCommand { backtrace: Backtrace },
    #[snafu(display("{source}"))]
    Schema { source: dynamodb_schemas::Error },
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self::Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                           Implement parsing credentials for `clap`                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Newtype to work around Rust's orphan traits rule
#[derive(Clone, Debug)]
struct Credentials((String, String));

impl clap::builder::ValueParserFactory for Credentials {
    type Parser = CredentialsParser;

    fn value_parser() -> Self::Parser {
        CredentialsParser
    }
}

#[derive(Clone, Debug)]
struct CredentialsParser;

impl clap::builder::TypedValueParser for CredentialsParser {
    type Value = Credentials;

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> std::result::Result<Self::Value, clap::Error> {
        use clap::error::ErrorKind;
        value
            .to_str()
            .ok_or(clap::Error::new(ErrorKind::InvalidValue))?
            .split(',')
            .collect_tuple::<(&str, &str)>()
            .ok_or(clap::Error::new(ErrorKind::WrongNumberOfValues))?
            .pipe(|p| (p.0.to_string(), p.1.to_string()))
            .pipe(Credentials)
            .pipe(Ok)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                finding DynamoDB on the network                                 //
////////////////////////////////////////////////////////////////////////////////////////////////////

// The network location of our DynamoDB (or ScyllaDB/Alternator) instance can be given
// as either a region, or a list of Urls.
/// Newtype to work around Rust's orphan traits rule
#[derive(Clone, Debug)]
struct DynamoLocation(Either<String, Vec<Url>>);

impl clap::builder::ValueParserFactory for DynamoLocation {
    type Parser = DynamoLocationParser;

    fn value_parser() -> Self::Parser {
        DynamoLocationParser
    }
}

#[derive(Clone, Debug)]
struct DynamoLocationParser;

impl clap::builder::TypedValueParser for DynamoLocationParser {
    type Value = DynamoLocation;

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> std::result::Result<Self::Value, clap::Error> {
        use clap::error::ErrorKind;
        let vals = value
            .to_str()
            .ok_or(clap::Error::new(ErrorKind::InvalidValue))?
            .split(',')
            .collect::<Vec<&str>>();
        match vals.iter().exactly_one() {
            Ok(s) => Ok(DynamoLocation(match Url::parse(s) {
                Ok(url) => Either::Right(vec![url]),
                Err(_) => Either::Left(s.to_string()),
            })),
            Err(_) => Ok(DynamoLocation(Either::Right(
                vals.iter()
                    .cloned()
                    .map(Url::parse)
                    .collect::<std::result::Result<Vec<Url>, _>>()
                    .map_err(|_| clap::Error::new(ErrorKind::InvalidValue))?,
            ))),
        }
    }
}

// Command-line settings take precedence over the configuration file
async fn get_client(matches: &ArgMatches, cfg: &ConfigV1) -> Result<Client> {
    let location = matches
        .get_one::<DynamoLocation>("location")
        .map(|loc| loc.0.clone())
        .unwrap_or_else(|| cfg.location().clone());
    let creds: Option<(SecretString, SecretString)> = match matches.get_one::<Credentials>("creds")
    {
        Some(Credentials((id, secret))) => {
            Some((id.clone().into(), secret.clone().into()))
        }
        None => cfg.credentials().clone(),
    };
    Client::new(&location, &creds, &cfg.table_names())
        .await
        .context(ClientSnafu)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            logging                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn configure_logging(matches: &ArgMatches) -> Result<()> {
    let level = match (
        matches.get_flag("debug"),
        matches.get_flag("verbose"),
        matches.get_flag("quiet"),
    ) {
        (true, _, _) => Level::TRACE,
        (false, true, _) => Level::DEBUG,
        (false, false, true) => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()
        .context(EnvFilterSnafu)?;
    let formatter: Box<dyn Layer<Registry> + Send + Sync> = if matches.get_flag("plain") {
        Box::new(fmt::Layer::default().compact().with_writer(io::stdout))
    } else {
        Box::new(fmt::Layer::default().json().with_writer(io::stdout))
    };
    tracing::subscriber::set_global_default(Registry::default().with(formatter).with(filter))
        .context(SubscriberSnafu)
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("blogtable-ddb")
        .version(crate_version!())
        .author(crate_authors!())
        .about("Create & seed the blogtable table.")
        .long_about(
            "Create the blogtable table & its secondary indexes in DynamoDB (or ScyllaDB over \
Alternator); seed it with the blog counters row.",
        )
        .arg(
            Arg::new("config")
                .short('C')
                .long("config")
                .num_args(1)
                .value_parser(value_parser!(PathBuf))
                .env("BLOGTABLE_DDB_CONFIG")
                .help("path to a blogtable configuration file"),
        )
        .arg(
            Arg::new("debug")
                .short('D')
                .long("debug")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("BLOGTABLE_DDB_DEBUG")
                .help("produce debug output"),
        )
        .arg(
            Arg::new("plain")
                .short('p')
                .long("plain")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("BLOGTABLE_DDB_PLAIN")
                .help("log in human-readable format, not JSON/structured logging"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("BLOGTABLE_DDB_QUIET")
                .help("produce only error output"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("BLOGTABLE_DDB_VERBOSE")
                .help("produce prolix output"),
        )
        .arg(
            Arg::new("creds")
                .short('c')
                .long("creds")
                .num_args(1)
                .env("BLOGTABLE_DDB_CREDS")
                .value_parser(value_parser!(Credentials))
                .help("AWS key ID & secret key, separated by a comma"),
        )
        .arg(
            Arg::new("location")
                .short('l')
                .long("location")
                .num_args(1)
                .value_parser(value_parser!(DynamoLocation))
                .help("Network location of the DynamoDB cluster")
                .long_help("Network location of the DynamoDB/ScyllaDB cluster.

Specify as either an AWS region ('us-west-2', e.g.) or as one or more comma-separated URLs \
('http://localhost:8043', e.g.)")
                .env("BLOGTABLE_DDB_LOCATION"),
        )
        .subcommand(Command::new("create-table").about("Create the table & both its indexes"))
        .subcommand(Command::new("init-blog").about("Write the blog counters row"))
        .subcommand(
            Command::new("setup").about("Create the table, then write the blog counters row"),
        )
        .subcommand(Command::new("drop-table").about("Delete the table & everything in it"))
        .get_matches();
    configure_logging(&matches)?;

    info!("blogtable-ddb {}", crate_version!());

    let cfg = parse_config(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))
        .context(ConfigSnafu)?;
    let client = get_client(&matches, &cfg).await?;
    let names = cfg.table_names();

    let (create, init) = match matches.subcommand_name() {
        Some("create-table") => (true, false),
        Some("init-blog") => (false, true),
        Some("setup") => (true, true),
        Some("drop-table") => {
            return drop_schema(client.sdk(), &names).await.context(SchemaSnafu);
        }
        _ => return NoSubCommandSnafu.fail(),
    };
    if create {
        create_schema(client.sdk(), &names)
            .await
            .context(SchemaSnafu)?;
    }
    if init {
        Blog::new(Arc::new(client), cfg.transaction_limit())
            .init_blog()
            .await
            .context(InitBlogSnafu)?;
    }
    Ok(())
}
