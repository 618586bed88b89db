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

//! # blogtable configuration
//!
//! A versioned TOML document:
//!
//! ```toml
//! version = "1"
//! table-name = "blog"
//! index1-name = "Index1"
//! index2-name = "Index2"
//! transaction-limit = 25
//! # Either a region...
//! location = "us-west-2"
//! # ...or one or more endpoints:
//! # location = ["http://localhost:8043"]
//! credentials = ["key-id", "secret-key"]
//! ```
//!
//! Every key but `version` may be omitted.

use std::path::{Path, PathBuf};

use either::Either;
use secrecy::SecretString;
use serde::Deserialize;
use snafu::{Backtrace, ResultExt, Snafu};
use url::Url;

use crate::{dynamodb::TableNames, storage::TRANSACTION_LIMIT};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to parse configuration file {}: {source}", pth.display()))]
    Parse {
        pth: PathBuf,
        source: toml::de::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to read configuration file {}: {source}", pth.display()))]
    Read {
        pth: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to parse configuration text: {source}"))]
    Text {
        source: toml::de::Error,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// blogtable configuration, version one
// Deserialize only, since the credentials are secret.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConfigV1 {
    table_name: String,
    index1_name: String,
    index2_name: String,
    /// Upper bound on the number of operations in a single write transaction; DynamoDB caps this
    /// at 25 for non-idempotent transactions
    transaction_limit: usize,
    /// Either an AWS region or the endpoints of a DynamoDB-compatible service (like ScyllaDB with
    /// the Alternator interface)
    #[serde(with = "either::serde_untagged")]
    location: Either<String, Vec<Url>>,
    /// Key ID & secret key
    credentials: Option<(SecretString, SecretString)>,
}

impl Default for ConfigV1 {
    fn default() -> Self {
        let names = TableNames::default();
        ConfigV1 {
            table_name: names.table,
            index1_name: names.index1,
            index2_name: names.index2,
            transaction_limit: TRANSACTION_LIMIT,
            location: Either::Left("us-west-2".to_owned()),
            credentials: None,
        }
    }
}

impl ConfigV1 {
    pub fn table_names(&self) -> TableNames {
        TableNames {
            table: self.table_name.clone(),
            index1: self.index1_name.clone(),
            index2: self.index2_name.clone(),
        }
    }
    /// The configured transaction limit, clamped to what the store will accept
    pub fn transaction_limit(&self) -> usize {
        self.transaction_limit.clamp(1, TRANSACTION_LIMIT)
    }
    pub fn location(&self) -> &Either<String, Vec<Url>> {
        &self.location
    }
    pub fn credentials(&self) -> &Option<(SecretString, SecretString)> {
        &self.credentials
    }
}

#[derive(Deserialize)]
#[serde(tag = "version")]
enum Configuration {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

impl std::str::FromStr for ConfigV1 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match toml::from_str::<Configuration>(s).context(TextSnafu)? {
            Configuration::V1(cfg) => Ok(cfg),
        }
    }
}

/// Read the configuration at `pth`; if `pth` is None, fall back to the defaults
pub fn parse_config(pth: Option<&Path>) -> Result<ConfigV1> {
    match pth {
        Some(pth) => {
            let text = std::fs::read_to_string(pth).context(ReadSnafu { pth })?;
            match toml::from_str::<Configuration>(&text).context(ParseSnafu { pth })? {
                Configuration::V1(cfg) => Ok(cfg),
            }
        }
        None => Ok(ConfigV1::default()),
    }
}

#[cfg(test)]
mod test {

    use super::*;

    use secrecy::ExposeSecret;

    #[test]
    fn defaults() {
        let cfg = "version = \"1\"".parse::<ConfigV1>().unwrap();
        assert_eq!(cfg.table_names(), TableNames::default());
        assert_eq!(cfg.transaction_limit(), 25);
        assert_eq!(cfg.location(), &Either::Left("us-west-2".to_owned()));
        assert!(cfg.credentials().is_none());
    }

    #[test]
    fn full() {
        let cfg = r#"
version = "1"
table-name = "forum"
index1-name = "ByPost"
index2-name = "ByDate"
transaction-limit = 10
location = ["http://localhost:8043", "http://localhost:8044"]
credentials = ["AKID", "sekrit"]
"#
        .parse::<ConfigV1>()
        .unwrap();
        assert_eq!(
            cfg.table_names(),
            TableNames {
                table: "forum".to_owned(),
                index1: "ByPost".to_owned(),
                index2: "ByDate".to_owned(),
            }
        );
        assert_eq!(cfg.transaction_limit(), 10);
        assert_eq!(
            cfg.location().as_ref().right().map(|urls| urls.len()),
            Some(2)
        );
        let (id, secret) = cfg.credentials().as_ref().unwrap();
        assert_eq!(id.expose_secret(), "AKID");
        assert_eq!(secret.expose_secret(), "sekrit");
    }

    #[test]
    fn limits_and_versions() {
        let cfg = "version = \"1\"\ntransaction-limit = 100\nlocation = \"eu-west-1\""
            .parse::<ConfigV1>()
            .unwrap();
        assert_eq!(cfg.transaction_limit(), 25);
        assert_eq!(cfg.location(), &Either::Left("eu-west-1".to_owned()));

        assert!("version = \"2\"".parse::<ConfigV1>().is_err());
        assert!("table-name = \"blog\"".parse::<ConfigV1>().is_err());
        assert!(parse_config(None).is_ok());
        assert!(matches!(
            parse_config(Some(Path::new("/no/such/blogtable.toml"))),
            Err(Error::Read { .. })
        ));
    }
}
