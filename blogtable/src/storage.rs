// Copyright (C) 2024-2025 Michael Herstine <sp1ff@pobox.com>
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

//! # storage
//!
//! Abstractions for the blogtable storage layer.
//!
//! Everything blogtable persists lives in a single table with a composite primary key
//! ([PARTITION_KEY], [SORT_KEY]) and two global secondary indexes ([Index::Index1] &
//! [Index::Index2]). [Store] is the contract the rest of the crate programs against; there is a
//! DynamoDB implementation in [dynamodb] and an in-memory implementation in [memory].
//!
//! [dynamodb]: crate::dynamodb
//! [memory]: crate::memory

use std::fmt::Display;

use async_trait::async_trait;
use itertools::Itertools;
use snafu::{Backtrace, IntoError, Snafu};

use crate::attr::{Item, Value};

/// Name of the partition key attribute of the table proper
pub const PARTITION_KEY: &str = "PartitionKey";
/// Name of the sort key attribute of the table proper
pub const SORT_KEY: &str = "SortKey";
pub const INDEX1_PARTITION_KEY: &str = "Index1PartitionKey";
pub const INDEX1_SORT_KEY: &str = "Index1SortKey";
pub const INDEX2_PARTITION_KEY: &str = "Index2PartitionKey";
pub const INDEX2_SORT_KEY: &str = "Index2SortKey";
/// Every item names its entity kind in this attribute
pub const TYPE: &str = "Type";

/// The maximum number of operations DynamoDB will accept in a single `TransactWriteItems`
/// request
pub const TRANSACTION_LIMIT: usize = 25;

/// The cancellation code reported for an operation whose condition didn't hold
pub const CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailed";

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Generic variant implementations can use for failures not otherwise classified
    #[snafu(display("{source}"))]
    Backend {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        backtrace: Backtrace,
    },
    #[snafu(display("The condition on {key} did not hold"))]
    ConditionFailed { key: Key, backtrace: Backtrace },
    #[snafu(display("Stored item {key} couldn't be read: {source}"))]
    Decode {
        key: String,
        source: crate::attr::Error,
    },
    #[snafu(display("Table (or index) {table} was not found"))]
    TableNotFound { table: String, backtrace: Backtrace },
    #[snafu(display("{count} operations were submitted in one transaction; the limit is {limit}"))]
    TooManyOperations {
        count: usize,
        limit: usize,
        backtrace: Backtrace,
    },
    #[snafu(display("The transaction was cancelled: {}", describe(reasons)))]
    TransactionCancelled {
        reasons: Vec<CancellationReason>,
        backtrace: Backtrace,
    },
}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        BackendSnafu.into_error(Box::new(err))
    }
    /// True if this error reports a failed precondition, whether on a single-item operation or on
    /// any member of a transaction
    pub fn is_condition_failure(&self) -> bool {
        match self {
            Error::ConditionFailed { .. } => true,
            Error::TransactionCancelled { reasons, .. } => {
                reasons.iter().any(CancellationReason::condition_failed)
            }
            _ => false,
        }
    }
}

fn describe(reasons: &[CancellationReason]) -> String {
    reasons
        .iter()
        .filter(|r| r.failed())
        .map(|r| format!("{}", r))
        .join(", ")
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Key                                               //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A primary (or secondary-index) key: partition key plus sort key
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Key {
    pub partition: String,
    pub sort: String,
}

impl Key {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Key {
        Key {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
    /// Render this as the key attributes of the table proper
    pub fn to_item(&self) -> Item {
        Item::from([
            (PARTITION_KEY.to_owned(), Value::from(self.partition.as_str())),
            (SORT_KEY.to_owned(), Value::from(self.sort.as_str())),
        ])
    }
    /// Pull the primary key out of a full item
    pub fn of(item: &Item) -> Option<Key> {
        match (
            item.get(PARTITION_KEY).and_then(Value::as_str),
            item.get(SORT_KEY).and_then(Value::as_str),
        ) {
            (Some(pk), Some(sk)) => Some(Key::new(pk, sk)),
            _ => None,
        }
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.partition, self.sort)
    }
}

/// The table proper, or one of its two global secondary indexes
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Index {
    Primary,
    Index1,
    Index2,
}

impl Index {
    pub fn partition_attr(&self) -> &'static str {
        match self {
            Index::Primary => PARTITION_KEY,
            Index::Index1 => INDEX1_PARTITION_KEY,
            Index::Index2 => INDEX2_PARTITION_KEY,
        }
    }
    pub fn sort_attr(&self) -> &'static str {
        match self {
            Index::Primary => SORT_KEY,
            Index::Index1 => INDEX1_SORT_KEY,
            Index::Index2 => INDEX2_SORT_KEY,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                   conditions, updates & ops                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Preconditions a write may carry
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// The item must currently exist
    Exists,
    /// The item must not currently exist
    NotExists,
    /// The item must exist, and each named attribute must currently hold the given value
    Unchanged(Vec<(String, Value)>),
}

/// An update expression: assignments, assignments that only take if the attribute is absent, and
/// atomic numeric deltas
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Update {
    pub set: Vec<(String, Value)>,
    pub set_if_absent: Vec<(String, Value)>,
    pub add: Vec<(String, i64)>,
}

impl Update {
    pub fn new() -> Update {
        Update::default()
    }
    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Update {
        self.set.push((name.to_owned(), value.into()));
        self
    }
    pub fn set_if_absent(mut self, name: &str, value: impl Into<Value>) -> Update {
        self.set_if_absent.push((name.to_owned(), value.into()));
        self
    }
    /// Add `delta` to a numeric attribute; a missing attribute is treated as zero
    pub fn add(mut self, name: &str, delta: i64) -> Update {
        self.add.push((name.to_owned(), delta));
        self
    }
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.set_if_absent.is_empty() && self.add.is_empty()
    }
}

/// One member of a transaction
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    Put {
        item: Item,
        condition: Option<Condition>,
    },
    Update {
        key: Key,
        update: Update,
        condition: Option<Condition>,
    },
    Delete {
        key: Key,
        condition: Option<Condition>,
    },
    /// Assert a condition on an item without writing it
    Check { key: Key, condition: Condition },
}

impl WriteOp {
    /// The primary key of the item this operation targets
    pub fn key(&self) -> Option<Key> {
        match self {
            WriteOp::Put { item, .. } => Key::of(item),
            WriteOp::Update { key, .. }
            | WriteOp::Delete { key, .. }
            | WriteOp::Check { key, .. } => Some(key.clone()),
        }
    }
    pub fn condition(&self) -> Option<&Condition> {
        match self {
            WriteOp::Put { condition, .. }
            | WriteOp::Update { condition, .. }
            | WriteOp::Delete { condition, .. } => condition.as_ref(),
            WriteOp::Check { condition, .. } => Some(condition),
        }
    }
}

/// Why (or whether) one member of a cancelled transaction failed
///
/// When a transaction is cancelled, the store reports one reason per submitted operation, in
/// submission order; operations that were themselves fine carry the code "None".
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CancellationReason {
    /// Index of the operation within the transaction
    pub index: usize,
    pub code: Option<String>,
    pub message: Option<String>,
}

impl CancellationReason {
    pub fn failed(&self) -> bool {
        !matches!(self.code.as_deref(), None | Some("None"))
    }
    pub fn condition_failed(&self) -> bool {
        self.code.as_deref() == Some(CONDITIONAL_CHECK_FAILED)
    }
}

impl Display for CancellationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "operation #{}: {}",
            self.index,
            self.code.as_deref().unwrap_or("None")
        )?;
        if let Some(message) = &self.message {
            write!(f, " ({})", message)?;
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Store                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[async_trait]
pub trait Store: Send + Sync {
    /// Write a full item, subject to `condition`
    async fn put_item(&self, item: Item, condition: Option<Condition>) -> Result<()>;
    /// Read a single item by primary key; `None` means there's no such item
    async fn get_item(&self, key: &Key) -> Result<Option<Item>>;
    /// Apply `update` to the item at `key` (creating it, if there's no condition & it doesn't
    /// exist); return the item's attributes after the update
    async fn update_item(
        &self,
        key: &Key,
        update: &Update,
        condition: Option<Condition>,
    ) -> Result<Item>;
    /// Delete the item at `key`, subject to `condition`
    async fn delete_item(&self, key: &Key, condition: Option<Condition>) -> Result<()>;
    /// Retrieve every item in `partition` of `index` (optionally restricted to those whose sort
    /// key begins with `prefix`), ordered by sort key
    ///
    /// Implementations are responsible for following pagination to the end.
    async fn query(
        &self,
        index: Index,
        partition: &str,
        prefix: Option<&str>,
        ascending: bool,
    ) -> Result<Vec<Item>>;
    /// Apply all of `ops`, or none of them
    async fn transact_write(&self, ops: Vec<WriteOp>) -> Result<()>;
}
