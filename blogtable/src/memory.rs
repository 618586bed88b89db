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

//! # memory
//!
//! An in-memory [Store](storage::Store), for testing & experimentation.
//!
//! This store honors the same contract as the DynamoDB implementation: conditions are checked
//! before anything is written, transactions are all-or-nothing & capped at
//! [TRANSACTION_LIMIT] operations, and a cancelled transaction reports a reason for every
//! operation submitted. It also offers a little fault injection ([Store::fail_transaction]) and
//! a log of the transactions it's seen ([Store::transactions]).

use std::{
    collections::{BTreeMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use snafu::{prelude::*, Backtrace};
use tracing::debug;

use crate::{
    attr::{Item, Value},
    storage::{
        self, CancellationReason, Condition, ConditionFailedSnafu, Index, Key,
        TooManyOperationsSnafu, TransactionCancelledSnafu, Update, WriteOp,
        CONDITIONAL_CHECK_FAILED, TRANSACTION_LIMIT,
    },
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Attribute {name} on {key} isn't a number, so can't be added to"))]
    NotANumber {
        key: Key,
        name: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Item is missing its primary key"))]
    MissingKey { backtrace: Backtrace },
    #[snafu(display("{key} is the subject of more than one operation in a single transaction"))]
    RepeatedKey { key: Key, backtrace: Backtrace },
}

#[derive(Debug, Default)]
struct State {
    items: BTreeMap<Key, Item>,
    // Sizes of every transaction attempted, in order
    transactions: Vec<usize>,
    // Fail the transaction with this (one-based) ordinal
    fail_at: Option<usize>,
}

/// An in-memory table, with both secondary indexes
#[derive(Debug, Default)]
pub struct Store {
    state: Mutex<State>,
}

fn holds(condition: Option<&Condition>, current: Option<&Item>) -> bool {
    match condition {
        None => true,
        Some(Condition::Exists) => current.is_some(),
        Some(Condition::NotExists) => current.is_none(),
        Some(Condition::Unchanged(expected)) => current
            .map(|item| {
                expected
                    .iter()
                    .all(|(name, value)| item.get(name) == Some(value))
            })
            .unwrap_or(false),
    }
}

fn apply(key: &Key, current: Option<&Item>, update: &Update) -> Result<Item, Error> {
    let mut item = current.cloned().unwrap_or_else(|| key.to_item());
    for (name, value) in &update.set {
        item.insert(name.clone(), value.clone());
    }
    for (name, value) in &update.set_if_absent {
        item.entry(name.clone()).or_insert_with(|| value.clone());
    }
    for (name, delta) in &update.add {
        let now = match item.get(name) {
            None => 0,
            Some(value) => value.as_number::<i64>().context(NotANumberSnafu {
                key: key.clone(),
                name,
            })?,
        };
        item.insert(name.clone(), Value::number(now + delta));
    }
    Ok(item)
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }
    // A panic while holding the lock can't leave the map half-updated (every mutation is a
    // single insert or remove after all checks), so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
    /// Arrange for the `n`th transaction submitted from now on (counting from one) to be cancelled
    pub fn fail_transaction(&self, n: usize) {
        let mut state = self.lock();
        state.fail_at = Some(state.transactions.len() + n);
    }
    /// The number of operations in each transaction submitted so far, whether or not it succeeded
    pub fn transactions(&self) -> Vec<usize> {
        self.lock().transactions.clone()
    }
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
    /// A copy of every item in the table, in primary-key order
    pub fn items(&self) -> Vec<Item> {
        self.lock().items.values().cloned().collect()
    }
}

#[async_trait]
impl storage::Store for Store {
    async fn put_item(&self, item: Item, condition: Option<Condition>) -> storage::Result<()> {
        let key = Key::of(&item)
            .context(MissingKeySnafu)
            .map_err(storage::Error::new)?;
        let mut state = self.lock();
        ensure!(
            holds(condition.as_ref(), state.items.get(&key)),
            ConditionFailedSnafu { key }
        );
        state.items.insert(key, item);
        Ok(())
    }

    async fn get_item(&self, key: &Key) -> storage::Result<Option<Item>> {
        Ok(self.lock().items.get(key).cloned())
    }

    async fn update_item(
        &self,
        key: &Key,
        update: &Update,
        condition: Option<Condition>,
    ) -> storage::Result<Item> {
        let mut state = self.lock();
        let current = state.items.get(key);
        ensure!(
            holds(condition.as_ref(), current),
            ConditionFailedSnafu { key: key.clone() }
        );
        let item = apply(key, current, update).map_err(storage::Error::new)?;
        state.items.insert(key.clone(), item.clone());
        Ok(item)
    }

    async fn delete_item(&self, key: &Key, condition: Option<Condition>) -> storage::Result<()> {
        let mut state = self.lock();
        ensure!(
            holds(condition.as_ref(), state.items.get(key)),
            ConditionFailedSnafu { key: key.clone() }
        );
        state.items.remove(key);
        Ok(())
    }

    async fn query(
        &self,
        index: Index,
        partition: &str,
        prefix: Option<&str>,
        ascending: bool,
    ) -> storage::Result<Vec<Item>> {
        let state = self.lock();
        let mut hits = state
            .items
            .values()
            .filter_map(|item| {
                let pk = item.get(index.partition_attr()).and_then(Value::as_str)?;
                let sk = item.get(index.sort_attr()).and_then(Value::as_str)?;
                (pk == partition && prefix.map(|p| sk.starts_with(p)).unwrap_or(true))
                    .then(|| (sk.to_owned(), item.clone()))
            })
            .collect::<Vec<(String, Item)>>();
        // Byte order, as DynamoDB orders string sort keys
        hits.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
        if !ascending {
            hits.reverse();
        }
        debug!("Query on {:?} {} matched {} items", index, partition, hits.len());
        Ok(hits.into_iter().map(|(_, item)| item).collect())
    }

    async fn transact_write(&self, ops: Vec<WriteOp>) -> storage::Result<()> {
        let mut state = self.lock();
        state.transactions.push(ops.len());
        ensure!(
            ops.len() <= TRANSACTION_LIMIT,
            TooManyOperationsSnafu {
                count: ops.len(),
                limit: TRANSACTION_LIMIT
            }
        );

        let mut seen = HashSet::new();
        let keys = ops
            .iter()
            .map(|op| -> Result<Key, Error> {
                let key = op.key().context(MissingKeySnafu)?;
                ensure!(seen.insert(key.clone()), RepeatedKeySnafu { key: key.clone() });
                Ok(key)
            })
            .collect::<Result<Vec<Key>, Error>>()
            .map_err(storage::Error::new)?;

        if state.fail_at == Some(state.transactions.len()) {
            state.fail_at = None;
            debug!("Failing transaction #{} on request", state.transactions.len());
            return TransactionCancelledSnafu {
                reasons: (0..ops.len())
                    .map(|index| CancellationReason {
                        index,
                        code: Some("TransactionConflict".to_owned()),
                        message: Some("injected failure".to_owned()),
                    })
                    .collect::<Vec<CancellationReason>>(),
            }
            .fail();
        }

        let reasons = ops
            .iter()
            .zip(keys.iter())
            .enumerate()
            .map(|(index, (op, key))| {
                let ok = holds(op.condition(), state.items.get(key));
                CancellationReason {
                    index,
                    code: Some(if ok { "None" } else { CONDITIONAL_CHECK_FAILED }.to_owned()),
                    message: (!ok).then(|| "The conditional request failed".to_owned()),
                }
            })
            .collect::<Vec<CancellationReason>>();
        ensure!(
            reasons.iter().all(|r| !r.failed()),
            TransactionCancelledSnafu { reasons }
        );

        // Compute every new item before writing any
        let mut writes = Vec::with_capacity(ops.len());
        for (op, key) in ops.into_iter().zip(keys.into_iter()) {
            match op {
                WriteOp::Put { item, .. } => writes.push((key, Some(item))),
                WriteOp::Update { update, .. } => {
                    let item =
                        apply(&key, state.items.get(&key), &update).map_err(storage::Error::new)?;
                    writes.push((key, Some(item)));
                }
                WriteOp::Delete { .. } => writes.push((key, None)),
                WriteOp::Check { .. } => (),
            }
        }
        for (key, item) in writes {
            match item {
                Some(item) => state.items.insert(key, item),
                None => state.items.remove(&key),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{attr::ItemExt, storage::Store as _};

    fn item(pk: &str, sk: &str, i1: Option<(&str, &str)>) -> Item {
        let mut item = Key::new(pk, sk).to_item();
        if let Some((p, s)) = i1 {
            item.insert(storage::INDEX1_PARTITION_KEY.to_owned(), p.into());
            item.insert(storage::INDEX1_SORT_KEY.to_owned(), s.into());
        }
        item
    }

    #[tokio::test]
    async fn conditions() {
        let store = Store::new();
        let key = Key::new("A", "#A");
        store
            .put_item(key.to_item(), Some(Condition::NotExists))
            .await
            .unwrap();
        assert!(store
            .put_item(key.to_item(), Some(Condition::NotExists))
            .await
            .unwrap_err()
            .is_condition_failure());

        let update = Update::new().add("N", 2).set_if_absent("S", "x");
        let after = store
            .update_item(&key, &update, Some(Condition::Exists))
            .await
            .unwrap();
        assert_eq!(after.number::<i64>("N").unwrap(), 2);
        let after = store
            .update_item(
                &key,
                &Update::new().add("N", -5).set_if_absent("S", "y"),
                Some(Condition::Unchanged(vec![("N".to_owned(), Value::number(2))])),
            )
            .await
            .unwrap();
        assert_eq!(after.number::<i64>("N").unwrap(), -3);
        assert_eq!(after.string("S").unwrap(), "x");

        // Stale expectation
        assert!(store
            .update_item(
                &key,
                &Update::new().add("N", 1),
                Some(Condition::Unchanged(vec![("N".to_owned(), Value::number(2))])),
            )
            .await
            .is_err());

        // An unconditional update creates the item
        let other = Key::new("B", "#B");
        store
            .update_item(&other, &Update::new().add("N", 1), None)
            .await
            .unwrap();
        assert!(store.get_item(&other).await.unwrap().is_some());

        store
            .delete_item(&key, Some(Condition::Exists))
            .await
            .unwrap();
        assert!(store
            .delete_item(&key, Some(Condition::Exists))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn queries() {
        let store = Store::new();
        for (pk, sk, i1) in [
            ("1", "a", ("P", "#COMMENT#2")),
            ("2", "a", ("P", "#COMMENT#1")),
            ("3", "a", ("P", "#POST")),
            ("4", "a", ("Q", "#COMMENT#0")),
        ] {
            store.put_item(item(pk, sk, Some(i1)), None).await.unwrap();
        }
        store.put_item(item("5", "a", None), None).await.unwrap();

        let sks = |items: Vec<Item>| {
            items
                .iter()
                .map(|i| i.string(storage::INDEX1_SORT_KEY).unwrap().to_owned())
                .collect::<Vec<String>>()
        };
        assert_eq!(
            sks(store.query(Index::Index1, "P", None, true).await.unwrap()),
            vec!["#COMMENT#1", "#COMMENT#2", "#POST"]
        );
        assert_eq!(
            sks(store.query(Index::Index1, "P", Some("#COMMENT#"), false).await.unwrap()),
            vec!["#COMMENT#2", "#COMMENT#1"]
        );
        assert_eq!(store.query(Index::Primary, "5", None, true).await.unwrap().len(), 1);
        assert!(store.query(Index::Index2, "P", None, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transactions() {
        let store = Store::new();
        let a = Key::new("A", "#A");
        let b = Key::new("B", "#B");
        store.put_item(a.to_item(), None).await.unwrap();

        // The second op's condition fails, so the first mustn't take
        let err = store
            .transact_write(vec![
                WriteOp::Update {
                    key: a.clone(),
                    update: Update::new().add("N", 1),
                    condition: Some(Condition::Exists),
                },
                WriteOp::Delete {
                    key: b.clone(),
                    condition: Some(Condition::Exists),
                },
            ])
            .await
            .unwrap_err();
        match err {
            storage::Error::TransactionCancelled { reasons, .. } => {
                assert_eq!(reasons.len(), 2);
                assert!(!reasons[0].failed());
                assert!(reasons[1].condition_failed());
            }
            err => panic!("Expected a cancellation; got {err:?}"),
        }
        assert!(!store.get_item(&a).await.unwrap().unwrap().contains_key("N"));

        store
            .transact_write(vec![
                WriteOp::Check {
                    key: a.clone(),
                    condition: Condition::Exists,
                },
                WriteOp::Put {
                    item: b.to_item(),
                    condition: Some(Condition::NotExists),
                },
            ])
            .await
            .unwrap();
        assert!(store.get_item(&b).await.unwrap().is_some());

        // Too big
        let ops = (0..26)
            .map(|i| WriteOp::Put {
                item: Key::new(format!("{i}"), "x").to_item(),
                condition: None,
            })
            .collect::<Vec<WriteOp>>();
        assert!(matches!(
            store.transact_write(ops).await,
            Err(storage::Error::TooManyOperations { count: 26, .. })
        ));

        // Same key twice
        assert!(store
            .transact_write(vec![
                WriteOp::Delete {
                    key: a.clone(),
                    condition: None
                },
                WriteOp::Delete {
                    key: a.clone(),
                    condition: None
                },
            ])
            .await
            .is_err());

        store.fail_transaction(1);
        assert!(store
            .transact_write(vec![WriteOp::Delete {
                key: a.clone(),
                condition: None
            }])
            .await
            .is_err());
        assert!(store.get_item(&a).await.unwrap().is_some());
        assert_eq!(store.transactions(), vec![2, 2, 26, 2, 1]);
    }
}
