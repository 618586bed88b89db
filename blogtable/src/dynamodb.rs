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
//! [Store] implementation for DynamoDB (or anything speaking its API, such as ScyllaDB's
//! Alternator).
//!
//! [Store]: crate::storage::Store

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, Region};
use aws_sdk_dynamodb::{
    config::{http::HttpResponse, Credentials},
    error::SdkError,
    operation::{
        delete_item::DeleteItemError, get_item::GetItemError, put_item::PutItemError,
        query::QueryError, transact_write_items::TransactWriteItemsError,
        update_item::UpdateItemError,
    },
    types::{
        AttributeValue, ConditionCheck, Delete, Put, ReturnValue, TransactWriteItem,
        Update as DdbUpdate,
    },
};
use either::Either;
use itertools::Itertools;
use secrecy::SecretString;
use snafu::{prelude::*, Backtrace};
use tap::Pipe;
use tracing::debug;
use url::Url;

use crate::{
    attr::{Item, Value},
    storage::{
        self, CancellationReason, Condition, ConditionFailedSnafu, Index, Key,
        TableNotFoundSnafu, TooManyOperationsSnafu, TransactionCancelledSnafu, Update, WriteOp,
        PARTITION_KEY, TRANSACTION_LIMIT,
    },
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to build a {what} request: {source}"))]
    Build {
        what: &'static str,
        source: aws_sdk_dynamodb::error::BuildError,
        backtrace: Backtrace,
    },
    #[snafu(display("An update must assign or add at least one attribute"))]
    EmptyUpdate { backtrace: Backtrace },
    #[snafu(display("No endpoint URLs specified"))]
    NoEndpoints { backtrace: Backtrace },
    #[snafu(display("Attribute {name} has a type blogtable doesn't use"))]
    UnsupportedAttribute { name: String, backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

/// The names of the table & its two global secondary indexes
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableNames {
    pub table: String,
    pub index1: String,
    pub index2: String,
}

impl Default for TableNames {
    fn default() -> Self {
        TableNames {
            table: "blog".to_owned(),
            index1: "Index1".to_owned(),
            index2: "Index2".to_owned(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         value codec                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

pub fn to_attribute_value(value: &Value) -> AttributeValue {
    match value {
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Number(n) => AttributeValue::N(n.clone()),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Null => AttributeValue::Null(true),
        Value::StringSet(ss) => AttributeValue::Ss(ss.iter().cloned().collect()),
        Value::NumberSet(ns) => AttributeValue::Ns(ns.iter().cloned().collect()),
        Value::List(l) => AttributeValue::L(l.iter().map(to_attribute_value).collect()),
        Value::Map(m) => AttributeValue::M(to_attribute_map(m)),
    }
}

pub fn to_attribute_map(item: &Item) -> HashMap<String, AttributeValue> {
    item.iter()
        .map(|(name, value)| (name.clone(), to_attribute_value(value)))
        .collect()
}

/// `name` is only used for error reporting
pub fn from_attribute_value(name: &str, value: &AttributeValue) -> Result<Value> {
    Ok(match value {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => Value::Number(n.clone()),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Ss(ss) => Value::StringSet(ss.iter().cloned().collect()),
        AttributeValue::Ns(ns) => Value::NumberSet(ns.iter().cloned().collect()),
        AttributeValue::L(l) => l
            .iter()
            .map(|v| from_attribute_value(name, v))
            .collect::<Result<Vec<Value>>>()?
            .pipe(Value::List),
        AttributeValue::M(m) => Value::Map(from_attribute_map(m)?),
        // Binary values, & whatever the SDK adds next
        _ => return UnsupportedAttributeSnafu { name }.fail(),
    })
}

pub fn from_attribute_map(map: &HashMap<String, AttributeValue>) -> Result<Item> {
    map.iter()
        .map(|(name, value)| Ok((name.clone(), from_attribute_value(name, value)?)))
        .collect()
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          expressions                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Accumulates the attribute-name & -value placeholders for one request
#[derive(Debug, Default)]
struct Placeholders {
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

impl Placeholders {
    fn name(&mut self, name: &str) -> String {
        let placeholder = format!("#n{}", self.names.len());
        self.names.insert(placeholder.clone(), name.to_owned());
        placeholder
    }
    fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), value);
        placeholder
    }
    // DynamoDB rejects empty placeholder maps
    fn names(&self) -> Option<HashMap<String, String>> {
        (!self.names.is_empty()).then(|| self.names.clone())
    }
    fn values(&self) -> Option<HashMap<String, AttributeValue>> {
        (!self.values.is_empty()).then(|| self.values.clone())
    }
}

fn condition_expression(condition: &Condition, ph: &mut Placeholders) -> String {
    let pk = ph.name(PARTITION_KEY);
    match condition {
        Condition::Exists => format!("attribute_exists({})", pk),
        Condition::NotExists => format!("attribute_not_exists({})", pk),
        Condition::Unchanged(expected) => std::iter::once(format!("attribute_exists({})", pk))
            .chain(expected.iter().map(|(name, value)| {
                let n = ph.name(name);
                format!("{} = {}", n, ph.value(to_attribute_value(value)))
            }))
            .join(" AND "),
    }
}

fn update_expression(update: &Update, ph: &mut Placeholders) -> Result<String> {
    ensure!(!update.is_empty(), EmptyUpdateSnafu);
    let mut sets = Vec::new();
    for (name, value) in &update.set {
        let n = ph.name(name);
        sets.push(format!("{} = {}", n, ph.value(to_attribute_value(value))));
    }
    for (name, value) in &update.set_if_absent {
        let n = ph.name(name);
        let v = ph.value(to_attribute_value(value));
        sets.push(format!("{} = if_not_exists({}, {})", n, n, v));
    }
    let mut adds = Vec::new();
    for (name, delta) in &update.add {
        let n = ph.name(name);
        adds.push(format!("{} {}", n, ph.value(AttributeValue::N(delta.to_string()))));
    }
    let mut clauses = Vec::new();
    if !sets.is_empty() {
        clauses.push(format!("SET {}", sets.join(", ")));
    }
    if !adds.is_empty() {
        clauses.push(format!("ADD {}", adds.join(", ")));
    }
    Ok(clauses.join(" "))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         error mapping                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The service errors we distinguish, across operations
trait ServiceErrorKind {
    fn condition_failed(&self) -> bool;
    fn not_found(&self) -> bool;
}

macro_rules! service_error_kind {
    ($ty:ident) => {
        impl ServiceErrorKind for $ty {
            fn condition_failed(&self) -> bool {
                false
            }
            fn not_found(&self) -> bool {
                matches!(self, $ty::ResourceNotFoundException(_))
            }
        }
    };
    ($ty:ident, $ccf:ident) => {
        impl ServiceErrorKind for $ty {
            fn condition_failed(&self) -> bool {
                matches!(self, $ty::$ccf(_))
            }
            fn not_found(&self) -> bool {
                matches!(self, $ty::ResourceNotFoundException(_))
            }
        }
    };
}

service_error_kind!(PutItemError, ConditionalCheckFailedException);
service_error_kind!(UpdateItemError, ConditionalCheckFailedException);
service_error_kind!(DeleteItemError, ConditionalCheckFailedException);
service_error_kind!(GetItemError);
service_error_kind!(QueryError);

fn map_sdk_error<E>(
    err: SdkError<E, HttpResponse>,
    table: &str,
    key: Option<&Key>,
) -> storage::Error
where
    E: ServiceErrorKind + std::error::Error + Send + Sync + 'static,
{
    let classified = match err.as_service_error() {
        Some(e) if e.condition_failed() => {
            key.map(|key| ConditionFailedSnafu { key: key.clone() }.build())
        }
        Some(e) if e.not_found() => Some(TableNotFoundSnafu { table }.build()),
        _ => None,
    };
    classified.unwrap_or_else(|| storage::Error::new(err))
}

fn map_transaction_error(
    err: SdkError<TransactWriteItemsError, HttpResponse>,
    table: &str,
) -> storage::Error {
    let classified = match err.as_service_error() {
        Some(TransactWriteItemsError::TransactionCanceledException(e)) => Some(
            TransactionCancelledSnafu {
                reasons: e
                    .cancellation_reasons()
                    .iter()
                    .enumerate()
                    .map(|(index, reason)| CancellationReason {
                        index,
                        code: reason.code().map(str::to_owned),
                        message: reason.message().map(str::to_owned),
                    })
                    .collect::<Vec<CancellationReason>>(),
            }
            .build(),
        ),
        Some(TransactWriteItemsError::ResourceNotFoundException(_)) => {
            Some(TableNotFoundSnafu { table }.build())
        }
        _ => None,
    };
    classified.unwrap_or_else(|| storage::Error::new(err))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Client                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

pub struct Client {
    client: ::aws_sdk_dynamodb::Client,
    names: TableNames,
}

impl Client {
    pub async fn new(
        location: &Either<String, Vec<Url>>,
        credentials: &Option<(SecretString, SecretString)>,
        names: &TableNames,
    ) -> Result<Client> {
        use secrecy::ExposeSecret;
        let creds = credentials.as_ref().map(|(id, secret)| {
            Credentials::new(
                id.expose_secret(),
                secret.expose_secret(),
                None,
                None,
                "blogtable",
            )
        });

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        match location {
            Either::Left(region) => {
                let region_provider =
                    RegionProviderChain::first_try(Some(Region::new(region.clone())))
                        .or_default_provider()
                        .or_else(Region::new("us-west-2"));
                loader = loader.region(region_provider);
            }
            Either::Right(endpoints) => {
                let ep_url = endpoints.first().context(NoEndpointsSnafu)?;
                // Alternator doesn't care about the region, but the SDK insists on one
                loader = loader
                    .endpoint_url(ep_url.as_str())
                    .region(Region::new("us-west-2"));
            }
        }
        if let Some(creds) = creds {
            loader = loader.credentials_provider(creds);
        }
        let config = loader.load().await;
        Ok(Client::from_sdk(
            ::aws_sdk_dynamodb::Client::new(&config),
            names,
        ))
    }
    pub fn from_sdk(client: ::aws_sdk_dynamodb::Client, names: &TableNames) -> Client {
        Client {
            client,
            names: names.clone(),
        }
    }
    pub fn sdk(&self) -> &::aws_sdk_dynamodb::Client {
        &self.client
    }
    fn index_name(&self, index: Index) -> Option<String> {
        match index {
            Index::Primary => None,
            Index::Index1 => Some(self.names.index1.clone()),
            Index::Index2 => Some(self.names.index2.clone()),
        }
    }
    fn transact_item(&self, op: WriteOp) -> Result<TransactWriteItem> {
        let table = self.names.table.as_str();
        let mut ph = Placeholders::default();
        Ok(match op {
            WriteOp::Put { item, condition } => {
                let cond = condition.map(|c| condition_expression(&c, &mut ph));
                TransactWriteItem::builder()
                    .put(
                        Put::builder()
                            .table_name(table)
                            .set_item(Some(to_attribute_map(&item)))
                            .set_condition_expression(cond)
                            .set_expression_attribute_names(ph.names())
                            .set_expression_attribute_values(ph.values())
                            .build()
                            .context(BuildSnafu { what: "Put" })?,
                    )
                    .build()
            }
            WriteOp::Update {
                key,
                update,
                condition,
            } => {
                let expr = update_expression(&update, &mut ph)?;
                let cond = condition.map(|c| condition_expression(&c, &mut ph));
                TransactWriteItem::builder()
                    .update(
                        DdbUpdate::builder()
                            .table_name(table)
                            .set_key(Some(to_attribute_map(&key.to_item())))
                            .update_expression(expr)
                            .set_condition_expression(cond)
                            .set_expression_attribute_names(ph.names())
                            .set_expression_attribute_values(ph.values())
                            .build()
                            .context(BuildSnafu { what: "Update" })?,
                    )
                    .build()
            }
            WriteOp::Delete { key, condition } => {
                let cond = condition.map(|c| condition_expression(&c, &mut ph));
                TransactWriteItem::builder()
                    .delete(
                        Delete::builder()
                            .table_name(table)
                            .set_key(Some(to_attribute_map(&key.to_item())))
                            .set_condition_expression(cond)
                            .set_expression_attribute_names(ph.names())
                            .set_expression_attribute_values(ph.values())
                            .build()
                            .context(BuildSnafu { what: "Delete" })?,
                    )
                    .build()
            }
            WriteOp::Check { key, condition } => {
                let cond = condition_expression(&condition, &mut ph);
                TransactWriteItem::builder()
                    .condition_check(
                        ConditionCheck::builder()
                            .table_name(table)
                            .set_key(Some(to_attribute_map(&key.to_item())))
                            .condition_expression(cond)
                            .set_expression_attribute_names(ph.names())
                            .set_expression_attribute_values(ph.values())
                            .build()
                            .context(BuildSnafu {
                                what: "ConditionCheck",
                            })?,
                    )
                    .build()
            }
        })
    }
}

#[async_trait]
impl storage::Store for Client {
    async fn put_item(&self, item: Item, condition: Option<Condition>) -> storage::Result<()> {
        let mut ph = Placeholders::default();
        let cond = condition.map(|c| condition_expression(&c, &mut ph));
        let key = Key::of(&item);
        self.client
            .put_item()
            .table_name(&self.names.table)
            .set_item(Some(to_attribute_map(&item)))
            .set_condition_expression(cond)
            .set_expression_attribute_names(ph.names())
            .set_expression_attribute_values(ph.values())
            .send()
            .await
            .map_err(|err| map_sdk_error(err, &self.names.table, key.as_ref()))?;
        Ok(())
    }

    async fn get_item(&self, key: &Key) -> storage::Result<Option<Item>> {
        let out = self
            .client
            .get_item()
            .table_name(&self.names.table)
            .set_key(Some(to_attribute_map(&key.to_item())))
            .consistent_read(true)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, &self.names.table, Some(key)))?;
        out.item
            .map(|item| from_attribute_map(&item))
            .transpose()
            .map_err(storage::Error::new)
    }

    async fn update_item(
        &self,
        key: &Key,
        update: &Update,
        condition: Option<Condition>,
    ) -> storage::Result<Item> {
        let mut ph = Placeholders::default();
        let expr = update_expression(update, &mut ph).map_err(storage::Error::new)?;
        let cond = condition.map(|c| condition_expression(&c, &mut ph));
        let out = self
            .client
            .update_item()
            .table_name(&self.names.table)
            .set_key(Some(to_attribute_map(&key.to_item())))
            .update_expression(expr)
            .set_condition_expression(cond)
            .set_expression_attribute_names(ph.names())
            .set_expression_attribute_values(ph.values())
            .return_values(ReturnValue::AllNew)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, &self.names.table, Some(key)))?;
        out.attributes
            .map(|attrs| from_attribute_map(&attrs))
            .transpose()
            .map_err(storage::Error::new)?
            .unwrap_or_else(|| key.to_item())
            .pipe(Ok)
    }

    async fn delete_item(&self, key: &Key, condition: Option<Condition>) -> storage::Result<()> {
        let mut ph = Placeholders::default();
        let cond = condition.map(|c| condition_expression(&c, &mut ph));
        self.client
            .delete_item()
            .table_name(&self.names.table)
            .set_key(Some(to_attribute_map(&key.to_item())))
            .set_condition_expression(cond)
            .set_expression_attribute_names(ph.names())
            .set_expression_attribute_values(ph.values())
            .send()
            .await
            .map_err(|err| map_sdk_error(err, &self.names.table, Some(key)))?;
        Ok(())
    }

    async fn query(
        &self,
        index: Index,
        partition: &str,
        prefix: Option<&str>,
        ascending: bool,
    ) -> storage::Result<Vec<Item>> {
        let mut ph = Placeholders::default();
        let pk = ph.name(index.partition_attr());
        let pv = ph.value(AttributeValue::S(partition.to_owned()));
        let mut key_condition = format!("{} = {}", pk, pv);
        if let Some(prefix) = prefix {
            let sk = ph.name(index.sort_attr());
            let sv = ph.value(AttributeValue::S(prefix.to_owned()));
            key_condition = format!("{} AND begins_with({}, {})", key_condition, sk, sv);
        }

        let mut items = Vec::new();
        let mut last_evaluated_key = None;
        loop {
            let out = self
                .client
                .query()
                .table_name(&self.names.table)
                .set_index_name(self.index_name(index))
                .key_condition_expression(&key_condition)
                .set_expression_attribute_names(ph.names())
                .set_expression_attribute_values(ph.values())
                .scan_index_forward(ascending)
                .set_exclusive_start_key(last_evaluated_key.take())
                .send()
                .await
                .map_err(|err| map_sdk_error(err, &self.names.table, None))?;
            for item in out.items() {
                items.push(from_attribute_map(item).map_err(storage::Error::new)?);
            }
            match out.last_evaluated_key {
                Some(key) if !key.is_empty() => last_evaluated_key = Some(key),
                _ => break,
            }
        }
        debug!(
            "Query on {:?} {} (prefix {:?}) returned {} items",
            index,
            partition,
            prefix,
            items.len()
        );
        Ok(items)
    }

    async fn transact_write(&self, ops: Vec<WriteOp>) -> storage::Result<()> {
        ensure!(
            ops.len() <= TRANSACTION_LIMIT,
            TooManyOperationsSnafu {
                count: ops.len(),
                limit: TRANSACTION_LIMIT
            }
        );
        let count = ops.len();
        let items = ops
            .into_iter()
            .map(|op| self.transact_item(op))
            .collect::<Result<Vec<TransactWriteItem>>>()
            .map_err(storage::Error::new)?;
        self.client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
            .map_err(|err| map_transaction_error(err, &self.names.table))?;
        debug!("Committed a transaction of {} operations", count);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::collections::BTreeSet;

    #[test]
    fn codec() {
        let item = Item::from([
            ("S".to_owned(), Value::from("text")),
            ("N".to_owned(), Value::number(-12)),
            ("B".to_owned(), Value::Bool(true)),
            ("Z".to_owned(), Value::Null),
            (
                "SS".to_owned(),
                Value::StringSet(BTreeSet::from(["a".to_owned(), "b".to_owned()])),
            ),
            (
                "L".to_owned(),
                Value::List(vec![Value::from("x"), Value::number(1)]),
            ),
            (
                "M".to_owned(),
                Value::Map(HashMap::from([("k".to_owned(), Value::from("v"))])),
            ),
        ]);
        let map = to_attribute_map(&item);
        assert_eq!(map["N"], AttributeValue::N("-12".to_owned()));
        assert_eq!(map["Z"], AttributeValue::Null(true));
        assert_eq!(from_attribute_map(&map).unwrap(), item);

        let binary = HashMap::from([(
            "Bin".to_owned(),
            AttributeValue::B(aws_sdk_dynamodb::primitives::Blob::new(vec![1u8])),
        )]);
        assert!(matches!(
            from_attribute_map(&binary),
            Err(Error::UnsupportedAttribute { .. })
        ));
    }

    #[test]
    fn expressions() {
        let mut ph = Placeholders::default();
        assert_eq!(
            condition_expression(&Condition::NotExists, &mut ph),
            "attribute_not_exists(#n0)"
        );
        assert_eq!(ph.names().unwrap()["#n0"], PARTITION_KEY);
        assert!(ph.values().is_none());

        let mut ph = Placeholders::default();
        let expr = update_expression(
            &Update::new()
                .set("Text", "hi")
                .set_if_absent("DateAdded", "now")
                .add("NumberVotes", -1)
                .add("Vote", 1),
            &mut ph,
        )
        .unwrap();
        assert_eq!(
            expr,
            "SET #n0 = :v0, #n1 = if_not_exists(#n1, :v1) ADD #n2 :v2, #n3 :v3"
        );
        assert_eq!(ph.values().unwrap()[":v2"], AttributeValue::N("-1".to_owned()));
        let cond = condition_expression(
            &Condition::Unchanged(vec![("NumberUsers".to_owned(), Value::number(3))]),
            &mut ph,
        );
        assert_eq!(cond, "attribute_exists(#n4) AND #n5 = :v4");

        assert!(update_expression(&Update::new(), &mut Placeholders::default()).is_err());
    }
}
