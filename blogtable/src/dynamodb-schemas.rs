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

//! # DynamoDB Schema Management
//!
//! blogtable keeps everything in one table, so "the schema" is that table's key schema plus its
//! two global secondary indexes, each projecting every attribute.

use aws_sdk_dynamodb::{
    config::http::HttpResponse,
    error::SdkError,
    operation::{
        create_table::CreateTableError, delete_table::DeleteTableError,
        describe_table::DescribeTableError,
    },
    types::{
        AttributeDefinition, BillingMode, GlobalSecondaryIndex, KeySchemaElement, KeyType,
        Projection, ProjectionType, ScalarAttributeType, TableStatus,
    },
    Client,
};
use snafu::{Backtrace, ResultExt, Snafu};
use tracing::{debug, info};

use crate::{
    dynamodb::TableNames,
    storage::{
        INDEX1_PARTITION_KEY, INDEX1_SORT_KEY, INDEX2_PARTITION_KEY, INDEX2_SORT_KEY,
        PARTITION_KEY, SORT_KEY,
    },
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to create table {table}: {source}"))]
    CreateTable {
        table: String,
        #[snafu(source(from(SdkError<CreateTableError, HttpResponse>, Box::new)))]
        source: Box<SdkError<CreateTableError, HttpResponse>>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to delete table {table}: {source}"))]
    DeleteTable {
        table: String,
        #[snafu(source(from(SdkError<DeleteTableError, HttpResponse>, Box::new)))]
        source: Box<SdkError<DeleteTableError, HttpResponse>>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to describe table {table}: {source}"))]
    DescribeTable {
        table: String,
        #[snafu(source(from(SdkError<DescribeTableError, HttpResponse>, Box::new)))]
        source: Box<SdkError<DescribeTableError, HttpResponse>>,
        backtrace: Backtrace,
    },
    #[snafu(display("Table {table} didn't become active after {attempts} attempts"))]
    NotActive {
        table: String,
        attempts: usize,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to build {name}: {source}"))]
    GenericBuildFailure {
        name: String,
        source: aws_sdk_dynamodb::error::BuildError,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         initial schema                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

macro_rules! table_attr {
    ($col_name:expr, $ty:ident) => {
        AttributeDefinition::builder()
            .attribute_name($col_name)
            .attribute_type(ScalarAttributeType::$ty)
            .build()
            .context(GenericBuildFailureSnafu {
                name: $col_name.to_string(),
            })?
    };
}

fn key_element(name: &str, key_type: KeyType) -> Result<KeySchemaElement> {
    KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(key_type)
        .build()
        .context(GenericBuildFailureSnafu {
            name: name.to_string(),
        })
}

fn index(name: &str, partition: &str, sort: &str) -> Result<GlobalSecondaryIndex> {
    GlobalSecondaryIndex::builder()
        .index_name(name)
        .set_key_schema(Some(vec![
            key_element(partition, KeyType::Hash)?,
            key_element(sort, KeyType::Range)?,
        ]))
        .projection(
            Projection::builder()
                .projection_type(ProjectionType::All)
                .build(),
        )
        .build()
        .context(GenericBuildFailureSnafu {
            name: name.to_string(),
        })
}

/// Create the blog's table along with both its secondary indexes
pub async fn create_schema(client: &Client, names: &TableNames) -> Result<()> {
    client
        .create_table()
        .table_name(&names.table)
        .billing_mode(BillingMode::PayPerRequest)
        .set_attribute_definitions(Some(vec![
            table_attr!(PARTITION_KEY, S),
            table_attr!(SORT_KEY, S),
            table_attr!(INDEX1_PARTITION_KEY, S),
            table_attr!(INDEX1_SORT_KEY, S),
            table_attr!(INDEX2_PARTITION_KEY, S),
            table_attr!(INDEX2_SORT_KEY, S),
        ]))
        .set_key_schema(Some(vec![
            key_element(PARTITION_KEY, KeyType::Hash)?,
            key_element(SORT_KEY, KeyType::Range)?,
        ]))
        .global_secondary_indexes(index(&names.index1, INDEX1_PARTITION_KEY, INDEX1_SORT_KEY)?)
        .global_secondary_indexes(index(&names.index2, INDEX2_PARTITION_KEY, INDEX2_SORT_KEY)?)
        .send()
        .await
        .context(CreateTableSnafu {
            table: names.table.clone(),
        })?;
    info!(
        "Created table {} with indexes {} & {}",
        names.table, names.index1, names.index2
    );
    wait_for_table(client, &names.table).await
}

const ACTIVATION_ATTEMPTS: usize = 60;

/// Poll `table` once a second until it's active
pub async fn wait_for_table(client: &Client, table: &str) -> Result<()> {
    for attempt in 1..=ACTIVATION_ATTEMPTS {
        let status = client
            .describe_table()
            .table_name(table)
            .send()
            .await
            .context(DescribeTableSnafu { table })?
            .table
            .and_then(|description| description.table_status);
        debug!("Table {} status (attempt {}): {:?}", table, attempt, status);
        if status == Some(TableStatus::Active) {
            return Ok(());
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
    NotActiveSnafu {
        table,
        attempts: ACTIVATION_ATTEMPTS,
    }
    .fail()
}

/// Drop the blog's table, & everything in it
pub async fn drop_schema(client: &Client, names: &TableNames) -> Result<()> {
    client
        .delete_table()
        .table_name(&names.table)
        .send()
        .await
        .context(DeleteTableSnafu {
            table: names.table.clone(),
        })?;
    info!("Dropped table {}", names.table);
    Ok(())
}
