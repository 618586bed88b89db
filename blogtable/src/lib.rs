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

//! # blogtable
//!
//! Single-table persistence for a blog: users, posts, projects, threaded comments, votes & site
//! analytics, all stored as heterogeneous items in one DynamoDB-style table with two global
//! secondary indexes.
//!
//! Start with [blog::Blog]. The key scheme lives in [entities] & [analytics], the comment-thread
//! sort keys in [reply_chain], reconstruction of reply trees in [tree], and cascading removal in
//! [cascade]. [storage::Store] is the seam between all that & a backend; [dynamodb] & [memory]
//! implement it.
pub mod analytics;
pub mod attr;
pub mod blog;
pub mod cascade;
pub mod config;
pub mod dynamodb;
#[path = "dynamodb-schemas.rs"]
pub mod dynamodb_schemas;
pub mod entities;
pub mod memory;
#[path = "reply-chain.rs"]
pub mod reply_chain;
pub mod storage;
pub mod timestamp;
pub mod tree;
