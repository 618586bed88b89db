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

//! # attr
//!
//! The typed-attribute representation of a stored item.
//!
//! DynamoDB (and everything that speaks its API, such as ScyllaDB's Alternator interface) models an
//! item as a map from attribute name to a typed value. [Value] is that typed value, expressed as a
//! closed enum, and [Item] is the map. Nothing above the storage layer should be matching on
//! [Value] variants directly; the entity types convert themselves to & from [Item]s using the
//! accessors in [ItemExt].
//!
//! Numbers are carried as their decimal text, exactly as they travel on the wire. DynamoDB numbers
//! have up to 38 digits of precision, which no native Rust type represents, so I parse them into a
//! native type only at the point of use.

use std::{
    collections::{BTreeSet, HashMap},
    fmt::Display,
    str::FromStr,
};

use snafu::{prelude::*, Backtrace};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Attribute {name} should be of type {expected}, but is of type {actual}"))]
    AttributeType {
        name: String,
        expected: &'static str,
        actual: &'static str,
        backtrace: Backtrace,
    },
    #[snafu(display("Attribute {name} holds '{text}', which can't be read as the expected number"))]
    BadNumber {
        name: String,
        text: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Attribute {name} is missing"))]
    MissingAttribute { name: String, backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A stored item: attribute name to [Value]
pub type Item = HashMap<String, Value>;

/// A single typed attribute value
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(String),
    Number(String),
    Bool(bool),
    Null,
    StringSet(BTreeSet<String>),
    NumberSet(BTreeSet<String>),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    /// Build a [Value::Number] from anything that displays as a decimal number
    pub fn number<T: Display>(n: T) -> Value {
        Value::Number(n.to_string())
    }
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "S",
            Value::Number(_) => "N",
            Value::Bool(_) => "BOOL",
            Value::Null => "NULL",
            Value::StringSet(_) => "SS",
            Value::NumberSet(_) => "NS",
            Value::List(_) => "L",
            Value::Map(_) => "M",
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
    /// Parse a [Value::Number]; `None` if this isn't a number, or doesn't fit in `T`
    pub fn as_number<T: FromStr>(&self) -> Option<T> {
        match self {
            Value::Number(text) => text.parse::<T>().ok(),
            _ => None,
        }
    }
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

macro_rules! number_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Number(value.to_string())
                }
            }
        )*
    };
}

number_from!(i64, u64, i32, u32, u16, u8);

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(value: HashMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Typed accessors on an [Item]
///
/// Each fails with an [Error] naming the offending attribute, which makes for far more useful
/// diagnostics than a bare "type mismatch" when some row in the store turns out to be malformed.
pub trait ItemExt {
    fn attr(&self, name: &str) -> Result<&Value>;
    fn string(&self, name: &str) -> Result<&str>;
    fn boolean(&self, name: &str) -> Result<bool>;
    fn number<T: FromStr>(&self, name: &str) -> Result<T>;
    fn list(&self, name: &str) -> Result<&[Value]>;
    /// Read a list of strings
    fn strings(&self, name: &str) -> Result<Vec<&str>>;
}

impl ItemExt for Item {
    fn attr(&self, name: &str) -> Result<&Value> {
        self.get(name).context(MissingAttributeSnafu { name })
    }
    fn string(&self, name: &str) -> Result<&str> {
        let val = self.attr(name)?;
        val.as_str().context(AttributeTypeSnafu {
            name,
            expected: "S",
            actual: val.type_name(),
        })
    }
    fn boolean(&self, name: &str) -> Result<bool> {
        let val = self.attr(name)?;
        val.as_bool().context(AttributeTypeSnafu {
            name,
            expected: "BOOL",
            actual: val.type_name(),
        })
    }
    fn number<T: FromStr>(&self, name: &str) -> Result<T> {
        match self.attr(name)? {
            Value::Number(text) => text
                .parse::<T>()
                .ok()
                .context(BadNumberSnafu { name, text }),
            val => AttributeTypeSnafu {
                name,
                expected: "N",
                actual: val.type_name(),
            }
            .fail(),
        }
    }
    fn list(&self, name: &str) -> Result<&[Value]> {
        let val = self.attr(name)?;
        val.as_list().context(AttributeTypeSnafu {
            name,
            expected: "L",
            actual: val.type_name(),
        })
    }
    fn strings(&self, name: &str) -> Result<Vec<&str>> {
        self.list(name)?
            .iter()
            .map(|v| {
                v.as_str().context(AttributeTypeSnafu {
                    name,
                    expected: "S",
                    actual: v.type_name(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accessors() {
        let mut item = Item::new();
        item.insert("Text".to_owned(), "hello".into());
        item.insert("Count".to_owned(), 7u32.into());
        item.insert("Up".to_owned(), true.into());
        item.insert(
            "Chain".to_owned(),
            Value::List(vec!["a".into(), "b".into()]),
        );

        assert_eq!(item.string("Text").unwrap(), "hello");
        assert_eq!(item.number::<u32>("Count").unwrap(), 7);
        assert_eq!(item.number::<i64>("Count").unwrap(), 7);
        assert!(item.boolean("Up").unwrap());
        assert_eq!(item.strings("Chain").unwrap(), vec!["a", "b"]);

        assert!(matches!(
            item.string("Nope"),
            Err(Error::MissingAttribute { .. })
        ));
        assert!(matches!(
            item.number::<u32>("Text"),
            Err(Error::AttributeType { expected: "N", actual: "S", .. })
        ));
        assert!(matches!(
            item.boolean("Count"),
            Err(Error::AttributeType { .. })
        ));
    }

    #[test]
    fn numbers() {
        assert_eq!(Value::number(-3), Value::Number("-3".to_owned()));
        assert_eq!(Value::from(12u8).as_number::<u8>(), Some(12));
        // Doesn't fit
        assert_eq!(Value::from(300u16).as_number::<u8>(), None);

        let mut item = Item::new();
        item.insert("N".to_owned(), Value::Number("1e3".to_owned()));
        assert!(matches!(
            item.number::<u32>("N"),
            Err(Error::BadNumber { .. })
        ));
    }

    #[test]
    fn options() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::String("x".to_owned()));
    }
}
