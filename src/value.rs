// Copyright 2023 Meridian Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Cell values and column types for Meridian tables.

use std::cmp::Ordering;

use crate::error::{IncompatibleTypeSnafu, Result};
use crate::time::Timespec;

/// Declared type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Double,
    Int64,
    Timestamp,
    String,
    Blob,
    /// Interned string type; carries [`Value::String`] payloads.
    Symbol,
}

/// Type-safe cell value.
///
/// `Null` is a legitimate per-cell value meaning "no data for this column in
/// this row", not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int64(i64),
    Double(f64),
    Timestamp(Timespec),
    String(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int64(_) => "int64",
            Value::Double(_) => "double",
            Value::Timestamp(_) => "timestamp",
            Value::String(_) => "string",
            Value::Blob(_) => "blob",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the int64 payload, failing when the tag mismatches.
    pub fn int64(&self) -> Result<i64> {
        match self {
            Value::Int64(v) => Ok(*v),
            other => IncompatibleTypeSnafu {
                expected: ColumnType::Int64,
                actual: other.type_name(),
            }
            .fail(),
        }
    }

    /// Get the double payload, failing when the tag mismatches.
    pub fn double(&self) -> Result<f64> {
        match self {
            Value::Double(v) => Ok(*v),
            other => IncompatibleTypeSnafu {
                expected: ColumnType::Double,
                actual: other.type_name(),
            }
            .fail(),
        }
    }

    /// Get the timestamp payload, failing when the tag mismatches.
    pub fn timestamp(&self) -> Result<Timespec> {
        match self {
            Value::Timestamp(v) => Ok(*v),
            other => IncompatibleTypeSnafu {
                expected: ColumnType::Timestamp,
                actual: other.type_name(),
            }
            .fail(),
        }
    }

    /// Get the string payload, failing when the tag mismatches.
    pub fn string(&self) -> Result<&str> {
        match self {
            Value::String(v) => Ok(v),
            other => IncompatibleTypeSnafu {
                expected: ColumnType::String,
                actual: other.type_name(),
            }
            .fail(),
        }
    }

    /// Get the blob payload, failing when the tag mismatches.
    pub fn blob(&self) -> Result<&[u8]> {
        match self {
            Value::Blob(v) => Ok(v),
            other => IncompatibleTypeSnafu {
                expected: ColumnType::Blob,
                actual: other.type_name(),
            }
            .fail(),
        }
    }
}

/// Ordering is defined within one type tag only; comparing mismatched
/// non-null tags yields `None`.
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Int64(a), Value::Int64(b)) => a.partial_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

// Convenient constructors for cell values
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<Timespec> for Value {
    fn from(v: Timespec) -> Self {
        Value::Timestamp(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}
