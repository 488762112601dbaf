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

//! Table schema resolution for Meridian time-series tables.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{InvalidArgumentSnafu, Result};
use crate::session::Session;
use crate::time::Timespec;
use crate::value::{ColumnType, Value};

/// Default shard size for newly created tables: one day.
pub const DEFAULT_SHARD_SIZE: Duration = Duration::from_secs(86_400);

/// Holds information about a single column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    column_type: ColumnType,
}

impl Column {
    /// Create a column with a certain type.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }

    /// A double precision column.
    pub fn double(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Double)
    }

    /// A 64 bit integer column.
    pub fn int64(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Int64)
    }

    /// A timestamp column.
    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Timestamp)
    }

    /// A string column.
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::String)
    }

    /// A blob column.
    pub fn blob(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Blob)
    }

    /// A symbol column. Carries string values.
    pub fn symbol(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Symbol)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }
}

/// A row staged for writing: a timestamp plus one value per column, mapped
/// to columns by their relative offset.
#[derive(Debug, Clone, PartialEq)]
pub struct WritableRow {
    timestamp: Timespec,
    values: Vec<Value>,
}

impl WritableRow {
    pub fn new(timestamp: Timespec, values: Vec<Value>) -> Self {
        Self { timestamp, values }
    }

    pub fn timestamp(&self) -> Timespec {
        self.timestamp
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_parts(self) -> (Timespec, Vec<Value>) {
        (self.timestamp, self.values)
    }
}

/// Represents a Meridian time-series table: name, shard size and the ordered
/// column list, with a name→offset index kept as the exact inverse of that
/// order.
///
/// Cheap to clone; the column list is shared.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    shard_size_secs: i64,
    columns: Arc<Vec<Column>>,
    column_offsets: Arc<HashMap<String, usize>>,
}

impl Table {
    fn from_parts(name: String, shard_size_secs: i64, columns: Vec<Column>) -> Self {
        let column_offsets = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name().to_string(), i))
            .collect();

        Self {
            name,
            shard_size_secs,
            columns: Arc::new(columns),
            column_offsets: Arc::new(column_offsets),
        }
    }

    /// Create a new table at the store and resolve its live schema.
    ///
    /// The returned table reflects the column ordering as the store
    /// persisted it. Fails with `AliasAlreadyExists` when the name is taken
    /// and `ReservedAlias` when it lies in a reserved namespace.
    pub fn create(
        session: &Session,
        name: &str,
        columns: Vec<Column>,
        shard_size: Duration,
    ) -> Result<Table> {
        session.ensure_open()?;

        let shard_size_secs = shard_size.as_secs() as i64;
        if shard_size_secs <= 0 {
            return InvalidArgumentSnafu {
                reason: format!("shard size must be at least one second, got {shard_size:?}"),
            }
            .fail();
        }

        session
            .store()
            .create_table(name, shard_size_secs, &columns)?;

        // Round-trip through the store so that column ordering matches what
        // it persisted.
        Self::open(session, name)
    }

    /// Resolve schema and shard size for an existing table. Fails with
    /// `AliasNotFound` when no such table exists.
    pub fn open(session: &Session, name: &str) -> Result<Table> {
        session.ensure_open()?;

        let info = session.store().list_columns(name)?;
        Ok(Self::from_parts(
            info.name,
            info.shard_size_secs,
            info.columns,
        ))
    }

    /// A table that shares another table's schema and shard size, skipping
    /// the schema round trip.
    pub fn like(name: impl Into<String>, other: &Table) -> Table {
        Table {
            name: name.into(),
            shard_size_secs: other.shard_size_secs,
            columns: Arc::clone(&other.columns),
            column_offsets: Arc::clone(&other.column_offsets),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shard_size_secs(&self) -> i64 {
        self.shard_size_secs
    }

    pub fn shard_size(&self) -> Duration {
        Duration::from_secs(self.shard_size_secs as u64)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub(crate) fn shared_columns(&self) -> Arc<Vec<Column>> {
        Arc::clone(&self.columns)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Look up a column's offset by name. The first column starts at 0.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.column_offsets.get(name).copied().map_or_else(
            || {
                InvalidArgumentSnafu {
                    reason: format!("no column named '{}' in table '{}'", name, self.name),
                }
                .fail()
            },
            Ok,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_shares_schema_without_a_round_trip() {
        let base = Table::from_parts(
            "prices.eurusd".to_string(),
            86_400,
            vec![Column::double("open"), Column::int64("volume")],
        );

        let other = Table::like("prices.gbpusd", &base);
        assert_eq!(other.name(), "prices.gbpusd");
        assert_eq!(other.shard_size_secs(), 86_400);
        assert_eq!(other.columns(), base.columns());
        assert_eq!(other.column_index("volume").unwrap(), 1);
    }

    #[test]
    fn column_index_is_the_inverse_of_column_order() {
        let table = Table::from_parts(
            "t".to_string(),
            3600,
            vec![
                Column::double("a"),
                Column::string("b"),
                Column::timestamp("c"),
            ],
        );

        for (i, col) in table.columns().iter().enumerate() {
            assert_eq!(table.column_index(col.name()).unwrap(), i);
        }
        assert!(table.column_index("missing").is_err());
    }

    #[test]
    fn column_constructors_set_the_declared_type() {
        assert_eq!(Column::double("x").column_type(), ColumnType::Double);
        assert_eq!(Column::int64("x").column_type(), ColumnType::Int64);
        assert_eq!(Column::timestamp("x").column_type(), ColumnType::Timestamp);
        assert_eq!(Column::string("x").column_type(), ColumnType::String);
        assert_eq!(Column::blob("x").column_type(), ColumnType::Blob);
        assert_eq!(Column::symbol("x").column_type(), ColumnType::Symbol);
    }
}
