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

//! Bulk-ingest interface of the Meridian storage engine.
//!
//! The staging engine in this crate prepares data in the exact column and
//! shard shape the store requires and hands it over through these traits.
//! The store itself (table persistence, push transactions, truncation,
//! deduplication) lives behind them and is not implemented here.

use std::any::Any;

use crate::error::Result;
use crate::table::Column;
use crate::time::{TimeRange, Timespec};

/// Transactional/visibility contract requested for a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushMode {
    /// Synchronous single round trip; rows become visible and acknowledged
    /// atomically.
    #[default]
    Normal,
    /// Skips additional store-side validation for higher throughput; same
    /// visibility contract as [`PushMode::Normal`].
    Fast,
    /// The store acknowledges receipt without waiting for durability; the
    /// caller must not assume visibility immediately after return.
    Async,
    /// Atomically replaces all existing rows within the registered time
    /// ranges with the pushed rows. A destructive overwrite, not a merge.
    Truncate,
}

impl PushMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushMode::Normal => "normal",
            PushMode::Fast => "fast",
            PushMode::Async => "async",
            PushMode::Truncate => "truncate",
        }
    }
}

/// The set of columns the store uses to decide row equivalence during
/// drop-duplicates processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateKey {
    /// Two rows are duplicates iff every column's value, timestamp included,
    /// is equal.
    All,
    /// Two rows are duplicates iff the listed columns are equal, regardless
    /// of the other columns.
    Columns(Vec<String>),
}

/// One column's values across all staged rows, in the typed encoding the
/// store ingests. `None` entries are null cells.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Double(Vec<Option<f64>>),
    Int64(Vec<Option<i64>>),
    Timestamp(Vec<Option<Timespec>>),
    String(Vec<Option<String>>),
    Blob(Vec<Option<Vec<u8>>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Double(xs) => xs.len(),
            ColumnData::Int64(xs) => xs.len(),
            ColumnData::Timestamp(xs) => xs.len(),
            ColumnData::String(xs) => xs.len(),
            ColumnData::Blob(xs) => xs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Live schema of a table as the store persisted it.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub shard_size_secs: i64,
    pub columns: Vec<Column>,
}

/// A table and column pair. Pinned writes lay out all columns of all
/// registered tables as one flat array; this names the column behind each
/// flat offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub table: String,
    pub column: String,
}

/// An open push transaction, sized at creation for every staged table.
///
/// All `set_*` registration calls must happen before the transaction is
/// pushed. The handle is owned by the writer that began it and must be given
/// back through [`Store::release`] exactly once, pushed or not.
pub trait BulkSink {
    /// Recover the implementation's concrete transaction type. Store
    /// implementations downcast the sink handed back to [`Store::push`]
    /// through this.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Register one column's values for the table at `table_index`.
    fn set_column(
        &mut self,
        table_index: usize,
        column_index: usize,
        name: &str,
        values: ColumnData,
    ) -> Result<()>;

    /// Register a table's name and shared timestamp array.
    fn set_table_timestamps(
        &mut self,
        table_index: usize,
        table_name: &str,
        timestamps: &[Timespec],
    ) -> Result<()>;

    /// Register the flat column layout pinned writes address their offsets
    /// against. Must be called before the first
    /// [`BulkSink::set_pinned_column`] on this transaction.
    fn set_pinned_layout(&mut self, columns: &[TableColumn]) -> Result<()>;

    /// Register one shard's worth of a single column, pre-bucketed by the
    /// client. `column_offset` is the table's base offset within the batch
    /// plus the column's offset within its table; `time_offsets` are
    /// nanoseconds from the shard start, one per value.
    fn set_pinned_column(
        &mut self,
        shard_id: i64,
        column_offset: usize,
        time_offsets: &[i64],
        values: ColumnData,
    ) -> Result<()>;

    /// Register the replacement ranges a truncate push erases for the table
    /// at `table_index`.
    fn set_truncate_ranges(&mut self, table_index: usize, ranges: &[TimeRange]) -> Result<()>;

    /// Tell the store which columns form the duplicate key for the table at
    /// `table_index`. Deduplication itself is enforced by the store.
    fn set_duplicate_key(&mut self, table_index: usize, key: &DuplicateKey) -> Result<()>;
}

/// Client-facing surface of the storage engine.
///
/// Errors are surfaced unchanged; the staging engine adds no retry logic on
/// top of this interface.
pub trait Store: Send + Sync {
    /// Create a table with the given columns and shard size.
    fn create_table(&self, name: &str, shard_size_secs: i64, columns: &[Column]) -> Result<()>;

    /// Resolve the live schema and shard size of an existing table.
    fn list_columns(&self, name: &str) -> Result<TableInfo>;

    /// Allocate a push transaction sized by per-table row and column counts,
    /// one entry per staged table.
    fn begin_transaction(
        &self,
        row_counts: &[u64],
        column_counts: &[u64],
    ) -> Result<Box<dyn BulkSink>>;

    /// Push a fully registered transaction with the given mode.
    fn push(&self, sink: &mut dyn BulkSink, mode: PushMode) -> Result<()>;

    /// Release a transaction's store-side resources. Must be called for
    /// every transaction obtained from [`Store::begin_transaction`],
    /// whether or not the push succeeded.
    fn release(&self, sink: Box<dyn BulkSink>);

    /// Release any memory the store pinned for shard-bucketed writes during
    /// the current accumulation cycle.
    fn release_pinned_memory(&self);
}
