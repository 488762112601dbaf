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

//! High-performance bulk writer for Meridian time-series tables.
//!
//! Rows are appended in arbitrary order across any of the writer's tables,
//! pivoted into column-oriented staging buffers, and handed to the store in
//! a single transactional push on [`Writer::flush`].

use std::collections::HashMap;

use derive_builder::Builder;
use tracing::{debug, warn};

use crate::error::{
    IllegalWriterStateSnafu, InvalidArgumentSnafu, InvalidColumnCountSnafu, Result,
};
use crate::session::Session;
use crate::staged::StagedTable;
use crate::store::{BulkSink, DuplicateKey, PushMode};
use crate::table::{Table, WritableRow};
use crate::time::{TimeRange, Timespec};
use crate::value::Value;

/// Immutable configuration of a writer: push mode and deduplication policy.
#[derive(Debug, Clone, Default, Builder)]
#[builder(setter(into), default)]
pub struct WriterOptions {
    /// Transactional contract requested for each flush.
    pub push_mode: PushMode,
    /// Ask the store to drop duplicate rows during the push.
    pub drop_duplicates: bool,
    /// Columns forming the duplicate key. Only meaningful when
    /// `drop_duplicates` is set; `None` means all columns.
    pub drop_duplicate_columns: Option<Vec<String>>,
}

impl WriterOptions {
    /// Create a new options builder
    pub fn builder() -> WriterOptionsBuilder {
        WriterOptionsBuilder::default()
    }

    pub(crate) fn duplicate_key(&self) -> Option<DuplicateKey> {
        assert!(
            self.drop_duplicates || self.drop_duplicate_columns.is_none(),
            "duplicate-key columns require the drop_duplicates flag"
        );
        if !self.drop_duplicates {
            return None;
        }
        Some(match &self.drop_duplicate_columns {
            Some(columns) => DuplicateKey::Columns(columns.clone()),
            None => DuplicateKey::All,
        })
    }
}

/// Builder producing a [`Writer`] (or [`PinnedWriter`]) bound to one
/// session and a fixed set of tables.
///
/// [`PinnedWriter`]: crate::pinned::PinnedWriter
pub struct WriterBuilder {
    session: Session,
    tables: Vec<Table>,
    options: WriterOptions,
}

impl WriterBuilder {
    pub(crate) fn new(session: &Session) -> Self {
        Self {
            session: session.clone(),
            tables: Vec::new(),
            options: WriterOptions::default(),
        }
    }

    /// Register a table the writer may append to.
    #[must_use]
    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    /// Register multiple tables.
    #[must_use]
    pub fn tables(mut self, tables: impl IntoIterator<Item = Table>) -> Self {
        self.tables.extend(tables);
        self
    }

    /// Replace the options wholesale.
    #[must_use]
    pub fn options(mut self, options: WriterOptions) -> Self {
        self.options = options;
        self
    }

    /// Synchronous push; rows become visible and acknowledged atomically.
    /// This is the default.
    #[must_use]
    pub fn normal_push(mut self) -> Self {
        self.options.push_mode = PushMode::Normal;
        self
    }

    /// Skip additional store-side validation for higher throughput.
    #[must_use]
    pub fn fast_push(mut self) -> Self {
        self.options.push_mode = PushMode::Fast;
        self
    }

    /// The store acknowledges receipt without waiting for durability.
    #[must_use]
    pub fn async_push(mut self) -> Self {
        self.options.push_mode = PushMode::Async;
        self
    }

    /// Each flush atomically replaces all existing rows in the affected
    /// time range.
    #[must_use]
    pub fn truncate_push(mut self) -> Self {
        self.options.push_mode = PushMode::Truncate;
        self
    }

    /// Ask the store to drop rows whose every column, timestamp included,
    /// equals an already-held row.
    #[must_use]
    pub fn drop_duplicates(mut self) -> Self {
        self.options.drop_duplicates = true;
        self
    }

    /// Ask the store to drop rows that equal an already-held row on the
    /// listed columns, regardless of the other columns. Implies
    /// [`WriterBuilder::drop_duplicates`].
    #[must_use]
    pub fn drop_duplicate_columns<S: Into<String>>(
        mut self,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.options.drop_duplicates = true;
        self.options.drop_duplicate_columns =
            Some(columns.into_iter().map(Into::into).collect());
        self
    }

    fn validate(&self) -> Result<()> {
        self.session.ensure_open()?;

        if self.tables.is_empty() {
            return InvalidArgumentSnafu {
                reason: "a writer needs at least one table".to_string(),
            }
            .fail();
        }

        let mut seen = HashMap::new();
        for table in &self.tables {
            if seen.insert(table.name().to_string(), ()).is_some() {
                return InvalidArgumentSnafu {
                    reason: format!("table '{}' registered twice", table.name()),
                }
                .fail();
            }
        }

        Ok(())
    }

    /// Build a staged (column-pivoting) writer.
    pub fn build(self) -> Result<Writer> {
        self.validate()?;
        Ok(Writer::new(self.session, self.tables, self.options))
    }

    /// Build a shard-bucketing writer.
    pub fn build_pinned(self) -> Result<crate::pinned::PinnedWriter> {
        self.validate()?;
        Ok(crate::pinned::PinnedWriter::new(
            self.session,
            self.tables,
            self.options,
        ))
    }
}

/// Resolve the replacement ranges for a truncate push: caller-supplied
/// ranges take priority, otherwise the running span widened by one
/// nanosecond past its last instant.
pub(crate) fn resolve_truncate_ranges(
    mode: PushMode,
    caller_ranges: Option<&[TimeRange]>,
    span: &TimeRange,
) -> Option<Vec<TimeRange>> {
    if mode != PushMode::Truncate {
        if caller_ranges.is_some() {
            warn!("truncate ranges provided but push mode is not truncate");
        }
        return None;
    }

    match caller_ranges {
        Some(ranges) => Some(ranges.to_vec()),
        None if !span.is_null() => {
            Some(vec![span.with_end(span.end().plus_nanos(1))])
        }
        None => None,
    }
}

/// Bulk writer staging rows for one or more tables.
///
/// Lifecycle: `append` moves the writer into its staging state; `flush`
/// prepares a store transaction, serializes every staged table into it,
/// pushes with the configured mode, and unconditionally releases the
/// transaction and resets, success or failure.
///
/// Usage of instances of this struct is not thread-safe. Use a writer
/// instance per thread in multi-threaded situations.
pub struct Writer {
    session: Session,
    options: WriterOptions,
    tables: Vec<Table>,
    table_offsets: HashMap<String, usize>,
    staged: Vec<Option<StagedTable>>,
    span: TimeRange,
    point_count: usize,
    prepared: Option<Box<dyn BulkSink>>,
    closed: bool,
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("session", &self.session)
            .field("options", &self.options)
            .field("tables", &self.tables)
            .field("table_offsets", &self.table_offsets)
            .field("staged", &self.staged)
            .field("span", &self.span)
            .field("point_count", &self.point_count)
            .field("prepared", &self.prepared.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Writer {
    /// Create a new writer builder bound to `session`.
    pub fn builder(session: &Session) -> WriterBuilder {
        WriterBuilder::new(session)
    }

    pub(crate) fn new(session: Session, tables: Vec<Table>, options: WriterOptions) -> Self {
        let table_offsets = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name().to_string(), i))
            .collect();
        let staged = (0..tables.len()).map(|_| None).collect();

        Self {
            session,
            options,
            tables,
            table_offsets,
            staged,
            span: TimeRange::null(),
            point_count: 0,
            prepared: None,
            closed: false,
        }
    }

    /// The push mode every flush of this writer uses.
    pub fn push_mode(&self) -> PushMode {
        self.options.push_mode
    }

    /// Number of values appended since the last flush.
    pub fn size(&self) -> usize {
        self.point_count
    }

    /// The tables this writer was built over, in registration order.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Look up a table's offset within this writer by name. Cache the
    /// result when appending many rows to the same table.
    pub fn table_index(&self, name: &str) -> Result<usize> {
        self.table_offsets.get(name).copied().map_or_else(
            || {
                InvalidArgumentSnafu {
                    reason: format!("no table named '{name}' registered with this writer"),
                }
                .fail()
            },
            Ok,
        )
    }

    /// Append a row to the writer's first table. Convenience for writers
    /// over a single table.
    pub fn append(&mut self, timestamp: Timespec, values: Vec<Value>) -> Result<()> {
        self.append_at(0, timestamp, values)
    }

    /// Append a row to the named table.
    pub fn append_to(
        &mut self,
        table_name: &str,
        timestamp: Timespec,
        values: Vec<Value>,
    ) -> Result<()> {
        self.append_at(self.table_index(table_name)?, timestamp, values)
    }

    /// Append a row to the table at `table_offset` (see
    /// [`Writer::table_index`]). `values` map to columns by their relative
    /// offset and must cover every column; use [`Value::Null`] for cells
    /// without data.
    pub fn append_at(
        &mut self,
        table_offset: usize,
        timestamp: Timespec,
        values: Vec<Value>,
    ) -> Result<()> {
        self.guard_writable()?;

        let table = self.tables.get(table_offset).ok_or_else(|| {
            InvalidArgumentSnafu {
                reason: format!(
                    "table offset {} out of range ({} tables registered)",
                    table_offset,
                    self.tables.len()
                ),
            }
            .build()
        })?;

        // Width-check before lazily creating the buffer, so a rejected row
        // leaves no empty staging entry behind.
        if values.len() != table.column_count() {
            return InvalidColumnCountSnafu {
                expected: table.column_count(),
                actual: values.len(),
            }
            .fail();
        }

        let staged = self.staged[table_offset]
            .get_or_insert_with(|| StagedTable::new(table.shared_columns()));

        let point_count = values.len();
        staged.append(timestamp, values)?;

        self.span.merge(timestamp);
        self.point_count += point_count;
        Ok(())
    }

    /// Append a [`WritableRow`] to the writer's first table.
    pub fn append_row(&mut self, row: WritableRow) -> Result<()> {
        let (timestamp, values) = row.into_parts();
        self.append(timestamp, values)
    }

    /// Append a [`WritableRow`] to the named table.
    pub fn append_row_to(&mut self, table_name: &str, row: WritableRow) -> Result<()> {
        let (timestamp, values) = row.into_parts();
        self.append_to(table_name, timestamp, values)
    }

    /// Allocate the store transaction and serialize every staged table into
    /// it. A no-op (with a warning) when nothing is staged. [`Writer::flush`]
    /// calls this automatically when needed.
    pub fn prepare(&mut self) -> Result<()> {
        self.prepare_with(None)
    }

    fn prepare_with(&mut self, caller_ranges: Option<&[TimeRange]>) -> Result<()> {
        self.guard_writable()?;

        let staged: Vec<(usize, &StagedTable)> = self
            .staged
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|t| (i, t)))
            .collect();
        if staged.is_empty() {
            warn!("nothing staged, prepare is a no-op");
            return Ok(());
        }

        let row_counts: Vec<u64> = staged.iter().map(|(_, t)| t.row_count() as u64).collect();
        let column_counts: Vec<u64> =
            staged.iter().map(|(_, t)| t.column_count() as u64).collect();

        let truncate_ranges =
            resolve_truncate_ranges(self.options.push_mode, caller_ranges, &self.span);
        let duplicate_key = self.options.duplicate_key();

        debug!(
            tables = staged.len(),
            rows = row_counts.iter().sum::<u64>(),
            "preparing push transaction"
        );

        let mut sink = self
            .session
            .store()
            .begin_transaction(&row_counts, &column_counts)?;

        // The ranges are structurally per-table even though every table
        // currently receives the same list.
        let mut serialize = || -> Result<()> {
            for (txn_index, (table_offset, staged_table)) in staged.iter().enumerate() {
                let table = &self.tables[*table_offset];
                staged_table.to_wire(
                    sink.as_mut(),
                    txn_index,
                    table.name(),
                    truncate_ranges.as_deref(),
                )?;

                if let Some(key) = &duplicate_key {
                    sink.set_duplicate_key(txn_index, key)?;
                }
            }
            Ok(())
        };

        // If serialization fails midway the transaction is still released,
        // then the original error propagates.
        if let Err(e) = serialize() {
            self.session.store().release(sink);
            return Err(e);
        }

        self.prepared = Some(sink);
        Ok(())
    }

    /// Push all staged rows to the store with the configured mode.
    ///
    /// The transaction is released and the writer reset whether or not the
    /// push succeeds; a push failure is surfaced after cleanup, and the
    /// staged data is lost. Flushing with nothing staged warns and returns.
    pub fn flush(&mut self) -> Result<()> {
        self.guard_open()?;

        if self.prepared.is_none() {
            if self.point_count == 0 {
                warn!("nothing staged, flush is a no-op");
                return Ok(());
            }
            self.prepare()?;
        }

        let Some(mut sink) = self.prepared.take() else {
            return Ok(());
        };

        debug!(mode = self.options.push_mode.as_str(), points = self.point_count, "pushing");
        let result = self.session.store().push(sink.as_mut(), self.options.push_mode);
        self.session.store().release(sink);
        self.reset();

        result
    }

    /// Flush with caller-supplied truncate ranges, overriding the range the
    /// writer would derive from the appended data. Only meaningful under
    /// [`PushMode::Truncate`].
    pub fn flush_with_ranges(&mut self, ranges: &[TimeRange]) -> Result<()> {
        if self.options.push_mode == PushMode::Truncate && ranges.is_empty() {
            return InvalidArgumentSnafu {
                reason: "truncate flush requires at least one range".to_string(),
            }
            .fail();
        }

        self.guard_writable()?;

        if self.point_count == 0 {
            warn!("nothing staged, flush is a no-op");
            return Ok(());
        }

        self.prepare_with(Some(ranges))?;
        self.flush()
    }

    /// Release any open transaction and make the writer terminal. Does not
    /// flush; safe to call multiple times.
    pub fn close(&mut self) {
        if let Some(sink) = self.prepared.take() {
            self.session.store().release(sink);
        }
        self.reset();
        self.closed = true;
    }

    fn reset(&mut self) {
        for slot in &mut self.staged {
            *slot = None;
        }
        self.span = TimeRange::null();
        self.point_count = 0;
    }

    fn guard_open(&self) -> Result<()> {
        if self.closed {
            return IllegalWriterStateSnafu {
                reason: "writer is closed".to_string(),
            }
            .fail();
        }
        self.session.ensure_open()
    }

    fn guard_writable(&self) -> Result<()> {
        self.guard_open()?;
        if self.prepared.is_some() {
            return IllegalWriterStateSnafu {
                reason: "a transaction is already prepared; flush or close first".to_string(),
            }
            .fail();
        }
        Ok(())
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if let Some(sink) = self.prepared.take() {
            self.session.store().release(sink);
        }
    }
}

/// A [`Writer`] that automatically flushes once a number of appended rows
/// has accumulated.
///
/// As with [`Writer`], instances are not thread-safe; use one per thread.
pub struct AutoFlushWriter {
    writer: Writer,
    counter: u64,
    threshold: u64,
}

impl AutoFlushWriter {
    const DEFAULT_THRESHOLD: u64 = 50_000;

    /// Wrap a writer with the default threshold of 50 000 rows.
    pub fn new(writer: Writer) -> Self {
        Self::with_threshold(writer, Self::DEFAULT_THRESHOLD)
    }

    /// Wrap a writer, flushing every `threshold` appended rows.
    pub fn with_threshold(writer: Writer, threshold: u64) -> Self {
        assert!(threshold > 0, "flush threshold must be positive");
        Self {
            writer,
            counter: 0,
            threshold,
        }
    }

    /// Append to the first table, flushing when the threshold is reached.
    pub fn append(&mut self, timestamp: Timespec, values: Vec<Value>) -> Result<()> {
        self.writer.append(timestamp, values)?;
        self.maybe_flush()
    }

    /// Append to the named table, flushing when the threshold is reached.
    pub fn append_to(
        &mut self,
        table_name: &str,
        timestamp: Timespec,
        values: Vec<Value>,
    ) -> Result<()> {
        self.writer.append_to(table_name, timestamp, values)?;
        self.maybe_flush()
    }

    fn maybe_flush(&mut self) -> Result<()> {
        self.counter += 1;
        if self.counter >= self.threshold {
            // Reset the counter even when the flush fails; the writer has
            // already discarded the staged data.
            let result = self.writer.flush();
            self.counter = 0;
            return result;
        }
        Ok(())
    }

    /// Flush whatever is staged right now.
    pub fn flush(&mut self) -> Result<()> {
        self.counter = 0;
        self.writer.flush()
    }

    pub fn size(&self) -> usize {
        self.writer.size()
    }

    pub fn close(&mut self) {
        self.writer.close();
    }

    /// The wrapped writer.
    pub fn inner(&self) -> &Writer {
        &self.writer
    }
}
