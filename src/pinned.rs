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

//! Shard-bucketed bulk writer.
//!
//! The store's on-disk shard layout is indexed by offset-within-shard.
//! Pre-bucketing rows client-side by the table's physical shard boundaries
//! lets the store ingest each shard's columns as one contiguous pinned
//! write, with no further splitting or copying on its side.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::{IllegalWriterStateSnafu, InvalidArgumentSnafu, InvalidColumnCountSnafu, Result};
use crate::session::Session;
use crate::staged::column_to_wire;
use crate::store::{BulkSink, PushMode, TableColumn};
use crate::table::{Table, WritableRow};
use crate::time::{TimeRange, Timespec, NANOS_PER_SEC};
use crate::value::{ColumnType, Value};
use crate::writer::{resolve_truncate_ranges, WriterOptions};

/// Start of the shard containing an instant at `secs` seconds, for shards of
/// `shard_size` seconds.
fn truncate_to_shard(shard_size: i64, secs: i64) -> i64 {
    secs - (secs % shard_size)
}

/// One shard's worth of rows for one table, column-major, with each row's
/// nanosecond offset from the shard start instead of an absolute timestamp.
#[derive(Debug)]
pub(crate) struct PinnedMatrix {
    column_types: Vec<ColumnType>,
    time_offsets: Vec<i64>,
    values_by_column: Vec<Vec<Value>>,
}

impl PinnedMatrix {
    fn new(column_types: Vec<ColumnType>) -> Self {
        let values_by_column = (0..column_types.len()).map(|_| Vec::new()).collect();
        Self {
            column_types,
            time_offsets: Vec::new(),
            values_by_column,
        }
    }

    fn row_count(&self) -> usize {
        self.time_offsets.len()
    }

    fn add(&mut self, time_offset: i64, values: Vec<Value>) -> Result<()> {
        if values.len() != self.column_types.len() {
            return InvalidColumnCountSnafu {
                expected: self.column_types.len(),
                actual: values.len(),
            }
            .fail();
        }

        self.time_offsets.push(time_offset);
        for (column, value) in self.values_by_column.iter_mut().zip(values) {
            column.push(value);
            debug_assert_eq!(column.len(), self.time_offsets.len());
        }

        Ok(())
    }

    /// Hand every column of this shard to the store, tagged with the table's
    /// base offset within the batch plus the column's local offset.
    fn flush_columns(
        &self,
        sink: &mut dyn BulkSink,
        shard_id: i64,
        base_offset: usize,
    ) -> Result<()> {
        for (local, (&column_type, values)) in self
            .column_types
            .iter()
            .zip(&self.values_by_column)
            .enumerate()
        {
            let wire = column_to_wire(column_type, values)?;
            sink.set_pinned_column(shard_id, base_offset + local, &self.time_offsets, wire)?;
        }
        Ok(())
    }
}

/// Bulk writer that buckets appended rows by the storage engine's physical
/// time-shard boundaries.
///
/// Same append/flush lifecycle and options as [`Writer`], but staged data is
/// kept per `(table, shard)` bucket and pushed through the store's pinned
/// column interface.
///
/// Usage of instances of this struct is not thread-safe. Use a writer
/// instance per thread in multi-threaded situations.
///
/// [`Writer`]: crate::writer::Writer
pub struct PinnedWriter {
    session: Session,
    options: WriterOptions,
    tables: Vec<Table>,
    table_offsets: HashMap<String, usize>,
    /// Flat base offset of each table's first column within the batch.
    base_offsets: Vec<usize>,
    /// Flat (table, column) layout, registered on every transaction.
    layout: Vec<TableColumn>,
    buckets: HashMap<(usize, i64), PinnedMatrix>,
    span: TimeRange,
    point_count: usize,
    prepared: Option<Box<dyn BulkSink>>,
    closed: bool,
}

impl PinnedWriter {
    pub(crate) fn new(session: Session, tables: Vec<Table>, options: WriterOptions) -> Self {
        let table_offsets = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name().to_string(), i))
            .collect();

        let mut base_offsets = Vec::with_capacity(tables.len());
        let mut layout = Vec::new();
        for table in &tables {
            base_offsets.push(layout.len());
            for column in table.columns() {
                layout.push(TableColumn {
                    table: table.name().to_string(),
                    column: column.name().to_string(),
                });
            }
        }

        Self {
            session,
            options,
            tables,
            table_offsets,
            base_offsets,
            layout,
            buckets: HashMap::new(),
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

    /// Look up a table's offset within this writer by name.
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

    /// Append a row to the writer's first table.
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

    /// Append a row to the table at `table_offset`, bucketing it into the
    /// shard its timestamp falls in.
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

        // Width-check before lazily creating the bucket, so a rejected row
        // leaves no empty shard bucket behind.
        if values.len() != table.column_count() {
            return InvalidColumnCountSnafu {
                expected: table.column_count(),
                actual: values.len(),
            }
            .fail();
        }

        let shard_size = table.shard_size_secs();
        let shard_id = truncate_to_shard(shard_size, timestamp.sec());
        let time_offset = timestamp.to_epoch_nanos() - shard_id * NANOS_PER_SEC;
        debug_assert!(
            (0..shard_size * NANOS_PER_SEC).contains(&time_offset),
            "offset {time_offset} escapes shard {shard_id} (size {shard_size}s)"
        );

        let bucket = self
            .buckets
            .entry((table_offset, shard_id))
            .or_insert_with(|| {
                PinnedMatrix::new(table.columns().iter().map(|c| c.column_type()).collect())
            });

        let point_count = values.len();
        bucket.add(time_offset, values)?;

        self.span.merge(timestamp);
        self.point_count += point_count;
        Ok(())
    }

    /// Append a [`WritableRow`] to the writer's first table.
    pub fn append_row(&mut self, row: WritableRow) -> Result<()> {
        let (timestamp, values) = row.into_parts();
        self.append(timestamp, values)
    }

    /// Allocate the store transaction and hand every shard bucket to it.
    /// A no-op (with a warning) when nothing is staged.
    pub fn prepare(&mut self) -> Result<()> {
        self.prepare_with(None)
    }

    fn prepare_with(&mut self, caller_ranges: Option<&[TimeRange]>) -> Result<()> {
        self.guard_writable()?;

        if self.buckets.is_empty() {
            warn!("nothing staged, prepare is a no-op");
            return Ok(());
        }

        // Tables that received rows, in registration order; each keeps its
        // buckets sorted by shard for a deterministic wire layout.
        let mut shards_by_table: Vec<(usize, Vec<i64>)> = Vec::new();
        for table_offset in 0..self.tables.len() {
            let mut shards: Vec<i64> = self
                .buckets
                .keys()
                .filter(|(t, _)| *t == table_offset)
                .map(|(_, shard)| *shard)
                .collect();
            if shards.is_empty() {
                continue;
            }
            shards.sort_unstable();
            shards_by_table.push((table_offset, shards));
        }

        let row_counts: Vec<u64> = shards_by_table
            .iter()
            .map(|(t, shards)| {
                shards
                    .iter()
                    .map(|s| self.buckets[&(*t, *s)].row_count() as u64)
                    .sum()
            })
            .collect();
        let column_counts: Vec<u64> = shards_by_table
            .iter()
            .map(|(t, _)| self.tables[*t].column_count() as u64)
            .collect();

        let truncate_ranges =
            resolve_truncate_ranges(self.options.push_mode, caller_ranges, &self.span);
        let duplicate_key = self.options.duplicate_key();

        debug!(
            tables = shards_by_table.len(),
            shards = self.buckets.len(),
            rows = row_counts.iter().sum::<u64>(),
            "preparing pinned push transaction"
        );

        let mut sink = self
            .session
            .store()
            .begin_transaction(&row_counts, &column_counts)?;

        let mut serialize = || -> Result<()> {
            sink.set_pinned_layout(&self.layout)?;

            for (txn_index, (table_offset, shards)) in shards_by_table.iter().enumerate() {
                let base_offset = self.base_offsets[*table_offset];
                for shard_id in shards {
                    self.buckets[&(*table_offset, *shard_id)].flush_columns(
                        sink.as_mut(),
                        *shard_id,
                        base_offset,
                    )?;
                }

                if let Some(ranges) = &truncate_ranges {
                    sink.set_truncate_ranges(txn_index, ranges)?;
                }
                if let Some(key) = &duplicate_key {
                    sink.set_duplicate_key(txn_index, key)?;
                }
            }
            Ok(())
        };

        if let Err(e) = serialize() {
            self.session.store().release(sink);
            return Err(e);
        }

        self.prepared = Some(sink);
        Ok(())
    }

    /// Push all shard buckets to the store with the configured mode.
    ///
    /// The transaction is released, the store's pinned memory freed and the
    /// writer reset whether or not the push succeeds.
    pub fn flush(&mut self) -> Result<()> {
        self.guard_open()?;

        if self.prepared.is_none() {
            if self.buckets.is_empty() {
                warn!("nothing staged, flush is a no-op");
                return Ok(());
            }
            self.prepare()?;
        }

        let Some(mut sink) = self.prepared.take() else {
            return Ok(());
        };

        debug!(
            mode = self.options.push_mode.as_str(),
            points = self.point_count,
            "pushing pinned"
        );
        let result = self
            .session
            .store()
            .push(sink.as_mut(), self.options.push_mode);
        self.session.store().release(sink);
        self.session.store().release_pinned_memory();
        self.reset();

        result
    }

    /// Flush with caller-supplied truncate ranges. Only meaningful under
    /// [`PushMode::Truncate`].
    pub fn flush_with_ranges(&mut self, ranges: &[TimeRange]) -> Result<()> {
        if self.options.push_mode == PushMode::Truncate && ranges.is_empty() {
            return InvalidArgumentSnafu {
                reason: "truncate flush requires at least one range".to_string(),
            }
            .fail();
        }

        self.guard_writable()?;

        if self.buckets.is_empty() {
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
            self.session.store().release_pinned_memory();
        }
        self.reset();
        self.closed = true;
    }

    fn reset(&mut self) {
        self.buckets.clear();
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

impl Drop for PinnedWriter {
    fn drop(&mut self) {
        if let Some(sink) = self.prepared.take() {
            self.session.store().release(sink);
            self.session.store().release_pinned_memory();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_truncation_floors_to_the_shard_start() {
        assert_eq!(truncate_to_shard(86_400, 0), 0);
        assert_eq!(truncate_to_shard(86_400, 86_399), 0);
        assert_eq!(truncate_to_shard(86_400, 86_400), 86_400);
        assert_eq!(truncate_to_shard(86_400, 200_000), 172_800);
        assert_eq!(truncate_to_shard(3_600, 7_250), 7_200);
    }

    #[test]
    fn shard_offsets_recombine_into_the_original_timestamp() {
        let shard_size = 3_600;
        for (sec, nsec) in [(0, 0), (3_599, 999_999_999), (7_250, 123), (86_400, 1)] {
            let ts = Timespec::new(sec, nsec);
            let shard_id = truncate_to_shard(shard_size, ts.sec());
            let offset = ts.to_epoch_nanos() - shard_id * NANOS_PER_SEC;

            assert!(offset >= 0);
            assert!(offset < shard_size * NANOS_PER_SEC);
            assert_eq!(shard_id * NANOS_PER_SEC + offset, ts.to_epoch_nanos());
        }
    }

    #[test]
    fn matrix_keeps_offsets_and_columns_in_step() {
        let mut matrix = PinnedMatrix::new(vec![ColumnType::Double, ColumnType::Int64]);
        matrix
            .add(100, vec![Value::Double(1.0), Value::Int64(1)])
            .unwrap();
        matrix
            .add(200, vec![Value::Double(2.0), Value::Int64(2)])
            .unwrap();

        assert_eq!(matrix.row_count(), 2);
        assert_eq!(matrix.time_offsets, vec![100, 200]);
        for column in &matrix.values_by_column {
            assert_eq!(column.len(), 2);
        }
    }

    #[test]
    fn matrix_rejects_rows_of_the_wrong_width() {
        let mut matrix = PinnedMatrix::new(vec![ColumnType::Double, ColumnType::Int64]);
        assert!(matrix.add(0, vec![Value::Double(1.0)]).is_err());
        assert_eq!(matrix.row_count(), 0);
    }
}
