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

//! In-memory [`Store`] implementation for integration tests.
//!
//! Honors enough of the bulk-ingest contract to exercise the staging engine
//! end to end: transactional multi-table pushes, truncate-mode replacement
//! ranges, duplicate-key handling (later row wins), and pinned shard writes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use meridian_ingester::error::Result;
use meridian_ingester::store::{BulkSink, ColumnData, DuplicateKey, Store, TableColumn, TableInfo};
use meridian_ingester::{Column, Error, PushMode, TimeRange, Timespec, Value};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A row as materialized by the store.
pub type StoredRow = (Timespec, Vec<Value>);

#[derive(Debug, Clone, Default)]
struct Counters {
    begun: usize,
    released: usize,
    pushes: usize,
    pinned_releases: usize,
}

#[derive(Debug, Clone)]
struct StoredTable {
    shard_size_secs: i64,
    columns: Vec<Column>,
    rows: Vec<StoredRow>,
}

#[derive(Debug, Clone, Default)]
struct State {
    tables: HashMap<String, StoredTable>,
    counters: Counters,
    fail_next_push: bool,
}

/// In-memory Meridian store double.
#[derive(Clone, Default)]
pub struct MemStore {
    state: Arc<RwLock<State>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of `table` whose timestamp falls in `range`, ordered by
    /// timestamp.
    pub fn scan(&self, table: &str, range: &TimeRange) -> Vec<StoredRow> {
        let state = self.state.read();
        let Some(stored) = state.tables.get(table) else {
            return Vec::new();
        };
        let mut rows: Vec<StoredRow> = stored
            .rows
            .iter()
            .filter(|(ts, _)| range_contains(range, ts))
            .cloned()
            .collect();
        rows.sort_by_key(|(ts, _)| *ts);
        rows
    }

    /// All rows of `table`, ordered by timestamp.
    pub fn scan_all(&self, table: &str) -> Vec<StoredRow> {
        self.scan(table, &TimeRange::UNIVERSE)
    }

    /// Make the next push fail with a store error.
    pub fn fail_next_push(&self) {
        self.state.write().fail_next_push = true;
    }

    pub fn transactions_begun(&self) -> usize {
        self.state.read().counters.begun
    }

    pub fn transactions_released(&self) -> usize {
        self.state.read().counters.released
    }

    pub fn pushes(&self) -> usize {
        self.state.read().counters.pushes
    }

    pub fn pinned_memory_releases(&self) -> usize {
        self.state.read().counters.pinned_releases
    }

    /// Every transaction obtained from the store has been released.
    pub fn assert_no_leaks(&self) {
        let state = self.state.read();
        assert_eq!(
            state.counters.begun, state.counters.released,
            "store-side transaction leak"
        );
    }
}

impl Store for MemStore {
    fn create_table(&self, name: &str, shard_size_secs: i64, columns: &[Column]) -> Result<()> {
        if name.starts_with('$') {
            return Err(Error::ReservedAlias {
                name: name.to_string(),
            });
        }

        let mut state = self.state.write();
        if state.tables.contains_key(name) {
            return Err(Error::AliasAlreadyExists {
                name: name.to_string(),
            });
        }
        state.tables.insert(
            name.to_string(),
            StoredTable {
                shard_size_secs,
                columns: columns.to_vec(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn list_columns(&self, name: &str) -> Result<TableInfo> {
        let state = self.state.read();
        state
            .tables
            .get(name)
            .map(|t| TableInfo {
                name: name.to_string(),
                shard_size_secs: t.shard_size_secs,
                columns: t.columns.clone(),
            })
            .ok_or_else(|| Error::AliasNotFound {
                name: name.to_string(),
            })
    }

    fn begin_transaction(
        &self,
        row_counts: &[u64],
        column_counts: &[u64],
    ) -> Result<Box<dyn BulkSink>> {
        assert_eq!(row_counts.len(), column_counts.len());
        self.state.write().counters.begun += 1;
        Ok(Box::new(MemSink::new(row_counts.len())))
    }

    fn push(&self, sink: &mut dyn BulkSink, mode: PushMode) -> Result<()> {
        let sink = sink
            .as_any_mut()
            .downcast_mut::<MemSink>()
            .expect("foreign transaction handle");

        let mut state = self.state.write();
        state.counters.pushes += 1;

        if state.fail_next_push {
            state.fail_next_push = false;
            return Err(Error::Store {
                message: "injected push failure".to_string(),
            });
        }

        // Apply against a copy and commit wholesale: a failed push leaves
        // no table partially written.
        let mut staging = state.tables.clone();
        sink.apply(&mut staging, mode)?;
        state.tables = staging;
        Ok(())
    }

    fn release(&self, sink: Box<dyn BulkSink>) {
        self.state.write().counters.released += 1;
        drop(sink);
    }

    fn release_pinned_memory(&self) {
        self.state.write().counters.pinned_releases += 1;
    }
}

#[derive(Debug, Default)]
struct SinkTable {
    name: Option<String>,
    timestamps: Vec<Timespec>,
    columns: HashMap<usize, (String, ColumnData)>,
    truncate_ranges: Option<Vec<TimeRange>>,
    duplicate_key: Option<DuplicateKey>,
}

#[derive(Debug)]
struct PinnedWrite {
    shard_id: i64,
    column_offset: usize,
    time_offsets: Vec<i64>,
    values: ColumnData,
}

/// Transaction handle: records every registration, applied on push.
#[derive(Debug)]
struct MemSink {
    tables: Vec<SinkTable>,
    layout: Vec<TableColumn>,
    pinned: Vec<PinnedWrite>,
}

impl MemSink {
    fn new(table_count: usize) -> Self {
        Self {
            tables: (0..table_count).map(|_| SinkTable::default()).collect(),
            layout: Vec::new(),
            pinned: Vec::new(),
        }
    }

    fn apply(&self, tables: &mut HashMap<String, StoredTable>, mode: PushMode) -> Result<()> {
        if self.pinned.is_empty() {
            self.apply_staged(tables, mode)
        } else {
            self.apply_pinned(tables, mode)
        }
    }

    fn apply_staged(
        &self,
        tables: &mut HashMap<String, StoredTable>,
        mode: PushMode,
    ) -> Result<()> {
        for sink_table in &self.tables {
            let name = sink_table.name.as_deref().ok_or_else(|| Error::Store {
                message: "push before set_table_timestamps".to_string(),
            })?;

            let column_count = sink_table.columns.len();
            let rows: Vec<StoredRow> = sink_table
                .timestamps
                .iter()
                .enumerate()
                .map(|(r, ts)| {
                    let values = (0..column_count)
                        .map(|c| value_at(&sink_table.columns[&c].1, r))
                        .collect();
                    (*ts, values)
                })
                .collect();

            apply_rows(
                tables,
                name,
                rows,
                mode,
                sink_table.truncate_ranges.as_deref(),
                sink_table.duplicate_key.as_ref(),
            )?;
        }
        Ok(())
    }

    fn apply_pinned(
        &self,
        tables: &mut HashMap<String, StoredTable>,
        mode: PushMode,
    ) -> Result<()> {
        // Resolve each flat column offset to (table name, local column
        // index) through the registered layout.
        let mut local_counts: HashMap<&str, usize> = HashMap::new();
        let mut flat: Vec<(&str, usize)> = Vec::with_capacity(self.layout.len());
        for tc in &self.layout {
            let local = local_counts.entry(tc.table.as_str()).or_insert(0);
            flat.push((tc.table.as_str(), *local));
            *local += 1;
        }

        // Group writes by (table, shard).
        #[derive(Default)]
        struct ShardCols<'a> {
            time_offsets: Option<&'a [i64]>,
            columns: HashMap<usize, &'a ColumnData>,
        }
        let mut grouped: HashMap<(&str, i64), ShardCols> = HashMap::new();
        for write in &self.pinned {
            let (table, local) = flat[write.column_offset];
            let entry = grouped.entry((table, write.shard_id)).or_default();
            if let Some(offsets) = entry.time_offsets {
                assert_eq!(offsets, write.time_offsets.as_slice());
            } else {
                entry.time_offsets = Some(&write.time_offsets);
            }
            entry.columns.insert(local, &write.values);
        }

        // Tables participate in layout order; transaction-level truncate and
        // duplicate-key registrations are indexed the same way.
        let mut participating: Vec<&str> = Vec::new();
        for tc in &self.layout {
            let name = tc.table.as_str();
            if !participating.contains(&name) && grouped.keys().any(|(t, _)| *t == name) {
                participating.push(name);
            }
        }

        for (txn_index, name) in participating.iter().enumerate() {
            let stored = tables.get(*name).ok_or_else(|| Error::AliasNotFound {
                name: name.to_string(),
            })?;
            let shard_size = stored.shard_size_secs;
            let column_count = stored.columns.len();

            let mut shards: Vec<i64> = grouped
                .keys()
                .filter(|(t, _)| t == name)
                .map(|(_, s)| *s)
                .collect();
            shards.sort_unstable();

            let mut rows: Vec<StoredRow> = Vec::new();
            for shard_id in shards {
                let cols = &grouped[&(*name, shard_id)];
                let offsets = cols.time_offsets.unwrap();
                for (r, &offset) in offsets.iter().enumerate() {
                    assert!(
                        (0..shard_size * NANOS_PER_SEC).contains(&offset),
                        "time offset {offset} escapes shard of {shard_size}s"
                    );
                    let nanos = shard_id * NANOS_PER_SEC + offset;
                    let ts = Timespec::new(nanos / NANOS_PER_SEC, nanos % NANOS_PER_SEC);
                    let values = (0..column_count)
                        .map(|c| value_at(cols.columns[&c], r))
                        .collect();
                    rows.push((ts, values));
                }
            }

            let sink_table = &self.tables[txn_index];
            apply_rows(
                tables,
                name,
                rows,
                mode,
                sink_table.truncate_ranges.as_deref(),
                sink_table.duplicate_key.as_ref(),
            )?;
        }
        Ok(())
    }
}

impl BulkSink for MemSink {
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn set_column(
        &mut self,
        table_index: usize,
        column_index: usize,
        name: &str,
        values: ColumnData,
    ) -> Result<()> {
        self.tables[table_index]
            .columns
            .insert(column_index, (name.to_string(), values));
        Ok(())
    }

    fn set_table_timestamps(
        &mut self,
        table_index: usize,
        table_name: &str,
        timestamps: &[Timespec],
    ) -> Result<()> {
        let table = &mut self.tables[table_index];
        table.name = Some(table_name.to_string());
        table.timestamps = timestamps.to_vec();
        Ok(())
    }

    fn set_pinned_layout(&mut self, columns: &[TableColumn]) -> Result<()> {
        self.layout = columns.to_vec();
        Ok(())
    }

    fn set_pinned_column(
        &mut self,
        shard_id: i64,
        column_offset: usize,
        time_offsets: &[i64],
        values: ColumnData,
    ) -> Result<()> {
        assert!(
            column_offset < self.layout.len(),
            "pinned column offset outside the registered layout"
        );
        self.pinned.push(PinnedWrite {
            shard_id,
            column_offset,
            time_offsets: time_offsets.to_vec(),
            values,
        });
        Ok(())
    }

    fn set_truncate_ranges(&mut self, table_index: usize, ranges: &[TimeRange]) -> Result<()> {
        self.tables[table_index].truncate_ranges = Some(ranges.to_vec());
        Ok(())
    }

    fn set_duplicate_key(&mut self, table_index: usize, key: &DuplicateKey) -> Result<()> {
        self.tables[table_index].duplicate_key = Some(key.clone());
        Ok(())
    }
}

fn range_contains(range: &TimeRange, ts: &Timespec) -> bool {
    !ts.is_before(&range.begin()) && ts.is_before(&range.end())
}

fn value_at(data: &ColumnData, row: usize) -> Value {
    match data {
        ColumnData::Double(xs) => xs[row].map(Value::Double).unwrap_or(Value::Null),
        ColumnData::Int64(xs) => xs[row].map(Value::Int64).unwrap_or(Value::Null),
        ColumnData::Timestamp(xs) => xs[row].map(Value::Timestamp).unwrap_or(Value::Null),
        ColumnData::String(xs) => xs[row]
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
        ColumnData::Blob(xs) => xs[row].clone().map(Value::Blob).unwrap_or(Value::Null),
    }
}

fn apply_rows(
    tables: &mut HashMap<String, StoredTable>,
    name: &str,
    incoming: Vec<StoredRow>,
    mode: PushMode,
    truncate_ranges: Option<&[TimeRange]>,
    duplicate_key: Option<&DuplicateKey>,
) -> Result<()> {
    let stored = tables.get_mut(name).ok_or_else(|| Error::AliasNotFound {
        name: name.to_string(),
    })?;

    if mode == PushMode::Truncate {
        if let Some(ranges) = truncate_ranges {
            stored
                .rows
                .retain(|(ts, _)| !ranges.iter().any(|r| range_contains(r, ts)));
        }
    }

    for (ts, values) in incoming {
        if let Some(key) = duplicate_key {
            let existing = stored
                .rows
                .iter()
                .position(|held| is_duplicate(key, &stored.columns, held, (&ts, &values)));
            if let Some(at) = existing {
                // Store policy: the later row wins.
                stored.rows[at] = (ts, values);
                continue;
            }
        }
        stored.rows.push((ts, values));
    }

    Ok(())
}

fn is_duplicate(
    key: &DuplicateKey,
    columns: &[Column],
    held: &StoredRow,
    incoming: (&Timespec, &Vec<Value>),
) -> bool {
    match key {
        DuplicateKey::All => held.0 == *incoming.0 && held.1 == *incoming.1,
        DuplicateKey::Columns(names) => names.iter().all(|name| {
            columns
                .iter()
                .position(|c| c.name() == name)
                .map(|i| held.1[i] == incoming.1[i])
                .unwrap_or(false)
        }),
    }
}
