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

//! Per-table staging buffer: accumulates appended rows pre-pivoted into
//! column-oriented arrays so that serialization at flush time is a straight
//! per-column conversion.

use std::sync::Arc;

use crate::error::{IncompatibleTypeSnafu, InvalidColumnCountSnafu, Result};
use crate::store::{BulkSink, ColumnData};
use crate::table::Column;
use crate::time::{TimeRange, Timespec};
use crate::value::{ColumnType, Value};

/// Column-major accumulation of one table's appended rows: a shared
/// timestamp array plus one value array per column, all of equal length.
#[derive(Debug)]
pub(crate) struct StagedTable {
    columns: Arc<Vec<Column>>,
    timestamps: Vec<Timespec>,
    values_by_column: Vec<Vec<Value>>,
}

impl StagedTable {
    pub(crate) fn new(columns: Arc<Vec<Column>>) -> Self {
        let values_by_column = (0..columns.len()).map(|_| Vec::new()).collect();
        Self {
            columns,
            timestamps: Vec::new(),
            values_by_column,
        }
    }

    pub(crate) fn row_count(&self) -> usize {
        self.timestamps.len()
    }

    pub(crate) fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Append one row, pivoting it into the column arrays. Rows arrive in
    /// row-oriented fashion; storing them column-oriented here means the
    /// flush path can hand each column to the store as one contiguous array.
    pub(crate) fn append(&mut self, timestamp: Timespec, values: Vec<Value>) -> Result<()> {
        if values.len() != self.columns.len() {
            return InvalidColumnCountSnafu {
                expected: self.columns.len(),
                actual: values.len(),
            }
            .fail();
        }

        self.timestamps.push(timestamp);
        for (column, value) in self.values_by_column.iter_mut().zip(values) {
            column.push(value);
            debug_assert_eq!(column.len(), self.timestamps.len());
        }

        Ok(())
    }

    /// Register every column, the shared timestamp array and (for truncate
    /// pushes) the replacement ranges with an open transaction.
    pub(crate) fn to_wire(
        &self,
        sink: &mut dyn BulkSink,
        table_index: usize,
        table_name: &str,
        truncate_ranges: Option<&[TimeRange]>,
    ) -> Result<()> {
        for (column_index, column) in self.columns.iter().enumerate() {
            let values = column_to_wire(
                column.column_type(),
                &self.values_by_column[column_index],
            )?;
            sink.set_column(table_index, column_index, column.name(), values)?;
        }

        sink.set_table_timestamps(table_index, table_name, &self.timestamps)?;

        if let Some(ranges) = truncate_ranges {
            sink.set_truncate_ranges(table_index, ranges)?;
        }

        Ok(())
    }
}

/// Convert one column's staged values into the typed encoding the store
/// ingests. Null cells become `None`; a non-null cell whose tag mismatches
/// the declared column type is an `IncompatibleType` error.
pub(crate) fn column_to_wire(column_type: ColumnType, values: &[Value]) -> Result<ColumnData> {
    fn cells<'a, T, F>(
        column_type: ColumnType,
        values: &'a [Value],
        get: F,
    ) -> Result<Vec<Option<T>>>
    where
        F: Fn(&'a Value) -> Option<T>,
    {
        values
            .iter()
            .map(|v| match v {
                Value::Null => Ok(None),
                other => match get(other) {
                    Some(x) => Ok(Some(x)),
                    None => IncompatibleTypeSnafu {
                        expected: column_type,
                        actual: other.type_name(),
                    }
                    .fail(),
                },
            })
            .collect()
    }

    Ok(match column_type {
        ColumnType::Double => ColumnData::Double(cells(column_type, values, |v| match v {
            Value::Double(x) => Some(*x),
            _ => None,
        })?),
        ColumnType::Int64 => ColumnData::Int64(cells(column_type, values, |v| match v {
            Value::Int64(x) => Some(*x),
            _ => None,
        })?),
        ColumnType::Timestamp => ColumnData::Timestamp(cells(column_type, values, |v| match v {
            Value::Timestamp(x) => Some(*x),
            _ => None,
        })?),
        // Symbol columns carry string payloads on the wire.
        ColumnType::String | ColumnType::Symbol => {
            ColumnData::String(cells(column_type, values, |v| match v {
                Value::String(x) => Some(x.clone()),
                _ => None,
            })?)
        }
        ColumnType::Blob => ColumnData::Blob(cells(column_type, values, |v| match v {
            Value::Blob(x) => Some(x.clone()),
            _ => None,
        })?),
    })
}
