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

//! Client-side staging engine for bulk-writing rows into Meridian, a
//! columnar, time-sharded time-series store.
//!
//! Rows (a timestamp plus one value per column) are appended in arbitrary
//! order across one or more tables, accumulated in memory pivoted into
//! column-oriented buffers, and handed to the store's bulk-ingest interface
//! in a single transactional push.
//!
//! # Components
//!
//! - [`Timespec`] / [`TimeRange`]: nanosecond instants and half-open
//!   intervals
//! - [`Value`] / [`Column`] / [`Table`]: cell values and table schema
//! - [`Writer`]: append → prepare → push → reset staging lifecycle
//! - [`PinnedWriter`]: variant that pre-buckets rows by the store's
//!   physical time-shard boundaries
//! - [`store::Store`]: the bulk-ingest interface of the storage engine,
//!   provided by the connectivity layer
//!
//! # Example
//!
//! ```rust,ignore
//! use meridian_ingester::{Column, Session, Table, Timespec, Value, Writer};
//!
//! let session = Session::new(store);
//! let table = Table::create(
//!     &session,
//!     "prices.eurusd",
//!     vec![Column::double("open"), Column::int64("volume")],
//!     meridian_ingester::DEFAULT_SHARD_SIZE,
//! )?;
//!
//! let mut writer = Writer::builder(&session).table(table).build()?;
//! writer.append(Timespec::new(1000, 0), vec![Value::from(3.5), Value::from(100i64)])?;
//! writer.flush()?;
//! ```

pub mod error;
pub mod pinned;
pub mod session;
mod staged;
pub mod store;
pub mod table;
pub mod time;
pub mod value;
pub mod writer;

pub use error::{Error, Result};
pub use pinned::PinnedWriter;
pub use session::Session;
pub use store::{ColumnData, DuplicateKey, PushMode, Store, TableInfo};
pub use table::{Column, Table, WritableRow, DEFAULT_SHARD_SIZE};
pub use time::{Clock, TimeRange, Timespec, WallClock};
pub use value::{ColumnType, Value};
pub use writer::{AutoFlushWriter, Writer, WriterBuilder, WriterOptions};
