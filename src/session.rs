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

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::error::{Result, SessionClosedSnafu};
use crate::store::Store;
use crate::time::{Clock, Timespec, WallClock};

/// Handle on an established connection with a Meridian store.
///
/// Cheap to clone; all clones share the same underlying store connection and
/// closed state. Every operation that would touch the store checks
/// [`Session::ensure_open`] first.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    store: Box<dyn Store>,
    clock: Box<dyn Clock>,
    closed: RwLock<bool>,
}

impl Session {
    /// Create a session over an established store connection, using the
    /// wall clock as time source.
    pub fn new(store: impl Store + 'static) -> Self {
        Self::with_clock(store, WallClock)
    }

    /// Create a session with an injected [`Clock`], so that "now" can be
    /// controlled in tests.
    pub fn with_clock(store: impl Store + 'static, clock: impl Clock + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: Box::new(store),
                clock: Box::new(clock),
                closed: RwLock::new(false),
            }),
        }
    }

    /// The current instant according to this session's clock.
    pub fn now(&self) -> Timespec {
        self.inner.clock.now()
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.read()
    }

    /// Fails with `SessionClosed` when [`Session::close`] has been called.
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            warn!("session invoked while closed");
            return SessionClosedSnafu.fail();
        }
        Ok(())
    }

    /// Close the session. Safe to call multiple times; subsequent store
    /// operations fail with `SessionClosed`.
    pub fn close(&self) {
        let mut closed = self.inner.closed.write();
        *closed = true;
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.inner.store.as_ref()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("closed", &self.is_closed())
            .finish()
    }
}
