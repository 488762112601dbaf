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

//! Nanosecond-precision time primitives for the Meridian wire protocol.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const NANOS_PER_SEC: i64 = 1_000_000_000;
const MILLIS_PER_SEC: i64 = 1_000;
const NANOS_PER_MILLI: i64 = 1_000_000;

/// Nanosecond precision point in time.
///
/// A reserved sentinel (the "null" timespec) represents an unset instant;
/// it never compares equal to a real instant and is skipped by [`Timespec::min`]
/// and [`Timespec::max`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespec {
    sec: i64,
    nsec: i64,
}

impl Timespec {
    /// The earliest representable instant.
    pub const MIN: Timespec = Timespec { sec: 0, nsec: 0 };

    /// The latest representable instant.
    pub const MAX: Timespec = Timespec {
        sec: i64::MAX,
        nsec: NANOS_PER_SEC - 1,
    };

    /// Create a timespec from seconds and nanoseconds since the Unix epoch.
    ///
    /// Nanoseconds are normalized into `[0, 1e9)`, carrying overflow into the
    /// seconds component so that tuple ordering stays total.
    ///
    /// # Panics
    ///
    /// Panics if either component is negative.
    pub fn new(sec: i64, nsec: i64) -> Self {
        assert!(
            sec >= 0 && nsec >= 0,
            "timespec components must be non-negative (sec: {sec}, nsec: {nsec})"
        );
        Self {
            sec: sec + nsec / NANOS_PER_SEC,
            nsec: nsec % NANOS_PER_SEC,
        }
    }

    /// The sentinel value representing "no instant".
    pub const fn null() -> Self {
        Self { sec: -1, nsec: -1 }
    }

    pub fn is_null(&self) -> bool {
        self.sec < 0
    }

    /// Create a timespec from milliseconds since the Unix epoch.
    pub fn from_millis(msec: i64) -> Self {
        Self::new(msec / MILLIS_PER_SEC, (msec % MILLIS_PER_SEC) * NANOS_PER_MILLI)
    }

    /// The current instant according to `clock`.
    pub fn now_with(clock: &dyn Clock) -> Self {
        clock.now()
    }

    pub fn sec(&self) -> i64 {
        self.sec
    }

    pub fn nsec(&self) -> i64 {
        self.nsec
    }

    pub fn is_before(&self, rhs: &Timespec) -> bool {
        self.sec < rhs.sec || (self.sec == rhs.sec && self.nsec < rhs.nsec)
    }

    /// Returns a copy of this instant with the given duration in seconds added.
    pub fn plus_seconds(&self, seconds: i64) -> Self {
        Self::new(self.sec + seconds, self.nsec)
    }

    /// Returns a copy of this instant with the given duration in nanoseconds added.
    pub fn plus_nanos(&self, nanos: i64) -> Self {
        Self::new(self.sec, self.nsec + nanos)
    }

    /// Returns a copy of this instant with the given duration in seconds deducted.
    ///
    /// # Panics
    ///
    /// Panics if the result would be negative. Deducting more time than the
    /// instant holds is a caller error.
    pub fn minus_seconds(&self, seconds: i64) -> Self {
        Self::new(self.sec - seconds, self.nsec)
    }

    /// Returns a copy of this instant with the given duration in nanoseconds deducted.
    ///
    /// # Panics
    ///
    /// Panics if the result would be negative.
    pub fn minus_nanos(&self, nanos: i64) -> Self {
        let total = self.to_epoch_nanos() - nanos;
        assert!(total >= 0, "timespec underflow deducting {nanos}ns");
        Self::new(total / NANOS_PER_SEC, total % NANOS_PER_SEC)
    }

    /// The smaller of two instants, ignoring null sentinels.
    pub fn min(lhs: Timespec, rhs: Timespec) -> Timespec {
        match (lhs.is_null(), rhs.is_null()) {
            (true, _) => rhs,
            (_, true) => lhs,
            _ => {
                if lhs.is_before(&rhs) {
                    lhs
                } else {
                    rhs
                }
            }
        }
    }

    /// The larger of two instants, ignoring null sentinels.
    pub fn max(lhs: Timespec, rhs: Timespec) -> Timespec {
        match (lhs.is_null(), rhs.is_null()) {
            (true, _) => rhs,
            (_, true) => lhs,
            _ => {
                if rhs.is_before(&lhs) {
                    lhs
                } else {
                    rhs
                }
            }
        }
    }

    /// Number of milliseconds from the epoch of 1970-01-01.
    pub fn to_epoch_millis(&self) -> i64 {
        self.sec * MILLIS_PER_SEC + self.nsec / NANOS_PER_MILLI
    }

    /// Number of nanoseconds from the epoch of 1970-01-01. Used for
    /// offset-within-shard arithmetic.
    pub fn to_epoch_nanos(&self) -> i64 {
        self.sec * NANOS_PER_SEC + self.nsec
    }
}

impl From<SystemTime> for Timespec {
    fn from(value: SystemTime) -> Self {
        // SystemTime before the epoch has no representation on the wire.
        let elapsed = value
            .duration_since(UNIX_EPOCH)
            .expect("system time predates the Unix epoch");
        Self::new(elapsed.as_secs() as i64, i64::from(elapsed.subsec_nanos()))
    }
}

impl fmt::Display for Timespec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timespec (sec: {}, nsec: {})", self.sec, self.nsec)
    }
}

/// Time source capability. Injected wherever "now" is needed so that time
/// can be controlled in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timespec;
}

/// Default [`Clock`] backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> Timespec {
        Timespec::from(SystemTime::now())
    }
}

/// Half-open time interval `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    begin: Timespec,
    end: Timespec,
}

impl TimeRange {
    /// Time range that spans the universal set of all representable time.
    pub const UNIVERSE: TimeRange = TimeRange {
        begin: Timespec::MIN,
        end: Timespec::MAX,
    };

    /// Create a new half-open range.
    ///
    /// # Panics
    ///
    /// Panics when `end` lies before `begin`.
    pub fn new(begin: Timespec, end: Timespec) -> Self {
        assert!(
            !end.is_before(&begin),
            "time range must satisfy begin <= end, got begin({begin}) and end({end})"
        );
        Self { begin, end }
    }

    /// The empty sentinel range; merging an instant into it yields a range
    /// around that single instant.
    pub const fn null() -> Self {
        Self {
            begin: Timespec::null(),
            end: Timespec::null(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.begin.is_null() && self.end.is_null()
    }

    pub fn begin(&self) -> Timespec {
        self.begin
    }

    pub fn end(&self) -> Timespec {
        self.end
    }

    /// Returns a copy of this range with a different begin.
    pub fn with_begin(&self, begin: Timespec) -> Self {
        Self::new(begin, self.end)
    }

    /// Returns a copy of this range with a different end.
    pub fn with_end(&self, end: Timespec) -> Self {
        Self::new(self.begin, end)
    }

    /// Widens this range as necessary so that it contains `t`.
    pub fn merge(&mut self, t: Timespec) {
        self.begin = Timespec::min(self.begin, t);
        self.end = Timespec::max(self.end, t);
    }

    /// The range that contains both of two ranges.
    pub fn union(lhs: &TimeRange, rhs: &TimeRange) -> TimeRange {
        TimeRange::new(
            Timespec::min(lhs.begin, rhs.begin),
            Timespec::max(lhs.end, rhs.end),
        )
    }

    /// The widest range contained by both of two ranges. Undefined when the
    /// ranges do not overlap.
    pub fn intersect(lhs: &TimeRange, rhs: &TimeRange) -> TimeRange {
        TimeRange::new(
            Timespec::max(lhs.begin, rhs.begin),
            Timespec::min(lhs.end, rhs.end),
        )
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimeRange (begin: {}, end: {})", self.begin, self.end)
    }
}
