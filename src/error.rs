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

use snafu::{Location, Snafu};

use crate::value::ColumnType;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid argument: {}", reason))]
    InvalidArgument {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid column count: expected {}, got {}", expected, actual))]
    InvalidColumnCount {
        expected: usize,
        actual: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "Incompatible value type: column expects {:?}, value holds {}",
        expected,
        actual
    ))]
    IncompatibleType {
        expected: ColumnType,
        actual: &'static str,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Table not found: {}", name))]
    AliasNotFound { name: String },

    #[snafu(display("Table already exists: {}", name))]
    AliasAlreadyExists { name: String },

    #[snafu(display("Name is in a reserved namespace: {}", name))]
    ReservedAlias { name: String },

    #[snafu(display("Session is closed"))]
    SessionClosed {
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Illegal writer state: {}", reason))]
    IllegalWriterState {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },

    // Failure reported by the store itself (resource exhaustion, transport,
    // push rejection). Surfaced unchanged, no retry is attempted.
    #[snafu(display("Store error: {}", message))]
    Store { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Indicate if the error is retriable
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_retriable() {
        let err = Error::Store {
            message: "connection reset".to_string(),
        };
        assert!(err.is_retriable());
    }

    #[test]
    fn argument_errors_are_not_retriable() {
        let err = InvalidColumnCountSnafu {
            expected: 3usize,
            actual: 2usize,
        }
        .build();
        assert!(!err.is_retriable());
        assert_eq!(err.to_string(), "Invalid column count: expected 3, got 2");
    }
}
