// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-item outcomes for batch datastore operations
//!
//! Batch operations process each item independently: one item's failure
//! never rolls back the others.  The aggregate result reports a
//! [`BatchOutcome`] per input item, in input order, and the caller
//! decides how to surface partial failure.

use crate::Error;

/// The outcome of one item in a batch operation
#[derive(Clone, Debug, PartialEq)]
pub struct BatchOutcome {
    /// identifier of the record this outcome refers to
    pub id: String,
    /// `Ok(())` if the item was applied; the item's own error otherwise
    pub result: Result<(), Error>,
}

/// Aggregate result of a batch operation
///
/// This is intentionally not a `Result`: a batch that partially failed is
/// still a completed batch.  Callers that want all-or-nothing semantics
/// must check [`BatchResults::ok()`] themselves.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchResults {
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchResults {
    pub fn with_capacity(n: usize) -> BatchResults {
        BatchResults { outcomes: Vec::with_capacity(n) }
    }

    pub fn push(&mut self, id: &str, result: Result<(), Error>) {
        self.outcomes.push(BatchOutcome { id: id.to_owned(), result });
    }

    /// Returns true if every item in the batch succeeded
    pub fn ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Returns the ids of items that failed, with their errors
    pub fn failures(&self) -> Vec<(&str, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|o| {
                o.result.as_ref().err().map(|e| (o.id.as_str(), e))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}
