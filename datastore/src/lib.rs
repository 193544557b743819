// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scope-authorized search and data access for security findings
//!
//! This crate provides the generic composition every resource kind
//! (alerts, images, components, vulnerabilities, risk records) is built
//! from:
//!
//! * [`storage::Storage`] - the narrow interface to a physical store
//!   (CRUD by id, batch get, full walk); engines live elsewhere.
//! * [`search::Searcher`] - the narrow interface to a search backend,
//!   made scope-safe by [`search::SearchHelper`] and composed with the
//!   pagination/default-sort/default-predicate decorators.
//! * [`ranker::Ranker`] - the in-memory score-to-rank index used to
//!   annotate entities with a stable relative priority.
//! * [`datastore::DataStore`] - the per-kind composition of the above,
//!   with authorization applied at the write boundary and at the read
//!   result boundary.
//! * [`risk`] - the risk aggregator, a derived consumer of the datastore
//!   pattern.
//!
//! Authorization semantics live in `vigil-auth`; every operation here
//! takes an [`vigil_auth::OpContext`] and enforces the caller's access
//! scope uniformly, regardless of which storage or search backend is
//! plugged in underneath.

#[macro_use]
extern crate slog;

pub mod datastore;
pub mod keyed_lock;
pub mod ranker;
pub mod risk;
pub mod search;
pub mod storage;

#[cfg(any(test, feature = "testing"))]
pub mod pub_test_utils;
