// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scoped access control for the Vigil data-access layer
//!
//! This crate provides the authorization context that every datastore
//! operation carries: the [`authz::AccessScope`] describing what a caller
//! may see and change, and the [`context::OpContext`] that attaches that
//! scope (plus a logger) to an operation in flight.
//!
//! See the [`authz`] module documentation for how scope evaluation works.

pub mod authz;
pub mod context;

pub use context::OpContext;
