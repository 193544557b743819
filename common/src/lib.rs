// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types shared by every component of the Vigil data-access layer
//!
//! This crate is deliberately small: the common error type, the result
//! aliases used by datastore-facing functions, the set of resource kinds
//! under access control, and the per-item outcome type for batch
//! operations.  Anything specific to authorization lives in `vigil-auth`;
//! anything specific to storage or search lives in `vigil-datastore`.

mod batch;
mod error;

pub use batch::BatchOutcome;
pub use batch::BatchResults;
pub use error::Error;
pub use error::InternalContext;
pub use error::LookupType;

use serde::Deserialize;
use serde::Serialize;

/// Result of a create operation for the specified type
pub type CreateResult<T> = Result<T, Error>;
/// Result of a delete operation for the specified type
pub type DeleteResult = Result<(), Error>;
/// Result of a list operation that returns a vector
pub type ListResultVec<T> = Result<Vec<T>, Error>;
/// Result of a lookup operation for the specified type
pub type LookupResult<T> = Result<T, Error>;
/// Result of an update operation for the specified type
pub type UpdateResult<T> = Result<T, Error>;

/// Kinds of resources under scoped access control
///
/// Each kind corresponds to one datastore composition.  The set is fixed
/// by the system; grants and scope checks are always expressed against a
/// kind from this list.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    strum::Display,
    strum::EnumIter,
)]
pub enum ResourceKind {
    Alert,
    Deployment,
    Image,
    ImageComponent,
    Vulnerability,
    Risk,
}
