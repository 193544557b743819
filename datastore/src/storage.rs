// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Traits connecting domain records to storage backends
//!
//! [`ResourceRecord`] is what a stored type must expose for the
//! datastore layer to enforce scope, index, and rank it.  [`Storage`]
//! is the minimal key-value contract a backend implements; everything
//! scope-related lives above it, in [`crate::datastore::DataStore`].

use async_trait::async_trait;
use vigil_auth::authz::ScopeKey;
use vigil_common::Error;
use vigil_common::ResourceKind;
use crate::search::FieldLabel;

/// A record the datastore layer can store, scope-check, and index
pub trait ResourceRecord:
    Clone + Send + Sync + serde::Serialize + serde::de::DeserializeOwned
{
    /// Which resource kind's scope tree governs this record
    const KIND: ResourceKind;

    /// Stable identifier (an image digest, a CVE name, an alert id)
    fn id(&self) -> &str;

    /// The record's position in the scope hierarchy
    ///
    /// `None` means the record is global: only unrestricted scopes may
    /// see or write it.  A `ScopeKey::Cluster` record is cluster-scoped
    /// and is never reachable through namespace-limited grants.
    fn scope_key(&self) -> Option<ScopeKey>;

    /// Risk score to feed the ranker, if this kind is ranked
    fn risk_score(&self) -> Option<f64> {
        None
    }

    /// Indexed field value, used by in-memory search and post-filter
    fn field_value(&self, field: FieldLabel) -> Option<String>;

    /// Folds state from the previously stored copy into `self`
    ///
    /// Called under the per-id keyed lock during upsert, before the
    /// write.  The default keeps the incoming record as-is.
    fn merge_existing(&mut self, _existing: &Self) {}
}

/// Backend storage contract: plain keyed reads and writes
///
/// Implementations perform no authorization.  Scope enforcement is the
/// datastore layer's job; backends must stay oblivious to it so they
/// can be swapped and composed freely.
#[async_trait]
pub trait Storage<R: ResourceRecord>: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<R>, Error>;

    /// Fetches many records, preserving request order
    ///
    /// Returns the found records plus the indices (into `ids`) of the
    /// ones that were absent.
    async fn get_many(
        &self,
        ids: &[&str],
    ) -> Result<(Vec<R>, Vec<usize>), Error>;

    async fn upsert(&self, record: &R) -> Result<(), Error>;

    async fn delete(&self, id: &str) -> Result<(), Error>;

    /// Visits every stored record
    ///
    /// The callback returns `false` to stop early.  Used for index
    /// rebuilds; no ordering is guaranteed.
    async fn walk(
        &self,
        visit: &mut (dyn for<'a> FnMut(&'a R) -> bool + Send),
    ) -> Result<(), Error>;
}
