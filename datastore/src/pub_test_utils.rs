// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared test fixtures: in-memory backends and scoped contexts
//!
//! Everything here is for tests (this crate's and downstream crates',
//! via the `testing` feature).  The in-memory backends implement the
//! real [`Storage`]/[`Searcher`]/[`Indexer`] contracts, including the
//! "backends are scope-oblivious" rule, so datastore tests exercise the
//! same code paths production backends would.

use crate::search::BaseQuery;
use crate::search::FieldLabel;
use crate::search::Indexer;
use crate::search::Query;
use crate::search::SearchResult;
use crate::search::Searcher;
use crate::search::SortOption;
use crate::storage::ResourceRecord;
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use slog::Drain;
use slog::Logger;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use vigil_auth::authz::AccessLevel;
use vigil_auth::authz::AccessScope;
use vigil_auth::authz::ResourceKind;
use vigil_auth::authz::ScopeKey;
use vigil_auth::authz::ScopeRule;
use vigil_auth::OpContext;
use vigil_common::Error;
use vigil_common::ListResultVec;
use vigil_common::LookupResult;

/// Logger that writes through the test harness's captured stdout
pub fn test_logger() -> Logger {
    let decorator =
        slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    Logger::root(drain, o!())
}

/// Context wielding a single allow rule, for exercising partial scopes
pub fn scoped_opctx(
    kinds: Vec<ResourceKind>,
    level: AccessLevel,
    keys: Vec<ScopeKey>,
) -> OpContext {
    let scope =
        AccessScope::from_rules(vec![ScopeRule::allow(kinds, level, keys)])
            .unwrap();
    OpContext::for_request(test_logger(), Arc::new(scope))
}

/// A searcher that matches nothing, for decorator plumbing tests
pub struct NullSearcher;

#[async_trait]
impl Searcher for NullSearcher {
    async fn search(
        &self,
        _opctx: &OpContext,
        _query: &Query,
    ) -> ListResultVec<SearchResult> {
        Ok(Vec::new())
    }

    async fn count(
        &self,
        _opctx: &OpContext,
        _query: &Query,
    ) -> LookupResult<usize> {
        Ok(0)
    }
}

/// In-memory [`Storage`] backend with one-shot failure injection
pub struct MemStore<R> {
    records: tokio::sync::RwLock<BTreeMap<String, R>>,
    fail_next: Mutex<Option<String>>,
}

impl<R: ResourceRecord> MemStore<R> {
    pub fn new() -> MemStore<R> {
        MemStore {
            records: tokio::sync::RwLock::new(BTreeMap::new()),
            fail_next: Mutex::new(None),
        }
    }

    /// Makes the next storage call fail with `ServiceUnavailable`
    pub fn fail_next(&self, message: &str) {
        *self.fail_next.lock().unwrap() = Some(message.to_owned());
    }

    fn take_injected_failure(&self) -> Result<(), Error> {
        match self.fail_next.lock().unwrap().take() {
            Some(message) => Err(Error::unavail(&message)),
            None => Ok(()),
        }
    }
}

impl<R: ResourceRecord> Default for MemStore<R> {
    fn default() -> Self {
        MemStore::new()
    }
}

#[async_trait]
impl<R: ResourceRecord + 'static> Storage<R> for MemStore<R> {
    async fn get(&self, id: &str) -> Result<Option<R>, Error> {
        self.take_injected_failure()?;
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn get_many(
        &self,
        ids: &[&str],
    ) -> Result<(Vec<R>, Vec<usize>), Error> {
        self.take_injected_failure()?;
        let records = self.records.read().await;
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for (index, id) in ids.iter().enumerate() {
            match records.get(*id) {
                Some(record) => found.push(record.clone()),
                None => missing.push(index),
            }
        }
        Ok((found, missing))
    }

    async fn upsert(&self, record: &R) -> Result<(), Error> {
        self.take_injected_failure()?;
        self.records
            .write()
            .await
            .insert(record.id().to_owned(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), Error> {
        self.take_injected_failure()?;
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn walk(
        &self,
        visit: &mut (dyn for<'a> FnMut(&'a R) -> bool + Send),
    ) -> Result<(), Error> {
        self.take_injected_failure()?;
        for record in self.records.read().await.values() {
            if !visit(record) {
                break;
            }
        }
        Ok(())
    }
}

/// In-memory search backend: [`Indexer`] plus [`Searcher`]
///
/// Scope-oblivious by contract: it returns whatever matches the query
/// it was handed.  Iteration order (and thus unsorted result order) is
/// id order.
pub struct MemSearcher<R> {
    records: RwLock<BTreeMap<String, R>>,
}

impl<R: ResourceRecord> MemSearcher<R> {
    pub fn new() -> MemSearcher<R> {
        MemSearcher { records: RwLock::new(BTreeMap::new()) }
    }

    /// Drops all indexed state, as if the index were lost
    pub fn clear(&self) {
        self.records.write().unwrap().clear();
    }

    fn matches(base: &BaseQuery, record: &R) -> bool {
        match base {
            BaseQuery::MatchNone => false,
            BaseQuery::MatchAll => true,
            BaseQuery::Match { field, value } => {
                record.field_value(*field).as_deref() == Some(value)
            }
            BaseQuery::Conjunction(queries) => {
                queries.iter().all(|q| Self::matches(q, record))
            }
            BaseQuery::Disjunction(queries) => {
                queries.iter().any(|q| Self::matches(q, record))
            }
        }
    }

    fn compare(a: &R, b: &R, sort: &[SortOption]) -> Ordering {
        for option in sort {
            let ordering = if option.field == FieldLabel::RiskScore {
                a.risk_score()
                    .unwrap_or(0.0)
                    .total_cmp(&b.risk_score().unwrap_or(0.0))
            } else {
                a.field_value(option.field).cmp(&b.field_value(option.field))
            };
            let ordering =
                if option.reverse { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.id().cmp(b.id())
    }
}

impl<R: ResourceRecord> Default for MemSearcher<R> {
    fn default() -> Self {
        MemSearcher::new()
    }
}

#[async_trait]
impl<R: ResourceRecord + 'static> Indexer<R> for MemSearcher<R> {
    async fn index(
        &self,
        _opctx: &OpContext,
        record: &R,
    ) -> Result<(), Error> {
        self.records
            .write()
            .unwrap()
            .insert(record.id().to_owned(), record.clone());
        Ok(())
    }

    async fn remove(
        &self,
        _opctx: &OpContext,
        id: &str,
    ) -> Result<(), Error> {
        self.records.write().unwrap().remove(id);
        Ok(())
    }
}

#[async_trait]
impl<R: ResourceRecord + 'static> Searcher for MemSearcher<R> {
    async fn search(
        &self,
        _opctx: &OpContext,
        query: &Query,
    ) -> ListResultVec<SearchResult> {
        let records = self.records.read().unwrap();
        let mut hits: Vec<&R> = records
            .values()
            .filter(|record| Self::matches(&query.base, record))
            .collect();
        hits.sort_by(|a, b| Self::compare(a, b, &query.sort));

        let offset = query.offset.unwrap_or(0) as usize;
        let hits = hits.into_iter().skip(offset);
        let hits: Vec<&R> = match query.limit {
            Some(limit) => hits.take(limit as usize).collect(),
            None => hits.collect(),
        };

        Ok(hits
            .into_iter()
            .map(|record| {
                let mut result = SearchResult::new(record.id());
                for field in &query.return_fields {
                    if let Some(value) = record.field_value(*field) {
                        result.matches.insert(*field, value);
                    }
                }
                result
            })
            .collect())
    }

    async fn count(
        &self,
        _opctx: &OpContext,
        query: &Query,
    ) -> LookupResult<usize> {
        let records = self.records.read().unwrap();
        Ok(records
            .values()
            .filter(|record| Self::matches(&query.base, record))
            .count())
    }
}

static CREATED_SEQ: AtomicI64 = AtomicI64::new(0);

/// A minimal stored kind for datastore tests
///
/// `merge_existing` accumulates `counter`, which lets tests detect lost
/// updates under concurrent upserts of the same id.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TestAlert {
    pub id: String,
    pub cluster_id: String,
    pub namespace: Option<String>,
    pub state: String,
    pub severity: String,
    pub created: DateTime<Utc>,
    pub counter: u64,
    pub risk_score: Option<f64>,
}

impl TestAlert {
    pub fn new(
        id: &str,
        cluster: &str,
        namespace: Option<&str>,
    ) -> TestAlert {
        let seq = CREATED_SEQ
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        TestAlert {
            id: id.to_owned(),
            cluster_id: cluster.to_owned(),
            namespace: namespace.map(str::to_owned),
            state: "ACTIVE".to_owned(),
            severity: "HIGH".to_owned(),
            created: DateTime::from_timestamp(1_700_000_000 + seq, 0)
                .unwrap(),
            counter: 0,
            risk_score: None,
        }
    }
}

impl ResourceRecord for TestAlert {
    const KIND: ResourceKind = ResourceKind::Alert;

    fn id(&self) -> &str {
        &self.id
    }

    fn scope_key(&self) -> Option<ScopeKey> {
        match &self.namespace {
            Some(namespace) => Some(ScopeKey::namespace(
                self.cluster_id.clone(),
                namespace.clone(),
            )),
            None => Some(ScopeKey::cluster(self.cluster_id.clone())),
        }
    }

    fn risk_score(&self) -> Option<f64> {
        self.risk_score
    }

    fn field_value(&self, field: FieldLabel) -> Option<String> {
        match field {
            FieldLabel::ClusterId => Some(self.cluster_id.clone()),
            FieldLabel::Namespace => self.namespace.clone(),
            FieldLabel::ViolationState => Some(self.state.clone()),
            FieldLabel::Severity => Some(self.severity.clone()),
            FieldLabel::CreatedTime => Some(self.created.to_rfc3339()),
            FieldLabel::RiskScore => {
                self.risk_score.map(|score| format!("{:.6}", score))
            }
            _ => None,
        }
    }

    fn merge_existing(&mut self, existing: &Self) {
        self.counter += existing.counter;
    }
}

#[cfg(test)]
mod test {
    use super::MemStore;
    use super::TestAlert;
    use crate::storage::Storage;

    // The visitor borrows each record from inside the store's lock, so
    // the callback must accept a borrow of any lifetime.
    #[tokio::test]
    async fn test_mem_store_walk_visits_and_stops_early() {
        let store = MemStore::new();
        for id in ["a1", "a2", "a3"] {
            store
                .upsert(&TestAlert::new(id, "c1", Some("web")))
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        store
            .walk(&mut |record: &TestAlert| {
                seen.push(record.id.clone());
                true
            })
            .await
            .unwrap();
        assert_eq!(seen, vec!["a1", "a2", "a3"]);

        let mut visited = 0;
        store
            .walk(&mut |_record: &TestAlert| {
                visited += 1;
                false
            })
            .await
            .unwrap();
        assert_eq!(visited, 1);
    }
}
