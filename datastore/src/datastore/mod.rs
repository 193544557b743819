// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`]: scope-enforcing facade over storage, search, and rank
//!
//! All access to stored records goes through this layer.  It composes a
//! scope-oblivious [`Storage`] backend, an [`Indexer`], a raw searcher
//! (wrapped into a scope-enforcing one at construction), and optionally
//! a [`Ranker`], and applies the caller's [`OpContext`] scope uniformly:
//!
//! * read paths translate denial into absence (`Ok(None)`, missing
//!   batch entries, filtered search results) so a caller cannot
//!   distinguish "denied" from "does not exist";
//! * write paths fail loudly with [`Error::Forbidden`].
//!
//! Upserts take a per-id keyed lock so that read-modify-write merges
//! are serialized per record while distinct records proceed
//! concurrently.

use crate::keyed_lock::KeyedMutex;
use crate::ranker::Ranker;
use crate::search::FieldLabel;
use crate::search::Indexer;
use crate::search::PaginatedSearcher;
use crate::search::Query;
use crate::search::SearchHelper;
use crate::search::SearchResult;
use crate::search::Searcher;
use crate::storage::ResourceRecord;
use crate::storage::Storage;
use slog::Logger;
use std::sync::Arc;
use tokio::sync::watch;
use vigil_auth::authz::AccessLevel;
use vigil_auth::authz::ScopeKey;
use vigil_auth::OpContext;
use vigil_common::BatchResults;
use vigil_common::DeleteResult;
use vigil_common::Error;
use vigil_common::InternalContext;
use vigil_common::ListResultVec;
use vigil_common::LookupResult;
use vigil_common::UpdateResult;

/// What a deletion requires of the caller's scope
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeletePolicy {
    /// ReadWrite on the record's own scope key suffices
    ScopedReadWrite,
    /// Only an unrestricted ReadWrite scope may delete, regardless of
    /// the record's position in the hierarchy
    RequireUnrestricted,
}

/// Completion handle for a background index build
///
/// Dropping the handle does not cancel the build.
pub struct IndexBuildHandle {
    rx: watch::Receiver<Option<Result<(), Error>>>,
}

impl IndexBuildHandle {
    /// Waits until the build finishes, propagating its outcome
    pub async fn wait_ready(mut self) -> Result<(), Error> {
        loop {
            if let Some(outcome) = self.rx.borrow().clone() {
                return outcome;
            }
            if self.rx.changed().await.is_err() {
                return Err(Error::internal_error(
                    "index build task exited without reporting",
                ));
            }
        }
    }
}

/// Scope-enforcing datastore for one resource kind
pub struct DataStore<R: ResourceRecord> {
    log: Logger,
    storage: Arc<dyn Storage<R>>,
    indexer: Arc<dyn Indexer<R>>,
    searcher: Arc<dyn Searcher>,
    ranker: Option<Arc<Ranker>>,
    locks: KeyedMutex,
    delete_policy: DeletePolicy,
}

/// Assembles a [`DataStore`] from its parts
///
/// The raw searcher handed in here is scope-oblivious; `build` wraps it
/// with the helper's enforcement strategy, so no unscoped searcher ever
/// escapes this module.  Default-sort and default-predicate decorators
/// go through [`DataStoreBuilder::decorate`], which layers them over
/// the scoped searcher; wrapping them under the scope filter would let
/// an inner page clamp the unpaginated fetch the post-filter strategy
/// depends on.  `build` always puts a [`PaginatedSearcher`] outermost,
/// so no query reaches the backend without a limit.
pub struct DataStoreBuilder<R: ResourceRecord> {
    log: Logger,
    helper: SearchHelper,
    storage: Arc<dyn Storage<R>>,
    indexer: Arc<dyn Indexer<R>>,
    raw_searcher: Arc<dyn Searcher>,
    decorate: Option<SearcherDecorator>,
    page_limits: Option<(u64, u64)>,
    ranker: Option<Arc<Ranker>>,
    lock_pool_size: Option<usize>,
    delete_policy: DeletePolicy,
}

type SearcherDecorator =
    Box<dyn FnOnce(Arc<dyn Searcher>) -> Arc<dyn Searcher> + Send>;

impl<R: ResourceRecord> DataStoreBuilder<R> {
    pub fn new(
        log: Logger,
        helper: SearchHelper,
        storage: Arc<dyn Storage<R>>,
        indexer: Arc<dyn Indexer<R>>,
        raw_searcher: Arc<dyn Searcher>,
    ) -> DataStoreBuilder<R> {
        DataStoreBuilder {
            log,
            helper,
            storage,
            indexer,
            raw_searcher,
            decorate: None,
            page_limits: None,
            ranker: None,
            lock_pool_size: None,
            delete_policy: DeletePolicy::ScopedReadWrite,
        }
    }

    /// Stacks decorators over the scope-filtered searcher
    ///
    /// The closure receives the scoped searcher and returns the
    /// decorated stack; pagination is applied on top of whatever it
    /// returns.
    pub fn decorate<F>(mut self, decorate: F) -> Self
    where
        F: FnOnce(Arc<dyn Searcher>) -> Arc<dyn Searcher>
            + Send
            + 'static,
    {
        self.decorate = Some(Box::new(decorate));
        self
    }

    /// Overrides the default and maximum page sizes
    pub fn page_limits(mut self, default: u64, max: u64) -> Self {
        self.page_limits = Some((default, max));
        self
    }

    pub fn ranker(mut self, ranker: Arc<Ranker>) -> Self {
        self.ranker = Some(ranker);
        self
    }

    pub fn delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    pub fn lock_pool_size(mut self, size: usize) -> Self {
        self.lock_pool_size = Some(size);
        self
    }

    pub fn build(self) -> DataStore<R> {
        let scoped = self.helper.filtered_searcher(self.raw_searcher);
        let decorated = match self.decorate {
            Some(decorate) => decorate(scoped),
            None => scoped,
        };
        let searcher: Arc<dyn Searcher> = match self.page_limits {
            Some((default, max)) => Arc::new(
                PaginatedSearcher::with_limits(decorated, default, max),
            ),
            None => Arc::new(PaginatedSearcher::new(decorated)),
        };
        let locks = match self.lock_pool_size {
            Some(size) => KeyedMutex::new(size),
            None => KeyedMutex::default(),
        };
        DataStore {
            log: self.log.new(o!("resource_kind" => R::KIND.to_string())),
            storage: self.storage,
            indexer: self.indexer,
            searcher,
            ranker: self.ranker,
            locks,
            delete_policy: self.delete_policy,
        }
    }
}

fn scope_keys<R: ResourceRecord>(record: &R) -> Vec<ScopeKey> {
    record.scope_key().into_iter().collect()
}

impl<R: ResourceRecord + 'static> DataStore<R> {
    /// Searches within the caller's scope
    pub async fn search(
        &self,
        opctx: &OpContext,
        query: &Query,
    ) -> ListResultVec<SearchResult> {
        self.searcher.search(opctx, query).await
    }

    /// Counts matches within the caller's scope
    pub async fn count(
        &self,
        opctx: &OpContext,
        query: &Query,
    ) -> LookupResult<usize> {
        self.searcher.count(opctx, query).await
    }

    /// Like [`DataStore::search`], keeping only the result ids
    pub async fn search_ids(
        &self,
        opctx: &OpContext,
        query: &Query,
    ) -> ListResultVec<String> {
        let results = self.searcher.search(opctx, query).await?;
        Ok(results.into_iter().map(|result| result.id).collect())
    }

    /// Fetches one record if it exists and the caller may read it
    ///
    /// Denial and absence are both `Ok(None)`.
    pub async fn get(
        &self,
        opctx: &OpContext,
        id: &str,
    ) -> LookupResult<Option<R>> {
        let Some(record) = self
            .storage
            .get(id)
            .await
            .internal_context(format!("fetching {} {:?}", R::KIND, id))?
        else {
            return Ok(None);
        };
        if !opctx.allowed(R::KIND, AccessLevel::Read, &scope_keys(&record))
        {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Whether `id` exists and is readable; same denial shape as
    /// [`DataStore::get`]
    pub async fn exists(
        &self,
        opctx: &OpContext,
        id: &str,
    ) -> LookupResult<bool> {
        Ok(self.get(opctx, id).await?.is_some())
    }

    /// Fetches many records, folding denied records into the missing set
    ///
    /// Returns the readable records in request order plus the indices
    /// (into `ids`) that were absent or denied, indistinguishably.
    pub async fn get_many(
        &self,
        opctx: &OpContext,
        ids: &[&str],
    ) -> Result<(Vec<R>, Vec<usize>), Error> {
        let (found, absent) = self.storage.get_many(ids).await?;

        let mut records = Vec::with_capacity(found.len());
        let mut missing = absent;
        let mut found_iter = found.into_iter();
        for (index, _) in ids.iter().enumerate() {
            if missing.contains(&index) {
                continue;
            }
            let Some(record) = found_iter.next() else {
                return Err(Error::internal_error(
                    "storage backend returned fewer records than indices",
                ));
            };
            if opctx.allowed(
                R::KIND,
                AccessLevel::Read,
                &scope_keys(&record),
            ) {
                records.push(record);
            } else {
                missing.push(index);
            }
        }
        missing.sort_unstable();
        Ok((records, missing))
    }

    /// Writes one record, merging with any stored copy under a per-id
    /// lock
    pub async fn upsert(
        &self,
        opctx: &OpContext,
        record: R,
    ) -> UpdateResult<()> {
        let _lock = self.locks.lock(record.id()).await;
        self.upsert_locked(opctx, record, true).await
    }

    /// Writes many records, reporting a per-record outcome
    ///
    /// A scope denial or backend failure on one record does not abort
    /// the rest of the batch.
    pub async fn upsert_many(
        &self,
        opctx: &OpContext,
        records: Vec<R>,
    ) -> BatchResults {
        self.upsert_batch(opctx, records, true).await
    }

    /// Writes many records without scope checks
    ///
    /// Callers must have already established that every record in the
    /// batch is writable in the caller's scope.  This exists for
    /// ingestion paths that validate whole payloads up front against a
    /// single cluster; handing it records the caller did not validate
    /// silently bypasses enforcement.
    pub async fn upsert_many_prevalidated(
        &self,
        opctx: &OpContext,
        records: Vec<R>,
    ) -> BatchResults {
        self.upsert_batch(opctx, records, false).await
    }

    async fn upsert_batch(
        &self,
        opctx: &OpContext,
        records: Vec<R>,
        authorize: bool,
    ) -> BatchResults {
        let mut results = BatchResults::with_capacity(records.len());
        for record in records {
            let id = record.id().to_owned();
            let _lock = self.locks.lock(&id).await;
            let result =
                self.upsert_locked(opctx, record, authorize).await;
            results.push(&id, result);
        }
        results
    }

    async fn upsert_locked(
        &self,
        opctx: &OpContext,
        mut record: R,
        authorize: bool,
    ) -> UpdateResult<()> {
        if authorize {
            opctx.authorize(
                R::KIND,
                AccessLevel::ReadWrite,
                &scope_keys(&record),
            )?;
        }
        if let Some(existing) = self.storage.get(record.id()).await? {
            record.merge_existing(&existing);
        }
        self.storage.upsert(&record).await?;
        self.indexer.index(opctx, &record).await?;
        if let Some(ranker) = &self.ranker {
            if let Some(score) = record.risk_score() {
                ranker.add(record.id(), score);
            }
        }
        trace!(self.log, "upsert"; "id" => record.id());
        Ok(())
    }

    /// Deletes one record if the caller's scope satisfies the store's
    /// delete policy
    ///
    /// Deleting an absent id succeeds.
    pub async fn delete(
        &self,
        opctx: &OpContext,
        id: &str,
    ) -> DeleteResult {
        let _lock = self.locks.lock(id).await;
        let Some(existing) = self.storage.get(id).await? else {
            return Ok(());
        };
        match self.delete_policy {
            DeletePolicy::ScopedReadWrite => opctx.authorize(
                R::KIND,
                AccessLevel::ReadWrite,
                &scope_keys(&existing),
            )?,
            DeletePolicy::RequireUnrestricted => {
                // An empty key list is a global check, which only an
                // unrestricted scope passes.
                opctx.authorize(R::KIND, AccessLevel::ReadWrite, &[])?
            }
        }
        self.storage.delete(id).await?;
        self.indexer.remove(opctx, id).await?;
        if let Some(ranker) = &self.ranker {
            ranker.remove(id);
        }
        trace!(self.log, "delete"; "id" => id);
        Ok(())
    }

    /// Deletes many records, reporting a per-record outcome
    pub async fn delete_many(
        &self,
        opctx: &OpContext,
        ids: &[&str],
    ) -> BatchResults {
        let mut results = BatchResults::with_capacity(ids.len());
        for id in ids {
            let result = self.delete(opctx, id).await;
            results.push(id, result);
        }
        results
    }

    /// Rebuilds the search index from storage in a background task
    ///
    /// The walk and the per-record indexing run unrestricted: index
    /// contents are scope-oblivious, enforcement happens at query time.
    pub fn build_index(&self) -> IndexBuildHandle {
        let (tx, rx) = watch::channel(None);
        let storage = Arc::clone(&self.storage);
        let indexer = Arc::clone(&self.indexer);
        let opctx = OpContext::for_background(
            self.log.new(o!("task" => "index_build")),
        );
        tokio::spawn(async move {
            let outcome = Self::build_index_inner(
                &opctx, &storage, &indexer,
            )
            .await;
            if let Err(error) = &outcome {
                warn!(opctx.log, "index build failed";
                    "error" => %error);
            } else {
                debug!(opctx.log, "index build complete");
            }
            let _ = tx.send(Some(outcome));
        });
        IndexBuildHandle { rx }
    }

    async fn build_index_inner(
        opctx: &OpContext,
        storage: &Arc<dyn Storage<R>>,
        indexer: &Arc<dyn Indexer<R>>,
    ) -> Result<(), Error> {
        let mut records = Vec::new();
        storage
            .walk(&mut |record: &R| {
                records.push(record.clone());
                true
            })
            .await
            .internal_context("walking storage for index build")?;
        for record in &records {
            indexer.index(opctx, record).await?;
        }
        Ok(())
    }

    /// Rank for `id` per the attached ranker, 0 when unranked
    pub fn rank_for_id(&self, id: &str) -> u64 {
        self.ranker
            .as_ref()
            .map(|ranker| ranker.rank_for_id(id))
            .unwrap_or(0)
    }
}

// Scope fields present on most stored kinds; exposed for callers that
// compose their own queries against them.
pub const SCOPE_FIELDS: [FieldLabel; 2] =
    [FieldLabel::ClusterId, FieldLabel::Namespace];

#[cfg(test)]
mod test {
    use super::DataStore;
    use super::DataStoreBuilder;
    use super::DeletePolicy;
    use crate::pub_test_utils::scoped_opctx;
    use crate::pub_test_utils::test_logger;
    use crate::pub_test_utils::MemSearcher;
    use crate::pub_test_utils::MemStore;
    use crate::pub_test_utils::TestAlert;
    use crate::ranker::Ranker;
    use crate::search::DefaultSortedSearcher;
    use crate::search::FieldLabel;
    use crate::search::Query;
    use crate::search::ScopeEnforcement;
    use crate::search::ScopeLevel;
    use crate::search::SearchHelper;
    use crate::search::SortOption;
    use std::sync::Arc;
    use vigil_auth::authz::AccessLevel;
    use vigil_auth::authz::ResourceKind;
    use vigil_auth::authz::ScopeKey;
    use vigil_auth::OpContext;
    use vigil_common::Error;

    fn build_store(
        enforcement: ScopeEnforcement,
        store: Arc<MemStore<TestAlert>>,
        searcher: Arc<MemSearcher<TestAlert>>,
    ) -> DataStore<TestAlert> {
        let helper = SearchHelper::new(
            ResourceKind::Alert,
            ScopeLevel::Namespace,
            enforcement,
        );
        DataStoreBuilder::new(
            test_logger(),
            helper,
            store,
            Arc::clone(&searcher) as Arc<_>,
            searcher,
        )
        .build()
    }

    fn fresh_store(
        enforcement: ScopeEnforcement,
    ) -> (DataStore<TestAlert>, Arc<MemStore<TestAlert>>) {
        let store = Arc::new(MemStore::new());
        let searcher = Arc::new(MemSearcher::new());
        (build_store(enforcement, Arc::clone(&store), searcher), store)
    }

    async fn seed(datastore: &DataStore<TestAlert>) -> OpContext {
        let admin = OpContext::for_tests(test_logger());
        for alert in [
            TestAlert::new("a1", "c1", Some("payments")),
            TestAlert::new("a2", "c1", Some("web")),
            TestAlert::new("a3", "c2", Some("payments")),
            TestAlert::new("a4", "c2", Some("web")),
            TestAlert::new("a5", "c3", None),
        ] {
            datastore.upsert(&admin, alert).await.unwrap();
        }
        admin
    }

    // ScopeRule grants: all of c1, plus c2/payments.
    fn partial_opctx() -> OpContext {
        scoped_opctx(
            vec![ResourceKind::Alert],
            AccessLevel::ReadWrite,
            vec![
                ScopeKey::cluster("c1"),
                ScopeKey::namespace("c2", "payments"),
            ],
        )
    }

    #[tokio::test]
    async fn test_get_denied_is_indistinguishable_from_absent() {
        let (datastore, _) = fresh_store(ScopeEnforcement::PushDown);
        seed(&datastore).await;
        let opctx = partial_opctx();

        // In scope.
        assert!(datastore.get(&opctx, "a1").await.unwrap().is_some());
        assert!(datastore.get(&opctx, "a3").await.unwrap().is_some());
        // Out of scope and truly absent look identical.
        assert_eq!(datastore.get(&opctx, "a4").await.unwrap(), None);
        assert_eq!(datastore.get(&opctx, "missing").await.unwrap(), None);
        // Cluster-scoped record, namespace-limited caller: denied.
        assert_eq!(datastore.get(&opctx, "a5").await.unwrap(), None);
        assert!(!datastore.exists(&opctx, "a4").await.unwrap());
        assert!(datastore.exists(&opctx, "a1").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_many_folds_denials_into_missing() {
        let (datastore, _) = fresh_store(ScopeEnforcement::PushDown);
        seed(&datastore).await;
        let opctx = partial_opctx();

        let (records, missing) = datastore
            .get_many(&opctx, &["a1", "a4", "nope", "a3"])
            .await
            .unwrap();
        let ids: Vec<&str> =
            records.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a3"]);
        assert_eq!(missing, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_search_respects_scope_under_both_strategies() {
        for enforcement in
            [ScopeEnforcement::PushDown, ScopeEnforcement::PostFilter]
        {
            let (datastore, _) = fresh_store(enforcement);
            seed(&datastore).await;
            let opctx = partial_opctx();

            let mut ids = datastore
                .search_ids(&opctx, &Query::all())
                .await
                .unwrap();
            ids.sort();
            assert_eq!(
                ids,
                vec!["a1", "a2", "a3"],
                "strategy {:?}",
                enforcement
            );
            assert_eq!(
                datastore.count(&opctx, &Query::all()).await.unwrap(),
                3
            );
        }
    }

    #[tokio::test]
    async fn test_decorators_layer_over_the_scope_filter() {
        // Under post-filter enforcement the scope filter needs the
        // backend fetch unpaginated; a default sort and pagination
        // stacked via the builder must therefore apply to the visible
        // set, never clamp the fetch underneath the filter.
        let store = Arc::new(MemStore::new());
        let searcher = Arc::new(MemSearcher::new());
        let helper = SearchHelper::new(
            ResourceKind::Alert,
            ScopeLevel::Namespace,
            ScopeEnforcement::PostFilter,
        );
        let datastore = DataStoreBuilder::new(
            test_logger(),
            helper,
            store,
            Arc::clone(&searcher) as Arc<_>,
            searcher,
        )
        .decorate(|scoped| {
            Arc::new(DefaultSortedSearcher::new(
                scoped,
                SortOption { field: FieldLabel::CreatedTime, reverse: false },
            ))
        })
        .page_limits(2, 10)
        .build();
        seed(&datastore).await;
        let opctx = partial_opctx();

        // Three records are visible; the default page covers two of
        // them, in the default sort's order.
        let ids = datastore
            .search_ids(&opctx, &Query::all())
            .await
            .unwrap();
        assert_eq!(ids, vec!["a1", "a2"]);
        assert_eq!(
            datastore.count(&opctx, &Query::all()).await.unwrap(),
            3
        );
        // A wider explicit page reaches everything in scope.
        let ids = datastore
            .search_ids(&opctx, &Query::all().paged(0, 10))
            .await
            .unwrap();
        assert_eq!(ids, vec!["a1", "a2", "a3"]);
    }

    #[tokio::test]
    async fn test_search_pages_are_bounded() {
        let store = Arc::new(MemStore::new());
        let searcher = Arc::new(MemSearcher::new());
        let helper = SearchHelper::new(
            ResourceKind::Alert,
            ScopeLevel::Namespace,
            ScopeEnforcement::PushDown,
        );
        let datastore = DataStoreBuilder::new(
            test_logger(),
            helper,
            store,
            Arc::clone(&searcher) as Arc<_>,
            searcher,
        )
        .page_limits(2, 3)
        .build();
        let admin = seed(&datastore).await;

        // No explicit limit gets the default page.
        let results =
            datastore.search(&admin, &Query::all()).await.unwrap();
        assert_eq!(results.len(), 2);
        // Explicit limits clamp to the maximum.
        let results = datastore
            .search(&admin, &Query::all().paged(0, 100))
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        // Counts are not paginated.
        assert_eq!(
            datastore.count(&admin, &Query::all()).await.unwrap(),
            5
        );
    }

    #[tokio::test]
    async fn test_post_filter_reapplies_pagination() {
        let (datastore, _) = fresh_store(ScopeEnforcement::PostFilter);
        seed(&datastore).await;
        let opctx = partial_opctx();

        let query = Query::all()
            .sorted_by(FieldLabel::CreatedTime, false)
            .paged(1, 1);
        let results = datastore.search(&opctx, &query).await.unwrap();
        // Offset and limit apply to the visible set, not the raw one.
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a2");
    }

    #[tokio::test]
    async fn test_unrestricted_read_sees_everything() {
        for enforcement in
            [ScopeEnforcement::PushDown, ScopeEnforcement::PostFilter]
        {
            let (datastore, _) = fresh_store(enforcement);
            let admin = seed(&datastore).await;
            assert_eq!(
                datastore.count(&admin, &Query::all()).await.unwrap(),
                5
            );
        }
    }

    #[tokio::test]
    async fn test_upsert_out_of_scope_is_forbidden() {
        let (datastore, _) = fresh_store(ScopeEnforcement::PushDown);
        seed(&datastore).await;
        let opctx = partial_opctx();

        let err = datastore
            .upsert(&opctx, TestAlert::new("a9", "c3", Some("web")))
            .await
            .unwrap_err();
        assert_eq!(err, Error::Forbidden);

        // In-scope writes go through.
        datastore
            .upsert(&opctx, TestAlert::new("a9", "c1", Some("web")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_many_reports_per_record_outcomes() {
        let (datastore, _) = fresh_store(ScopeEnforcement::PushDown);
        seed(&datastore).await;
        let opctx = partial_opctx();

        let results = datastore
            .upsert_many(
                &opctx,
                vec![
                    TestAlert::new("b1", "c1", Some("web")),
                    TestAlert::new("b2", "c3", Some("web")),
                    TestAlert::new("b3", "c2", Some("payments")),
                ],
            )
            .await;
        assert!(!results.ok());
        let failures: Vec<&str> =
            results.failures().into_iter().map(|(id, _)| id).collect();
        assert_eq!(failures, vec!["b2"]);

        // The failed record was not written; the others were.
        let admin = OpContext::for_tests(test_logger());
        assert!(datastore.get(&admin, "b1").await.unwrap().is_some());
        assert!(datastore.get(&admin, "b2").await.unwrap().is_none());
        assert!(datastore.get(&admin, "b3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_prevalidated_upsert_skips_scope_checks() {
        let (datastore, _) = fresh_store(ScopeEnforcement::PushDown);
        let opctx = partial_opctx();

        // Same out-of-scope record that upsert_many rejects.
        let record = TestAlert::new("b2", "c3", Some("web"));
        let results = datastore
            .upsert_many_prevalidated(&opctx, vec![record])
            .await;
        assert!(results.ok());

        let admin = OpContext::for_tests(test_logger());
        assert!(datastore.get(&admin, "b2").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_merges_existing_under_lock() {
        let (datastore, _) = fresh_store(ScopeEnforcement::PushDown);
        let admin = seed(&datastore).await;

        let datastore = Arc::new(datastore);
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let datastore = Arc::clone(&datastore);
            let admin = admin.clone();
            tasks.push(tokio::spawn(async move {
                let mut alert =
                    TestAlert::new("a1", "c1", Some("payments"));
                alert.counter = 1;
                datastore.upsert(&admin, alert).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        // merge_existing sums counters; lost updates would undercount.
        let stored =
            datastore.get(&admin, "a1").await.unwrap().unwrap();
        assert_eq!(stored.counter, 32);
    }

    #[tokio::test]
    async fn test_delete_policy_scoped() {
        let (datastore, _) = fresh_store(ScopeEnforcement::PushDown);
        seed(&datastore).await;
        let opctx = partial_opctx();

        datastore.delete(&opctx, "a1").await.unwrap();
        let err = datastore.delete(&opctx, "a4").await.unwrap_err();
        assert_eq!(err, Error::Forbidden);
        // Absent ids delete cleanly.
        datastore.delete(&opctx, "gone").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_policy_require_unrestricted() {
        let store = Arc::new(MemStore::new());
        let searcher = Arc::new(MemSearcher::new());
        let helper = SearchHelper::new(
            ResourceKind::Alert,
            ScopeLevel::Namespace,
            ScopeEnforcement::PushDown,
        );
        let datastore = DataStoreBuilder::new(
            test_logger(),
            helper,
            Arc::clone(&store) as Arc<_>,
            Arc::clone(&searcher) as Arc<_>,
            searcher,
        )
        .delete_policy(DeletePolicy::RequireUnrestricted)
        .build();
        let admin = seed(&datastore).await;
        let opctx = partial_opctx();

        // Full ReadWrite on c1 is still not unrestricted.
        let err = datastore.delete(&opctx, "a1").await.unwrap_err();
        assert_eq!(err, Error::Forbidden);
        datastore.delete(&admin, "a1").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_many_reports_per_record_outcomes() {
        let (datastore, _) = fresh_store(ScopeEnforcement::PushDown);
        seed(&datastore).await;
        let opctx = partial_opctx();

        let results =
            datastore.delete_many(&opctx, &["a1", "a4", "a3"]).await;
        let failures: Vec<&str> =
            results.failures().into_iter().map(|(id, _)| id).collect();
        assert_eq!(failures, vec!["a4"]);
    }

    #[tokio::test]
    async fn test_backend_errors_propagate() {
        let store = Arc::new(MemStore::new());
        let searcher = Arc::new(MemSearcher::new());
        let datastore = build_store(
            ScopeEnforcement::PushDown,
            Arc::clone(&store),
            searcher,
        );
        let admin = OpContext::for_tests(test_logger());
        datastore
            .upsert(&admin, TestAlert::new("a1", "c1", Some("web")))
            .await
            .unwrap();

        store.fail_next("storage offline");
        let err = datastore.get(&admin, "a1").await.unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable { .. }));
        // The store recovers after the injected failure.
        assert!(datastore.get(&admin, "a1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_upsert_feeds_ranker() {
        let store = Arc::new(MemStore::new());
        let searcher = Arc::new(MemSearcher::new());
        let helper = SearchHelper::new(
            ResourceKind::Alert,
            ScopeLevel::Namespace,
            ScopeEnforcement::PushDown,
        );
        let ranker = Arc::new(Ranker::new());
        let datastore = DataStoreBuilder::new(
            test_logger(),
            helper,
            Arc::clone(&store) as Arc<_>,
            Arc::clone(&searcher) as Arc<_>,
            searcher,
        )
        .ranker(Arc::clone(&ranker))
        .build();
        let admin = OpContext::for_tests(test_logger());

        let mut high = TestAlert::new("high", "c1", Some("web"));
        high.risk_score = Some(80.0);
        let mut low = TestAlert::new("low", "c1", Some("web"));
        low.risk_score = Some(10.0);
        datastore.upsert(&admin, low).await.unwrap();
        datastore.upsert(&admin, high).await.unwrap();

        assert_eq!(datastore.rank_for_id("high"), 1);
        assert_eq!(datastore.rank_for_id("low"), 2);
        datastore.delete(&admin, "high").await.unwrap();
        assert_eq!(datastore.rank_for_id("high"), 0);
        assert_eq!(datastore.rank_for_id("low"), 1);
    }

    #[tokio::test]
    async fn test_build_index_recovers_search_state() {
        let store = Arc::new(MemStore::new());
        let searcher = Arc::new(MemSearcher::new());
        let datastore = build_store(
            ScopeEnforcement::PushDown,
            Arc::clone(&store),
            Arc::clone(&searcher),
        );
        let admin = seed(&datastore).await;

        // Simulate an index lost across restart.
        searcher.clear();
        assert_eq!(
            datastore.count(&admin, &Query::all()).await.unwrap(),
            0
        );

        let handle = datastore.build_index();
        handle.wait_ready().await.unwrap();
        assert_eq!(
            datastore.count(&admin, &Query::all()).await.unwrap(),
            5
        );
    }
}
