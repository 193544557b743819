// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`SearchHelper`]: scope enforcement over an unscoped searcher
//!
//! A search helper is built once per resource kind, from the kind's
//! scope level (does the kind carry a namespace, or only a cluster?) and
//! the enforcement strategy the backend supports.  The strategy is fixed
//! at construction so the per-call hot path never branches on backend
//! capability:
//!
//! * [`ScopeEnforcement::PushDown`] - the backend can predicate on the
//!   cluster/namespace fields, so the caller's scope is rendered as a
//!   disjunction over granted (cluster, namespace) pairs and conjoined
//!   with the caller's query.
//! * [`ScopeEnforcement::PostFilter`] - the backend cannot (e.g. a
//!   denormalized read model lacking those fields as predicates), so the
//!   query runs unrestricted with the scope fields requested back, and
//!   each result is checked against the caller's scope before being
//!   returned.  Strictly less efficient; used only when push-down is
//!   unavailable.
//!
//! Either way, a caller with unrestricted read access for the kind takes
//! a pass-through fast path, and write operations are never filtered
//! here: write-path checks are explicit, at the datastore boundary.

use super::BaseQuery;
use super::FieldLabel;
use super::Query;
use super::SearchResult;
use super::Searcher;
use async_trait::async_trait;
use std::sync::Arc;
use vigil_auth::authz::AccessLevel;
use vigil_auth::authz::ClusterScope;
use vigil_auth::authz::ResourceKind;
use vigil_auth::authz::ScopeKey;
use vigil_auth::authz::ScopeTree;
use vigil_auth::OpContext;
use vigil_common::ListResultVec;
use vigil_common::LookupResult;

/// Which scope fields a resource kind carries
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScopeLevel {
    /// cluster only; no namespace affiliation
    Cluster,
    /// cluster and namespace
    Namespace,
}

/// How scope is enforced for a resource kind's search backend
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScopeEnforcement {
    PushDown,
    PostFilter,
}

/// Builds scope-enforcing searchers for one resource kind
#[derive(Clone, Copy, Debug)]
pub struct SearchHelper {
    kind: ResourceKind,
    scope_level: ScopeLevel,
    enforcement: ScopeEnforcement,
}

impl SearchHelper {
    pub fn new(
        kind: ResourceKind,
        scope_level: ScopeLevel,
        enforcement: ScopeEnforcement,
    ) -> SearchHelper {
        SearchHelper { kind, scope_level, enforcement }
    }

    /// Wraps a raw (unscoped) searcher into one that enforces the
    /// caller's access scope
    pub fn filtered_searcher(
        &self,
        raw: Arc<dyn Searcher>,
    ) -> Arc<dyn Searcher> {
        Arc::new(FilteredSearcher { helper: *self, raw })
    }

    /// Renders a scope tree as a query predicate: a disjunction over the
    /// granted clusters, each either a bare cluster match (namespace
    /// wildcard) or a cluster match conjoined with a namespace
    /// disjunction
    fn scope_predicate(&self, tree: &ScopeTree) -> BaseQuery {
        let mut cluster_queries = Vec::new();
        for (cluster_id, cluster_scope) in tree.clusters() {
            let cluster_match =
                BaseQuery::matching(FieldLabel::ClusterId, cluster_id.clone());
            match cluster_scope {
                ClusterScope::AllNamespaces => {
                    cluster_queries.push(cluster_match);
                }
                ClusterScope::Namespaces(namespaces) => {
                    // Namespace-limited grants cannot reach a kind with no
                    // namespace affiliation.
                    if self.scope_level == ScopeLevel::Cluster {
                        continue;
                    }
                    let namespace_queries = namespaces
                        .iter()
                        .map(|ns| {
                            BaseQuery::matching(
                                FieldLabel::Namespace,
                                ns.clone(),
                            )
                        })
                        .collect();
                    cluster_queries.push(BaseQuery::conjunction(vec![
                        cluster_match,
                        BaseQuery::disjunction(namespace_queries),
                    ]));
                }
            }
        }
        BaseQuery::disjunction(cluster_queries)
    }

    /// The fields whose stored values the post-filter path needs back
    fn scope_fields(&self) -> Vec<FieldLabel> {
        match self.scope_level {
            ScopeLevel::Cluster => vec![FieldLabel::ClusterId],
            ScopeLevel::Namespace => {
                vec![FieldLabel::ClusterId, FieldLabel::Namespace]
            }
        }
    }

    /// Derives a result's own scope key from its returned fields, or
    /// None if the backend did not return them (treated as not visible)
    fn result_scope_key(&self, result: &SearchResult) -> Option<ScopeKey> {
        let cluster = result.matches.get(&FieldLabel::ClusterId)?;
        match self.scope_level {
            ScopeLevel::Cluster => Some(ScopeKey::cluster(cluster.clone())),
            ScopeLevel::Namespace => {
                let namespace = result.matches.get(&FieldLabel::Namespace)?;
                Some(ScopeKey::namespace(cluster.clone(), namespace.clone()))
            }
        }
    }
}

struct FilteredSearcher {
    helper: SearchHelper,
    raw: Arc<dyn Searcher>,
}

impl FilteredSearcher {
    /// Post-filter path: run the caller's query without pagination, with
    /// the scope fields requested back, then drop disallowed results and
    /// re-apply offset/limit locally
    async fn search_post_filtered(
        &self,
        opctx: &OpContext,
        query: &Query,
        paginate: bool,
    ) -> ListResultVec<SearchResult> {
        let helper = &self.helper;
        let mut unscoped = query.clone();
        unscoped.offset = None;
        unscoped.limit = None;
        for field in helper.scope_fields() {
            if !unscoped.return_fields.contains(&field) {
                unscoped.return_fields.push(field);
            }
        }

        let results = self.raw.search(opctx, &unscoped).await?;
        let mut allowed: Vec<SearchResult> = results
            .into_iter()
            .filter(|result| {
                let Some(key) = helper.result_scope_key(result) else {
                    return false;
                };
                opctx.allowed(
                    helper.kind,
                    AccessLevel::Read,
                    std::slice::from_ref(&key),
                )
            })
            .collect();

        if paginate {
            let offset = query.offset.unwrap_or(0) as usize;
            if offset > 0 {
                allowed = allowed.split_off(offset.min(allowed.len()));
            }
            if let Some(limit) = query.limit {
                allowed.truncate(limit as usize);
            }
        }
        Ok(allowed)
    }
}

#[async_trait]
impl Searcher for FilteredSearcher {
    async fn search(
        &self,
        opctx: &OpContext,
        query: &Query,
    ) -> ListResultVec<SearchResult> {
        let helper = &self.helper;

        // Fast path: unrestricted read access passes the query through
        // unchanged.
        if opctx.has_unrestricted_read(helper.kind) {
            return self.raw.search(opctx, query).await;
        }

        let tree =
            opctx.access_scope().tree(helper.kind, AccessLevel::Read);
        if tree.is_excluded() {
            return Ok(Vec::new());
        }

        match helper.enforcement {
            ScopeEnforcement::PushDown => {
                let predicate = helper.scope_predicate(tree);
                if predicate == BaseQuery::MatchNone {
                    // Every grant was below this kind's scope level.
                    return Ok(Vec::new());
                }
                let mut scoped = query.clone();
                scoped.base = BaseQuery::conjunction(vec![
                    query.base.clone(),
                    predicate,
                ]);
                self.raw.search(opctx, &scoped).await
            }
            ScopeEnforcement::PostFilter => {
                self.search_post_filtered(opctx, query, true).await
            }
        }
    }

    async fn count(
        &self,
        opctx: &OpContext,
        query: &Query,
    ) -> LookupResult<usize> {
        let helper = &self.helper;

        if opctx.has_unrestricted_read(helper.kind) {
            return self.raw.count(opctx, query).await;
        }

        let tree =
            opctx.access_scope().tree(helper.kind, AccessLevel::Read);
        if tree.is_excluded() {
            return Ok(0);
        }

        match helper.enforcement {
            ScopeEnforcement::PushDown => {
                let predicate = helper.scope_predicate(tree);
                if predicate == BaseQuery::MatchNone {
                    return Ok(0);
                }
                let mut scoped = query.clone();
                scoped.base = BaseQuery::conjunction(vec![
                    query.base.clone(),
                    predicate,
                ]);
                self.raw.count(opctx, &scoped).await
            }
            ScopeEnforcement::PostFilter => {
                // A count cannot be pushed down either; count what the
                // filtered search would return, ignoring pagination.
                let results =
                    self.search_post_filtered(opctx, query, false).await?;
                Ok(results.len())
            }
        }
    }
}
