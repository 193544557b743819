// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Default-sort and default-predicate decorators
//!
//! Both operate only on the query, never on scope, so they may be
//! stacked in either order - but always outside the scope-filtered
//! searcher.

use super::BaseQuery;
use super::FieldLabel;
use super::Query;
use super::SearchResult;
use super::Searcher;
use super::SortOption;
use async_trait::async_trait;
use std::sync::Arc;
use vigil_auth::OpContext;
use vigil_common::ListResultVec;
use vigil_common::LookupResult;

/// Injects a deterministic sort order when the caller specified none
///
/// Offset-based paging over an unordered result set can skip or duplicate
/// rows between pages; a stable default order makes pagination
/// reproducible across calls.
pub struct DefaultSortedSearcher {
    inner: Arc<dyn Searcher>,
    default_sort: SortOption,
}

impl DefaultSortedSearcher {
    pub fn new(
        inner: Arc<dyn Searcher>,
        default_sort: SortOption,
    ) -> DefaultSortedSearcher {
        DefaultSortedSearcher { inner, default_sort }
    }

    fn with_default_sort(&self, query: &Query) -> Query {
        if !query.sort.is_empty() {
            return query.clone();
        }
        let mut sorted = query.clone();
        sorted.sort.push(self.default_sort.clone());
        sorted
    }
}

#[async_trait]
impl Searcher for DefaultSortedSearcher {
    async fn search(
        &self,
        opctx: &OpContext,
        query: &Query,
    ) -> ListResultVec<SearchResult> {
        self.inner.search(opctx, &self.with_default_sort(query)).await
    }

    async fn count(
        &self,
        opctx: &OpContext,
        query: &Query,
    ) -> LookupResult<usize> {
        self.inner.count(opctx, query).await
    }
}

/// Conjoins a default predicate unless the caller constrained the field
///
/// The canonical use is "active violations only": a query that does not
/// mention the violation-state field sees only active records, while a
/// query explicitly asking for resolved records gets exactly what it
/// asked for.  Explicit caller intent always overrides the default;
/// both are never applied together.
pub struct DefaultFilteredSearcher {
    inner: Arc<dyn Searcher>,
    field: FieldLabel,
    default_predicate: BaseQuery,
}

impl DefaultFilteredSearcher {
    pub fn new(
        inner: Arc<dyn Searcher>,
        field: FieldLabel,
        default_predicate: BaseQuery,
    ) -> DefaultFilteredSearcher {
        DefaultFilteredSearcher { inner, field, default_predicate }
    }

    fn with_default(&self, query: &Query) -> Query {
        if query.base.constrains(self.field) {
            return query.clone();
        }
        let mut defaulted = query.clone();
        defaulted.base = BaseQuery::conjunction(vec![
            query.base.clone(),
            self.default_predicate.clone(),
        ]);
        defaulted
    }
}

#[async_trait]
impl Searcher for DefaultFilteredSearcher {
    async fn search(
        &self,
        opctx: &OpContext,
        query: &Query,
    ) -> ListResultVec<SearchResult> {
        self.inner.search(opctx, &self.with_default(query)).await
    }

    async fn count(
        &self,
        opctx: &OpContext,
        query: &Query,
    ) -> LookupResult<usize> {
        self.inner.count(opctx, &self.with_default(query)).await
    }
}
