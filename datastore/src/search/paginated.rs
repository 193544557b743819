// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pagination enforcement decorator
//!
//! A query that reaches a backend without a limit is effectively
//! unbounded, which is never what a service caller should get.  This
//! decorator fills in a default page size when the caller specified
//! none, and clamps explicit limits to a maximum.  Counts are not
//! paginated and pass through unchanged.

use super::Query;
use super::SearchResult;
use super::Searcher;
use async_trait::async_trait;
use std::sync::Arc;
use vigil_auth::OpContext;
use vigil_common::ListResultVec;
use vigil_common::LookupResult;

/// Page size used when the caller's query has no explicit limit
pub const DEFAULT_PAGE_SIZE: u64 = 1000;
/// Hard ceiling on any single page
pub const MAX_PAGE_SIZE: u64 = 10_000;

pub struct PaginatedSearcher {
    inner: Arc<dyn Searcher>,
    default_limit: u64,
    max_limit: u64,
}

impl PaginatedSearcher {
    pub fn new(inner: Arc<dyn Searcher>) -> PaginatedSearcher {
        PaginatedSearcher {
            inner,
            default_limit: DEFAULT_PAGE_SIZE,
            max_limit: MAX_PAGE_SIZE,
        }
    }

    pub fn with_limits(
        inner: Arc<dyn Searcher>,
        default_limit: u64,
        max_limit: u64,
    ) -> PaginatedSearcher {
        PaginatedSearcher { inner, default_limit, max_limit }
    }

    fn paginate(&self, query: &Query) -> Query {
        let mut paged = query.clone();
        paged.offset = Some(query.offset.unwrap_or(0));
        paged.limit = Some(match query.limit {
            None => self.default_limit,
            Some(limit) => limit.min(self.max_limit),
        });
        paged
    }
}

#[async_trait]
impl Searcher for PaginatedSearcher {
    async fn search(
        &self,
        opctx: &OpContext,
        query: &Query,
    ) -> ListResultVec<SearchResult> {
        self.inner.search(opctx, &self.paginate(query)).await
    }

    async fn count(
        &self,
        opctx: &OpContext,
        query: &Query,
    ) -> LookupResult<usize> {
        self.inner.count(opctx, query).await
    }
}

#[cfg(test)]
mod test {
    use super::PaginatedSearcher;
    use crate::search::Query;
    use std::sync::Arc;

    #[test]
    fn test_default_and_clamped_limits() {
        let searcher = PaginatedSearcher::with_limits(
            Arc::new(crate::pub_test_utils::NullSearcher),
            50,
            100,
        );

        let paged = searcher.paginate(&Query::all());
        assert_eq!(paged.offset, Some(0));
        assert_eq!(paged.limit, Some(50));

        let paged = searcher.paginate(&Query::all().paged(20, 75));
        assert_eq!(paged.offset, Some(20));
        assert_eq!(paged.limit, Some(75));

        let paged = searcher.paginate(&Query::all().paged(0, 10_000));
        assert_eq!(paged.limit, Some(100));
    }
}
