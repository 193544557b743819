// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Search model: queries, results, and the [`Searcher`] interface
//!
//! The query type here is the structured predicate tree produced by the
//! query-DSL layer: conjunction/disjunction over exact field matches,
//! plus sort options and offset/limit pagination.  This crate never
//! parses queries; it only rewrites them (scoping, defaults) and hands
//! them to a backend.
//!
//! A raw backend [`Searcher`] is *unsafe* in the access-control sense:
//! it returns whatever matches, for anyone.  All scope enforcement
//! enters through [`SearchHelper::filtered_searcher`], and the
//! decorators in [`paginated`] and [`defaults`] are applied on top of
//! the already-scoped searcher.

mod defaults;
mod filtered;
mod paginated;

pub use defaults::DefaultFilteredSearcher;
pub use defaults::DefaultSortedSearcher;
pub use filtered::ScopeEnforcement;
pub use filtered::ScopeLevel;
pub use filtered::SearchHelper;
pub use paginated::PaginatedSearcher;
pub use paginated::DEFAULT_PAGE_SIZE;
pub use paginated::MAX_PAGE_SIZE;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use vigil_auth::OpContext;
use vigil_common::ListResultVec;
use vigil_common::LookupResult;

/// Indexed fields the query layer can predicate and sort on
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
)]
pub enum FieldLabel {
    ClusterId,
    Namespace,
    ViolationState,
    Severity,
    Cve,
    ImageName,
    RiskScore,
    RiskSubjectType,
    CreatedTime,
}

/// The base predicate tree of a query
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum BaseQuery {
    /// matches nothing (the scoped rendering of an empty grant)
    MatchNone,
    /// matches everything
    MatchAll,
    /// exact match on one field
    Match { field: FieldLabel, value: String },
    Conjunction(Vec<BaseQuery>),
    Disjunction(Vec<BaseQuery>),
}

impl BaseQuery {
    pub fn matching<S: Into<String>>(field: FieldLabel, value: S) -> BaseQuery {
        BaseQuery::Match { field, value: value.into() }
    }

    /// Conjoins the given queries, flattening the trivial cases
    pub fn conjunction(mut queries: Vec<BaseQuery>) -> BaseQuery {
        queries.retain(|q| !matches!(q, BaseQuery::MatchAll));
        match queries.len() {
            0 => BaseQuery::MatchAll,
            1 => queries.remove(0),
            _ => BaseQuery::Conjunction(queries),
        }
    }

    /// Disjoins the given queries, flattening the trivial cases
    pub fn disjunction(mut queries: Vec<BaseQuery>) -> BaseQuery {
        queries.retain(|q| !matches!(q, BaseQuery::MatchNone));
        match queries.len() {
            0 => BaseQuery::MatchNone,
            1 => queries.remove(0),
            _ => BaseQuery::Disjunction(queries),
        }
    }

    /// Returns whether any predicate in this tree constrains `field`
    ///
    /// Used by the default-predicate decorator: an explicit caller
    /// constraint on a field always overrides the default, so the
    /// default is applied only when this returns false.
    pub fn constrains(&self, field: FieldLabel) -> bool {
        match self {
            BaseQuery::MatchNone | BaseQuery::MatchAll => false,
            BaseQuery::Match { field: f, .. } => *f == field,
            BaseQuery::Conjunction(qs) | BaseQuery::Disjunction(qs) => {
                qs.iter().any(|q| q.constrains(field))
            }
        }
    }
}

/// One sort criterion
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SortOption {
    pub field: FieldLabel,
    /// descending when true
    pub reverse: bool,
}

/// A structured search query
///
/// `return_fields` asks the backend to include the given fields' stored
/// values in each result's `matches`; the post-filter scope enforcement
/// path relies on this to learn each result's cluster/namespace without
/// a per-result storage lookup.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Query {
    pub base: BaseQuery,
    pub sort: Vec<SortOption>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub return_fields: Vec<FieldLabel>,
}

impl Query {
    /// A query matching every record, with no explicit sort or paging
    pub fn all() -> Query {
        Query {
            base: BaseQuery::MatchAll,
            sort: Vec::new(),
            offset: None,
            limit: None,
            return_fields: Vec::new(),
        }
    }

    pub fn matching<S: Into<String>>(field: FieldLabel, value: S) -> Query {
        Query { base: BaseQuery::matching(field, value), ..Query::all() }
    }

    pub fn with_base(base: BaseQuery) -> Query {
        Query { base, ..Query::all() }
    }

    pub fn sorted_by(mut self, field: FieldLabel, reverse: bool) -> Query {
        self.sort.push(SortOption { field, reverse });
        self
    }

    pub fn paged(mut self, offset: u64, limit: u64) -> Query {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }
}

/// One hit from a search backend
///
/// Intermediate and not authoritative: the authoritative record is
/// fetched from storage by id afterwards, so result sets are either
/// produced from an already-scoped query or re-validated before use.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchResult {
    pub id: String,
    /// backend relevance score (not the risk score)
    pub score: f64,
    /// stored values for the query's `return_fields`
    pub matches: BTreeMap<FieldLabel, String>,
}

impl SearchResult {
    pub fn new<S: Into<String>>(id: S) -> SearchResult {
        SearchResult { id: id.into(), score: 0.0, matches: BTreeMap::new() }
    }
}

/// A search backend (or a decorator over one)
///
/// Implementations must propagate backend errors verbatim and must not
/// swallow cancellation: dropping the returned future cancels the
/// underlying call.
#[async_trait]
pub trait Searcher: Send + Sync {
    async fn search(
        &self,
        opctx: &OpContext,
        query: &Query,
    ) -> ListResultVec<SearchResult>;

    async fn count(
        &self,
        opctx: &OpContext,
        query: &Query,
    ) -> LookupResult<usize>;
}

/// The index-maintenance side of a search backend
///
/// Kept separate from [`Searcher`] because only the owning datastore
/// composition may write to the index, while many callers may search.
#[async_trait]
pub trait Indexer<R>: Send + Sync {
    async fn index(
        &self,
        opctx: &OpContext,
        record: &R,
    ) -> Result<(), vigil_common::Error>;

    async fn remove(
        &self,
        opctx: &OpContext,
        id: &str,
    ) -> Result<(), vigil_common::Error>;
}

#[cfg(test)]
mod test {
    use super::BaseQuery;
    use super::FieldLabel;
    use super::Query;

    #[test]
    fn test_conjunction_flattening() {
        assert_eq!(BaseQuery::conjunction(vec![]), BaseQuery::MatchAll);
        assert_eq!(
            BaseQuery::conjunction(vec![
                BaseQuery::MatchAll,
                BaseQuery::matching(FieldLabel::ClusterId, "C1"),
            ]),
            BaseQuery::matching(FieldLabel::ClusterId, "C1")
        );
    }

    #[test]
    fn test_disjunction_flattening() {
        assert_eq!(BaseQuery::disjunction(vec![]), BaseQuery::MatchNone);
        assert_eq!(
            BaseQuery::disjunction(vec![BaseQuery::MatchNone]),
            BaseQuery::MatchNone
        );
    }

    #[test]
    fn test_constrains_walks_the_tree() {
        let query = BaseQuery::conjunction(vec![
            BaseQuery::matching(FieldLabel::Severity, "HIGH"),
            BaseQuery::disjunction(vec![
                BaseQuery::matching(FieldLabel::ViolationState, "RESOLVED"),
                BaseQuery::matching(FieldLabel::ViolationState, "ACTIVE"),
            ]),
        ]);
        assert!(query.constrains(FieldLabel::ViolationState));
        assert!(query.constrains(FieldLabel::Severity));
        assert!(!query.constrains(FieldLabel::ClusterId));
        assert!(!Query::all().base.constrains(FieldLabel::ClusterId));
    }
}
