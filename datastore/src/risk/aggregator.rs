// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Derives namespace- and cluster-level risk from deployment risk
//!
//! Aggregation is computed from whatever deployment records the caller
//! can see, so two callers with different scopes get different (both
//! correct) aggregates.  Records that the search index returns but the
//! caller's scope denies are dropped silently, the same partial-
//! visibility rule the datastore applies everywhere else.

use crate::datastore::DataStore;
use crate::risk::RiskFactorGroup;
use crate::risk::RiskRecord;
use crate::risk::RiskSubject;
use crate::risk::RiskSubjectKind;
use crate::search::BaseQuery;
use crate::search::FieldLabel;
use crate::search::Query;
use slog::Logger;
use std::sync::Arc;
use vigil_auth::OpContext;
use vigil_common::Error;
use vigil_common::LookupResult;

/// Page size used when walking deployment risk records
pub const AGGREGATION_PAGE_SIZE: u64 = 100;

/// Factor groups are reported in this order; groups not listed here
/// follow, in the order they were first seen.
const GROUP_PRIORITY: &[&str] = &[
    "Policy Violations",
    "Suspicious Process Executions",
    "Image Vulnerabilities",
    "Service Configuration",
    "Service Reachability",
    "Components Useful for Attackers",
    "Image Freshness",
];

fn group_priority(name: &str) -> usize {
    GROUP_PRIORITY
        .iter()
        .position(|candidate| *candidate == name)
        .unwrap_or(usize::MAX)
}

/// Computes aggregate risk over the deployment records visible to the
/// caller
pub struct RiskAggregator {
    datastore: Arc<DataStore<RiskRecord>>,
    log: Logger,
}

impl RiskAggregator {
    pub fn new(
        log: Logger,
        datastore: Arc<DataStore<RiskRecord>>,
    ) -> RiskAggregator {
        RiskAggregator { log: log.new(o!("component" => "risk_aggregator")), datastore }
    }

    /// Aggregate risk across one namespace's deployments
    pub async fn aggregate_for_namespace(
        &self,
        opctx: &OpContext,
        cluster: &str,
        namespace: &str,
    ) -> LookupResult<Option<RiskRecord>> {
        self.aggregate(opctx, &RiskSubject::namespace(cluster, namespace))
            .await
    }

    /// Aggregate risk across all of one cluster's deployments
    pub async fn aggregate_for_cluster(
        &self,
        opctx: &OpContext,
        cluster: &str,
    ) -> LookupResult<Option<RiskRecord>> {
        self.aggregate(opctx, &RiskSubject::cluster(cluster)).await
    }

    /// Aggregate risk for a namespace or cluster subject
    ///
    /// Returns `Ok(None)` when no deployment risk is visible to the
    /// caller under that subject, whether because none exists or
    /// because scope hides it all.
    pub async fn aggregate(
        &self,
        opctx: &OpContext,
        subject: &RiskSubject,
    ) -> LookupResult<Option<RiskRecord>> {
        let mut predicates = vec![
            BaseQuery::matching(
                FieldLabel::RiskSubjectType,
                RiskSubjectKind::Deployment.to_string(),
            ),
            BaseQuery::matching(
                FieldLabel::ClusterId,
                subject.cluster_id.clone(),
            ),
        ];
        match subject.kind {
            RiskSubjectKind::Namespace => {
                let Some(namespace) = &subject.namespace else {
                    return Err(Error::invalid_request(
                        "namespace risk subject without a namespace",
                    ));
                };
                predicates.push(BaseQuery::matching(
                    FieldLabel::Namespace,
                    namespace.clone(),
                ));
            }
            RiskSubjectKind::Cluster => (),
            RiskSubjectKind::Deployment => {
                return Err(Error::invalid_request(
                    "deployment risk is stored, not aggregated",
                ));
            }
        }
        let base = BaseQuery::conjunction(predicates);

        let mut contributors = Vec::new();
        let mut offset = 0;
        loop {
            let query = Query::with_base(base.clone())
                .sorted_by(FieldLabel::RiskScore, true)
                .paged(offset, AGGREGATION_PAGE_SIZE);
            let ids = self.datastore.search_ids(opctx, &query).await?;
            let page_len = ids.len() as u64;

            let id_refs: Vec<&str> =
                ids.iter().map(String::as_str).collect();
            let (records, _missing) =
                self.datastore.get_many(opctx, &id_refs).await?;
            contributors.extend(records);

            if page_len < AGGREGATION_PAGE_SIZE {
                break;
            }
            offset += AGGREGATION_PAGE_SIZE;
        }

        if contributors.is_empty() {
            return Ok(None);
        }
        trace!(self.log, "aggregating risk";
            "subject" => %subject.risk_id(),
            "contributors" => contributors.len(),
        );

        // Contributors arrive score-descending from the search sort;
        // keep that order so group merge order is deterministic.
        let score: f64 =
            contributors.iter().map(|record| record.score).sum();
        let factor_groups = merge_factor_groups(&contributors);

        let mut record = RiskRecord::new(subject.clone(), score);
        record.factor_groups = factor_groups;
        Ok(Some(record))
    }
}

/// Merges per-deployment factor groups by name, summing scores
///
/// Per-factor detail is deployment-specific and misleading at the
/// aggregate level, so merged groups carry no factors.
fn merge_factor_groups(
    contributors: &[RiskRecord],
) -> Vec<RiskFactorGroup> {
    let mut merged: Vec<RiskFactorGroup> = Vec::new();
    for record in contributors {
        for group in &record.factor_groups {
            match merged
                .iter_mut()
                .find(|candidate| candidate.name == group.name)
            {
                Some(existing) => existing.score += group.score,
                None => merged.push(RiskFactorGroup {
                    name: group.name.clone(),
                    score: group.score,
                    factors: Vec::new(),
                }),
            }
        }
    }
    merged.sort_by(|a, b| {
        group_priority(&a.name).cmp(&group_priority(&b.name))
    });
    merged
}

#[cfg(test)]
mod test {
    use super::RiskAggregator;
    use super::AGGREGATION_PAGE_SIZE;
    use crate::datastore::DataStore;
    use crate::datastore::DataStoreBuilder;
    use crate::pub_test_utils::scoped_opctx;
    use crate::pub_test_utils::test_logger;
    use crate::pub_test_utils::MemSearcher;
    use crate::pub_test_utils::MemStore;
    use crate::risk::RiskFactor;
    use crate::risk::RiskFactorGroup;
    use crate::risk::RiskRecord;
    use crate::risk::RiskSubject;
    use crate::search::ScopeEnforcement;
    use crate::search::ScopeLevel;
    use crate::search::SearchHelper;
    use std::sync::Arc;
    use vigil_auth::authz::AccessLevel;
    use vigil_auth::authz::ResourceKind;
    use vigil_auth::authz::ScopeKey;
    use vigil_auth::OpContext;
    use vigil_common::Error;

    fn risk_datastore() -> Arc<DataStore<RiskRecord>> {
        let store = Arc::new(MemStore::new());
        let searcher = Arc::new(MemSearcher::new());
        let helper = SearchHelper::new(
            ResourceKind::Risk,
            ScopeLevel::Namespace,
            ScopeEnforcement::PushDown,
        );
        Arc::new(
            DataStoreBuilder::new(
                test_logger(),
                helper,
                store,
                Arc::clone(&searcher) as Arc<_>,
                searcher,
            )
            .build(),
        )
    }

    fn deployment_risk(
        id: &str,
        cluster: &str,
        namespace: &str,
        score: f64,
        groups: Vec<(&str, f64)>,
    ) -> RiskRecord {
        let mut record = RiskRecord::new(
            RiskSubject::deployment(id, cluster, namespace),
            score,
        );
        record.factor_groups = groups
            .into_iter()
            .map(|(name, score)| RiskFactorGroup {
                name: name.to_owned(),
                score,
                factors: vec![RiskFactor::new(format!(
                    "{} detail for {}",
                    name, id
                ))],
            })
            .collect();
        record
    }

    async fn seed(datastore: &DataStore<RiskRecord>) -> OpContext {
        let admin = OpContext::for_tests(test_logger());
        for record in [
            deployment_risk(
                "d1",
                "c1",
                "web",
                5.0,
                vec![("Image Vulnerabilities", 3.0), ("Policy Violations", 2.0)],
            ),
            deployment_risk(
                "d2",
                "c1",
                "web",
                3.0,
                vec![("Image Vulnerabilities", 1.0), ("Service Reachability", 2.0)],
            ),
            deployment_risk(
                "d3",
                "c1",
                "payments",
                7.0,
                vec![("Policy Violations", 7.0)],
            ),
            deployment_risk(
                "d4",
                "c2",
                "web",
                11.0,
                vec![("Policy Violations", 11.0)],
            ),
        ] {
            datastore.upsert(&admin, record).await.unwrap();
        }
        admin
    }

    #[tokio::test]
    async fn test_namespace_aggregate_sums_visible_scores() {
        let datastore = risk_datastore();
        let admin = seed(&datastore).await;
        let aggregator =
            RiskAggregator::new(test_logger(), Arc::clone(&datastore));

        let record = aggregator
            .aggregate_for_namespace(&admin, "c1", "web")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.score, 8.0);
        assert_eq!(record.id, "Namespace:c1:web");

        let cluster = aggregator
            .aggregate_for_cluster(&admin, "c1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cluster.score, 15.0);
    }

    #[tokio::test]
    async fn test_groups_merge_in_priority_order_and_scrub_factors() {
        let datastore = risk_datastore();
        let admin = seed(&datastore).await;
        let aggregator =
            RiskAggregator::new(test_logger(), Arc::clone(&datastore));

        let record = aggregator
            .aggregate(&admin, &RiskSubject::namespace("c1", "web"))
            .await
            .unwrap()
            .unwrap();

        let names: Vec<&str> = record
            .factor_groups
            .iter()
            .map(|group| group.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "Policy Violations",
                "Image Vulnerabilities",
                "Service Reachability"
            ]
        );
        let vulnerabilities = &record.factor_groups[1];
        assert_eq!(vulnerabilities.score, 4.0);
        // Per-deployment detail never leaks into the aggregate.
        assert!(record
            .factor_groups
            .iter()
            .all(|group| group.factors.is_empty()));
    }

    #[tokio::test]
    async fn test_scope_limits_the_aggregate() {
        let datastore = risk_datastore();
        seed(&datastore).await;
        let aggregator =
            RiskAggregator::new(test_logger(), Arc::clone(&datastore));

        let opctx = scoped_opctx(
            vec![ResourceKind::Risk],
            AccessLevel::Read,
            vec![ScopeKey::namespace("c1", "web")],
        );

        // The cluster aggregate only reflects what this caller can see.
        let record = aggregator
            .aggregate(&opctx, &RiskSubject::cluster("c1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.score, 8.0);

        // A namespace entirely out of scope aggregates to nothing.
        let hidden = aggregator
            .aggregate(
                &opctx,
                &RiskSubject::namespace("c1", "payments"),
            )
            .await
            .unwrap();
        assert!(hidden.is_none());
    }

    #[tokio::test]
    async fn test_aggregation_pages_through_large_namespaces() {
        let datastore = risk_datastore();
        let admin = OpContext::for_tests(test_logger());
        let count = AGGREGATION_PAGE_SIZE + 7;
        for i in 0..count {
            datastore
                .upsert(
                    &admin,
                    deployment_risk(
                        &format!("d{}", i),
                        "c1",
                        "web",
                        1.0,
                        vec![("Policy Violations", 1.0)],
                    ),
                )
                .await
                .unwrap();
        }

        let aggregator =
            RiskAggregator::new(test_logger(), Arc::clone(&datastore));
        let record = aggregator
            .aggregate(&admin, &RiskSubject::namespace("c1", "web"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.score, count as f64);
        assert_eq!(record.factor_groups[0].score, count as f64);
    }

    #[tokio::test]
    async fn test_deployment_subject_is_rejected() {
        let datastore = risk_datastore();
        let aggregator = RiskAggregator::new(test_logger(), datastore);
        let err = aggregator
            .aggregate(
                &OpContext::for_tests(test_logger()),
                &RiskSubject::deployment("d1", "c1", "web"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }
}
