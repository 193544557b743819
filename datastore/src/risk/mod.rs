// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Risk records and aggregation
//!
//! A risk record scores one subject (a deployment, or an aggregate over
//! a namespace or cluster) and explains the score as named factor
//! groups.  Deployment-level records are written by the scoring
//! pipeline; namespace- and cluster-level records are derived on demand
//! by [`RiskAggregator`] from the deployment records visible to the
//! caller.

mod aggregator;

pub use aggregator::RiskAggregator;
pub use aggregator::AGGREGATION_PAGE_SIZE;

use crate::search::FieldLabel;
use crate::storage::ResourceRecord;
use serde::Deserialize;
use serde::Serialize;
use vigil_auth::authz::ScopeKey;
use vigil_common::ResourceKind;

/// What a risk record is about
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
pub enum RiskSubjectKind {
    Deployment,
    Namespace,
    Cluster,
}

/// The scored entity and its position in the scope hierarchy
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RiskSubject {
    pub kind: RiskSubjectKind,
    /// id of the subject itself (deployment id, namespace name, ...)
    pub id: String,
    pub cluster_id: String,
    /// absent for cluster-level subjects
    pub namespace: Option<String>,
}

impl RiskSubject {
    pub fn deployment<S, C, N>(id: S, cluster: C, namespace: N) -> RiskSubject
    where
        S: Into<String>,
        C: Into<String>,
        N: Into<String>,
    {
        RiskSubject {
            kind: RiskSubjectKind::Deployment,
            id: id.into(),
            cluster_id: cluster.into(),
            namespace: Some(namespace.into()),
        }
    }

    pub fn namespace<C, N>(cluster: C, namespace: N) -> RiskSubject
    where
        C: Into<String>,
        N: Into<String>,
    {
        let namespace = namespace.into();
        RiskSubject {
            kind: RiskSubjectKind::Namespace,
            id: namespace.clone(),
            cluster_id: cluster.into(),
            namespace: Some(namespace),
        }
    }

    pub fn cluster<C: Into<String>>(cluster: C) -> RiskSubject {
        let cluster_id = cluster.into();
        RiskSubject {
            kind: RiskSubjectKind::Cluster,
            id: cluster_id.clone(),
            cluster_id,
            namespace: None,
        }
    }

    /// Stable id of the risk record for this subject
    pub fn risk_id(&self) -> String {
        format!("{}:{}:{}", self.kind, self.cluster_id, self.id)
    }
}

/// One contributing observation inside a factor group
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RiskFactor {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl RiskFactor {
    pub fn new<S: Into<String>>(message: S) -> RiskFactor {
        RiskFactor { message: message.into(), url: None }
    }
}

/// A named group of factors with the score it contributes
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RiskFactorGroup {
    pub name: String,
    pub score: f64,
    pub factors: Vec<RiskFactor>,
}

/// A scored subject with its explanation
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RiskRecord {
    pub id: String,
    pub subject: RiskSubject,
    pub score: f64,
    pub factor_groups: Vec<RiskFactorGroup>,
}

impl RiskRecord {
    pub fn new(subject: RiskSubject, score: f64) -> RiskRecord {
        RiskRecord {
            id: subject.risk_id(),
            subject,
            score,
            factor_groups: Vec::new(),
        }
    }
}

impl ResourceRecord for RiskRecord {
    const KIND: ResourceKind = ResourceKind::Risk;

    fn id(&self) -> &str {
        &self.id
    }

    fn scope_key(&self) -> Option<ScopeKey> {
        match &self.subject.namespace {
            Some(namespace) => Some(ScopeKey::namespace(
                self.subject.cluster_id.clone(),
                namespace.clone(),
            )),
            None => Some(ScopeKey::cluster(self.subject.cluster_id.clone())),
        }
    }

    fn risk_score(&self) -> Option<f64> {
        Some(self.score)
    }

    fn field_value(&self, field: FieldLabel) -> Option<String> {
        match field {
            FieldLabel::ClusterId => Some(self.subject.cluster_id.clone()),
            FieldLabel::Namespace => self.subject.namespace.clone(),
            FieldLabel::RiskSubjectType => {
                Some(self.subject.kind.to_string())
            }
            FieldLabel::RiskScore => Some(format!("{:.6}", self.score)),
            _ => None,
        }
    }
}
