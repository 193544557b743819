// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scope model: access levels, scope keys, and grant rules

use serde::Deserialize;
use serde::Serialize;
use vigil_common::Error;
use vigil_common::ResourceKind;

/// Level of access granted or requested for a resource kind
///
/// Levels are ordered: `ReadWrite` satisfies a `Read` check, but a `Read`
/// grant never satisfies a `ReadWrite` check.
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
)]
pub enum AccessLevel {
    Read,
    ReadWrite,
}

/// A position in the cluster/namespace hierarchy
///
/// Used both to declare what a grant covers and to describe where a
/// record lives.  A namespace key always carries its cluster; the
/// namespace-without-cluster case is unrepresentable by construction.
#[derive(
    Clone, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum ScopeKey {
    /// an entire cluster (all namespaces, and cluster-level records)
    Cluster(String),
    /// one namespace within a cluster
    Namespace { cluster: String, namespace: String },
}

impl ScopeKey {
    pub fn cluster<S: Into<String>>(cluster: S) -> ScopeKey {
        ScopeKey::Cluster(cluster.into())
    }

    pub fn namespace<S, T>(cluster: S, namespace: T) -> ScopeKey
    where
        S: Into<String>,
        T: Into<String>,
    {
        ScopeKey::Namespace {
            cluster: cluster.into(),
            namespace: namespace.into(),
        }
    }

    pub fn cluster_id(&self) -> &str {
        match self {
            ScopeKey::Cluster(cluster) => cluster,
            ScopeKey::Namespace { cluster, .. } => cluster,
        }
    }

    pub fn namespace_id(&self) -> Option<&str> {
        match self {
            ScopeKey::Cluster(_) => None,
            ScopeKey::Namespace { namespace, .. } => Some(namespace),
        }
    }

    pub(super) fn validate(&self) -> Result<(), Error> {
        if self.cluster_id().is_empty() {
            return Err(Error::invalid_value(
                "scope_key",
                "cluster id must not be empty",
            ));
        }
        if let ScopeKey::Namespace { namespace, .. } = self {
            if namespace.is_empty() {
                return Err(Error::invalid_value(
                    "scope_key",
                    "namespace must not be empty",
                ));
            }
        }
        Ok(())
    }
}

/// What part of the hierarchy one rule covers
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum RuleScope {
    /// everything, including global-level checks
    Unrestricted,
    /// exactly the listed clusters/namespaces
    Keys(Vec<ScopeKey>),
}

/// One "allow" declaration from the external role/policy source
///
/// An [`crate::authz::AccessScope`] is built from a list of these; the
/// resulting scope is the union of all rules.  Rules are validated when
/// the scope is built, so a malformed rule is rejected before any query
/// runs with it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ScopeRule {
    /// resource kinds this rule applies to
    pub kinds: Vec<ResourceKind>,
    /// access level granted
    pub level: AccessLevel,
    /// covered part of the hierarchy
    pub scope: RuleScope,
}

impl ScopeRule {
    /// Grants `level` on `kinds` for the given scope keys.
    pub fn allow(
        kinds: Vec<ResourceKind>,
        level: AccessLevel,
        keys: Vec<ScopeKey>,
    ) -> ScopeRule {
        ScopeRule { kinds, level, scope: RuleScope::Keys(keys) }
    }

    /// Grants `level` on `kinds` everywhere, including global checks.
    pub fn allow_unrestricted(
        kinds: Vec<ResourceKind>,
        level: AccessLevel,
    ) -> ScopeRule {
        ScopeRule { kinds, level, scope: RuleScope::Unrestricted }
    }

    pub(super) fn validate(&self) -> Result<(), Error> {
        if self.kinds.is_empty() {
            return Err(Error::invalid_value(
                "scope_rule",
                "rule must name at least one resource kind",
            ));
        }
        if let RuleScope::Keys(keys) = &self.scope {
            for key in keys {
                key.validate()?;
            }
        }
        Ok(())
    }
}
