// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compiled access scopes and their evaluation
//!
//! An [`AccessScope`] is the per-request authorization context.  It is
//! built once from the caller's [`ScopeRule`]s and never mutated, which
//! is what makes scope checks safe to run concurrently with no locking.

use super::scope::AccessLevel;
use super::scope::RuleScope;
use super::scope::ScopeKey;
use super::scope::ScopeRule;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use vigil_common::Error;
use vigil_common::ResourceKind;

/// Granted namespaces within one cluster
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClusterScope {
    /// the whole cluster, including records with no namespace affiliation
    AllNamespaces,
    /// only the listed namespaces
    Namespaces(BTreeSet<String>),
}

/// The compiled scope for one (resource kind, access level) pair
///
/// `Partial` with an empty map means fully excluded; that is also the
/// value used when no rule mentions a (kind, level) at all.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScopeTree {
    Unrestricted,
    Partial(BTreeMap<String, ClusterScope>),
}

impl ScopeTree {
    fn excluded() -> ScopeTree {
        ScopeTree::Partial(BTreeMap::new())
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, ScopeTree::Unrestricted)
    }

    /// Returns true if the scope grants access to nothing at all
    pub fn is_excluded(&self) -> bool {
        match self {
            ScopeTree::Unrestricted => false,
            ScopeTree::Partial(clusters) => clusters.is_empty(),
        }
    }

    /// Returns whether this tree covers the given key
    pub fn allows(&self, key: &ScopeKey) -> bool {
        let clusters = match self {
            ScopeTree::Unrestricted => return true,
            ScopeTree::Partial(clusters) => clusters,
        };
        let Some(cluster_scope) = clusters.get(key.cluster_id()) else {
            return false;
        };
        match (cluster_scope, key) {
            // A cluster-level key (a record with no namespace affiliation)
            // requires the whole cluster; namespace-limited grants do not
            // reach it.
            (ClusterScope::AllNamespaces, _) => true,
            (ClusterScope::Namespaces(_), ScopeKey::Cluster(_)) => false,
            (
                ClusterScope::Namespaces(namespaces),
                ScopeKey::Namespace { namespace, .. },
            ) => namespaces.contains(namespace),
        }
    }

    /// The granted clusters, for rendering a push-down predicate
    ///
    /// Returns an empty map for an unrestricted tree; callers must take
    /// the unrestricted fast path before asking for this.
    pub fn clusters(&self) -> &BTreeMap<String, ClusterScope> {
        static EMPTY: std::sync::OnceLock<BTreeMap<String, ClusterScope>> =
            std::sync::OnceLock::new();
        match self {
            ScopeTree::Unrestricted => EMPTY.get_or_init(BTreeMap::new),
            ScopeTree::Partial(clusters) => clusters,
        }
    }

    fn include(&mut self, key: &ScopeKey) {
        let ScopeTree::Partial(clusters) = self else {
            return;
        };
        match key {
            ScopeKey::Cluster(cluster) => {
                clusters.insert(
                    cluster.clone(),
                    ClusterScope::AllNamespaces,
                );
            }
            ScopeKey::Namespace { cluster, namespace } => {
                let entry =
                    clusters.entry(cluster.clone()).or_insert_with(|| {
                        ClusterScope::Namespaces(BTreeSet::new())
                    });
                if let ClusterScope::Namespaces(namespaces) = entry {
                    namespaces.insert(namespace.clone());
                }
            }
        }
    }
}

/// A caller's resolved authorization context
///
/// Built once per request from the role/policy layer's rules; immutable
/// afterwards.  The union of all rules is precompiled into one
/// [`ScopeTree`] per (kind, level), so evaluation never walks the rule
/// list and the unrestricted fast path is a single map lookup.
#[derive(Clone, Debug)]
pub struct AccessScope {
    trees: BTreeMap<(ResourceKind, AccessLevel), ScopeTree>,
    excluded: ScopeTree,
}

impl AccessScope {
    /// A scope granting nothing
    pub fn empty() -> AccessScope {
        AccessScope { trees: BTreeMap::new(), excluded: ScopeTree::excluded() }
    }

    /// A scope granting read-write access to everything (administrators,
    /// internal background work)
    pub fn unrestricted() -> AccessScope {
        let mut trees = BTreeMap::new();
        for kind in <ResourceKind as strum::IntoEnumIterator>::iter() {
            trees.insert((kind, AccessLevel::Read), ScopeTree::Unrestricted);
            trees.insert(
                (kind, AccessLevel::ReadWrite),
                ScopeTree::Unrestricted,
            );
        }
        AccessScope { trees, excluded: ScopeTree::excluded() }
    }

    /// Compiles the union of `rules` into a scope
    ///
    /// Fails fast on malformed rules (empty kind list, empty cluster id,
    /// namespace without a cluster id); a scope that was successfully
    /// constructed never produces an error at evaluation time.
    pub fn from_rules(rules: Vec<ScopeRule>) -> Result<AccessScope, Error> {
        for rule in &rules {
            rule.validate()?;
        }

        let mut trees: BTreeMap<(ResourceKind, AccessLevel), ScopeTree> =
            BTreeMap::new();
        for rule in &rules {
            // ReadWrite implies Read, so a read-write rule contributes to
            // both trees.
            let levels: &[AccessLevel] = match rule.level {
                AccessLevel::Read => &[AccessLevel::Read],
                AccessLevel::ReadWrite => {
                    &[AccessLevel::Read, AccessLevel::ReadWrite]
                }
            };
            for &kind in &rule.kinds {
                for &level in levels {
                    let tree = trees
                        .entry((kind, level))
                        .or_insert_with(ScopeTree::excluded);
                    match &rule.scope {
                        RuleScope::Unrestricted => {
                            *tree = ScopeTree::Unrestricted;
                        }
                        RuleScope::Keys(keys) => {
                            for key in keys {
                                tree.include(key);
                            }
                        }
                    }
                }
            }
        }

        Ok(AccessScope { trees, excluded: ScopeTree::excluded() })
    }

    /// The compiled tree for (kind, level); excluded if no rule granted
    /// anything there
    pub fn tree(&self, kind: ResourceKind, level: AccessLevel) -> &ScopeTree {
        self.trees.get(&(kind, level)).unwrap_or(&self.excluded)
    }

    /// O(1) check for the unrestricted fast path
    pub fn is_unrestricted(
        &self,
        kind: ResourceKind,
        level: AccessLevel,
    ) -> bool {
        self.tree(kind, level).is_unrestricted()
    }

    /// Evaluates a scope check
    ///
    /// With zero keys this is a global check, satisfied only by an
    /// unrestricted grant.  With keys, every key must be covered; this is
    /// what batch write paths use to check a set of target records in one
    /// call.
    pub fn allowed(
        &self,
        kind: ResourceKind,
        level: AccessLevel,
        keys: &[ScopeKey],
    ) -> bool {
        let tree = self.tree(kind, level);
        if keys.is_empty() {
            return tree.is_unrestricted();
        }
        keys.iter().all(|key| tree.allows(key))
    }
}
