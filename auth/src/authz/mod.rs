// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Authorization subsystem
//!
//! ## Scope basics
//!
//! Authorization policy here is expressed in terms of hierarchical access
//! scopes: an *actor* can perform an *access* (read or read-write) on a
//! *resource* if the actor's resolved scope covers the resource's
//! position in the cluster/namespace hierarchy.  Let's unpack that.
//!
//! - **actor** is whoever the external authentication and role layers say
//!   is making the request.  Those layers are outside this crate; by the
//!   time we see an operation, the actor has been reduced to a set of
//!   [`ScopeRule`]s.
//! - **resource** is a security finding of some [`ResourceKind`]: an
//!   alert, an image, a vulnerability, a risk record.  Each record knows
//!   which cluster (and possibly namespace) it belongs to, expressed as a
//!   [`ScopeKey`].
//! - **access** is [`AccessLevel::Read`] or [`AccessLevel::ReadWrite`].
//!   A read-write grant satisfies a read check; the reverse never holds.
//!
//! The rules for a request are compiled once, at request setup, into an
//! [`AccessScope`]: for each (kind, level) pair, a [`ScopeTree`] that is
//! either unrestricted or enumerates the granted clusters and namespaces.
//! Compilation takes the *union* of all rules: if any rule grants an
//! access, the access is granted.  After compilation the scope is
//! immutable, so evaluation is deterministic, side-effect-free, and needs
//! no synchronization however many tasks share it.
//!
//! ## Evaluation
//!
//! A check supplies a resource kind, an access level, and zero or more
//! scope keys:
//!
//! - zero keys is a *global* check: it passes only if the scope is
//!   unrestricted for that (kind, level);
//! - a cluster key passes if the whole cluster is granted (namespace
//!   wildcard) or the scope is unrestricted;
//! - a cluster+namespace key passes if the scope is unrestricted, the
//!   whole cluster is granted, or that exact namespace is granted.
//!
//! A consequence worth stating: a resource kind with no namespace
//! affiliation (e.g. whole-cluster findings) presents a cluster key, so
//! it is only reachable through global or whole-cluster grants; a
//! namespace-limited grant never exposes it.
//!
//! Malformed rules (a namespace without a cluster, empty identifiers)
//! fail at [`AccessScope::from_rules`] time, never at query time.

mod access_scope;
mod scope;

pub use access_scope::AccessScope;
pub use access_scope::ClusterScope;
pub use access_scope::ScopeTree;
pub use scope::AccessLevel;
pub use scope::RuleScope;
pub use scope::ScopeKey;
pub use scope::ScopeRule;

pub use vigil_common::ResourceKind;
