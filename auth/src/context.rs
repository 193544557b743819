// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`OpContext`]: the per-operation context carried through the stack
//!
//! Every datastore operation takes an `OpContext`.  It bundles the
//! caller's compiled [`AccessScope`] with a logger, so authorization and
//! observability travel together.  Contexts are cheap to clone (the scope
//! is shared) and are constructed once per incoming request, or via the
//! `for_background`/`for_tests` constructors for internal work.

use crate::authz::AccessLevel;
use crate::authz::AccessScope;
use crate::authz::ResourceKind;
use crate::authz::ScopeKey;
use slog::Logger;
use slog::o;
use slog::trace;
use std::sync::Arc;
use vigil_common::Error;

/// Provides information needed to authorize an operation, plus the
/// logger to use while carrying it out
#[derive(Clone)]
pub struct OpContext {
    pub log: Logger,
    scope: Arc<AccessScope>,
}

impl OpContext {
    /// Context for an external request whose scope was resolved by the
    /// role/policy layer
    pub fn for_request(log: Logger, scope: Arc<AccessScope>) -> OpContext {
        OpContext { log, scope }
    }

    /// Context for internal background work, which runs unrestricted
    pub fn for_background(log: Logger) -> OpContext {
        OpContext {
            log: log.new(o!("background" => true)),
            scope: Arc::new(AccessScope::unrestricted()),
        }
    }

    /// Unrestricted context for tests
    pub fn for_tests(log: Logger) -> OpContext {
        OpContext { log, scope: Arc::new(AccessScope::unrestricted()) }
    }

    pub fn access_scope(&self) -> &AccessScope {
        &self.scope
    }

    /// Evaluates a scope check without failing
    ///
    /// Read paths use this and translate denial into "not found" / empty
    /// results themselves, so that denial is indistinguishable from
    /// absence.
    pub fn allowed(
        &self,
        kind: ResourceKind,
        level: AccessLevel,
        keys: &[ScopeKey],
    ) -> bool {
        self.scope.allowed(kind, level, keys)
    }

    /// O(1) check for the global-read fast path
    pub fn has_unrestricted_read(&self, kind: ResourceKind) -> bool {
        self.scope.is_unrestricted(kind, AccessLevel::Read)
    }

    /// Gates a write-path operation, returning `Forbidden` on denial
    ///
    /// This is the only place authorization failure surfaces as an error;
    /// callers must not use it on read paths.
    pub fn authorize(
        &self,
        kind: ResourceKind,
        level: AccessLevel,
        keys: &[ScopeKey],
    ) -> Result<(), Error> {
        if self.scope.allowed(kind, level, keys) {
            trace!(self.log, "authorize: allowed";
                "resource_kind" => %kind,
                "access_level" => ?level,
            );
            Ok(())
        } else {
            trace!(self.log, "authorize: denied";
                "resource_kind" => %kind,
                "access_level" => ?level,
                "scope_keys" => ?keys,
            );
            Err(Error::Forbidden)
        }
    }

    /// Derives a context with the same scope and an annotated logger
    pub fn child(&self, kv: slog::OwnedKV<impl slog::SendSyncRefUnwindSafeKV + 'static>) -> OpContext {
        OpContext { log: self.log.new(kv), scope: Arc::clone(&self.scope) }
    }
}

impl std::fmt::Debug for OpContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpContext").finish_non_exhaustive()
    }
}
