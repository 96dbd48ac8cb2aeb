//! Permission resolution.
//!
//! Resolution is a pure function of a permission set snapshot, a request and
//! the caller's roles:
//! 1. keep records granting at least one of the roles,
//! 2. keep records whose predicate resolves,
//! 3. pick the lowest priority, ties going to the earliest loaded record,
//! 4. compute the effective restriction for the pick.
//!
//! No match, or a restriction that cannot be computed, denies.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use bastion_types::Request;
use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::error::{AclError, Result};
use crate::record::PermissionRecord;
use crate::restriction::EffectiveRestriction;
use crate::store::PermissionSet;

/// Role assumed by requests without a principal, unless configured otherwise.
pub const UNAUTHENTICATED_ROLE: &str = "$unauthenticated";

// ============================================================================
// Decision
// ============================================================================

/// The outcome of resolving a request.
#[derive(Debug, Clone)]
pub struct Decision {
    matched: Option<Arc<PermissionRecord>>,
    restriction: Option<EffectiveRestriction>,
    reason: String,
    generation: u64,
}

impl Decision {
    fn allow(
        record: Arc<PermissionRecord>,
        restriction: EffectiveRestriction,
        generation: u64,
    ) -> Self {
        let reason = format!(
            "Matched permission {} (priority {})",
            record.label(),
            record.priority()
        );
        Self {
            matched: Some(record),
            restriction: Some(restriction),
            reason,
            generation,
        }
    }

    fn deny(reason: impl Into<String>, generation: u64) -> Self {
        Self {
            matched: None,
            restriction: None,
            reason: reason.into(),
            generation,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.matched.is_some()
    }

    /// The selected record, `None` when denied.
    pub fn matched(&self) -> Option<&Arc<PermissionRecord>> {
        self.matched.as_ref()
    }

    /// The effective restriction, `None` when denied.
    pub fn restriction(&self) -> Option<&EffectiveRestriction> {
        self.restriction.as_ref()
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Generation of the permission set the decision was made against.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Attaches the decision to the request. A request carries at most one.
    pub fn attach_to(self, request: &mut Request) -> Result<()> {
        request
            .attach(self)
            .map_err(|_| AclError::DecisionAlreadyAttached)
    }

    /// Returns the decision attached to `request`, if any.
    pub fn of(request: &Request) -> Option<&Decision> {
        request.attachment::<Decision>()
    }
}

// ============================================================================
// Resolution
// ============================================================================

fn predicate_holds(record: &PermissionRecord, request: &Request) -> bool {
    catch_unwind(AssertUnwindSafe(|| record.predicate().resolve(request))).unwrap_or_else(|_| {
        error!(
            permission = %record.label(),
            "Predicate panicked; treating as not matching"
        );
        false
    })
}

/// Every record matching the request, in resolution order.
pub fn matching_records(
    set: &PermissionSet,
    request: &Request,
    roles: &[&str],
) -> Vec<Arc<PermissionRecord>> {
    set.records()
        .iter()
        .filter(|record| record.grants_any(roles.iter().copied()))
        .filter(|record| predicate_holds(record, request))
        .cloned()
        .collect()
}

/// Resolves `request` for a caller holding `roles`, interpolating with `now`.
pub fn resolve(set: &PermissionSet, request: &Request, roles: &[&str], now: DateTime<Utc>) -> Decision {
    // Records are kept in resolution order, so the first match wins.
    let Some(record) = set
        .records()
        .iter()
        .filter(|record| record.grants_any(roles.iter().copied()))
        .find(|record| predicate_holds(record, request))
    else {
        return Decision::deny("No permission matches the request", set.generation());
    };

    match record.restriction().effective(request, now) {
        Ok(restriction) => Decision::allow(Arc::clone(record), restriction, set.generation()),
        Err(e) => {
            error!(
                permission = %record.label(),
                error = %e,
                "Failed to compute data restriction; denying"
            );
            Decision::deny(
                format!("Permission {} has an invalid restriction: {e}", record.label()),
                set.generation(),
            )
        }
    }
}

/// Resolves requests against permission set snapshots.
#[derive(Debug, Clone)]
pub struct Resolver {
    anonymous_roles: Vec<String>,
    audit_enabled: bool,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            anonymous_roles: vec![UNAUTHENTICATED_ROLE.to_string()],
            audit_enabled: true,
        }
    }

    /// Sets the roles assumed by requests without a principal.
    #[must_use]
    pub fn with_anonymous_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.anonymous_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Disables audit logging (for testing).
    #[must_use]
    pub fn without_audit(mut self) -> Self {
        self.audit_enabled = false;
        self
    }

    pub fn anonymous_roles(&self) -> &[String] {
        &self.anonymous_roles
    }

    /// Roles used to resolve `request`: the principal's, or the anonymous set.
    pub fn roles_for<'r>(&'r self, request: &'r Request) -> Vec<&'r str> {
        match request.principal() {
            Some(principal) => principal.roles.iter().map(String::as_str).collect(),
            None => self.anonymous_roles.iter().map(String::as_str).collect(),
        }
    }

    /// Resolves `request` against `set` at the current instant.
    pub fn resolve(&self, set: &PermissionSet, request: &Request) -> Decision {
        self.resolve_at(set, request, Utc::now())
    }

    /// Resolves `request` against `set` with `now` as the value of `%NOW`.
    pub fn resolve_at(&self, set: &PermissionSet, request: &Request, now: DateTime<Utc>) -> Decision {
        let roles = self.roles_for(request);
        let decision = resolve(set, request, &roles, now);

        if self.audit_enabled {
            let user = request.principal().map(|p| p.id.as_str());
            if let Some(record) = decision.matched() {
                debug!(
                    user = ?user,
                    roles = ?roles,
                    method = %request.method(),
                    path = %request.path(),
                    permission = %record.label(),
                    priority = record.priority(),
                    "Request authorized"
                );
            } else {
                warn!(
                    user = ?user,
                    roles = ?roles,
                    method = %request.method(),
                    path = %request.path(),
                    reason = %decision.reason(),
                    "Request denied"
                );
            }
        }

        decision
    }

    /// Every record matching `request`, in resolution order. For diagnostics.
    pub fn resolve_all(&self, set: &PermissionSet, request: &Request) -> Vec<Arc<PermissionRecord>> {
        matching_records(set, request, &self.roles_for(request))
    }
}
