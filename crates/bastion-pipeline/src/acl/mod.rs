//! Built-in interceptors enforcing permission decisions.
//!
//! [`Authorize`] resolves the request and attaches the [`Decision`]; the
//! others read that decision and enforce its data restriction. All of them
//! are registered by [`acl_interceptors`].

mod authorize;
mod data;
mod guards;
mod project;

use std::sync::Arc;

use bastion_acl::{Decision, EffectiveRestriction, PermissionStore, Resolver};
use bastion_types::Request;

pub use authorize::Authorize;
pub use data::{InjectFilters, InjectedFilters, MergeRequest, ProtectFields};
pub use guards::{ForbidBulkRequests, ForbidManagementRequests, ForbidWriteMode};
pub use project::ProjectResponse;

use crate::interceptor::Interceptor;

/// Service name of the document store. Restriction guards only apply to
/// requests it handles.
pub const DOCUMENT_SERVICE: &str = "mongo";

/// The effective restriction of the decision attached to `request`.
pub(crate) fn restriction_of(request: &Request) -> Option<&EffectiveRestriction> {
    Decision::of(request).and_then(Decision::restriction)
}

/// Every built-in ACL interceptor, authorization first.
pub fn acl_interceptors(store: Arc<PermissionStore>, resolver: Resolver) -> Vec<Arc<dyn Interceptor>> {
    vec![
        Arc::new(Authorize::new(store, resolver)),
        Arc::new(ForbidManagementRequests),
        Arc::new(ForbidBulkRequests),
        Arc::new(ForbidWriteMode),
        Arc::new(ProtectFields),
        Arc::new(InjectFilters),
        Arc::new(MergeRequest),
        Arc::new(ProjectResponse),
    ]
}
