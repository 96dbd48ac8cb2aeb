//! Guards refusing operations the resolved permission does not allow.
//!
//! Each guard applies only to document-store requests that carry an allow
//! decision whose restriction does not already exempt the operation.

use bastion_acl::EffectiveRestriction;
use bastion_types::{Request, Response};
use tracing::warn;

use super::{DOCUMENT_SERVICE, restriction_of};
use crate::error::InterceptorError;
use crate::interceptor::Interceptor;
use crate::point::InterceptPoint;

fn applies(request: &Request, exempt: impl Fn(&EffectiveRestriction) -> bool) -> bool {
    request.is_handled_by(DOCUMENT_SERVICE) && restriction_of(request).is_some_and(|r| !exempt(r))
}

fn refuse(name: &str, request: &Request, response: &mut Response, reason: &str) {
    warn!(
        interceptor = %name,
        method = %request.method(),
        path = %request.path(),
        reason = %reason,
        "Request forbidden by data restriction"
    );
    response.set_error(403, reason);
}

/// Refuses management requests unless `allowManagementRequests` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForbidManagementRequests;

impl ForbidManagementRequests {
    pub const NAME: &'static str = "forbid-management-requests";
}

impl Interceptor for ForbidManagementRequests {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn intercept_point(&self) -> InterceptPoint {
        InterceptPoint::AfterAuth
    }

    fn resolve(&self, request: &Request) -> bool {
        applies(request, |r| r.management_allowed)
    }

    fn handle(&self, request: &mut Request, response: &mut Response) -> Result<(), InterceptorError> {
        if restriction_of(request).is_some_and(EffectiveRestriction::management_forbidden) {
            refuse(Self::NAME, request, response, "management requests are not allowed");
        }
        Ok(())
    }
}

/// Refuses bulk PATCH and DELETE unless allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForbidBulkRequests;

impl ForbidBulkRequests {
    pub const NAME: &'static str = "forbid-bulk-requests";
}

impl Interceptor for ForbidBulkRequests {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn intercept_point(&self) -> InterceptPoint {
        InterceptPoint::AfterAuth
    }

    fn resolve(&self, request: &Request) -> bool {
        applies(request, |r| r.bulk_patch_allowed && r.bulk_delete_allowed)
    }

    fn handle(&self, request: &mut Request, response: &mut Response) -> Result<(), InterceptorError> {
        let Some(restriction) = restriction_of(request).filter(|r| r.bulk_forbidden()) else {
            return Ok(());
        };
        let reason = if restriction.bulk_patch_request {
            "bulk PATCH requests are not allowed"
        } else {
            "bulk DELETE requests are not allowed"
        };
        refuse(Self::NAME, request, response, reason);
        Ok(())
    }
}

/// Refuses the `writeMode` query parameter unless allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForbidWriteMode;

impl ForbidWriteMode {
    pub const NAME: &'static str = "forbid-write-mode";
}

impl Interceptor for ForbidWriteMode {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn intercept_point(&self) -> InterceptPoint {
        InterceptPoint::AfterAuth
    }

    fn resolve(&self, request: &Request) -> bool {
        applies(request, |r| r.write_mode_allowed)
    }

    fn handle(&self, request: &mut Request, response: &mut Response) -> Result<(), InterceptorError> {
        if restriction_of(request).is_some_and(EffectiveRestriction::write_mode_forbidden) {
            refuse(
                Self::NAME,
                request,
                response,
                "the writeMode query parameter is not allowed",
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::test_support::authorized;
    use bastion_types::{Method, Principal};
    use serde_json::{Value, json};
    use test_case::test_case;

    fn mongo(method: Method, path: &str) -> Request {
        Request::new(method, path)
            .with_principal(Principal::new("alice").with_role("user"))
            .with_service(DOCUMENT_SERVICE)
    }

    fn run(interceptor: &dyn Interceptor, request: Request, restriction: Value) -> Option<u16> {
        let mut request = authorized(request, restriction);
        if !interceptor.resolve(&request) {
            return None;
        }
        let mut response = Response::new();
        interceptor.handle(&mut request, &mut response).unwrap();
        Some(response.status())
    }

    #[test_case(Method::Put, "/shop", json!({}), Some(403); "create db forbidden")]
    #[test_case(Method::Get, "/shop", json!({}), Some(200); "read db allowed")]
    #[test_case(Method::Delete, "/shop/orders", json!({"allowManagementRequests": true}), None; "exempt")]
    #[test_case(Method::Get, "/shop/orders/_indexes", json!({"whitelistManagementRequests": false}), Some(403); "indexes forbidden")]
    fn management_requests(method: Method, path: &str, restriction: Value, expected: Option<u16>) {
        assert_eq!(
            run(&ForbidManagementRequests, mongo(method, path), restriction),
            expected
        );
    }

    #[test]
    fn management_guard_ignores_other_services() {
        let request = Request::new(Method::Put, "/shop")
            .with_principal(Principal::new("alice").with_role("user"))
            .with_service("graphql");
        assert_eq!(run(&ForbidManagementRequests, request, json!({})), None);
    }

    #[test]
    fn management_guard_needs_a_decision() {
        let request = mongo(Method::Put, "/shop");
        assert!(!ForbidManagementRequests.resolve(&request));
    }

    #[test_case(Method::Patch, json!({}), Some(403); "bulk patch forbidden")]
    #[test_case(Method::Delete, json!({}), Some(403); "bulk delete forbidden")]
    #[test_case(Method::Delete, json!({"allowBulkDelete": true}), Some(200); "bulk delete allowed")]
    #[test_case(Method::Patch, json!({"allowBulkPatch": true, "allowBulkDelete": true}), None; "both allowed")]
    fn bulk_requests(method: Method, restriction: Value, expected: Option<u16>) {
        assert_eq!(
            run(&ForbidBulkRequests, mongo(method, "/shop/orders/*"), restriction),
            expected
        );
    }

    #[test]
    fn write_mode() {
        let upsert = || mongo(Method::Post, "/shop/orders").with_query_param("writeMode", "upsert");

        assert_eq!(run(&ForbidWriteMode, upsert(), json!({})), Some(403));
        assert_eq!(
            run(&ForbidWriteMode, upsert(), json!({"allowWriteMode": true})),
            None
        );
        assert_eq!(
            run(&ForbidWriteMode, mongo(Method::Post, "/shop/orders"), json!({})),
            Some(200)
        );
    }
}
