use std::sync::Arc;

use bastion_acl::{PermissionStore, Resolver};
use bastion_types::{Request, Response};
use tracing::debug;

use crate::error::InterceptorError;
use crate::interceptor::Interceptor;
use crate::point::InterceptPoint;

/// Resolves the request against the active permission set and attaches the
/// decision.
///
/// Denied requests get 401 when anonymous and 403 otherwise. The response
/// body carries only the generic status text; the deny reason stays in the
/// attached decision and the log.
pub struct Authorize {
    store: Arc<PermissionStore>,
    resolver: Resolver,
}

impl Authorize {
    pub const NAME: &'static str = "authorize";
    pub const FORBIDDEN: &'static str = "Forbidden";
    pub const UNAUTHORIZED: &'static str = "Unauthorized";

    pub fn new(store: Arc<PermissionStore>, resolver: Resolver) -> Self {
        Self { store, resolver }
    }
}

impl Interceptor for Authorize {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn intercept_point(&self) -> InterceptPoint {
        InterceptPoint::AfterAuth
    }

    fn priority(&self) -> i32 {
        i32::MIN
    }

    fn resolve(&self, _request: &Request) -> bool {
        true
    }

    fn handle(&self, request: &mut Request, response: &mut Response) -> Result<(), InterceptorError> {
        let snapshot = self.store.snapshot();
        let decision = self.resolver.resolve(&snapshot, request);
        let allowed = decision.is_allowed();
        let reason = decision.reason().to_string();
        debug!(
            allowed,
            generation = decision.generation(),
            reason = %reason,
            "Decision attached"
        );
        decision.attach_to(request)?;

        if !allowed {
            if request.is_authenticated() {
                response.set_error(403, Self::FORBIDDEN);
            } else {
                response.set_error(401, Self::UNAUTHORIZED);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_acl::{AclError, Decision, RecordSource, StaticSource};
    use bastion_types::{Method, Principal};
    use serde_json::json;

    fn authorize() -> Authorize {
        let source = StaticSource::new(vec![json!({
            "role": "user",
            "predicate": "method=GET",
            "priority": 10,
        })]);
        let store = PermissionStore::open(vec![Box::new(source) as Box<dyn RecordSource>]).unwrap();
        Authorize::new(Arc::new(store), Resolver::new().without_audit())
    }

    #[test]
    fn attaches_allow_decision() {
        let mut request = Request::new(Method::Get, "/shop/orders")
            .with_principal(Principal::new("alice").with_role("user"));
        let mut response = Response::new();

        authorize().handle(&mut request, &mut response).unwrap();

        assert!(!response.is_in_error());
        assert!(Decision::of(&request).is_some_and(Decision::is_allowed));
    }

    #[test]
    fn denies_authenticated_with_403() {
        let mut request = Request::new(Method::Post, "/shop/orders")
            .with_principal(Principal::new("alice").with_role("user"));
        let mut response = Response::new();

        authorize().handle(&mut request, &mut response).unwrap();

        assert_eq!(response.status(), 403);
        assert!(response.is_in_error());
        assert!(Decision::of(&request).is_some_and(|d| !d.is_allowed()));
    }

    #[test]
    fn denies_anonymous_with_401() {
        let mut request = Request::new(Method::Get, "/shop/orders");
        let mut response = Response::new();

        authorize().handle(&mut request, &mut response).unwrap();
        assert_eq!(response.status(), 401);
    }

    #[test]
    fn deny_reason_stays_out_of_the_response() {
        let mut request = Request::new(Method::Post, "/shop/orders")
            .with_principal(Principal::new("alice").with_role("user"));
        let mut response = Response::new();

        authorize().handle(&mut request, &mut response).unwrap();

        let reason = Decision::of(&request).unwrap().reason().to_string();
        assert!(!reason.is_empty());
        let content = response.content().unwrap();
        assert_eq!(content["message"], Authorize::FORBIDDEN);
        assert!(!content.to_string().contains(&reason));
    }

    #[test]
    fn anonymous_denial_says_unauthorized() {
        let mut request = Request::new(Method::Get, "/shop/orders");
        let mut response = Response::new();

        authorize().handle(&mut request, &mut response).unwrap();
        assert_eq!(response.content().unwrap()["message"], Authorize::UNAUTHORIZED);
    }

    #[test]
    fn second_decision_is_an_error() {
        let authorize = authorize();
        let mut request = Request::new(Method::Get, "/shop/orders")
            .with_principal(Principal::new("alice").with_role("user"));

        authorize.handle(&mut request, &mut Response::new()).unwrap();
        let err = authorize
            .handle(&mut request, &mut Response::new())
            .unwrap_err();
        assert!(matches!(
            err,
            InterceptorError::Acl(AclError::DecisionAlreadyAttached)
        ));
    }
}
