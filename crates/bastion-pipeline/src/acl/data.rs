//! Interceptors that shape the data a permitted request reads and writes.

use bastion_types::{Method, Request, Response};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{DOCUMENT_SERVICE, restriction_of};
use crate::error::InterceptorError;
use crate::interceptor::Interceptor;
use crate::point::InterceptPoint;

// ============================================================================
// Filter injection
// ============================================================================

/// Interpolated filters the document store client must apply, attached to
/// the request by [`InjectFilters`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectedFilters {
    pub read: Option<Value>,
    pub write: Option<Value>,
}

impl InjectedFilters {
    /// Returns the filters attached to `request`, if any.
    pub fn of(request: &Request) -> Option<&InjectedFilters> {
        request.attachment::<InjectedFilters>()
    }

    /// The filter that applies to `method`: the write filter for writes,
    /// the read filter otherwise.
    pub fn for_method(&self, method: Method) -> Option<&Value> {
        if method.is_write() {
            self.write.as_ref()
        } else {
            self.read.as_ref()
        }
    }
}

/// Attaches the restriction's read and write filters to the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct InjectFilters;

impl InjectFilters {
    pub const NAME: &'static str = "inject-filters";
}

impl Interceptor for InjectFilters {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn intercept_point(&self) -> InterceptPoint {
        InterceptPoint::BeforeHandler
    }

    fn resolve(&self, request: &Request) -> bool {
        request.is_handled_by(DOCUMENT_SERVICE)
            && restriction_of(request)
                .is_some_and(|r| r.read_filter.is_some() || r.write_filter.is_some())
    }

    fn handle(&self, request: &mut Request, _response: &mut Response) -> Result<(), InterceptorError> {
        let Some(restriction) = restriction_of(request) else {
            return Ok(());
        };
        let filters = InjectedFilters {
            read: restriction.read_filter.clone(),
            write: restriction.write_filter.clone(),
        };
        debug!(path = %request.path(), filters = ?filters, "Injecting filters");
        request
            .attach(filters)
            .map_err(|e| InterceptorError::fault(format!("filters: {e}")))
    }
}

// ============================================================================
// Request merging
// ============================================================================

/// Merges the restriction's `mergeRequest` document into write bodies.
///
/// Plain documents receive the keys directly, overriding client values.
/// Update documents (with `$` operators) receive them under `$set`. Arrays
/// are merged element-wise.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeRequest;

impl MergeRequest {
    pub const NAME: &'static str = "merge-request";
}

fn merge_into(body: &mut Value, merge: &Map<String, Value>) {
    match body {
        Value::Array(items) => {
            for item in items {
                merge_into(item, merge);
            }
        }
        Value::Object(document) if document.keys().any(|k| k.starts_with('$')) => {
            let set = document
                .entry("$set")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(set) = set {
                set.extend(merge.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        Value::Object(document) => {
            document.extend(merge.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        _ => {}
    }
}

impl Interceptor for MergeRequest {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn intercept_point(&self) -> InterceptPoint {
        InterceptPoint::BeforeHandler
    }

    fn resolve(&self, request: &Request) -> bool {
        request.is_handled_by(DOCUMENT_SERVICE)
            && matches!(request.method(), Method::Post | Method::Put | Method::Patch)
            && request.body().is_some()
            && restriction_of(request).is_some_and(|r| r.merge_request.is_some())
    }

    fn handle(&self, request: &mut Request, _response: &mut Response) -> Result<(), InterceptorError> {
        let Some(Value::Object(merge)) =
            restriction_of(request).and_then(|r| r.merge_request.clone())
        else {
            return Ok(());
        };
        if let Some(body) = request.body_mut() {
            merge_into(body, &merge);
        }
        Ok(())
    }
}

// ============================================================================
// Field protection
// ============================================================================

/// Refuses write bodies touching a forbidden write field.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtectFields;

impl ProtectFields {
    pub const NAME: &'static str = "protect-fields";
}

impl Interceptor for ProtectFields {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn intercept_point(&self) -> InterceptPoint {
        InterceptPoint::BeforeHandler
    }

    fn resolve(&self, request: &Request) -> bool {
        request.is_handled_by(DOCUMENT_SERVICE)
            && request.method().is_write()
            && request.body().is_some()
            && restriction_of(request).is_some_and(|r| !r.forbidden_write_fields.is_empty())
    }

    fn handle(&self, request: &mut Request, response: &mut Response) -> Result<(), InterceptorError> {
        let touched = match (restriction_of(request), request.body()) {
            (Some(restriction), Some(body)) => restriction.forbidden_write_in(body),
            _ => None,
        };
        if let Some(field) = touched {
            warn!(
                method = %request.method(),
                path = %request.path(),
                field = %field,
                "Write to protected field refused"
            );
            response.set_error(403, format!("field '{field}' cannot be written"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::test_support::authorized;
    use bastion_types::Principal;
    use serde_json::json;

    fn alice(method: Method, path: &str) -> Request {
        Request::new(method, path)
            .with_principal(Principal::new("alice").with_role("user"))
            .with_service(DOCUMENT_SERVICE)
    }

    fn run(interceptor: &dyn Interceptor, request: &mut Request) -> Response {
        let mut response = Response::new();
        assert!(interceptor.resolve(request), "{} should apply", interceptor.name());
        interceptor.handle(request, &mut response).unwrap();
        response
    }

    #[test]
    fn injects_interpolated_filters() {
        let mut request = authorized(
            alice(Method::Get, "/shop/orders"),
            json!({"readFilter": {"owner": "%USER"}, "writeFilter": "{\"locked\": false}"}),
        );

        run(&InjectFilters, &mut request);

        let filters = InjectedFilters::of(&request).unwrap();
        assert_eq!(filters.read, Some(json!({"owner": "alice"})));
        assert_eq!(filters.for_method(Method::Get), Some(&json!({"owner": "alice"})));
        assert_eq!(filters.for_method(Method::Patch), Some(&json!({"locked": false})));
    }

    #[test]
    fn no_filters_means_nothing_to_inject() {
        let request = authorized(alice(Method::Get, "/shop/orders"), json!({}));
        assert!(!InjectFilters.resolve(&request));
    }

    #[test]
    fn merges_into_plain_documents() {
        let mut request = authorized(
            alice(Method::Post, "/shop/orders").with_body(json!({"item": "pen", "owner": "bob"})),
            json!({"mergeRequest": {"owner": "%USER"}}),
        );

        run(&MergeRequest, &mut request);
        assert_eq!(request.body(), Some(&json!({"item": "pen", "owner": "alice"})));
    }

    #[test]
    fn merges_into_each_array_element() {
        let mut request = authorized(
            alice(Method::Post, "/shop/orders").with_body(json!([{"item": "pen"}, {"item": "ink"}])),
            json!({"mergeRequest": {"owner": "%USER"}}),
        );

        run(&MergeRequest, &mut request);
        assert_eq!(
            request.body(),
            Some(&json!([
                {"item": "pen", "owner": "alice"},
                {"item": "ink", "owner": "alice"},
            ]))
        );
    }

    #[test]
    fn merges_update_operators_under_set() {
        let mut request = authorized(
            alice(Method::Patch, "/shop/orders/1").with_body(json!({"$inc": {"count": 1}})),
            json!({"mergeRequest": {"updatedBy": "%USER"}}),
        );

        run(&MergeRequest, &mut request);
        assert_eq!(
            request.body(),
            Some(&json!({"$inc": {"count": 1}, "$set": {"updatedBy": "alice"}}))
        );
    }

    #[test]
    fn merge_skips_reads() {
        let request = authorized(
            alice(Method::Get, "/shop/orders").with_body(json!({})),
            json!({"mergeRequest": {"owner": "%USER"}}),
        );
        assert!(!MergeRequest.resolve(&request));
    }

    #[test]
    fn refuses_protected_field_writes() {
        let restriction = json!({"forbidWriteFields": ["owner"]});

        let mut direct = authorized(
            alice(Method::Patch, "/shop/orders/1").with_body(json!({"$set": {"owner": "eve"}})),
            restriction.clone(),
        );
        let response = run(&ProtectFields, &mut direct);
        assert_eq!(response.status(), 403);
        assert!(response.is_in_error());

        let mut unrelated = authorized(
            alice(Method::Patch, "/shop/orders/1").with_body(json!({"$set": {"item": "ink"}})),
            restriction,
        );
        assert!(!run(&ProtectFields, &mut unrelated).is_in_error());
    }
}
