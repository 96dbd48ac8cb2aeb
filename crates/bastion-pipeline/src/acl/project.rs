use bastion_types::{Request, Response};

use super::{DOCUMENT_SERVICE, restriction_of};
use crate::error::InterceptorError;
use crate::interceptor::Interceptor;
use crate::point::InterceptPoint;

/// Removes forbidden read fields from response content and applies the
/// restriction's projection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectResponse;

impl ProjectResponse {
    pub const NAME: &'static str = "project-response";
}

impl Interceptor for ProjectResponse {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn intercept_point(&self) -> InterceptPoint {
        InterceptPoint::Response
    }

    fn resolve(&self, request: &Request) -> bool {
        request.is_handled_by(DOCUMENT_SERVICE)
            && restriction_of(request)
                .is_some_and(|r| r.projection.is_some() || !r.forbidden_read_fields.is_empty())
    }

    fn handle(&self, request: &mut Request, response: &mut Response) -> Result<(), InterceptorError> {
        if let (Some(restriction), Some(content)) = (restriction_of(request), response.content_mut()) {
            restriction.project(content);
        }
        Ok(())
    }
}
