//! The interceptor abstraction.

use std::fmt;
use std::sync::Arc;

use bastion_acl::{AclError, Predicate, predicate};
use bastion_types::{Request, Response};

use crate::error::InterceptorError;
use crate::point::InterceptPoint;

/// A pluggable handler run at one intercept point.
///
/// Interceptors do not know about each other. Each decides per request
/// whether it applies ([`resolve`](Self::resolve)) and may then read or
/// mutate the request and response ([`handle`](Self::handle)). Setting the
/// response in error ends the traversal.
pub trait Interceptor: Send + Sync {
    /// Unique name, used in logs and to disable the interceptor.
    fn name(&self) -> &str;

    fn intercept_point(&self) -> InterceptPoint;

    /// Order within the point: lower runs first.
    fn priority(&self) -> i32 {
        0
    }

    /// Returns whether the interceptor applies to the request.
    fn resolve(&self, request: &Request) -> bool;

    fn handle(&self, request: &mut Request, response: &mut Response)
    -> Result<(), InterceptorError>;
}

// ============================================================================
// Gated
// ============================================================================

/// Applies an interceptor only to requests that also resolve a predicate.
pub struct Gated<I> {
    inner: I,
    gate: Arc<dyn Predicate>,
}

impl<I: Interceptor> Gated<I> {
    pub fn new(inner: I, gate: Arc<dyn Predicate>) -> Self {
        Self { inner, gate }
    }

    /// Gates `inner` with a predicate expression.
    pub fn with_expression(inner: I, expression: &str) -> Result<Self, AclError> {
        Ok(Self::new(inner, predicate::compile(expression)?))
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }
}

impl<I> fmt::Debug for Gated<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gated")
            .field("gate", &self.gate.describe())
            .finish_non_exhaustive()
    }
}

impl<I: Interceptor> Interceptor for Gated<I> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn intercept_point(&self) -> InterceptPoint {
        self.inner.intercept_point()
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }

    fn resolve(&self, request: &Request) -> bool {
        self.gate.resolve(request) && self.inner.resolve(request)
    }

    fn handle(
        &self,
        request: &mut Request,
        response: &mut Response,
    ) -> Result<(), InterceptorError> {
        self.inner.handle(request, response)
    }
}
