//! Error types for the interceptor pipeline.

use bastion_acl::AclError;
use thiserror::Error;

use crate::point::InterceptPoint;
use crate::traversal::TraversalState;

/// Errors raised while building or driving a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// A point was driven after a later one already ran.
    #[error("Intercept point {requested} cannot run after {last}")]
    OutOfOrder {
        requested: InterceptPoint,
        last: InterceptPoint,
    },

    /// The traversal already terminated or completed.
    #[error("Traversal is finished ({state:?}); cannot run {requested}")]
    Finished {
        requested: InterceptPoint,
        state: TraversalState,
    },

    /// Two interceptors were registered under the same name.
    #[error("Interceptor '{name}' is registered twice")]
    DuplicateInterceptor { name: String },
}

/// Error returned by [`Interceptor::handle`](crate::Interceptor::handle).
///
/// Any error ends the traversal with a generic 500 response.
#[derive(Debug, Error)]
pub enum InterceptorError {
    /// Unexpected failure inside an interceptor.
    #[error("Interceptor fault: {0}")]
    Fault(String),

    #[error(transparent)]
    Acl(#[from] AclError),
}

impl InterceptorError {
    pub fn fault(message: impl Into<String>) -> Self {
        InterceptorError::Fault(message.into())
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
