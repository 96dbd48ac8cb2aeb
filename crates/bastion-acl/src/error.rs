//! Error types for permission loading and resolution.

use thiserror::Error;

/// Errors raised while loading, resolving or applying permissions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AclError {
    /// A permission definition, predicate or filter template is malformed.
    #[error("Invalid permission definition: {reason}")]
    InvalidDefinition { reason: String },

    /// A record source could not be read.
    #[error("Failed to load permissions from {source_name}: {reason}")]
    Load { source_name: String, reason: String },

    /// The request was refused by the resolved permission.
    #[error("Access denied: {reason}")]
    PolicyDenied { reason: String },

    /// A decision was already attached to the request.
    #[error("A decision is already attached to this request")]
    DecisionAlreadyAttached,
}

impl AclError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        AclError::InvalidDefinition {
            reason: reason.into(),
        }
    }

    pub fn load(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        AclError::Load {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for ACL operations.
pub type Result<T> = std::result::Result<T, AclError>;
