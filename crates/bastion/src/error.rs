//! Error types for the composition root.

use bastion_acl::{AclError, CollectionTarget};
use bastion_config::ConfigError;
use bastion_pipeline::PipelineError;
use thiserror::Error;

/// Result type for [`Bastion`](crate::Bastion) operations.
pub type Result<T> = std::result::Result<T, BastionError>;

/// Errors raised while assembling or driving [`Bastion`](crate::Bastion).
#[derive(Debug, Error)]
pub enum BastionError {
    /// Permissions could not be loaded or resolved.
    #[error("acl error: {0}")]
    Acl(#[from] AclError),

    /// The interceptor pipeline rejected its registry or a traversal.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Configuration values are invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0:#}")]
    ConfigLoad(#[from] anyhow::Error),

    /// A permission collection is configured but no store backs it.
    #[error("permission collection {target} is configured but no document collection was provided")]
    MissingCollection { target: CollectionTarget },
}
