//! Configuration management for Bastion
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (BASTION_* prefix, highest precedence)
//! 2. bastion.local.toml (gitignored, local overrides)
//! 3. bastion.toml (git-tracked, project config)
//! 4. ~/.config/bastion/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)
//!
//! Permission entries are free-form documents and are read verbatim from
//! the highest-precedence file that defines `[[acl.permissions]]`, followed
//! by the entries of `acl.permissions_file` if one is set.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::{ConfigLoader, read_permissions_file};
pub use paths::Paths;

/// Role assumed by anonymous requests when none is configured.
pub const DEFAULT_ANONYMOUS_ROLE: &str = "$unauthenticated";

/// Main Bastion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BastionConfig {
    pub acl: AclConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AclConfig {
    /// Static permission entries, in load order.
    pub permissions: Vec<Value>,
    /// Extra file of static entries, relative to the project directory.
    pub permissions_file: Option<PathBuf>,
    /// Roles assumed by requests without a principal.
    pub anonymous_roles: Vec<String>,
    /// Log every authorization decision.
    pub audit: bool,
    /// Collection holding permission documents. Absent disables the source.
    pub collection: Option<CollectionConfig>,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            permissions: Vec::new(),
            permissions_file: None,
            anonymous_roles: vec![DEFAULT_ANONYMOUS_ROLE.to_string()],
            audit: true,
            collection: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub db: String,
    pub collection: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            db: "restheart".to_string(),
            collection: "acl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Names of built-in interceptors to leave out.
    pub disabled: Vec<String>,
}

impl BastionConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Configuration granting nothing to anyone, without audit logging.
    pub fn quiet() -> Self {
        Self {
            acl: AclConfig {
                audit: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if let Some(file) = &mut self.acl.permissions_file {
            if file.is_relative() {
                *file = base.join(&*file);
            }
        }
    }

    /// Checks values the type system cannot.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if let Some(collection) = &self.acl.collection {
            if collection.db.trim().is_empty() || collection.collection.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "acl.collection needs a non-empty db and collection".to_string(),
                ));
            }
        }
        if self.acl.anonymous_roles.iter().any(|r| r.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "acl.anonymous_roles cannot contain empty roles".to_string(),
            ));
        }
        if let Some(index) = self.acl.permissions.iter().position(|p| !p.is_object()) {
            return Err(ConfigError::ValidationError(format!(
                "acl.permissions[{index}] is not a table"
            )));
        }
        Ok(())
    }
}
