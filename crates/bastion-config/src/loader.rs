//! Configuration loader with multi-source merging

use crate::{BastionConfig, ConfigError, Paths};
use anyhow::{Context, Result};
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    user_config: bool,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "BASTION".to_string(),
            user_config: true,
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "BASTION")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip ~/.config/bastion/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.user_config = false;
        self
    }

    /// Config files that exist, lowest precedence first.
    fn config_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();

        if self.user_config {
            if let Ok(user_config_file) = Paths::new().user_config_file() {
                files.push(user_config_file);
            }
        }
        files.push(Paths::project_config_file(&self.project_dir));
        files.push(Paths::local_config_file(&self.project_dir));

        files.retain(|file| file.exists());
        files
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<BastionConfig> {
        let mut builder = config::Config::builder();

        // Built-in defaults
        let defaults = BastionConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // User, project and local files
        let files = self.config_files();
        for file in &files {
            builder = builder.add_source(
                config::File::from(file.clone())
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // Environment variables (BASTION_ACL__AUDIT=false)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("acl.anonymous_roles")
                .with_list_parse_key("pipeline.disabled"),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut bastion_config: BastionConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Permission documents keep their keys exactly as written
        for file in &files {
            if let Some(permissions) = permissions_in(file)? {
                bastion_config.acl.permissions = permissions;
            }
        }

        bastion_config.resolve_paths(&self.project_dir);

        if let Some(file) = &bastion_config.acl.permissions_file {
            let extra = read_permissions_file(file)
                .with_context(|| format!("Failed to load {}", file.display()))?;
            bastion_config.acl.permissions.extend(extra);
        }

        bastion_config.validate()?;

        debug!(
            files = files.len(),
            permissions = bastion_config.acl.permissions.len(),
            "Configuration loaded"
        );
        Ok(bastion_config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> BastionConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_toml(path: &Path) -> Result<toml::Table, ConfigError> {
    toml::from_str(&read(path)?).map_err(|source| ConfigError::ParseError {
        path: path.to_path_buf(),
        source,
    })
}

fn as_entries(path: &Path, permissions: Value) -> Result<Vec<Value>, ConfigError> {
    match permissions {
        Value::Array(entries) => Ok(entries),
        other => Err(ConfigError::PermissionsError {
            path: path.to_path_buf(),
            reason: format!("expected an array, found {other}"),
        }),
    }
}

/// The `acl.permissions` array of a config file, if it has one.
fn permissions_in(path: &Path) -> Result<Option<Vec<Value>>, ConfigError> {
    let table = parse_toml(path)?;
    let Some(permissions) = table.get("acl").and_then(|acl| acl.get("permissions")) else {
        return Ok(None);
    };
    let value = serde_json::to_value(permissions).map_err(|e| ConfigError::PermissionsError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    as_entries(path, value).map(Some)
}

/// Reads permission entries from a dedicated file.
///
/// `.json` files hold an array of entries or an object with a `permissions`
/// array; any other file is TOML with a top-level `permissions` array.
pub fn read_permissions_file(path: &Path) -> Result<Vec<Value>, ConfigError> {
    let value = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str::<Value>(&read(path)?).map_err(|e| ConfigError::PermissionsError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    } else {
        let table = parse_toml(path)?;
        serde_json::to_value(table).map_err(|e| ConfigError::PermissionsError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    };

    let permissions = match value {
        Value::Object(mut object) => object.remove("permissions").unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    as_entries(path, permissions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn loader(project_dir: &Path) -> ConfigLoader {
        ConfigLoader::new()
            .with_project_dir(project_dir)
            .without_user_config()
    }

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = loader(temp_dir.path()).load().expect("Failed to load config");

        assert!(config.acl.audit);
        assert_eq!(config.acl.anonymous_roles, vec!["$unauthenticated"]);
        assert!(config.acl.permissions.is_empty());
    }

    #[test]
    fn test_load_project_config() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_content = r#"
[acl]
anonymous_roles = ["guest"]
audit = false

[[acl.permissions]]
roles = ["user"]
predicate = "method=GET and path-prefix('/shop')"
priority = 10
mongo = { readFilter = { owner = "%USER" }, allowBulkDelete = true }

[acl.collection]
db = "shop"

[pipeline]
disabled = ["project-response"]
"#;
        fs::write(project_dir.join("bastion.toml"), config_content)
            .expect("Failed to write config");

        let config = loader(project_dir).load().expect("Failed to load config");

        assert!(!config.acl.audit);
        assert_eq!(config.acl.anonymous_roles, vec!["guest"]);
        assert_eq!(
            config.acl.permissions,
            vec![json!({
                "roles": ["user"],
                "predicate": "method=GET and path-prefix('/shop')",
                "priority": 10,
                "mongo": {"readFilter": {"owner": "%USER"}, "allowBulkDelete": true},
            })]
        );
        let collection = config.acl.collection.expect("collection configured");
        assert_eq!(collection.db, "shop");
        assert_eq!(collection.collection, "acl");
        assert_eq!(config.pipeline.disabled, vec!["project-response"]);
    }

    #[test]
    fn test_local_overrides() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("bastion.toml"),
            r#"
[acl]
audit = true

[[acl.permissions]]
role = "admin"
predicate = "true"
priority = 0
"#,
        )
        .expect("Failed to write project config");

        fs::write(
            project_dir.join("bastion.local.toml"),
            r#"
[acl]
audit = false
"#,
        )
        .expect("Failed to write local config");

        let config = loader(project_dir).load().expect("Failed to load config");

        // Local config overrides scalars and keeps project permissions
        assert!(!config.acl.audit);
        assert_eq!(config.acl.permissions.len(), 1);
    }

    // Environment variables are not exercised here: the process environment
    // is shared between tests. They override files as expected:
    //
    // BASTION_ACL__AUDIT=false
    // BASTION_PIPELINE__DISABLED=merge-request,project-response

    #[test]
    fn test_permissions_file() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("bastion.toml"),
            r#"
[acl]
permissions_file = "permissions.json"

[[acl.permissions]]
role = "admin"
predicate = "true"
priority = 0
"#,
        )
        .expect("Failed to write project config");
        fs::write(
            project_dir.join("permissions.json"),
            r#"[{"role": "user", "predicate": "method=GET", "priority": 5}]"#,
        )
        .expect("Failed to write permissions");

        let config = loader(project_dir).load().expect("Failed to load config");

        assert!(config.acl.permissions_file.as_ref().is_some_and(|p| p.is_absolute()));
        let roles: Vec<&str> = config
            .acl
            .permissions
            .iter()
            .filter_map(|p| p["role"].as_str())
            .collect();
        assert_eq!(roles, vec!["admin", "user"]);
    }

    #[test]
    fn test_toml_permissions_file() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let file = temp_dir.path().join("acl.toml");
        fs::write(
            &file,
            r#"
[[permissions]]
roles = ["user", "$unauthenticated"]
predicate = "path-prefix('/public')"
"#,
        )
        .expect("Failed to write permissions");

        let permissions = read_permissions_file(&file).expect("Failed to read permissions");
        assert_eq!(
            permissions,
            vec![json!({"roles": ["user", "$unauthenticated"], "predicate": "path-prefix('/public')"})]
        );
    }

    #[test]
    fn test_missing_permissions_file_fails() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();
        fs::write(
            project_dir.join("bastion.toml"),
            "[acl]\npermissions_file = \"missing.toml\"\n",
        )
        .expect("Failed to write project config");

        assert!(loader(project_dir).load().is_err());
    }

    #[test]
    fn test_invalid_collection_fails() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();
        fs::write(
            project_dir.join("bastion.toml"),
            "[acl.collection]\ncollection = \"\"\n",
        )
        .expect("Failed to write project config");

        let err = loader(project_dir).load().unwrap_err();
        assert!(err.to_string().contains("acl.collection"), "{err}");
    }
}
