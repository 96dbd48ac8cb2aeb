//! Where the loader looks for `bastion` configuration files.

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

const USER_FILE: &str = "config.toml";
const PROJECT_FILE: &str = "bastion.toml";
const LOCAL_FILE: &str = "bastion.local.toml";

/// Locations of the three file layers, lowest precedence first: per-user,
/// per-project, then uncommitted local overrides.
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("dev", "Bastion", "bastion"),
        }
    }

    /// Per-user settings shared by every project, under the platform's
    /// config directory.
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|dirs| dirs.config_dir().join(USER_FILE))
            .ok_or_else(|| {
                ConfigError::XdgError("no home directory to place user settings in".to_string())
            })
    }

    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(PROJECT_FILE)
    }

    /// Machine-specific overrides next to the project file. Meant to stay
    /// out of version control.
    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(LOCAL_FILE)
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
