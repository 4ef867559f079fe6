//! Store configuration.
//!
//! Every field has a default, so a JSON document only needs the fields it
//! changes:
//!
//! ```json
//! { "settings_dir": ".prefs", "default_lookup_order": ["instance", "default"] }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Names used by the built-in scopes.
pub const DEFAULT_SCOPE: &str = "default";
pub const INSTANCE_SCOPE: &str = "instance";
pub const CONFIGURATION_SCOPE: &str = "configuration";
pub const PROJECT_SCOPE: &str = "project";

/// Layout of preference files and the built-in lookup order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory below each base that holds the preference files.
    pub settings_dir: String,
    /// Extension of preference files, without the dot.
    pub file_extension: String,
    /// Key written first in every preference file.
    pub version_key: String,
    pub version_value: String,
    /// Base location of the instance scope.
    pub instance_base: String,
    /// Base location of the configuration scope.
    pub configuration_base: String,
    /// Location under which each project has its own directory.
    pub projects_base: String,
    /// Scope names searched, in order, when no override is registered.
    pub default_lookup_order: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            settings_dir: ".settings".to_string(),
            file_extension: "prefs".to_string(),
            version_key: "preferences.version".to_string(),
            version_value: "1".to_string(),
            instance_base: INSTANCE_SCOPE.to_string(),
            configuration_base: CONFIGURATION_SCOPE.to_string(),
            projects_base: "projects".to_string(),
            default_lookup_order: vec![
                PROJECT_SCOPE.to_string(),
                INSTANCE_SCOPE.to_string(),
                CONFIGURATION_SCOPE.to_string(),
                DEFAULT_SCOPE.to_string(),
            ],
        }
    }
}

impl StoreConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: StoreConfig = serde_json::from_str(json).map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        log::debug!("Reading store configuration from {}...", path.display());
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    fn validate(&self) -> Result<()> {
        if self.settings_dir.is_empty() || self.settings_dir.contains('/') {
            return Err(Error::Config {
                message: format!("settings_dir '{}' must be a single name", self.settings_dir),
            });
        }
        if self.file_extension.is_empty() {
            return Err(Error::Config {
                message: "file_extension must not be empty".to_string(),
            });
        }
        if self.version_key.is_empty() {
            return Err(Error::Config {
                message: "version_key must not be empty".to_string(),
            });
        }
        if let Some(name) = self.default_lookup_order.iter().find(|s| s.is_empty()) {
            return Err(Error::Config {
                message: format!("default_lookup_order contains an empty scope name {:?}", name),
            });
        }
        Ok(())
    }

    /// The qualifier a preference file name belongs to, if it is one.
    pub(crate) fn qualifier_of<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        file_name
            .strip_suffix(self.file_extension.as_str())
            .and_then(|rest| rest.strip_suffix('.'))
            .filter(|qualifier| !qualifier.is_empty())
    }
}
