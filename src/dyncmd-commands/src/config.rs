//! Registry configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CommandError, Result};

/// Configuration for a [`crate::CommandRegistry`].
///
/// Can be built in code or read from a TOML file:
///
/// ```toml
/// commands_dir = "/srv/bot/commands"
/// default_prefix = "!"
/// create_if_missing = true
/// hot_reload = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Directory holding the metadata file and handler artifacts.
    #[serde(default = "RegistryConfig::default_dir")]
    pub commands_dir: PathBuf,

    /// File name of the persisted metadata inside `commands_dir`.
    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,

    /// File name prefix of handler artifacts.
    #[serde(default = "default_artifact_prefix")]
    pub artifact_prefix: String,

    /// File extension of handler artifacts (without the dot).
    #[serde(default = "default_artifact_extension")]
    pub artifact_extension: String,

    /// Prefix written when a fresh metadata file is created.
    #[serde(default = "default_prefix")]
    pub default_prefix: String,

    /// Create an empty metadata file instead of failing when none exists.
    #[serde(default)]
    pub create_if_missing: bool,

    /// Skip the caller permission check during dispatch.
    #[serde(default)]
    pub ignore_permission: bool,

    /// Reload automatically when files in `commands_dir` change.
    #[serde(default)]
    pub hot_reload: bool,

    /// Quiet period before a batch of file events triggers a reload.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_metadata_file() -> String {
    "commands.json".to_string()
}

fn default_artifact_prefix() -> String {
    "zzz__".to_string()
}

fn default_artifact_extension() -> String {
    "cmd".to_string()
}

fn default_prefix() -> String {
    "/".to_string()
}

fn default_debounce_ms() -> u64 {
    500
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            commands_dir: Self::default_dir(),
            metadata_file: default_metadata_file(),
            artifact_prefix: default_artifact_prefix(),
            artifact_extension: default_artifact_extension(),
            default_prefix: default_prefix(),
            create_if_missing: false,
            ignore_permission: false,
            hot_reload: false,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl RegistryConfig {
    /// Create a configuration rooted at the given commands directory.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            commands_dir: dir.into(),
            ..Default::default()
        }
    }

    /// Default commands directory: `~/.config/dyncmd/commands`.
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("dyncmd").join("commands"))
            .unwrap_or_else(|| PathBuf::from(".dyncmd/commands"))
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CommandError::Validation(e.to_string()))
    }

    /// Read a configuration from a TOML file.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CommandError::persistence(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Set the prefix used for a freshly created metadata file.
    pub fn with_default_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.default_prefix = prefix.into();
        self
    }

    /// Create the metadata file on first load if it is missing.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Disable permission checks during dispatch.
    pub fn ignore_permission(mut self, value: bool) -> Self {
        self.ignore_permission = value;
        self
    }

    /// Path of the metadata file.
    pub fn metadata_path(&self) -> PathBuf {
        self.commands_dir.join(&self.metadata_file)
    }
}
