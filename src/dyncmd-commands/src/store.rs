//! Persistence I/O for the metadata file and handler artifacts.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::config::RegistryConfig;
use crate::error::{CommandError, Result};
use crate::metadata::CommandsFile;
use crate::node::SEGMENT_SEPARATOR;

/// Deterministic identifier of a handler, derived from its node path.
///
/// `zzz__test` for the root `test`, `zzz__test2__child2` for a child.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(String);

impl HandlerId {
    /// The identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reads and writes the commands directory.
#[derive(Debug, Clone)]
pub struct CommandStore {
    dir: PathBuf,
    metadata_file: String,
    artifact_prefix: String,
    artifact_extension: String,
}

impl CommandStore {
    /// Create a store from the registry configuration.
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            dir: config.commands_dir.clone(),
            metadata_file: config.metadata_file.clone(),
            artifact_prefix: config.artifact_prefix.clone(),
            artifact_extension: config.artifact_extension.clone(),
        }
    }

    /// The commands directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the metadata file.
    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(&self.metadata_file)
    }

    /// Handler identifier for a node path.
    ///
    /// Unique per path as long as every segment passes
    /// [`validate_name`](crate::node::validate_name).
    pub fn handler_id<S: AsRef<str>>(&self, path: &[S]) -> HandlerId {
        let joined = path
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(SEGMENT_SEPARATOR);
        HandlerId(format!("{}{}", self.artifact_prefix, joined))
    }

    /// On-disk location of a handler artifact.
    pub fn artifact_path(&self, id: &HandlerId) -> PathBuf {
        self.dir
            .join(format!("{}.{}", id.as_str(), self.artifact_extension))
    }

    /// True if the path is the metadata file or a handler artifact.
    pub fn is_tracked_file(&self, path: &Path) -> bool {
        if path.parent() != Some(self.dir.as_path()) {
            return false;
        }
        let Some(file_name) = path.file_name().and_then(|f| f.to_str()) else {
            return false;
        };
        file_name == self.metadata_file || self.artifact_id(file_name).is_some()
    }

    fn artifact_id(&self, file_name: &str) -> Option<HandlerId> {
        let stem = file_name
            .strip_suffix(self.artifact_extension.as_str())?
            .strip_suffix('.')?;
        if stem.starts_with(&self.artifact_prefix) && stem.len() > self.artifact_prefix.len() {
            Some(HandlerId(stem.to_string()))
        } else {
            None
        }
    }

    /// Check if the metadata file exists.
    pub async fn metadata_exists(&self) -> bool {
        fs::try_exists(self.metadata_path()).await.unwrap_or(false)
    }

    /// Read and parse the metadata file.
    pub async fn read_metadata(&self) -> Result<CommandsFile> {
        let path = self.metadata_path();
        let text = fs::read_to_string(&path)
            .await
            .map_err(|e| CommandError::persistence(&path, e))?;
        CommandsFile::from_json(&text).map_err(|e| CommandError::persistence(&path, e))
    }

    /// Atomically replace the metadata file.
    pub async fn write_metadata(&self, file: &CommandsFile) -> Result<()> {
        let path = self.metadata_path();
        let text = file
            .to_json()
            .map_err(|e| CommandError::persistence(&path, e))?;
        atomic_write(&path, text.as_bytes())
            .await
            .map_err(|e| CommandError::persistence(&path, e))?;
        debug!("Wrote {} commands to {:?}", file.commands.len(), path);
        Ok(())
    }

    /// Read a handler artifact.
    pub async fn read_artifact(&self, id: &HandlerId) -> Result<String> {
        let path = self.artifact_path(id);
        fs::read_to_string(&path)
            .await
            .map_err(|e| CommandError::persistence(&path, e))
    }

    /// Atomically write a handler artifact.
    pub async fn write_artifact(&self, id: &HandlerId, source: &str) -> Result<()> {
        let path = self.artifact_path(id);
        atomic_write(&path, source.as_bytes())
            .await
            .map_err(|e| CommandError::persistence(&path, e))
    }

    /// Delete a handler artifact. Returns false if it did not exist.
    pub async fn delete_artifact(&self, id: &HandlerId) -> Result<bool> {
        let path = self.artifact_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted handler artifact {:?}", path);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CommandError::persistence(&path, e)),
        }
    }

    /// Identifiers of every artifact present in the directory, sorted.
    pub async fn list_artifacts(&self) -> Result<Vec<HandlerId>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CommandError::persistence(&self.dir, e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CommandError::persistence(&self.dir, e))?
        {
            if let Some(id) = entry.file_name().to_str().and_then(|f| self.artifact_id(f)) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Write to a temp file in the same directory, then rename over the target.
///
/// The temp name only carries the pid. Writers must hold the registry's
/// write gate so two writes to the same target never overlap.
async fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Cannot determine parent directory",
        )
    })?;
    fs::create_dir_all(parent).await?;

    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));

    fs::write(&temp_path, content).await?;
    let file = fs::OpenOptions::new().write(true).open(&temp_path).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}
