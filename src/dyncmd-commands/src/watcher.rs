//! File system watcher for hot reloading commands.
//!
//! Watches the commands directory and calls [`CommandRegistry::reload`] once
//! changes to the metadata file or to handler artifacts have settled.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{CommandError, Result};
use crate::loader::LoadReport;
use crate::registry::CommandRegistry;
use crate::store::CommandStore;

/// Sent after every reload the watcher triggers.
#[derive(Debug, Clone)]
pub enum ReloadEvent {
    /// The registry was reloaded.
    Reloaded {
        changed: Vec<PathBuf>,
        report: LoadReport,
    },
    /// Reloading failed; the previous state is still published.
    Failed { changed: Vec<PathBuf>, error: String },
}

/// Watches a registry's commands directory.
pub struct CommandWatcher {
    dir: PathBuf,
    watcher: Option<RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
}

impl CommandWatcher {
    /// Start watching. Must be called from within a tokio runtime.
    ///
    /// Reload outcomes are sent on `events` when given.
    pub fn start(
        registry: Arc<CommandRegistry>,
        events: Option<mpsc::Sender<ReloadEvent>>,
    ) -> Result<Self> {
        let dir = registry.store().dir().to_path_buf();
        let debounce = Duration::from_millis(registry.config().debounce_ms);

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let config = Config::default().with_compare_contents(false);
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                if notify_tx.send(result).is_err() {
                    debug!("Command watcher receiver dropped");
                }
            },
            config,
        )
        .map_err(|e| CommandError::persistence(&dir, e))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| CommandError::persistence(&dir, e))?;

        let task = tokio::spawn(handle_events(registry, notify_rx, events, debounce));
        info!("Command watcher started for {:?}", dir);

        Ok(Self {
            dir,
            watcher: Some(watcher),
            task: Some(task),
        })
    }

    /// Start watching only when the registry's `hot_reload` option is set.
    pub fn start_if_enabled(
        registry: Arc<CommandRegistry>,
        events: Option<mpsc::Sender<ReloadEvent>>,
    ) -> Result<Option<Self>> {
        if !registry.config().hot_reload {
            debug!("Hot reload disabled");
            return Ok(None);
        }
        Self::start(registry, events).map(Some)
    }

    /// Stop watching.
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            let _ = watcher.unwatch(&self.dir);
        }
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Command watcher stopped");
        }
    }

    /// Returns true if the watcher is active.
    pub fn is_active(&self) -> bool {
        self.watcher.is_some()
    }

    /// The watched directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for CommandWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Only the file name matters: the watch is not recursive.
fn is_tracked(store: &CommandStore, path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| store.is_tracked_file(&store.dir().join(name)))
}

async fn handle_events(
    registry: Arc<CommandRegistry>,
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    events: Option<mpsc::Sender<ReloadEvent>>,
    debounce: Duration,
) {
    let mut pending: Vec<PathBuf> = Vec::new();

    loop {
        match tokio::time::timeout(debounce, rx.recv()).await {
            Ok(Some(Ok(event))) => {
                for path in event.paths {
                    if is_tracked(registry.store(), &path) && !pending.contains(&path) {
                        pending.push(path);
                    }
                }
            }
            Ok(Some(Err(e))) => {
                error!("Watch error: {}", e);
            }
            Ok(None) => {
                debug!("Command watcher channel closed");
                break;
            }
            Err(_) => {
                if pending.is_empty() {
                    continue;
                }
                let changed = std::mem::take(&mut pending);
                debug!("{} command files changed, reloading", changed.len());

                let event = match registry.reload().await {
                    Ok(report) => ReloadEvent::Reloaded { changed, report },
                    Err(e) => {
                        warn!("Hot reload failed: {}", e);
                        ReloadEvent::Failed {
                            changed,
                            error: e.to_string(),
                        }
                    }
                };
                if let Some(tx) = &events {
                    let _ = tx.send(event).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;

    #[test]
    fn test_is_tracked_uses_file_name() {
        let store = CommandStore::from_config(&RegistryConfig::with_dir("/cmds"));
        assert!(is_tracked(&store, Path::new("/private/cmds/commands.json")));
        assert!(is_tracked(&store, Path::new("/cmds/zzz__roll.cmd")));
        assert!(!is_tracked(&store, Path::new("/cmds/.commands.json.tmp.42")));
        assert!(!is_tracked(&store, Path::new("/")));
    }

    #[tokio::test]
    async fn test_disabled_hot_reload_does_not_start() {
        let temp = tempfile::TempDir::new().unwrap();
        let registry = Arc::new(CommandRegistry::new(
            RegistryConfig::with_dir(temp.path()),
            Arc::new(NullSandbox),
        ));
        let watcher = CommandWatcher::start_if_enabled(registry, None).unwrap();
        assert!(watcher.is_none());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut config = RegistryConfig::with_dir(temp.path());
        config.hot_reload = true;
        let registry = Arc::new(CommandRegistry::new(config, Arc::new(NullSandbox)));

        let mut watcher = CommandWatcher::start_if_enabled(registry, None)
            .unwrap()
            .unwrap();
        assert!(watcher.is_active());
        assert_eq!(watcher.dir(), temp.path());
        watcher.stop();
        assert!(!watcher.is_active());
    }

    struct NullSandbox;

    impl crate::sandbox::SandboxExecutor for NullSandbox {
        fn load(
            &self,
            _id: &crate::store::HandlerId,
            _source: &str,
        ) -> std::result::Result<crate::sandbox::HandlerHandle, crate::sandbox::SandboxError> {
            Err(crate::sandbox::SandboxError("unused".to_string()))
        }
    }
}
