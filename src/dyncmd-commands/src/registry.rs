//! Command registry: the shared, hot-reloadable command tree.
//!
//! Readers take a cheap clone of the published [`Snapshot`] and never block
//! on writers. Writers (load, reload, add, remove, edits) are serialized by a
//! gate, build the new tree off to the side, persist it, and only then swap
//! it in. Handlers run outside every lock.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::dispatcher::{DispatchTarget, Dispatcher};
use crate::error::{CommandError, PREFIX_PLACEHOLDER, Result};
use crate::fetch::{NoFetcher, RemoteFetcher};
use crate::loader::{LoadReport, load_handlers, merge_file, merge_siblings};
use crate::metadata::CommandsFile;
use crate::node::{CommandNode, MIN_PERMISSION, display_path};
use crate::resolver::{Resolution, resolve};
use crate::sandbox::{CallerContext, HandlerMap, HandlerOutput, SandboxExecutor};
use crate::source::{MetadataOverrides, declare};
use crate::store::CommandStore;
use crate::tree::CommandTree;

/// Extra named values passed through to a handler.
pub type Kwargs = BTreeMap<String, serde_json::Value>;

/// One published, immutable state of the registry.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    tree: Arc<CommandTree>,
    handlers: HandlerMap,
}

impl Snapshot {
    /// The command tree.
    pub fn tree(&self) -> &Arc<CommandTree> {
        &self.tree
    }

    /// Loaded handlers.
    pub fn handlers(&self) -> &HandlerMap {
        &self.handlers
    }

    /// Everything dispatch needs for the node at `path`.
    pub fn target<S: AsRef<str>>(&self, path: &[S]) -> Result<DispatchTarget> {
        let node = self.tree.find(path)?.clone();
        Ok(DispatchTarget {
            path: path.iter().map(|s| s.as_ref().to_string()).collect(),
            node,
            handler: self.handlers.get(path),
            registry: Arc::clone(&self.tree),
        })
    }
}

/// Owns the command tree, its persisted form and the loaded handlers.
pub struct CommandRegistry {
    config: RegistryConfig,
    store: CommandStore,
    sandbox: Arc<dyn SandboxExecutor>,
    fetcher: Arc<dyn RemoteFetcher>,
    dispatcher: Dispatcher,
    current: RwLock<Arc<Snapshot>>,
    write_gate: Mutex<()>,
}

impl CommandRegistry {
    /// Create an empty registry. Call [`CommandRegistry::load`] to read the
    /// commands directory.
    pub fn new(config: RegistryConfig, sandbox: Arc<dyn SandboxExecutor>) -> Self {
        let snapshot = Snapshot {
            tree: Arc::new(CommandTree::new(config.default_prefix.clone())),
            handlers: HandlerMap::new(),
        };
        Self {
            store: CommandStore::from_config(&config),
            dispatcher: Dispatcher::new().ignore_permission(config.ignore_permission),
            config,
            sandbox,
            fetcher: Arc::new(NoFetcher),
            current: RwLock::new(Arc::new(snapshot)),
            write_gate: Mutex::new(()),
        }
    }

    /// Use a fetcher for link sources.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Replace the dispatcher.
    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// The configuration this registry was built with.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Disk layout.
    pub fn store(&self) -> &CommandStore {
        &self.store
    }

    /// The currently published state.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// The current command tree.
    pub fn tree(&self) -> Arc<CommandTree> {
        Arc::clone(&self.snapshot().tree)
    }

    fn publish(&self, tree: CommandTree, handlers: HandlerMap) {
        let snapshot = Arc::new(Snapshot {
            tree: Arc::new(tree),
            handlers,
        });
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    /// The live command prefix.
    pub fn prefix(&self) -> String {
        self.snapshot().tree.prefix().to_string()
    }

    /// Resolve raw input against the current tree.
    pub fn resolve(&self, input: &str) -> Option<Resolution> {
        resolve(&self.snapshot().tree, input)
    }

    /// Copy of the node at `path`.
    pub fn find<S: AsRef<str>>(&self, path: &[S]) -> Result<CommandNode> {
        self.snapshot().tree.find(path).cloned()
    }

    /// Root commands the caller could run right now.
    pub fn available(&self, caller_permission: i64) -> Vec<String> {
        let snapshot = self.snapshot();
        snapshot
            .tree
            .roots()
            .iter()
            .filter(|node| self.dispatcher.check(node, caller_permission).is_ok())
            .filter(|node| snapshot.handlers.get(&[node.name.as_str()]).is_some())
            .map(|node| node.name.clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Loading and persistence
    // ------------------------------------------------------------------

    /// Read the commands directory into an empty registry.
    ///
    /// A missing metadata file is a persistence error unless
    /// `create_if_missing` is set, in which case an empty one is written.
    /// Commands whose handler fails to load are reported in
    /// [`LoadReport::failed`] and are not published.
    pub async fn load(&self) -> Result<LoadReport> {
        let _gate = self.write_gate.lock().await;

        if !self.store.metadata_exists().await {
            let path = self.store.metadata_path();
            if !self.config.create_if_missing {
                return Err(CommandError::persistence(path, "metadata file not found"));
            }
            info!("Creating empty command metadata at {:?}", path);
            self.store
                .write_metadata(&CommandsFile::empty(self.config.default_prefix.clone()))
                .await?;
        }

        self.rebuild(CommandTree::new(self.config.default_prefix.clone()))
            .await
    }

    /// Merge the disk state onto the current tree and reload every handler.
    ///
    /// Nodes that are only in memory are kept. Protected nodes keep their
    /// fields. Readers see the old state until the new one is complete.
    pub async fn reload(&self) -> Result<LoadReport> {
        let _gate = self.write_gate.lock().await;
        let base = CommandTree::clone(&self.snapshot().tree);
        self.rebuild(base).await
    }

    async fn rebuild(&self, base: CommandTree) -> Result<LoadReport> {
        let file = self.store.read_metadata().await?;
        let mut tree = merge_file(&base, &file)?;
        let (handlers, report) =
            load_handlers(&mut tree, &self.store, self.sandbox.as_ref()).await?;

        if !report.orphaned_artifacts.is_empty() {
            warn!(
                "{} handler artifacts are not referenced by any command",
                report.orphaned_artifacts.len()
            );
        }

        self.publish(tree, handlers);
        info!(
            "Loaded {} commands ({} handlers, {} failed) from {:?}",
            report.commands,
            report.handlers,
            report.failed.len(),
            self.store.dir()
        );
        Ok(report)
    }

    /// Write the current tree to the metadata file.
    pub async fn save(&self) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        self.store
            .write_metadata(&CommandsFile::from_tree(&self.snapshot().tree))
            .await
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Dispatch a resolution against the current tree.
    pub async fn dispatch(
        &self,
        resolution: &Resolution,
        context: CallerContext,
        kwargs: Kwargs,
    ) -> Result<HandlerOutput> {
        let target = self.snapshot().target(&resolution.path)?;
        self.dispatcher
            .dispatch(target, context, resolution.args.clone(), kwargs)
            .await
    }

    /// Resolve and dispatch in one step.
    ///
    /// Returns `Ok(None)` when the input is not a command. Feedback from the
    /// handler is also sent on the caller's channel with the prefix filled in.
    pub async fn execute(
        &self,
        input: &str,
        context: CallerContext,
        kwargs: Kwargs,
    ) -> Result<Option<HandlerOutput>> {
        let (target, args) = {
            let snapshot = self.snapshot();
            let Some(resolution) = resolve(&snapshot.tree, input) else {
                return Ok(None);
            };
            (snapshot.target(&resolution.path)?, resolution.args)
        };
        let prefix = target.registry.prefix().to_string();

        let context = context.with_working_string(input);
        let output = self
            .dispatcher
            .dispatch(target, context.clone(), args, kwargs)
            .await?;

        if let Some(text) = &output.feedback {
            context.send_feedback(text.replace(PREFIX_PLACEHOLDER, &prefix));
        }
        Ok(Some(output))
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Register a command from handler source, or from a link to it.
    ///
    /// The declaration is merged like a reload. When the target node exists
    /// and is protected only its children are merged, and its handler and
    /// artifact are left alone.
    pub async fn add_command(
        &self,
        source: &str,
        is_link: bool,
        overrides: MetadataOverrides,
    ) -> Result<CommandNode> {
        let text = if is_link {
            self.fetcher.fetch(source).await?
        } else {
            source.to_string()
        };
        let declared = declare(&text, &overrides)?;

        let mut path = overrides.parent.clone();
        path.push(declared.name.clone());

        let _gate = self.write_gate.lock().await;
        let current = self.snapshot();
        let mut tree = CommandTree::clone(&current.tree);
        let mut handlers = current.handlers.clone();

        let protected = tree.find(&path).is_ok_and(|node| !node.overridable);
        let siblings = if overrides.parent.is_empty() {
            tree.roots_mut()
        } else {
            &mut tree.find_mut(&overrides.parent)?.children
        };
        merge_siblings(siblings, std::slice::from_ref(&declared));
        tree.validate()?;

        if protected {
            info!("'{}' is protected, merging children only", display_path(&path));
        } else {
            let id = self.store.handler_id(&path);
            let handler = self
                .sandbox
                .load(&id, &text)
                .map_err(|e| CommandError::handler_load(display_path(&path), e))?;
            self.store.write_artifact(&id, &text).await?;
            handlers.insert(path.clone(), handler);
        }

        self.store
            .write_metadata(&CommandsFile::from_tree(&tree))
            .await?;

        let node = tree.find(&path)?.clone();
        self.publish(tree, handlers);
        info!("Added command '{}'", display_path(&path));
        Ok(node)
    }

    /// Remove a command, its descendants and their handler artifacts.
    ///
    /// The metadata file is rewritten first. If deleting an artifact then
    /// fails, the removal still takes effect and the error is returned; the
    /// leftover artifact shows up as an orphan on the next load.
    pub async fn remove_command<S: AsRef<str>>(&self, path: &[S]) -> Result<CommandNode> {
        let path: Vec<String> = path.iter().map(|s| s.as_ref().to_string()).collect();

        let _gate = self.write_gate.lock().await;
        let current = self.snapshot();
        let mut tree = CommandTree::clone(&current.tree);
        let removed = tree.remove(&path)?;

        self.store
            .write_metadata(&CommandsFile::from_tree(&tree))
            .await?;

        let parent = &path[..path.len() - 1];
        let subtree = CommandTree::from_parts(String::new(), vec![removed.clone()]);
        let mut failure = None;
        for (relative, node) in subtree.walk() {
            if !node.has_handler() {
                continue;
            }
            let full: Vec<String> = parent.iter().cloned().chain(relative).collect();
            let id = self.store.handler_id(&full);
            match self.store.delete_artifact(&id).await {
                Ok(true) => {}
                Ok(false) => debug!("No artifact to delete for {}", id),
                Err(e) => {
                    warn!("Failed to delete {}: {}", id, e);
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        let mut handlers = current.handlers.clone();
        handlers.remove_subtree(&path);
        self.publish(tree, handlers);
        info!("Removed command '{}'", display_path(&path));

        match failure {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    /// Enable or disable a command.
    ///
    /// Only nodes that declare `function` can be disabled.
    pub async fn set_disabled<S: AsRef<str>>(&self, path: &[S], disabled: bool) -> Result<CommandNode> {
        self.edit(path, |node| {
            if disabled && node.function.is_none() {
                return Err(CommandError::Validation(format!(
                    "'{}' cannot be disabled because it does not define 'function'",
                    node.name
                )));
            }
            node.disabled = disabled;
            Ok(())
        })
        .await
    }

    /// Change the permission threshold of a command.
    pub async fn set_permission<S: AsRef<str>>(&self, path: &[S], permission: i64) -> Result<CommandNode> {
        if permission < MIN_PERMISSION {
            return Err(CommandError::Validation(format!(
                "permission {permission} is below the minimum of {MIN_PERMISSION}"
            )));
        }
        self.edit(path, |node| {
            node.permission = permission;
            Ok(())
        })
        .await
    }

    /// Change the command prefix and persist it.
    pub async fn set_prefix(&self, prefix: impl Into<String>) -> Result<()> {
        let prefix = prefix.into();

        let _gate = self.write_gate.lock().await;
        let current = self.snapshot();
        let mut tree = CommandTree::clone(&current.tree);
        tree.set_prefix(prefix.clone());

        self.store
            .write_metadata(&CommandsFile::from_tree(&tree))
            .await?;
        self.publish(tree, current.handlers.clone());
        info!("Command prefix set to '{}'", prefix);
        Ok(())
    }

    async fn edit<S, F>(&self, path: &[S], apply: F) -> Result<CommandNode>
    where
        S: AsRef<str>,
        F: FnOnce(&mut CommandNode) -> Result<()>,
    {
        let _gate = self.write_gate.lock().await;
        let current = self.snapshot();
        let mut tree = CommandTree::clone(&current.tree);

        let node = tree.find_mut(path)?;
        apply(node)?;
        let updated = node.clone();
        tree.validate()?;

        self.store
            .write_metadata(&CommandsFile::from_tree(&tree))
            .await?;
        self.publish(tree, current.handlers.clone());
        debug!("Updated '{}'", display_path(path));
        Ok(updated)
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("config", &self.config)
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}
