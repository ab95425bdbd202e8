//! Merging declared metadata into the tree and loading handlers.
//!
//! Merge rules, applied node by node and matched by name:
//!
//! - no existing node: the declaration is inserted with defaults filled in;
//! - existing node with `overridable = false`: its own fields are kept and
//!   only the declared children are merged;
//! - otherwise every field the declaration sets replaces the existing one,
//!   and omitted fields keep their value.
//!
//! Existing children absent from a declaration are kept. Merging never
//! deletes.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::error::Result;
use crate::metadata::{CommandData, CommandsFile};
use crate::node::{CommandNode, display_path};
use crate::sandbox::{HandlerMap, SandboxExecutor};
use crate::store::{CommandStore, HandlerId};
use crate::tree::CommandTree;

/// Outcome of a load or reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Number of nodes in the published tree.
    pub commands: usize,
    /// Number of handlers loaded.
    pub handlers: usize,
    /// Nodes whose handler could not be loaded, with the reason.
    ///
    /// This is the load-time error channel. Failed nodes and their
    /// descendants are left out of the published tree. The metadata file
    /// and artifacts on disk are not touched.
    pub failed: Vec<(Vec<String>, String)>,
    /// Artifacts on disk that no node references.
    pub orphaned_artifacts: Vec<HandlerId>,
}

impl LoadReport {
    /// True when every declared handler loaded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Merge a declaration onto an existing node.
pub fn merge_node(existing: &mut CommandNode, declared: &CommandData) {
    if existing.overridable {
        if let Some(usage) = &declared.usage {
            existing.usage = usage.clone();
        }
        if let Some(description) = &declared.description {
            existing.description = description.clone();
        }
        if let Some(permission) = declared.permission {
            existing.permission = permission;
        }
        if let Some(function) = declared.function {
            existing.function = function;
        }
        if let Some(disabled) = declared.disabled {
            existing.disabled = disabled;
        }
        if let Some(overridable) = declared.overridable {
            existing.overridable = overridable;
        }
    } else {
        debug!("Keeping protected fields of '{}'", existing.name);
    }

    if let Some(children) = &declared.children {
        merge_siblings(&mut existing.children, children);
    }
}

/// Merge declarations into a sibling list.
pub fn merge_siblings(siblings: &mut Vec<CommandNode>, declared: &[CommandData]) {
    for data in declared {
        match siblings.iter_mut().find(|n| n.name == data.name) {
            Some(existing) => merge_node(existing, data),
            None => siblings.push(data.to_node()),
        }
    }
}

/// Merge a whole metadata file onto a tree, taking the file's prefix.
///
/// The merged tree is validated before it is returned.
pub fn merge_file(base: &CommandTree, file: &CommandsFile) -> Result<CommandTree> {
    file.validate()?;

    let mut tree = base.clone();
    tree.set_prefix(file.command_prefix.clone());
    merge_siblings(tree.roots_mut(), &file.commands);
    tree.validate()?;
    Ok(tree)
}

/// Load a handler for every node that declares one.
///
/// Nodes whose artifact is missing or rejected by the sandbox are listed
/// in the report and removed from `tree` together with their descendants,
/// so no published node declares a handler it does not have.
pub async fn load_handlers(
    tree: &mut CommandTree,
    store: &CommandStore,
    sandbox: &dyn SandboxExecutor,
) -> Result<(HandlerMap, LoadReport)> {
    let mut handlers = HandlerMap::new();
    let mut report = LoadReport::default();
    let mut referenced = BTreeSet::new();

    for (path, node) in tree.walk() {
        let id = store.handler_id(&path);
        if !node.has_handler() {
            continue;
        }
        referenced.insert(id.clone());

        let source = match store.read_artifact(&id).await {
            Ok(source) => source,
            Err(e) => {
                warn!("Cannot read handler for '{}': {}", display_path(&path), e);
                report.failed.push((path, e.to_string()));
                continue;
            }
        };

        match sandbox.load(&id, &source) {
            Ok(handler) => {
                debug!("Loaded {} into '{}'", id, display_path(&path));
                handlers.insert(path, handler);
            }
            Err(e) => {
                warn!("Sandbox rejected {}: {}", id, e);
                report.failed.push((path, e.to_string()));
            }
        }
    }

    for (path, _) in &report.failed {
        if tree.remove(path).is_ok() {
            handlers.remove_subtree(path);
            warn!("Discarded broken command '{}'", display_path(path));
        }
    }

    report.commands = tree.walk().len();
    report.handlers = handlers.len();
    report.orphaned_artifacts = store
        .list_artifacts()
        .await?
        .into_iter()
        .filter(|id| !referenced.contains(id))
        .collect();

    Ok((handlers, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn data(json: &str) -> CommandData {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_partial_update_keeps_omitted_fields() {
        let mut node = CommandNode::new("test")
            .with_usage("old usage")
            .with_description("old")
            .with_permission(5);
        merge_node(&mut node, &data(r#"{"name": "test", "description": "new"}"#));

        assert_eq!(node.usage, "old usage");
        assert_eq!(node.description, "new");
        assert_eq!(node.permission, 5);
    }

    #[test]
    fn test_explicit_null_function_replaces() {
        let mut node = CommandNode::new("test").with_function(Some(true));
        merge_node(&mut node, &data(r#"{"name": "test", "function": null}"#));
        assert_eq!(node.function, None);

        let mut node = CommandNode::new("test").with_function(Some(true));
        merge_node(&mut node, &data(r#"{"name": "test"}"#));
        assert_eq!(node.function, Some(true));
    }

    #[test]
    fn test_protected_node_only_merges_children() {
        let mut node = CommandNode::new("admin")
            .with_permission(900)
            .with_function(Some(true))
            .with_overridable(false)
            .with_child(CommandNode::new("kick").with_permission(900));

        merge_node(
            &mut node,
            &data(
                r#"{"name": "admin", "permission": 0, "function": null, "disabled": true,
                    "overridable": true,
                    "children": [{"name": "kick", "permission": 100}, {"name": "ban"}]}"#,
            ),
        );

        assert_eq!(node.permission, 900);
        assert_eq!(node.function, Some(true));
        assert!(!node.disabled);
        assert!(!node.overridable);
        assert_eq!(node.child("kick").unwrap().permission, 100);
        assert!(node.child("ban").is_some());
    }

    #[test]
    fn test_merge_never_deletes() {
        let mut siblings = vec![CommandNode::new("a"), CommandNode::new("b")];
        merge_siblings(&mut siblings, &[data(r#"{"name": "c"}"#)]);

        let names: Vec<_> = siblings.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_merge_file_takes_prefix_and_validates() {
        let base = CommandTree::new("/").with_command(CommandNode::new("keep"));
        let file = CommandsFile::from_json(
            r#"{"commandPrefix": "!", "commands": [{"name": "new", "function": true}]}"#,
        )
        .unwrap();

        let merged = merge_file(&base, &file).unwrap();
        assert_eq!(merged.prefix(), "!");
        assert!(merged.contains(&["keep"]));
        assert!(merged.contains(&["new"]));
        assert_eq!(base.prefix(), "/");
    }

    #[test]
    fn test_merge_file_rejects_disable_without_function() {
        let base = CommandTree::new("!").with_command(CommandNode::new("group"));
        let file = CommandsFile::from_json(
            r#"{"commandPrefix": "!", "commands": [{"name": "group", "disabled": true}]}"#,
        )
        .unwrap();
        assert!(merge_file(&base, &file).is_err());
    }
}
