//! The command tree: a prefix plus an ordered forest of command nodes.

use std::collections::HashSet;

use crate::error::{CommandError, Result};
use crate::node::{CommandNode, MIN_PERMISSION, display_path, validate_name};

/// Rooted forest of top-level commands plus the global prefix.
///
/// Sibling names are unique at every level. Mutation goes through
/// [`CommandTree::insert`], [`CommandTree::replace`] and
/// [`CommandTree::remove`], which enforce that invariant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandTree {
    prefix: String,
    roots: Vec<CommandNode>,
}

impl CommandTree {
    /// Create an empty tree with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            roots: Vec::new(),
        }
    }

    /// Build a tree from already validated roots.
    pub(crate) fn from_parts(prefix: String, roots: Vec<CommandNode>) -> Self {
        Self { prefix, roots }
    }

    /// Append a root command, panicking on duplicates.
    #[cfg(test)]
    pub(crate) fn with_command(mut self, node: CommandNode) -> Self {
        if let Err(e) = self.insert::<&str>(&[], node) {
            panic!("invalid fixture tree: {e}");
        }
        self
    }

    /// The prefix input must start with to be resolved.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Replace the prefix.
    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
    }

    /// Top-level commands in declaration order.
    pub fn roots(&self) -> &[CommandNode] {
        &self.roots
    }

    pub(crate) fn roots_mut(&mut self) -> &mut Vec<CommandNode> {
        &mut self.roots
    }

    /// Get a root command by exact name.
    pub fn root(&self, name: &str) -> Option<&CommandNode> {
        self.roots.iter().find(|n| n.name == name)
    }

    /// Number of top-level commands.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Check if the tree has no commands.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Descend by exact name at each segment.
    pub fn find<S: AsRef<str>>(&self, path: &[S]) -> Result<&CommandNode> {
        let not_found = || CommandError::NotFound(display_path(path));
        let (first, rest) = path.split_first().ok_or_else(not_found)?;

        let mut node = self.root(first.as_ref()).ok_or_else(not_found)?;
        for segment in rest {
            node = node.child(segment.as_ref()).ok_or_else(not_found)?;
        }
        Ok(node)
    }

    /// Descend by exact name at each segment, mutably.
    pub fn find_mut<S: AsRef<str>>(&mut self, path: &[S]) -> Result<&mut CommandNode> {
        let not_found = || CommandError::NotFound(display_path(path));
        let (first, rest) = path.split_first().ok_or_else(not_found)?;

        let mut node = self
            .roots
            .iter_mut()
            .find(|n| n.name == first.as_ref())
            .ok_or_else(not_found)?;
        for segment in rest {
            node = node.child_mut(segment.as_ref()).ok_or_else(not_found)?;
        }
        Ok(node)
    }

    /// Check if a node exists at the path.
    pub fn contains<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.find(path).is_ok()
    }

    /// The sibling list under `parent` (the roots when `parent` is empty).
    fn siblings_mut<S: AsRef<str>>(&mut self, parent: &[S]) -> Result<&mut Vec<CommandNode>> {
        if parent.is_empty() {
            Ok(&mut self.roots)
        } else {
            Ok(&mut self.find_mut(parent)?.children)
        }
    }

    /// Insert a new node under `parent`.
    ///
    /// Fails with `Conflict` if a protected sibling of the same name exists and
    /// with `DuplicateName` for any other existing sibling.
    pub fn insert<S: AsRef<str>>(&mut self, parent: &[S], node: CommandNode) -> Result<()> {
        validate_name(&node.name)?;
        let siblings = self.siblings_mut(parent)?;
        if let Some(existing) = siblings.iter().find(|n| n.name == node.name) {
            if !existing.overridable {
                return Err(CommandError::Conflict(existing.name.clone()));
            }
            return Err(CommandError::DuplicateName {
                parent: parent_label(parent),
                name: node.name,
            });
        }
        siblings.push(node);
        Ok(())
    }

    /// Insert or replace a node under `parent`, keeping its position.
    ///
    /// Replacing a sibling with `overridable = false` fails with `Conflict`.
    /// Returns the replaced node, if any.
    pub fn replace<S: AsRef<str>>(
        &mut self,
        parent: &[S],
        node: CommandNode,
    ) -> Result<Option<CommandNode>> {
        validate_name(&node.name)?;
        let siblings = self.siblings_mut(parent)?;
        match siblings.iter_mut().find(|n| n.name == node.name) {
            Some(existing) if !existing.overridable => {
                Err(CommandError::Conflict(existing.name.clone()))
            }
            Some(existing) => Ok(Some(std::mem::replace(existing, node))),
            None => {
                siblings.push(node);
                Ok(None)
            }
        }
    }

    /// Remove and return the node at `path`.
    pub fn remove<S: AsRef<str>>(&mut self, path: &[S]) -> Result<CommandNode> {
        let not_found = || CommandError::NotFound(display_path(path));
        let (last, parent) = path.split_last().ok_or_else(not_found)?;

        let siblings = self.siblings_mut(parent).map_err(|_| not_found())?;
        let index = siblings
            .iter()
            .position(|n| n.name == last.as_ref())
            .ok_or_else(not_found)?;
        Ok(siblings.remove(index))
    }

    /// All nodes with their paths, depth-first in declaration order.
    pub fn walk(&self) -> Vec<(Vec<String>, &CommandNode)> {
        let mut out = Vec::new();
        for root in &self.roots {
            walk_node(root, Vec::new(), &mut out);
        }
        out
    }

    /// Check structural invariants over the whole tree.
    ///
    /// Names must pass [`validate_name`] and be unique among siblings,
    /// permissions at least `-1`, and a disabled node must declare
    /// `function`.
    pub fn validate(&self) -> Result<()> {
        validate_siblings(&self.roots, &[])
    }
}

fn parent_label<S: AsRef<str>>(parent: &[S]) -> String {
    if parent.is_empty() {
        "the root".to_string()
    } else {
        format!("'{}'", display_path(parent))
    }
}

fn walk_node<'a>(
    node: &'a CommandNode,
    mut path: Vec<String>,
    out: &mut Vec<(Vec<String>, &'a CommandNode)>,
) {
    path.push(node.name.clone());
    out.push((path.clone(), node));
    for child in &node.children {
        walk_node(child, path.clone(), out);
    }
}

fn validate_siblings(siblings: &[CommandNode], parent: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for node in siblings {
        validate_name(&node.name)?;
        if !seen.insert(node.name.as_str()) {
            return Err(CommandError::DuplicateName {
                parent: parent_label(parent),
                name: node.name.clone(),
            });
        }

        let mut path = parent.to_vec();
        path.push(node.name.clone());

        if node.permission < MIN_PERMISSION {
            return Err(CommandError::Validation(format!(
                "'{}' has permission {} (minimum is {MIN_PERMISSION})",
                display_path(&path),
                node.permission
            )));
        }
        if node.disabled && node.function.is_none() {
            return Err(CommandError::Validation(format!(
                "'{}' is disabled but does not define 'function'",
                display_path(&path)
            )));
        }
        validate_siblings(&node.children, &path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> CommandTree {
        CommandTree::new("!")
            .with_command(CommandNode::new("test").with_function(Some(true)))
            .with_command(
                CommandNode::new("test2")
                    .with_child(CommandNode::new("child"))
                    .with_child(CommandNode::new("child2").with_permission(10)),
            )
    }

    #[test]
    fn test_find_descends_by_exact_name() {
        let tree = nested();

        assert_eq!(tree.find(&["test2", "child2"]).unwrap().permission, 10);
        assert!(matches!(
            tree.find(&["test2", "missing"]),
            Err(CommandError::NotFound(_))
        ));
        assert!(matches!(tree.find::<&str>(&[]), Err(CommandError::NotFound(_))));
        assert!(tree.find(&["TEST"]).is_err());
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let mut tree = nested();

        let result = tree.insert::<&str>(&[], CommandNode::new("test"));
        assert!(matches!(result, Err(CommandError::DuplicateName { .. })));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_insert_protected_sibling_conflicts() {
        let mut tree = CommandTree::new("!")
            .with_command(CommandNode::new("locked").with_overridable(false));

        let result = tree.insert::<&str>(&[], CommandNode::new("locked"));
        assert!(matches!(result, Err(CommandError::Conflict(name)) if name == "locked"));

        let result = tree.replace::<&str>(&[], CommandNode::new("locked").with_permission(5));
        assert!(matches!(result, Err(CommandError::Conflict(_))));
        assert_eq!(tree.find(&["locked"]).unwrap().permission, 0);
    }

    #[test]
    fn test_insert_child() {
        let mut tree = nested();
        tree.insert(&["test2"], CommandNode::new("child3")).unwrap();

        let names: Vec<_> = tree.find(&["test2"]).unwrap().child_names().collect();
        assert_eq!(names, vec!["child", "child2", "child3"]);

        let result = tree.insert(&["test2"], CommandNode::new("child"));
        assert!(matches!(result, Err(CommandError::DuplicateName { .. })));

        let result = tree.insert(&["nope"], CommandNode::new("x"));
        assert!(matches!(result, Err(CommandError::NotFound(_))));
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut tree = nested();
        let old = tree
            .replace::<&str>(&[], CommandNode::new("test").with_permission(3))
            .unwrap();

        assert_eq!(old.map(|n| n.function), Some(Some(true)));
        assert_eq!(tree.roots()[0].name, "test");
        assert_eq!(tree.roots()[0].permission, 3);
    }

    #[test]
    fn test_remove() {
        let mut tree = nested();

        let removed = tree.remove(&["test2", "child"]).unwrap();
        assert_eq!(removed.name, "child");
        assert!(!tree.contains(&["test2", "child"]));

        assert!(matches!(tree.remove(&["test2", "child"]), Err(CommandError::NotFound(_))));
        assert!(matches!(tree.remove(&["x", "y"]), Err(CommandError::NotFound(_))));
    }

    #[test]
    fn test_walk_order() {
        let tree = nested();
        let paths: Vec<String> = tree.walk().iter().map(|(p, _)| p.join(".")).collect();
        assert_eq!(paths, vec!["test", "test2", "test2.child", "test2.child2"]);
    }

    #[test]
    fn test_validate() {
        assert!(nested().validate().is_ok());

        let tree = CommandTree::from_parts(
            "!".to_string(),
            vec![CommandNode::new("a").with_disabled(true)],
        );
        assert!(matches!(tree.validate(), Err(CommandError::Validation(_))));

        let tree = CommandTree::from_parts(
            "!".to_string(),
            vec![CommandNode::new("a").with_child(CommandNode::new("b").with_permission(-2))],
        );
        assert!(matches!(tree.validate(), Err(CommandError::Validation(_))));

        let tree = CommandTree::from_parts(
            "!".to_string(),
            vec![CommandNode::new("a"), CommandNode::new("a")],
        );
        assert!(matches!(tree.validate(), Err(CommandError::DuplicateName { .. })));

        let tree = CommandTree::from_parts(
            "!".to_string(),
            vec![CommandNode::new("a").with_child(CommandNode::new("../b"))],
        );
        assert!(matches!(tree.validate(), Err(CommandError::Validation(_))));
    }

    #[test]
    fn test_insert_rejects_unusable_names() {
        let mut tree = nested();
        for name in ["two words", "../up", "test2__child"] {
            let result = tree.insert::<&str>(&[], CommandNode::new(name));
            assert!(matches!(result, Err(CommandError::Validation(_))), "{name}");
            let result = tree.replace(&["test2"], CommandNode::new(name));
            assert!(matches!(result, Err(CommandError::Validation(_))), "{name}");
        }
        assert_eq!(tree.len(), 2);
    }
}
