//! Command node structure.

use crate::error::{CommandError, Result};

/// Lowest permission level a node may carry.
///
/// `-1` conventionally marks a node as unreachable through permissions.
pub const MIN_PERMISSION: i64 = -1;

/// One command or sub-command in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandNode {
    /// Name, unique among siblings.
    pub name: String,

    /// Usage hint shown in help.
    pub usage: String,

    /// Human-readable description.
    pub description: String,

    /// Minimum caller level required to dispatch.
    pub permission: i64,

    /// `Some(true)` when a handler must be loaded for this node, `Some(false)`
    /// when it explicitly has none, `None` for container-only nodes.
    pub function: Option<bool>,

    /// Sub-commands in declaration order.
    pub children: Vec<CommandNode>,

    /// Whether automatic merges may replace this node's fields.
    pub overridable: bool,

    /// Disabled nodes resolve but refuse to dispatch.
    pub disabled: bool,
}

impl CommandNode {
    /// Create a node with default metadata.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            usage: String::new(),
            description: String::new(),
            permission: 0,
            function: None,
            children: Vec::new(),
            overridable: true,
            disabled: false,
        }
    }

    /// Set the usage text.
    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the permission threshold.
    pub fn with_permission(mut self, permission: i64) -> Self {
        self.permission = permission;
        self
    }

    /// Set the handler flag.
    pub fn with_function(mut self, function: Option<bool>) -> Self {
        self.function = function;
        self
    }

    /// Append a child node.
    pub fn with_child(mut self, child: CommandNode) -> Self {
        self.children.push(child);
        self
    }

    /// Set the overridable flag.
    pub fn with_overridable(mut self, overridable: bool) -> Self {
        self.overridable = overridable;
        self
    }

    /// Set the disabled flag.
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// True when a handler must be loaded for this node.
    pub fn has_handler(&self) -> bool {
        self.function == Some(true)
    }

    /// Look up a direct child by exact name.
    pub fn child(&self, name: &str) -> Option<&CommandNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Look up a direct child by exact name, mutably.
    pub fn child_mut(&mut self, name: &str) -> Option<&mut CommandNode> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Names of the direct children, in order.
    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|c| c.name.as_str())
    }
}

/// Joins path segments in handler identifiers.
pub const SEGMENT_SEPARATOR: &str = "__";

/// Check that a name can be typed as one input token and used as one
/// segment of a handler file name.
///
/// Rejects empty names, whitespace, control characters, path separators,
/// `.` and `..`, and underscores that could blur the `__` segment
/// separator (a doubled `_`, or a leading or trailing one).
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(CommandError::Validation(format!(
            "invalid command name {name:?}: {reason}"
        )))
    };

    if name.is_empty() {
        return invalid("name is empty");
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return invalid("whitespace and control characters are not allowed");
    }
    if name.contains(['/', '\\']) {
        return invalid("path separators are not allowed");
    }
    if name == "." || name == ".." {
        return invalid("relative path components are not allowed");
    }
    if name.contains(SEGMENT_SEPARATOR) || name.starts_with('_') || name.ends_with('_') {
        return invalid("'__', a leading '_' and a trailing '_' are reserved");
    }
    Ok(())
}

/// Render a node path for messages: `test2 child2`.
pub fn display_path<S: AsRef<str>>(path: &[S]) -> String {
    path.iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let node = CommandNode::new("test");
        assert_eq!(node.permission, 0);
        assert!(node.overridable);
        assert!(!node.disabled);
        assert_eq!(node.function, None);
        assert!(!node.has_handler());
    }

    #[test]
    fn test_has_handler_is_tristate() {
        assert!(CommandNode::new("a").with_function(Some(true)).has_handler());
        assert!(!CommandNode::new("a").with_function(Some(false)).has_handler());
        assert!(!CommandNode::new("a").with_function(None).has_handler());
    }

    #[test]
    fn test_child_lookup_is_case_sensitive() {
        let node = CommandNode::new("test2")
            .with_child(CommandNode::new("child"))
            .with_child(CommandNode::new("child2"));

        assert!(node.child("child2").is_some());
        assert!(node.child("Child2").is_none());
        assert_eq!(node.child_names().collect::<Vec<_>>(), vec!["child", "child2"]);
    }

    #[test]
    fn test_validate_name() {
        for name in ["roll", "child2", "snake_case", "v1.2", "ünïcode"] {
            assert!(validate_name(name).is_ok(), "{name}");
        }
        for name in [
            "", "two words", "tab\there", "bell\u{7}", "../../escaped", "a/b", "a\\b", ".",
            "..", "a__b", "_a", "a_",
        ] {
            assert!(
                matches!(validate_name(name), Err(CommandError::Validation(_))),
                "{name:?}"
            );
        }
    }

    #[test]
    fn test_display_path() {
        assert_eq!(display_path(&["test2", "child2"]), "test2 child2");
        assert_eq!(display_path::<&str>(&[]), "");
    }
}
