//! Persisted metadata format.
//!
//! The metadata file is a JSON object:
//!
//! ```json
//! {
//!   "commandPrefix": "!",
//!   "commands": [
//!     { "name": "test", "usage": "test [*args]", "description": "Test command.",
//!       "permission": 500, "function": true, "children": [],
//!       "overridable": true, "disabled": false }
//!   ]
//! }
//! ```
//!
//! Every optional field of a [`CommandData`] is kept as an `Option` so the
//! merge step can tell "declared" from "omitted". `function` is a double
//! option: absent, `null`, or a boolean.

use serde::{Deserialize, Serialize};

use crate::error::{CommandError, Result};
use crate::node::CommandNode;
use crate::tree::CommandTree;

/// Top level of the metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandsFile {
    /// Prefix input must start with.
    #[serde(rename = "commandPrefix")]
    pub command_prefix: String,

    /// Top-level command declarations.
    pub commands: Vec<CommandData>,
}

/// A command declaration as persisted or as declared by add-command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandData {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<i64>,

    #[serde(
        default,
        with = "::serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub function: Option<Option<bool>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<CommandData>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overridable: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

impl CommandData {
    /// A declaration carrying only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Declaration with every field explicit, as written by the serializer.
    pub fn from_node(node: &CommandNode) -> Self {
        Self {
            name: node.name.clone(),
            usage: Some(node.usage.clone()),
            description: Some(node.description.clone()),
            permission: Some(node.permission),
            function: Some(node.function),
            children: Some(node.children.iter().map(Self::from_node).collect()),
            overridable: Some(node.overridable),
            disabled: Some(node.disabled),
        }
    }

    /// Build a node, filling omitted fields with defaults.
    pub fn to_node(&self) -> CommandNode {
        CommandNode {
            name: self.name.clone(),
            usage: self.usage.clone().unwrap_or_default(),
            description: self.description.clone().unwrap_or_default(),
            permission: self.permission.unwrap_or(0),
            function: self.function.unwrap_or(None),
            children: self
                .children
                .iter()
                .flatten()
                .map(CommandData::to_node)
                .collect(),
            overridable: self.overridable.unwrap_or(true),
            disabled: self.disabled.unwrap_or(false),
        }
    }
}

impl CommandsFile {
    /// An empty file with the given prefix.
    pub fn empty(prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: prefix.into(),
            commands: Vec::new(),
        }
    }

    /// Serialize a tree with every field written explicitly.
    pub fn from_tree(tree: &CommandTree) -> Self {
        Self {
            command_prefix: tree.prefix().to_string(),
            commands: tree.roots().iter().map(CommandData::from_node).collect(),
        }
    }

    /// Build a tree from this file, checking structural invariants.
    pub fn to_tree(&self) -> Result<CommandTree> {
        let tree = CommandTree::from_parts(
            self.command_prefix.clone(),
            self.commands.iter().map(CommandData::to_node).collect(),
        );
        tree.validate()?;
        Ok(tree)
    }

    /// Parse JSON text.
    pub fn from_json(text: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Render as 2-space indented JSON with a trailing newline.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        Ok(text)
    }

    /// Checks equivalent to the metadata schema that serde cannot express.
    ///
    /// `disabled: true` requires a non-null `function`; names must be unique
    /// among siblings; permissions must be at least `-1`.
    pub fn validate(&self) -> Result<()> {
        for command in &self.commands {
            validate_declared(command)?;
        }
        self.to_tree().map(|_| ())
    }
}

fn validate_declared(data: &CommandData) -> Result<()> {
    if data.disabled == Some(true) && !matches!(data.function, Some(Some(_))) {
        return Err(CommandError::Validation(format!(
            "'{}' sets disabled but does not define 'function'",
            data.name
        )));
    }
    for child in data.children.iter().flatten() {
        validate_declared(child)?;
    }
    Ok(())
}
