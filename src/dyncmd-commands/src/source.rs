//! Comment-header metadata in handler source text.
//!
//! A handler source may open with comment lines declaring its metadata:
//!
//! ```text
//! # Name: roll
//! # Usage: roll [sides:integer]
//! # Description: Rolls a die.
//! # Permission: 0
//! # Children: [{'name': 'loaded', 'permission': 10}]
//! <handler body>
//! ```
//!
//! Only the leading block of blank and comment lines (`#` or `//`) is
//! scanned. Keys are case-insensitive and the first occurrence wins.
//! This is pure text preprocessing; the body is passed to the sandbox as is.

use std::sync::LazyLock;

use regex_lite::Regex;

use crate::error::{CommandError, Result};
use crate::metadata::CommandData;
use crate::node::validate_name;

static HEADER_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(?:#|//)\s*([A-Za-z]+)\s*:(.*)$").ok());

/// Metadata read from a source header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMetadata {
    pub name: Option<String>,
    pub usage: Option<String>,
    pub description: Option<String>,
    pub permission: Option<i64>,
    pub children: Option<Vec<CommandData>>,
}

/// Explicit metadata supplied alongside add-command source text.
///
/// Fields set here win over the source header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataOverrides {
    pub name: Option<String>,
    pub usage: Option<String>,
    pub description: Option<String>,
    pub permission: Option<i64>,
    pub children: Option<Vec<CommandData>>,
    /// Path of an existing node to add the command under; empty for a root.
    pub parent: Vec<String>,
}

impl MetadataOverrides {
    /// Create empty overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the usage text.
    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the permission threshold.
    pub fn with_permission(mut self, permission: i64) -> Self {
        self.permission = Some(permission);
        self
    }

    /// Set the declared children.
    pub fn with_children(mut self, children: Vec<CommandData>) -> Self {
        self.children = Some(children);
        self
    }

    /// Add the command under an existing node.
    pub fn under<S: Into<String>>(mut self, parent: impl IntoIterator<Item = S>) -> Self {
        self.parent = parent.into_iter().map(Into::into).collect();
        self
    }

    /// True when every header field is supplied, so the header need not be read.
    pub fn is_complete(&self) -> bool {
        self.name.is_some()
            && self.usage.is_some()
            && self.description.is_some()
            && self.permission.is_some()
            && self.children.is_some()
    }
}

/// Parse the leading comment header of a handler source.
pub fn parse_header(source: &str) -> SourceMetadata {
    let mut meta = SourceMetadata::default();
    let Some(re) = HEADER_LINE.as_ref() else {
        return meta;
    };

    for line in source.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !(trimmed.starts_with('#') || trimmed.starts_with("//")) {
            break;
        }
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let key = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let value = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();

        match key.to_ascii_lowercase().as_str() {
            "name" if meta.name.is_none() && !value.is_empty() => {
                meta.name = Some(value.to_string());
            }
            "usage" if meta.usage.is_none() => meta.usage = Some(value.to_string()),
            "description" if meta.description.is_none() => {
                meta.description = Some(value.to_string());
            }
            "permission" if meta.permission.is_none() => {
                meta.permission = value.parse().ok();
            }
            "children" if meta.children.is_none() => {
                meta.children = serde_json::from_str(&value.replace('\'', "\"")).ok();
            }
            _ => {}
        }
    }

    meta
}

/// Build the declaration for an added command.
///
/// The header is only read when the overrides leave a field unset. The
/// result always declares `function: true`, `overridable: true` and
/// `disabled: false`.
pub fn declare(source: &str, overrides: &MetadataOverrides) -> Result<CommandData> {
    let header = if overrides.is_complete() {
        SourceMetadata::default()
    } else {
        parse_header(source)
    };

    let name = overrides
        .name
        .clone()
        .or(header.name)
        .filter(|n| !n.trim().is_empty())
        .ok_or(CommandError::MissingName)?;
    validate_name(&name)?;

    Ok(CommandData {
        name,
        usage: Some(overrides.usage.clone().or(header.usage).unwrap_or_default()),
        description: Some(
            overrides
                .description
                .clone()
                .or(header.description)
                .unwrap_or_default(),
        ),
        permission: Some(overrides.permission.or(header.permission).unwrap_or(0)),
        function: Some(Some(true)),
        children: Some(
            overrides
                .children
                .clone()
                .or(header.children)
                .unwrap_or_default(),
        ),
        overridable: Some(true),
        disabled: Some(false),
    })
}
