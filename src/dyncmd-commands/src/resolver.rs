//! Splits raw input into a command path and residual arguments.

use crate::node::CommandNode;
use crate::tree::CommandTree;

/// Invisible tag character some chat clients append to messages.
const TAG_CHAR: char = '\u{e0000}';

/// A successful resolution: the deepest matched node and the leftover tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Names from the root command down to the matched node.
    pub path: Vec<String>,
    /// Tokens that did not match any child name.
    pub args: Vec<String>,
}

impl Resolution {
    /// Name of the matched node.
    pub fn name(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// Name of the root command.
    pub fn root(&self) -> &str {
        self.path.first().map(String::as_str).unwrap_or_default()
    }
}

/// Resolve raw input against a tree.
///
/// Returns `None` when the input is not a command: it lacks the prefix, has
/// nothing after the prefix, or its first token names no root command.
/// Descends greedily through child names; tokens are never unquoted.
pub fn resolve(tree: &CommandTree, raw_input: &str) -> Option<Resolution> {
    let input = raw_input.trim_end_matches(|c: char| c == TAG_CHAR || c.is_whitespace());
    let body = input.strip_prefix(tree.prefix())?;

    let mut tokens = body.split_whitespace();
    let first = tokens.next()?;
    let mut node: &CommandNode = tree.root(first)?;
    let mut path = vec![node.name.clone()];

    let mut tokens = tokens.peekable();
    while let Some(next) = tokens.peek() {
        match node.child(next) {
            Some(child) => {
                node = child;
                path.push(child.name.clone());
                tokens.next();
            }
            None => break,
        }
    }

    Some(Resolution {
        path,
        args: tokens.map(str::to_string).collect(),
    })
}
