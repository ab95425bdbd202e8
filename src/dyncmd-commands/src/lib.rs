//! Hierarchical runtime command system.
//!
//! This crate keeps a tree of named commands that can be added, removed,
//! disabled and reloaded while the host is running. Text input is resolved
//! against the tree, checked against the caller's permission level, and
//! handed to a sandboxed handler.
//!
//! # Commands Directory
//!
//! Commands live in one directory:
//!
//! - `commands.json` - the prefix and the command tree metadata
//! - `zzz__<path>.cmd` - one handler artifact per runnable command, named
//!   after the node path joined with `__` (`zzz__test2__child2.cmd`)
//!
//! Command names are single tokens: no whitespace, path separators or `__`.
//!
//! ```json
//! {
//!   "commandPrefix": "!",
//!   "commands": [
//!     { "name": "roll", "usage": "roll [sides:integer]", "permission": 0, "function": true }
//!   ]
//! }
//! ```
//!
//! # Handler Source Header
//!
//! `add_command` reads metadata from the leading comment block of the
//! handler source when it is not given explicitly:
//!
//! ```text
//! # Name: roll
//! # Usage: roll [sides:integer]
//! # Description: Rolls a die.
//! # Permission: 0
//! ```
//!
//! # Usage
//!
//! Running handler code is delegated to a [`SandboxExecutor`] supplied by
//! the host.
//!
//! ```rust,ignore
//! use dyncmd_commands::prelude::*;
//!
//! let registry = CommandRegistry::new(RegistryConfig::with_dir("cmds"), sandbox);
//! registry.load().await?;
//!
//! let context = CallerContext::new("alice", 10);
//! if let Some(output) = registry.execute("!roll 20", context, Kwargs::new()).await? {
//!     println!("{:?}", output.feedback);
//! }
//! ```

pub mod capabilities;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod metadata;
pub mod node;
pub mod registry;
pub mod resolver;
pub mod sandbox;
pub mod source;
pub mod store;
pub mod tree;
pub mod watcher;

pub use capabilities::{Capability, CapabilityFn, CapabilityTable};
pub use config::RegistryConfig;
pub use dispatcher::{DispatchTarget, Dispatcher};
pub use error::{CommandError, PREFIX_PLACEHOLDER, Result};
pub use fetch::{HttpFetcher, NoFetcher, RemoteFetcher, raw_link};
pub use loader::LoadReport;
pub use metadata::{CommandData, CommandsFile};
pub use node::{CommandNode, MIN_PERMISSION, validate_name};
pub use registry::{CommandRegistry, Kwargs, Snapshot};
pub use resolver::{Resolution, resolve};
pub use sandbox::{
    CallerContext, Handler, HandlerError, HandlerHandle, HandlerMap, HandlerOutput, Invocation,
    SandboxError, SandboxExecutor,
};
pub use source::{MetadataOverrides, SourceMetadata, declare, parse_header};
pub use store::{CommandStore, HandlerId};
pub use tree::CommandTree;
pub use watcher::{CommandWatcher, ReloadEvent};

/// Re-export common types for convenience.
pub mod prelude {
    pub use crate::{
        CallerContext, CommandError, CommandNode, CommandRegistry, CommandTree, Handler,
        HandlerError, HandlerOutput, Invocation, Kwargs, MetadataOverrides, RegistryConfig,
        SandboxExecutor,
    };
}
