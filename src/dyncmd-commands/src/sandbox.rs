//! Contract with the sandboxed execution environment.
//!
//! The core never runs handler code itself. A [`SandboxExecutor`] turns a
//! handler artifact into a loaded [`Handler`], and the dispatcher calls it
//! with an [`Invocation`]. Isolation guarantees are the executor's business:
//! a handler must only reach what the invocation hands it, including the
//! [`CapabilityTable`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::capabilities::CapabilityTable;
use crate::node::CommandNode;
use crate::store::HandlerId;
use crate::tree::CommandTree;

/// Identity and output channel of whoever sent the input.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    /// Name shown in feedback.
    pub display_name: String,
    /// Caller permission level.
    pub permission: i64,
    /// Raw input that was resolved, if any.
    pub working_string: String,
    feedback: Option<mpsc::UnboundedSender<String>>,
}

impl CallerContext {
    /// Create a context for a caller.
    pub fn new(display_name: impl Into<String>, permission: i64) -> Self {
        Self {
            display_name: display_name.into(),
            permission,
            ..Default::default()
        }
    }

    /// Attach a feedback channel.
    pub fn with_feedback(mut self, tx: mpsc::UnboundedSender<String>) -> Self {
        self.feedback = Some(tx);
        self
    }

    /// Set the raw input.
    pub fn with_working_string(mut self, input: impl Into<String>) -> Self {
        self.working_string = input.into();
        self
    }

    /// Send text to the caller. Returns false when no channel is attached
    /// or the receiver is gone.
    pub fn send_feedback(&self, text: impl Into<String>) -> bool {
        match &self.feedback {
            Some(tx) => tx.send(text.into()).is_ok(),
            None => false,
        }
    }
}

/// Everything a handler receives for one call.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Path of the dispatched node.
    pub path: Vec<String>,
    /// The dispatched node (a copy; handlers cannot mutate the tree).
    pub node: CommandNode,
    /// Read-only view of the tree at resolution time.
    pub registry: Arc<CommandTree>,
    pub context: CallerContext,
    /// Residual argument tokens.
    pub args: Vec<String>,
    /// Extra named values supplied by the caller.
    pub kwargs: BTreeMap<String, serde_json::Value>,
    /// Symbols the handler may use.
    pub capabilities: Arc<CapabilityTable>,
}

/// What a handler returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutput {
    /// Text to send back to the caller.
    pub feedback: Option<String>,
    /// Structured result for the embedding host.
    pub value: Option<serde_json::Value>,
}

impl HandlerOutput {
    /// Output with nothing to report.
    pub fn none() -> Self {
        Self::default()
    }

    /// Output carrying feedback text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            feedback: Some(text.into()),
            value: None,
        }
    }

    /// Attach a structured value.
    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }
}

/// Errors a handler can report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The caller used the command wrongly. `None` asks for the default message.
    #[error("{}", .0.as_deref().unwrap_or("Incorrect usage"))]
    ImproperUsage(Option<String>),

    /// Any other error raised by handler code.
    #[error("{0}")]
    Raised(String),

    /// The sandbox failed while running the handler.
    #[error("{0}")]
    Internal(String),
}

/// A loaded, callable handler.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Run the handler.
    async fn call(&self, invocation: Invocation) -> Result<HandlerOutput, HandlerError>;
}

/// Shared handle to a loaded handler.
pub type HandlerHandle = Arc<dyn Handler>;

/// Sandbox refused to load a handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct SandboxError(pub String);

/// Loads handler sources into callable handles.
pub trait SandboxExecutor: Send + Sync {
    /// Compile or otherwise prepare the handler identified by `id`.
    fn load(&self, id: &HandlerId, source: &str) -> Result<HandlerHandle, SandboxError>;
}

/// Map from node path to loaded handler.
#[derive(Clone, Default)]
pub struct HandlerMap {
    handlers: BTreeMap<Vec<String>, HandlerHandle>,
}

impl HandlerMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler to a path.
    pub fn insert(&mut self, path: Vec<String>, handler: HandlerHandle) {
        self.handlers.insert(path, handler);
    }

    /// Handler bound to a path.
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<HandlerHandle> {
        let key: Vec<String> = path.iter().map(|s| s.as_ref().to_string()).collect();
        self.handlers.get(&key).cloned()
    }

    /// Drop every handler at or below `path`.
    pub fn remove_subtree<S: AsRef<str>>(&mut self, path: &[S]) {
        self.handlers.retain(|key, _| {
            !(key.len() >= path.len()
                && key.iter().zip(path).all(|(k, p)| k == p.as_ref()))
        });
    }

    /// Number of loaded handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handler is loaded.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}
