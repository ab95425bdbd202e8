//! Policy checks and hand-off to the sandbox.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::debug;

use crate::capabilities::{Capability, CapabilityTable};
use crate::error::{CommandError, PREFIX_PLACEHOLDER, Result};
use crate::node::{CommandNode, display_path};
use crate::sandbox::{CallerContext, HandlerError, HandlerHandle, HandlerOutput, Invocation};
use crate::tree::CommandTree;

/// A resolved node bundled with what dispatch needs, captured from one
/// registry snapshot.
#[derive(Clone)]
pub struct DispatchTarget {
    pub path: Vec<String>,
    pub node: CommandNode,
    pub handler: Option<HandlerHandle>,
    pub registry: Arc<CommandTree>,
}

/// Enforces disable and permission policy, then invokes the handler.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    extra: CapabilityTable,
    ignore_permission: bool,
}

impl Dispatcher {
    /// Create a dispatcher with the standard capabilities only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose an additional symbol to every handler.
    pub fn with_capability(mut self, name: impl Into<String>, capability: Capability) -> Self {
        self.extra.insert(name, capability);
        self
    }

    /// Skip the permission check.
    pub fn ignore_permission(mut self, value: bool) -> Self {
        self.ignore_permission = value;
        self
    }

    /// Run the policy checks in order: disabled, handler, permission.
    pub fn check(&self, node: &CommandNode, caller_permission: i64) -> Result<()> {
        if node.disabled {
            return Err(CommandError::Disabled(node.name.clone()));
        }
        if !node.has_handler() {
            return Err(CommandError::NoHandler(node.name.clone()));
        }
        if !self.ignore_permission && caller_permission < node.permission {
            return Err(CommandError::InsufficientPermission {
                command: node.name.clone(),
                caller: caller_permission,
                required: node.permission,
            });
        }
        Ok(())
    }

    /// Capability table for a call against `registry`.
    pub fn capabilities(&self, registry: &CommandTree) -> CapabilityTable {
        let mut table = CapabilityTable::standard(registry.prefix());
        table.extend(&self.extra);
        table
    }

    /// Check policy and call the handler once.
    ///
    /// Errors the handler raises come back as [`CommandError::Handler`];
    /// sandbox faults and panics become [`CommandError::HandlerExecution`].
    pub async fn dispatch(
        &self,
        target: DispatchTarget,
        context: CallerContext,
        args: Vec<String>,
        kwargs: BTreeMap<String, serde_json::Value>,
    ) -> Result<HandlerOutput> {
        self.check(&target.node, context.permission)?;
        let handler = target
            .handler
            .ok_or_else(|| CommandError::NoHandler(target.node.name.clone()))?;

        let name = target.node.name.clone();
        debug!(
            "Dispatching '{}' for '{}' with {} args",
            display_path(&target.path),
            context.display_name,
            args.len()
        );

        let invocation = Invocation {
            capabilities: Arc::new(self.capabilities(&target.registry)),
            path: target.path,
            node: target.node,
            registry: target.registry,
            context,
            args,
            kwargs,
        };

        match AssertUnwindSafe(handler.call(invocation)).catch_unwind().await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(HandlerError::Internal(message))) => Err(CommandError::HandlerExecution {
                command: name,
                message,
            }),
            Ok(Err(HandlerError::ImproperUsage(None))) => Err(CommandError::Handler {
                source: HandlerError::ImproperUsage(Some(default_usage_message(&name))),
                command: name,
            }),
            Ok(Err(source)) => Err(CommandError::Handler {
                command: name,
                source,
            }),
            Err(panic) => Err(CommandError::HandlerExecution {
                command: name,
                message: panic_message(panic.as_ref()),
            }),
        }
    }
}

fn default_usage_message(name: &str) -> String {
    format!(
        "Incorrect usage of '{name}'. To view usage information, use '{PREFIX_PLACEHOLDER}help {name}'."
    )
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
