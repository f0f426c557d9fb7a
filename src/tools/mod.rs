//! Named tools invocable by the decision oracle, and their dispatcher.
//!
//! Each tool is independently idempotent and safe to retry. The dispatcher
//! boundary is a pure mapping: a handler returns `Result<Value, ToolError>`
//! and every error - including a timeout - is converted to an
//! `{"error": ...}` payload. Nothing escapes to the orchestrator loop.

mod articles;
mod consent;
mod extract;
mod form;
mod products;
mod snapshot;

pub use articles::ArticlesExtractTool;
pub use consent::{CookiesAcceptTool, HumanVerifyTool};
pub use extract::{ExtractEmailsTool, ExtractLinksTool, ExtractPhonesTool};
pub use form::{
    FormCheckRequiredTool, FormCheckSuccessTool, FormDetectTool, FormFieldsTool, FormFillFieldTool,
    FormFillTool, FormSubmitTool, FormValidateTool,
};
pub use products::ProductsExtractTool;
pub use snapshot::DomSnapshotTool;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::page::{PageError, PageSurface};
use crate::runner::RuntimeConfig;

/// Error type for tool handlers.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Page(#[from] PageError),

    #[error("{0}")]
    Failed(String),
}

/// Result type for tool handlers
pub type ToolResult = Result<Value, ToolError>;

/// One invocable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry name, e.g. `extract.links`.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// True when the tool performs no page mutation.
    fn read_only(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        args: &Value,
        page: &dyn PageSurface,
        config: &RuntimeConfig,
    ) -> ToolResult;
}

/// Static registry mapping tool names to handlers.
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Registry with every built-in tool registered.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ExtractEmailsTool));
        registry.register(Arc::new(ExtractLinksTool));
        registry.register(Arc::new(ExtractPhonesTool));
        registry.register(Arc::new(ArticlesExtractTool));
        registry.register(Arc::new(ProductsExtractTool));
        registry.register(Arc::new(DomSnapshotTool));
        registry.register(Arc::new(CookiesAcceptTool));
        registry.register(Arc::new(HumanVerifyTool));
        registry.register(Arc::new(FormDetectTool));
        registry.register(Arc::new(FormFieldsTool));
        registry.register(Arc::new(FormFillFieldTool));
        registry.register(Arc::new(FormValidateTool));
        registry.register(Arc::new(FormCheckRequiredTool));
        registry.register(Arc::new(FormSubmitTool));
        registry.register(Arc::new(FormCheckSuccessTool));
        registry.register(Arc::new(FormFillTool));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        if self.tools.insert(name, tool).is_some() {
            warn!("Tool {} registered twice, keeping the newer handler", name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    /// Execute a tool by name.
    ///
    /// Always returns a value: a success payload, or `{"error": ...}` for
    /// unknown tools, handler failures, and timeouts.
    pub async fn execute(
        &self,
        name: &str,
        args: &Value,
        page: &dyn PageSurface,
        config: &RuntimeConfig,
    ) -> Value {
        let Some(tool) = self.tools.get(name) else {
            warn!("Unknown tool requested: {}", name);
            return json!({ "error": format!("unknown tool: {name}") });
        };

        debug!(tool = name, %args, "Dispatching tool");
        let timeout = Duration::from_millis(config.tool_timeout_ms);
        match tokio::time::timeout(timeout, tool.execute(args, page, config)).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                warn!(tool = name, "Tool failed: {}", e);
                json!({ "error": e.to_string() })
            }
            Err(_) => {
                warn!(
                    tool = name,
                    "Tool timed out after {}ms", config.tool_timeout_ms
                );
                json!({ "error": "timeout" })
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Shared arg helpers for handlers.
pub(crate) fn opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn opt_usize(args: &Value, key: &str) -> Option<usize> {
    args.get(key).and_then(Value::as_u64).map(|n| n as usize)
}

pub(crate) fn opt_f64(args: &Value, key: &str) -> Option<f64> {
    args.get(key).and_then(Value::as_f64)
}

pub(crate) fn opt_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_contains_the_full_catalog() {
        let registry = ToolRegistry::standard();
        for name in [
            "extract.emails",
            "extract.links",
            "extract.phones",
            "articles.extract",
            "products.extract",
            "dom.snapshot",
            "cookies.accept",
            "human.verify",
            "form.detect",
            "form.fields",
            "form.fill_field",
            "form.validate",
            "form.check_required",
            "form.submit",
            "form.check_success",
            "form.fill",
        ] {
            assert!(registry.contains(name), "missing tool {name}");
        }
        assert_eq!(registry.names().len(), 16);
    }
}
