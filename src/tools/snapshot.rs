//! On-demand page snapshot tool.

use async_trait::async_trait;
use serde_json::Value;

use super::{Tool, ToolError, ToolResult, opt_bool, opt_usize};
use crate::page::PageSurface;
use crate::runner::{ContextBuilder, RuntimeConfig};

pub struct DomSnapshotTool;

#[async_trait]
impl Tool for DomSnapshotTool {
    fn name(&self) -> &'static str {
        "dom.snapshot"
    }

    fn description(&self) -> &'static str {
        "Return a structured snapshot of the current page; `include_dom` and `max_chars` bound the preview."
    }

    async fn execute(
        &self,
        args: &Value,
        page: &dyn PageSurface,
        config: &RuntimeConfig,
    ) -> ToolResult {
        let include_dom = opt_bool(args, "include_dom").unwrap_or(true);

        let mut local = config.clone();
        if let Some(max_chars) = opt_usize(args, "max_chars") {
            local.context_chars = max_chars;
            local.max_context_chars = max_chars;
        }

        // A high synthetic step index opens every detail gate; without the
        // DOM preview, cap at the interactive-elements level.
        let step = if include_dom { 7 } else { 3 };
        let snapshot = ContextBuilder::build(page, "", step, &local).await;
        if let Some(status) = &snapshot.status {
            return Err(ToolError::Failed(status.error.clone()));
        }

        serde_json::to_value(&snapshot)
            .map_err(|e| ToolError::Failed(format!("snapshot serialization: {e}")))
    }
}
