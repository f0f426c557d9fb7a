//! Deterministic extraction, used only when a run ends without data.
//!
//! Harvests whatever the read-only extractors can find and returns it as a
//! single object, or `None` when the page yielded nothing at all.

use serde_json::{Map, Value, json};
use tracing::info;

use crate::page::PageSurface;
use crate::runner::RuntimeConfig;
use crate::tools::ToolRegistry;

/// Keys harvested, with the registry tool and result field for each.
const HARVEST: &[(&str, &str)] = &[
    ("emails", "extract.emails"),
    ("phones", "extract.phones"),
    ("articles", "articles.extract"),
    ("links", "extract.links"),
];

/// Run the read-only extractors and keep every non-empty result.
pub async fn extract(
    page: &dyn PageSurface,
    tools: &ToolRegistry,
    config: &RuntimeConfig,
) -> Option<Value> {
    let mut data = Map::new();

    for (key, tool) in HARVEST {
        let args = if *tool == "extract.links" {
            json!({ "limit": 25 })
        } else {
            json!({})
        };
        let result = tools.execute(tool, &args, page, config).await;
        if result.get("error").is_some() {
            continue;
        }
        if let Some(items) = result.get(*key).and_then(Value::as_array)
            && !items.is_empty()
        {
            data.insert((*key).to_string(), Value::Array(items.clone()));
        }
    }

    if data.is_empty() {
        None
    } else {
        info!(
            keys = ?data.keys().collect::<Vec<_>>(),
            "Deterministic extraction recovered data"
        );
        Some(Value::Object(data))
    }
}
