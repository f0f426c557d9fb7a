//! Bounded page state description passed to the decision oracle.
//!
//! A [`StateSnapshot`] is rebuilt on every step and never persisted. Empty
//! collections and absent fields are pruned from the serialized form so the
//! character budget is spent on signal, not structure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One interactive element visible on the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractiveElement {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// One field inside a detected form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    /// Input kind: text, email, tel, textarea, select, checkbox, ...
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Length of the current value, not the value itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_len: Option<usize>,
}

/// Summary of one form on the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormSummary {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FormField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_selector: Option<String>,
}

/// Summary of one iframe on the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Error status for snapshots taken from an unreachable page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageStatus {
    pub error: String,
}

/// One `{tool, args, result}` triple from the current run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolHistoryEntry {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,
    pub result: Value,
}

impl ToolHistoryEntry {
    /// Compact one-line rendering used in the oracle prompt.
    pub fn summarize(&self) -> String {
        let outcome = match self.result.get("error").and_then(Value::as_str) {
            Some(err) => format!("error: {}", truncate(err, 80)),
            None => {
                let body = self.result.to_string();
                format!("ok: {}", truncate(&body, 120))
            }
        };
        format!("{}({}) -> {}", self.tool, truncate(&self.args.to_string(), 80), outcome)
    }
}

/// Size-bounded, progressively detailed description of page state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interactive: Vec<InteractiveElement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forms: Vec<FormSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frames: Vec<FrameSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PageStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_history: Vec<ToolHistoryEntry>,
}

impl StateSnapshot {
    /// Snapshot carrying only an error status, used when the page is
    /// unreachable.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Some(PageStatus {
                error: message.into(),
            }),
            ..Default::default()
        }
    }

    pub fn has_error(&self) -> bool {
        self.status.is_some()
    }

    /// Serialize for the oracle prompt, truncated to `budget` characters.
    ///
    /// Pruning of empty fields happens in the Serialize impl (skip attrs),
    /// so the budget is applied to an already-minimal rendering.
    pub fn to_budgeted_json(&self, budget: usize) -> String {
        let rendered = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        truncate(&rendered, budget).into_owned()
    }
}

/// Char-boundary-safe truncation with an ellipsis marker.
pub(crate) fn truncate(s: &str, max_chars: usize) -> std::borrow::Cow<'_, str> {
    if s.chars().count() <= max_chars {
        return std::borrow::Cow::Borrowed(s);
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    std::borrow::Cow::Owned(format!("{kept}…"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fields_are_pruned_from_serialization() {
        let snapshot = StateSnapshot {
            title: "Example".to_string(),
            url: "https://example.com".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"title\""));
        assert!(!json.contains("headings"));
        assert!(!json.contains("interactive"));
        assert!(!json.contains("dom_preview"));
        assert!(!json.contains("tool_history"));
    }

    #[test]
    fn error_snapshot_has_only_status() {
        let snapshot = StateSnapshot::error("net::ERR_NAME_NOT_RESOLVED");
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status": {"error": "net::ERR_NAME_NOT_RESOLVED"}})
        );
    }

    #[test]
    fn truncate_respects_multibyte_boundaries() {
        let s = "héllo wörld";
        let cut = truncate(s, 5);
        assert!(cut.chars().count() <= 5);
        assert!(cut.ends_with('…'));
    }
}
