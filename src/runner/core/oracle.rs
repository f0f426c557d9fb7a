//! Decision oracle client: prompt assembly, response parsing, correction.
//!
//! The oracle returns free-form text that *should* contain one JSON object
//! describing the next action. Parsing is layered - fence stripping, direct
//! parse, quote-aware balanced-brace scan, tail-slice recovery - and never
//! propagates a failure to the loop: when everything fails the action
//! degrades to `Wait`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use super::RuntimeConfig;
use crate::runner::Action;
use crate::snapshot::StateSnapshot;

/// Error type for oracle transport failures.
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("oracle returned empty response")]
    Empty,
}

/// Transport that carries one prompt to the oracle and returns its raw text.
///
/// The wire format behind this seam is provider-specific and out of scope;
/// tests script responses through it.
#[async_trait]
pub trait OracleTransport: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError>;
}

/// HTTP transport POSTing `{"prompt": ...}` to a completion endpoint.
///
/// The reply is read from a `completion`, `text`, or `content` field when
/// the body is JSON, or taken verbatim otherwise.
pub struct HttpOracle {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpOracle {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl OracleTransport for HttpOracle {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "prompt": prompt }))
            .send()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Transport(format!(
                "oracle endpoint returned {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let text = match serde_json::from_str::<Value>(&body) {
            Ok(parsed) => ["completion", "text", "content"]
                .iter()
                .find_map(|key| parsed.get(key).and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or(body),
            Err(_) => body,
        };

        if text.trim().is_empty() {
            return Err(OracleError::Empty);
        }
        Ok(text)
    }
}

/// Client wrapping a transport with prompt assembly and response parsing.
pub struct OracleClient {
    transport: Arc<dyn OracleTransport>,
}

impl OracleClient {
    pub fn new(transport: Arc<dyn OracleTransport>) -> Self {
        Self { transport }
    }

    /// Ask the oracle for the next action.
    ///
    /// A timed-out or failed exchange degrades to [`Action::Wait`]; parse
    /// errors never reach the caller.
    pub async fn decide(
        &self,
        instruction: &str,
        snapshot: &StateSnapshot,
        step: usize,
        config: &RuntimeConfig,
        tool_catalog: &[&str],
    ) -> Action {
        let prompt = build_prompt(instruction, snapshot, step, config, tool_catalog);
        let timeout = Duration::from_millis(config.oracle_timeout_ms);

        let text = match tokio::time::timeout(timeout, self.transport.complete(&prompt)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!("Oracle exchange failed: {}, degrading to wait", e);
                return Action::Wait;
            }
            Err(_) => {
                warn!(
                    "Oracle exchange timed out after {}ms, degrading to wait",
                    config.oracle_timeout_ms
                );
                return Action::Wait;
            }
        };

        let action = parse_action(&text);
        debug!(step, action = action.kind(), "Oracle decided");
        action
    }

    /// One-time pre-loop instruction refinement.
    ///
    /// Returns the refined instruction, or the original when the oracle
    /// fails or answers with anything unusable.
    pub async fn refine(&self, instruction: &str, config: &RuntimeConfig) -> String {
        let prompt = format!(
            "Rewrite the following web-automation instruction to be precise and unambiguous. \
             Reply with the rewritten instruction only, no commentary.\n\nInstruction: {instruction}"
        );
        let timeout = Duration::from_millis(config.oracle_timeout_ms);
        match tokio::time::timeout(timeout, self.transport.complete(&prompt)).await {
            Ok(Ok(text)) => {
                let refined = text.trim();
                if refined.is_empty() || refined.len() > instruction.len() * 4 {
                    instruction.to_string()
                } else {
                    refined.to_string()
                }
            }
            _ => instruction.to_string(),
        }
    }
}

/// Fixed-shape textual request for the oracle.
fn build_prompt(
    instruction: &str,
    snapshot: &StateSnapshot,
    step: usize,
    config: &RuntimeConfig,
    tool_catalog: &[&str],
) -> String {
    let budget = config.budget_for_step(step);
    let snapshot_json = snapshot.to_budgeted_json(budget);

    let history: Vec<String> = snapshot
        .tool_history
        .iter()
        .rev()
        .take(3)
        .rev()
        .map(|entry| format!("- {}", entry.summarize()))
        .collect();
    let history_block = if history.is_empty() {
        "(none)".to_string()
    } else {
        history.join("\n")
    };

    format!(
        "You are driving a web page toward a goal, one action per step.\n\n\
         Goal: {instruction}\n\
         Step: {step}\n\n\
         Page state (JSON):\n{snapshot_json}\n\n\
         Recent tool calls:\n{history_block}\n\n\
         Available tools: {tools}\n\n\
         Reply with exactly one JSON object. Schemas:\n\
         {{\"type\":\"click\",\"selector\":\"<css>\"}}\n\
         {{\"type\":\"fill\",\"selector\":\"<css>\",\"value\":\"<text>\"}}\n\
         {{\"type\":\"scroll\"}}\n\
         {{\"type\":\"wait\"}}\n\
         {{\"type\":\"tool\",\"tool_name\":\"<name>\",\"args\":{{}}}}\n\
         {{\"type\":\"complete\",\"extracted_data\":<json>}}",
        tools = tool_catalog.join(", "),
    )
}

/// Parse oracle text into an action, falling back to `Wait`.
pub fn parse_action(text: &str) -> Action {
    match extract_json_object(text) {
        Some(value) => action_from_value(normalize_action(value)),
        None => {
            warn!("No parsable action object in oracle response, defaulting to wait");
            Action::Wait
        }
    }
}

/// Layered JSON-object extraction from free-form oracle text.
fn extract_json_object(text: &str) -> Option<Value> {
    let stripped = strip_code_fences(text);

    // Direct parse of the whole remaining text
    if let Ok(value) = serde_json::from_str::<Value>(stripped)
        && value.is_object()
    {
        return Some(value);
    }

    // Quote-aware scan for balanced {...} spans. Oracles sometimes echo an
    // example object before the real answer, so candidates are tried
    // last-first; a candidate wins if it parses and looks like an action.
    let scan = scan_braces(stripped);
    for (start, end) in scan.top_level.iter().rev() {
        if let Ok(value) = serde_json::from_str::<Value>(&stripped[*start..=*end])
            && is_action_shaped(&value)
        {
            return Some(value);
        }
    }
    // No action-shaped candidate: fall back to any span that parses at all
    for (start, end) in scan.top_level.iter().rev() {
        if let Ok(value) = serde_json::from_str::<Value>(&stripped[*start..=*end])
            && value.is_object()
        {
            return Some(value);
        }
    }

    // Tail-slice recovery: from the last unmatched '{', try progressively
    // larger slices ending at each subsequent '}' until one parses.
    if let Some(open) = scan.last_unmatched {
        let tail = &stripped[open..];
        for (offset, ch) in tail.char_indices() {
            if ch == '}'
                && let Ok(value) = serde_json::from_str::<Value>(&tail[..=offset])
                && value.is_object()
            {
                return Some(value);
            }
        }
    }

    // An unmatched open earlier in the prose traps real objects below top
    // level; rescue the last action-shaped one of those.
    for (start, end) in scan.nested.iter().rev() {
        if let Ok(value) = serde_json::from_str::<Value>(&stripped[*start..=*end])
            && is_action_shaped(&value)
        {
            return Some(value);
        }
    }

    None
}

/// Strip surrounding markdown code-fence markers, if any.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence line
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[derive(Default)]
struct BraceScan {
    /// Balanced spans whose opening brace sat at nesting depth 0.
    top_level: Vec<(usize, usize)>,
    /// Balanced spans trapped under a still-open brace.
    nested: Vec<(usize, usize)>,
    /// Byte index of the last `{` that never found its closing brace.
    last_unmatched: Option<usize>,
}

/// Single quote-aware pass collecting balanced `{...}` byte ranges.
/// Braces inside string literals are ignored.
fn scan_braces(text: &str) -> BraceScan {
    let mut scan = BraceScan::default();
    let mut open_stack: Vec<usize> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => open_stack.push(i),
            '}' => {
                if let Some(start) = open_stack.pop() {
                    if open_stack.is_empty() {
                        scan.top_level.push((start, i));
                    } else {
                        scan.nested.push((start, i));
                    }
                }
            }
            _ => {}
        }
    }

    scan.last_unmatched = open_stack.last().copied();
    scan
}

/// Whether a parsed object looks like an oracle action.
fn is_action_shaped(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.contains_key("type") || map.contains_key("extracted_data"))
}

/// Deterministic rewrite of field-fill confusion.
///
/// The oracle frequently conflates the primitive "fill one field" action
/// with the composite form-filling tool: it answers `type: "fill"` carrying
/// a whole form's worth of values, or names the tool without `type: "tool"`.
/// Both shapes are rewritten to a proper `form.fill` tool call with the
/// field values merged into `args`. The rewrite is total and idempotent:
/// the corrected object no longer matches any trigger condition.
pub fn normalize_action(value: Value) -> Value {
    let Some(map) = value.as_object() else {
        return value;
    };

    let type_str = map.get("type").and_then(Value::as_str);
    let tool_name = map.get("tool_name").and_then(Value::as_str);

    let needs_rewrite = matches!(type_str, Some("fill") | Some("form.fill"))
        || (tool_name == Some("form.fill") && type_str != Some("tool"));
    if !needs_rewrite {
        return value;
    }

    // Merge: any existing args object first, then remaining top-level fields
    let mut args = map
        .get("args")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for (key, field) in map {
        if matches!(key.as_str(), "type" | "tool_name" | "args") {
            continue;
        }
        args.entry(key.clone()).or_insert_with(|| field.clone());
    }

    json!({
        "type": "tool",
        "tool_name": "form.fill",
        "args": Value::Object(args),
    })
}

/// Convert a normalized action object into the typed union.
///
/// Malformed objects degrade to `Wait` - a parse problem is never allowed
/// to abort a run.
fn action_from_value(value: Value) -> Action {
    let Some(map) = value.as_object() else {
        return Action::Wait;
    };

    // Completion payloads are recognized even without an explicit type
    if map.contains_key("extracted_data") && map.get("type").and_then(Value::as_str).is_none() {
        return Action::Complete {
            data: map.get("extracted_data").cloned().unwrap_or(Value::Null),
        };
    }

    match map.get("type").and_then(Value::as_str) {
        Some("click") => match map.get("selector").and_then(Value::as_str) {
            Some(selector) if !selector.trim().is_empty() => Action::Click {
                selector: selector.to_string(),
                timeout_ms: map.get("timeout_ms").and_then(Value::as_u64),
            },
            _ => {
                warn!("Click action without selector, degrading to wait");
                Action::Wait
            }
        },
        Some("fill") => {
            // Unreachable after normalization; kept for direct callers
            match (
                map.get("selector").and_then(Value::as_str),
                map.get("value").and_then(Value::as_str),
            ) {
                (Some(selector), Some(fill_value)) => Action::Fill {
                    selector: selector.to_string(),
                    value: fill_value.to_string(),
                },
                _ => Action::Wait,
            }
        }
        Some("scroll") => Action::Scroll,
        Some("wait") => Action::Wait,
        Some("tool") => match map.get("tool_name").and_then(Value::as_str) {
            Some(name) if !name.trim().is_empty() => Action::ToolCall {
                name: name.to_string(),
                args: map
                    .get("args")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            },
            _ => {
                warn!("Tool action without tool_name, degrading to wait");
                Action::Wait
            }
        },
        Some("complete") | Some("done") => Action::Complete {
            data: map
                .get("extracted_data")
                .or_else(|| map.get("data"))
                .cloned()
                .unwrap_or(Value::Null),
        },
        other => {
            warn!(kind = ?other, "Unknown action type, degrading to wait");
            Action::Wait
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Action {
        parse_action(text)
    }

    #[test]
    fn parses_bare_json_object() {
        let action = parse(r##"{"type":"click","selector":"#go"}"##);
        assert_eq!(
            action,
            Action::Click {
                selector: "#go".to_string(),
                timeout_ms: None,
            }
        );
    }

    #[test]
    fn parses_object_inside_code_fence() {
        let fenced = "```json\n{\"type\":\"scroll\"}\n```";
        assert_eq!(parse(fenced), Action::Scroll);
    }

    #[test]
    fn prose_wrapping_does_not_change_the_result() {
        let bare = r##"{"type":"click","selector":"#submit"}"##;
        let wrapped = format!("Sure! Based on the page state I will click.\n\n{bare}\n\nDone.");
        let fenced = format!("Here you go:\n```json\n{bare}\n```");
        assert_eq!(parse(bare), parse(&wrapped));
        assert_eq!(parse(bare), parse(&fenced));
    }

    #[test]
    fn last_candidate_wins_over_echoed_example() {
        let text = r##"
            For example you could answer {"type":"wait"} but here the right
            move is: {"type":"click","selector":"#real"}
        "##;
        assert_eq!(
            parse(text),
            Action::Click {
                selector: "#real".to_string(),
                timeout_ms: None,
            }
        );
    }

    #[test]
    fn braces_inside_string_literals_are_ignored() {
        let text = r#"note: {"type":"tool","tool_name":"extract.links","args":{"text_regex":"a{2}"}}"#;
        match parse(text) {
            Action::ToolCall { name, args } => {
                assert_eq!(name, "extract.links");
                assert_eq!(args.get("text_regex").and_then(Value::as_str), Some("a{2}"));
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn recovers_object_after_unmatched_open_brace() {
        // The stray '{' before the object never closes; recovery slices from
        // it to each following '}' until something parses.
        let text = r#"answer { here it comes {"type":"wait"}"#;
        assert_eq!(parse(text), Action::Wait);

        let text2 = r##"{ broken {"type":"click","selector":"#a"}"##;
        assert_eq!(
            parse(text2),
            Action::Click {
                selector: "#a".to_string(),
                timeout_ms: None,
            }
        );
    }

    #[test]
    fn unparsable_text_defaults_to_wait() {
        assert_eq!(parse("no json here at all"), Action::Wait);
        assert_eq!(parse(""), Action::Wait);
        assert_eq!(parse("{{{{"), Action::Wait);
    }

    #[test]
    fn completion_recognized_by_extracted_data_alone() {
        let action = parse(r#"{"extracted_data": {"emails": ["a@b.c"]}}"#);
        match action {
            Action::Complete { data } => {
                assert_eq!(data["emails"][0], "a@b.c");
            }
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[test]
    fn fill_type_rewritten_to_form_fill_tool() {
        let value = serde_json::json!({
            "type": "fill",
            "name": "Jane",
            "email": "jane@x.com"
        });
        let normalized = normalize_action(value);
        assert_eq!(normalized["type"], "tool");
        assert_eq!(normalized["tool_name"], "form.fill");
        assert_eq!(normalized["args"]["name"], "Jane");
        assert_eq!(normalized["args"]["email"], "jane@x.com");
    }

    #[test]
    fn bare_tool_name_without_type_is_rewritten() {
        let value = serde_json::json!({
            "tool_name": "form.fill",
            "args": {"message": "hi"}
        });
        let normalized = normalize_action(value);
        assert_eq!(normalized["type"], "tool");
        assert_eq!(normalized["args"]["message"], "hi");
    }

    #[test]
    fn normalization_is_idempotent() {
        let value = serde_json::json!({
            "type": "form.fill",
            "args": {"email": "x@y.z"},
            "subject": "hello"
        });
        let once = normalize_action(value);
        let twice = normalize_action(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn proper_tool_actions_are_left_alone() {
        let value = serde_json::json!({
            "type": "tool",
            "tool_name": "form.fill",
            "args": {"email": "x@y.z"}
        });
        assert_eq!(normalize_action(value.clone()), value);
    }
}
