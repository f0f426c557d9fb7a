//! Orchestrator loop: the step-by-step execution state machine.
//!
//! One runner drives one page toward one instruction. Each step builds a
//! bounded snapshot, consults the oracle, executes the chosen action, and
//! lets the progress tracker decide whether to continue, escalate, or stop.
//! The loop terminates unconditionally at `max_steps`; only a fatal page
//! surface failure propagates, and the outermost boundary converts it into
//! a structured result.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::context::{ContextBuilder, is_form_oriented};
use super::oracle::OracleClient;
use super::progress::{ProgressState, ProgressTracker};
use super::retry::RetryManager;
use super::RuntimeConfig;
use crate::fallback;
use crate::page::{PageError, PageSurface};
use crate::runner::diagnostics::classify_navigation_error;
use crate::runner::{Action, RunResult, RunnerError, RunnerResult};
use crate::snapshot::ToolHistoryEntry;
use crate::tools::ToolRegistry;

/// `key=value` / `key: value` pairs inside a form-oriented instruction.
static FIELD_PAIR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(name|email|subject|phone|message)\s*[=:]\s*("[^"]+"|[^,;\n]+)"#)
        .expect("field pair regex")
});

pub struct Runner {
    page: Arc<dyn PageSurface>,
    oracle: OracleClient,
    tools: ToolRegistry,
    config: RuntimeConfig,
    screenshot_dir: Option<PathBuf>,
}

impl Runner {
    pub fn new(
        page: Arc<dyn PageSurface>,
        oracle: OracleClient,
        tools: ToolRegistry,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            page,
            oracle,
            tools,
            config,
            screenshot_dir: None,
        }
    }

    /// Directory for the terminal screenshot; none disables capture.
    pub fn with_screenshot_dir(mut self, dir: PathBuf) -> Self {
        self.screenshot_dir = Some(dir);
        self
    }

    /// Execute one run. Always returns a structured result; a fatal surface
    /// failure is caught here and becomes `{success: false}`.
    pub async fn run(&mut self, instruction: &str, url: Option<&str>) -> RunResult {
        match self.run_inner(instruction, url).await {
            Ok(result) => result,
            Err(e) => {
                error!("Run aborted by surface failure: {}", e);
                let mut result = RunResult::new(false, json!({ "error": e.to_string() }), 0);
                result.reason = Some("surface_failure".to_string());
                result.meta.hints.push(
                    "The browser page was lost mid-run; relaunch the browser and retry"
                        .to_string(),
                );
                result
            }
        }
    }

    async fn run_inner(&mut self, instruction: &str, url: Option<&str>) -> RunnerResult<RunResult> {
        let run_id = Uuid::new_v4();
        let mut hints: Vec<String> = Vec::new();
        let mut suggested_commands: Vec<String> = Vec::new();

        let instruction = if self.config.refine_instruction {
            let refined = self.oracle.refine(instruction, &self.config).await;
            if refined != instruction {
                debug!("Instruction refined: {}", refined);
            }
            refined
        } else {
            instruction.to_string()
        };
        let form_oriented = is_form_oriented(&instruction);

        info!(%run_id, form_oriented, "Starting run: {}", instruction);

        if let Some(url) = url
            && let Some(result) = self.navigate_or_diagnose(url).await?
        {
            // Navigation failed in a classified way; terminate immediately.
            return Ok(result);
        }

        let mut progress = ProgressState::default();
        let mut retry = RetryManager::new(self.config.max_same_error);
        let mut skipped: HashSet<String> = HashSet::new();
        let mut history: Vec<ToolHistoryEntry> = Vec::new();
        let catalog: Vec<&str> = self.tools.names();

        let mut data = Value::Null;
        let mut reason: Option<&str> = None;
        let mut steps_taken = 0usize;

        for step in 0..self.config.max_steps {
            let mut snapshot =
                ContextBuilder::build(&*self.page, &instruction, step, &self.config).await;

            let decision = ProgressTracker::tick(&snapshot, &mut progress, &mut self.config);
            if decision.should_break {
                hints.extend(decision.hints);
                reason = Some("stalled");
                steps_taken = step;
                break;
            }

            snapshot.tool_history = history.clone();
            let action = self
                .oracle
                .decide(&instruction, &snapshot, step, &self.config, &catalog)
                .await;
            steps_taken = step + 1;

            match action {
                Action::Complete { data: payload } => {
                    data = if is_empty_payload(&payload) {
                        debug!("Completion payload empty, trying deterministic extraction");
                        fallback::extract(&*self.page, &self.tools, &self.config)
                            .await
                            .unwrap_or(payload)
                    } else {
                        payload
                    };
                    reason = Some("completed");
                    break;
                }
                Action::ToolCall { name, args } => {
                    let args = Value::Object(args);
                    let result = if skipped.contains(&name) {
                        json!({ "error": "tool permanently skipped after repeated identical failures" })
                    } else {
                        self.tools
                            .execute(&name, &args, &*self.page, &self.config)
                            .await
                    };

                    // A successful composite form fill completes the run on
                    // this same step, without waiting for an explicit
                    // completion action.
                    if name == "form.fill"
                        && result.get("submitted").and_then(Value::as_bool) == Some(true)
                    {
                        info!("Form submitted, auto-completing run");
                        data = result;
                        reason = Some("completed");
                        break;
                    }

                    if let Some(err) = result.get("error").and_then(Value::as_str)
                        && !skipped.contains(&name)
                        && !retry.should_retry(&name, err)
                    {
                        skipped.insert(name.clone());
                        let stats = retry.summary(&name);
                        let mut hint = format!(
                            "Tool '{}' skipped after {} failures (last: {})",
                            name, stats.attempts, err
                        );
                        if let Some(alternative) = retry.alternative(&name) {
                            hint.push_str(&format!("; consider '{alternative}' instead"));
                        }
                        hints.push(hint);
                    }

                    history.push(ToolHistoryEntry {
                        tool: name,
                        args,
                        result,
                    });
                }
                Action::Click {
                    selector,
                    timeout_ms,
                } => {
                    let timeout = Duration::from_millis(
                        timeout_ms.unwrap_or(self.config.click_timeout_ms),
                    );
                    self.primitive(self.page.click(&selector, timeout).await, "click")?;
                }
                Action::Fill { selector, value } => {
                    self.primitive(self.page.fill(&selector, &value).await, "fill")?;
                }
                Action::Scroll => {
                    self.primitive(
                        self.page
                            .evaluate(
                                "(() => { window.scrollBy(0, window.innerHeight * 0.8); return true; })()",
                            )
                            .await
                            .map(|_| ()),
                        "scroll",
                    )?;
                }
                Action::Wait => {
                    self.page.wait(self.config.wait_ms).await;
                }
            }
        }

        if reason.is_none() {
            reason = Some("max_steps");
        }

        // Terminal fallback chain, run once: a targeted form fill for
        // form-oriented instructions, generic extraction otherwise.
        if data.is_null() {
            if form_oriented
                && let Some(recovered) = self.targeted_form_fill(&instruction).await
            {
                data = recovered;
            }
            if data.is_null()
                && let Some(recovered) =
                    fallback::extract(&*self.page, &self.tools, &self.config).await
            {
                data = recovered;
            }
        }

        if data.is_null() && reason == Some("max_steps") {
            hints.push(format!(
                "Run ended at max_steps without data; raise max_steps (currently {})",
                self.config.max_steps
            ));
            suggested_commands.push(format!(
                "pagepilot --max-steps {}",
                self.config.max_steps * 2
            ));
        }

        let success = matches!(reason, Some("completed")) || !data.is_null();
        let mut result = RunResult::new(success, data, steps_taken);
        result.reason = reason.map(str::to_string);
        result.meta.hints = hints;
        result.meta.suggested_commands = suggested_commands;

        if let Some(path) = self.capture_screenshot(run_id).await {
            result.screenshots.push(path);
        }

        info!(
            %run_id,
            success = result.success,
            steps = result.steps_taken,
            reason = result.reason.as_deref().unwrap_or(""),
            "Run finished"
        );
        Ok(result)
    }

    /// Navigate to the start URL. `Ok(Some(result))` means the failure was
    /// classified and the run should end with that result immediately.
    async fn navigate_or_diagnose(&self, url: &str) -> RunnerResult<Option<RunResult>> {
        let timeout = Duration::from_millis(self.config.navigation_timeout_ms);
        let message = match tokio::time::timeout(timeout, self.page.navigate(url)).await {
            Ok(Ok(())) => return Ok(None),
            Ok(Err(PageError::Fatal(m))) => return Err(RunnerError::Surface(m)),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "navigation timed out after {}ms",
                self.config.navigation_timeout_ms
            ),
        };

        warn!("Navigation to {} failed: {}", url, message);
        let diagnosis = classify_navigation_error(url, &message);
        let mut result = RunResult::new(
            false,
            json!({
                "error": diagnosis.message,
                "kind": diagnosis.kind,
            }),
            0,
        );
        result.reason = Some("navigation_failed".to_string());
        result
            .meta
            .suggested_commands
            .push(diagnosis.suggested_command.clone());
        result
            .meta
            .hints
            .push("Navigation failed before the first step".to_string());
        Ok(Some(result))
    }

    /// Absorb a non-fatal primitive-action failure; propagate a fatal one.
    fn primitive(&self, outcome: Result<(), PageError>, kind: &str) -> RunnerResult<()> {
        match outcome {
            Ok(()) => Ok(()),
            Err(PageError::Fatal(message)) => Err(RunnerError::Surface(message)),
            Err(e) => {
                warn!("Primitive {} failed: {}", kind, e);
                Ok(())
            }
        }
    }

    /// Last-resort form fill from `key=value` pairs in the instruction.
    async fn targeted_form_fill(&self, instruction: &str) -> Option<Value> {
        let mut args = Map::new();
        for captures in FIELD_PAIR_RE.captures_iter(instruction) {
            let key = captures[1].to_ascii_lowercase();
            let value = captures[2].trim().trim_matches('"').trim();
            if !value.is_empty() {
                args.insert(key, Value::String(value.to_string()));
            }
        }
        if args.is_empty() {
            return None;
        }

        debug!(fields = args.len(), "Terminal targeted form fill");
        let result = self
            .tools
            .execute(
                "form.fill",
                &Value::Object(args),
                &*self.page,
                &self.config,
            )
            .await;
        if result.get("submitted").and_then(Value::as_bool) == Some(true) {
            Some(result)
        } else {
            None
        }
    }

    async fn capture_screenshot(&self, run_id: Uuid) -> Option<String> {
        let dir = self.screenshot_dir.as_ref()?;
        let path = dir.join(format!("pagepilot_{run_id}.png"));
        match self.page.screenshot(&path).await {
            Ok(()) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                debug!("Terminal screenshot failed: {}", e);
                None
            }
        }
    }
}

/// Whether a completion payload counts as empty.
fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_detection() {
        assert!(is_empty_payload(&Value::Null));
        assert!(is_empty_payload(&json!("")));
        assert!(is_empty_payload(&json!("  ")));
        assert!(is_empty_payload(&json!([])));
        assert!(is_empty_payload(&json!({})));
        assert!(!is_empty_payload(&json!({"a": 1})));
        assert!(!is_empty_payload(&json!(0)));
        assert!(!is_empty_payload(&json!(false)));
    }

    #[test]
    fn instruction_field_pairs_are_parsed() {
        let mut args = Map::new();
        for captures in FIELD_PAIR_RE.captures_iter("fill name=Jane Doe, email: jane@x.com") {
            args.insert(
                captures[1].to_ascii_lowercase(),
                Value::String(captures[2].trim().to_string()),
            );
        }
        assert_eq!(args.get("name").and_then(Value::as_str), Some("Jane Doe"));
        assert_eq!(
            args.get("email").and_then(Value::as_str),
            Some("jane@x.com")
        );
    }
}
