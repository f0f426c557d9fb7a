//! End-to-end runner loop tests over an in-memory page surface and a
//! scripted oracle transport.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use pagepilot::page::{PageError, PageResult, PageSurface};
use pagepilot::runner::{OracleClient, OracleError, OracleTransport, Runner, RuntimeConfig};
use pagepilot::tools::ToolRegistry;

/// In-memory page: serves canned answers keyed on distinctive fragments of
/// the runner's query scripts, and records every mutation.
#[derive(Default)]
struct MockPage {
    title: String,
    url: String,
    body_text: String,
    has_form: bool,
    nav_error: Option<String>,
    nav_fatal: bool,
    filled: Mutex<Vec<(String, String)>>,
    clicked: Mutex<Vec<String>>,
    submitted: AtomicBool,
}

impl MockPage {
    fn with_form() -> Self {
        Self {
            title: "Contact Us".to_string(),
            url: "https://example.com/contact".to_string(),
            body_text: "Get in touch with our team".to_string(),
            has_form: true,
            ..Default::default()
        }
    }

    fn static_page(body_text: &str) -> Self {
        Self {
            title: "Static".to_string(),
            url: "https://example.com/".to_string(),
            body_text: body_text.to_string(),
            ..Default::default()
        }
    }

    fn forms_json(&self) -> Value {
        if !self.has_form {
            return json!([]);
        }
        json!([{
            "selector": "#contact",
            "fields": [
                {"name": "name", "kind": "text", "required": false, "label": "Your name", "value_len": 0},
                {"name": "email", "kind": "email", "required": false, "label": null, "value_len": 0},
                {"name": "message", "kind": "textarea", "required": false, "label": "Message", "value_len": 0}
            ],
            "submit_selector": "#contact button"
        }])
    }
}

#[async_trait]
impl PageSurface for MockPage {
    async fn navigate(&self, _url: &str) -> PageResult<()> {
        if self.nav_fatal {
            return Err(PageError::Fatal("browser disconnected".to_string()));
        }
        if let Some(message) = &self.nav_error {
            return Err(PageError::Navigation {
                url: _url.to_string(),
                message: message.clone(),
            });
        }
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> PageResult<Value> {
        // Matched most-specific first; several scripts share fragments.
        if script.contains("requestSubmit") {
            self.submitted.store(true, Ordering::SeqCst);
            return Ok(json!(true));
        }
        if script.contains("[required]") {
            return Ok(json!([]));
        }
        if script.contains("checkValidity") {
            return Ok(json!({ "valid": true, "errors": [] }));
        }
        if script.contains("thank you") {
            return Ok(json!({
                "success": self.submitted.load(Ordering::SeqCst),
                "matched": "thank you"
            }));
        }
        if script.contains("=== null") {
            return Ok(json!(false));
        }
        if script.contains("querySelectorAll('form')") {
            return Ok(self.forms_json());
        }
        if script.contains("document.title") {
            return Ok(json!({
                "title": self.title,
                "url": self.url,
                "headings": ["Welcome"]
            }));
        }
        if script.contains("document.body ? document.body.innerText") {
            return Ok(json!(self.body_text));
        }
        if script.contains("outerHTML") {
            return Ok(json!(""));
        }
        // Extractor sweeps, interactive elements, frames, scrolls
        Ok(json!([]))
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> PageResult<()> {
        self.clicked.lock().await.push(selector.to_string());
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> PageResult<()> {
        self.filled
            .lock()
            .await
            .push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn wait(&self, _ms: u64) {}

    async fn screenshot(&self, _path: &Path) -> PageResult<()> {
        Ok(())
    }
}

/// Transport that replays a fixed sequence of responses, then repeats the
/// final one.
struct ScriptedOracle {
    responses: Mutex<VecDeque<String>>,
    exhausted: String,
}

impl ScriptedOracle {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            exhausted: responses.last().map(|s| s.to_string()).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl OracleTransport for ScriptedOracle {
    async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
        let mut queue = self.responses.lock().await;
        Ok(queue.pop_front().unwrap_or_else(|| self.exhausted.clone()))
    }
}

/// Transport slower than the client's timeout.
struct SlowOracle;

#[async_trait]
impl OracleTransport for SlowOracle {
    async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(r#"{"type":"complete","extracted_data":{"never":"seen"}}"#.to_string())
    }
}

fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        wait_ms: 1,
        stall_limit: 10,
        ..Default::default()
    }
}

fn runner_with(page: Arc<MockPage>, oracle: Arc<dyn OracleTransport>, config: RuntimeConfig) -> Runner {
    Runner::new(
        page,
        OracleClient::new(oracle),
        ToolRegistry::standard(),
        config,
    )
}

#[tokio::test]
async fn fill_action_dispatches_form_fill_and_completes_in_one_step() {
    let page = Arc::new(MockPage::with_form());
    let oracle = ScriptedOracle::new(&[r#"{"type":"fill","name":"Jane","email":"jane@x.com"}"#]);
    let mut runner = runner_with(page.clone(), oracle, test_config());

    let result = runner
        .run("fill name=Jane, email=jane@x.com and submit", None)
        .await;

    assert!(result.success);
    assert_eq!(result.steps_taken, 1);
    assert_eq!(result.data["submitted"], json!(true));
    assert_eq!(result.data["filled"]["name"], json!("Jane"));
    assert_eq!(result.data["filled"]["email"], json!("jane@x.com"));

    let filled = page.filled.lock().await;
    assert!(filled.contains(&("#contact [name='name']".to_string(), "Jane".to_string())));
    assert!(filled.contains(&("#contact [name='email']".to_string(), "jane@x.com".to_string())));
    assert!(page.submitted.load(Ordering::SeqCst));
}

#[tokio::test]
async fn unparsable_oracle_responses_degrade_to_wait_and_steps_still_advance() {
    let page = Arc::new(MockPage::static_page("nothing to see"));
    let oracle = ScriptedOracle::new(&[
        "I cannot decide right now",
        "still thinking...",
        "sorry, no action",
    ]);
    let mut config = test_config();
    config.max_steps = 3;
    let mut runner = runner_with(page, oracle, config);

    let result = runner.run("list the article titles", None).await;

    assert_eq!(result.steps_taken, 3);
    assert_eq!(result.reason.as_deref(), Some("max_steps"));
    assert!(result.data.is_null());
    assert!(
        result
            .meta
            .hints
            .iter()
            .any(|h| h.contains("max_steps")),
        "expected a max_steps hint, got {:?}",
        result.meta.hints
    );
    assert!(!result.meta.suggested_commands.is_empty());
}

#[tokio::test]
async fn stalled_run_escalates_depth_then_breaks_with_hints() {
    // Empty body: the fingerprint stays identical even as depth escalation
    // adds sections, so the stall sequence runs to exhaustion.
    let page = Arc::new(MockPage::static_page(""));
    let oracle = ScriptedOracle::new(&["junk response"]);
    let mut config = test_config();
    config.stall_limit = 3;
    config.max_steps = 20;
    let mut runner = runner_with(page, oracle, config);

    let result = runner.run("list the article titles", None).await;

    assert!(!result.success);
    assert_eq!(result.reason.as_deref(), Some("stalled"));
    // Baseline step plus stall_limit stalls plus the forced max-depth pass
    assert_eq!(result.steps_taken, 4);
    assert!(result.data.is_null());
    assert!(!result.meta.hints.is_empty());
    assert!(
        result
            .meta
            .hints
            .iter()
            .any(|h| h.contains("stall_limit")),
        "expected a stall hint, got {:?}",
        result.meta.hints
    );
}

#[tokio::test]
async fn repeated_identical_tool_failures_skip_the_tool_and_suggest_alternative() {
    // Page with no form: form.fill keeps failing with the identical error.
    let page = Arc::new(MockPage::static_page("no forms here"));
    let oracle = ScriptedOracle::new(&[
        r#"{"type":"tool","tool_name":"form.fill","args":{"email":"a@b.c"}}"#,
        r#"{"type":"tool","tool_name":"form.fill","args":{"email":"a@b.c"}}"#,
        r#"{"type":"tool","tool_name":"form.fill","args":{"email":"a@b.c"}}"#,
        r#"{"type":"complete","extracted_data":{"note":"giving up"}}"#,
    ]);
    let mut runner = runner_with(page, oracle, test_config());

    let result = runner.run("fill the contact form", None).await;

    assert!(result.success);
    assert_eq!(result.steps_taken, 4);
    assert!(
        result
            .meta
            .hints
            .iter()
            .any(|h| h.contains("form.fill") && h.contains("llm_guided_field_fill")),
        "expected a skip hint naming the alternative, got {:?}",
        result.meta.hints
    );
}

#[tokio::test]
async fn empty_completion_payload_triggers_deterministic_extraction() {
    let page = Arc::new(MockPage::static_page(
        "questions? write to hello@example.com today",
    ));
    let oracle = ScriptedOracle::new(&[r#"{"type":"complete","extracted_data":{}}"#]);
    let mut runner = runner_with(page, oracle, test_config());

    let result = runner.run("find a contact address", None).await;

    assert!(result.success);
    assert_eq!(result.reason.as_deref(), Some("completed"));
    assert_eq!(result.data["emails"][0], json!("hello@example.com"));
}

#[tokio::test]
async fn navigation_failure_is_classified_and_terminates_immediately() {
    let page = Arc::new(MockPage {
        nav_error: Some("net::ERR_NAME_NOT_RESOLVED".to_string()),
        ..Default::default()
    });
    let oracle = ScriptedOracle::new(&[r#"{"type":"wait"}"#]);
    let mut runner = runner_with(page, oracle, test_config());

    let result = runner
        .run("extract emails", Some("https://nope.invalid"))
        .await;

    assert!(!result.success);
    assert_eq!(result.reason.as_deref(), Some("navigation_failed"));
    assert_eq!(result.steps_taken, 0);
    assert!(
        result.data["error"]
            .as_str()
            .unwrap()
            .contains("ERR_NAME_NOT_RESOLVED")
    );
    assert!(!result.meta.suggested_commands.is_empty());
}

#[tokio::test]
async fn fatal_surface_failure_becomes_structured_result() {
    let page = Arc::new(MockPage {
        nav_fatal: true,
        ..Default::default()
    });
    let oracle = ScriptedOracle::new(&[r#"{"type":"wait"}"#]);
    let mut runner = runner_with(page, oracle, test_config());

    let result = runner.run("extract emails", Some("https://example.com")).await;

    assert!(!result.success);
    assert_eq!(result.reason.as_deref(), Some("surface_failure"));
    assert!(
        result.data["error"]
            .as_str()
            .unwrap()
            .contains("disconnected")
    );
    assert!(!result.meta.hints.is_empty());
}

#[tokio::test]
async fn oracle_timeout_degrades_to_wait_instead_of_aborting() {
    let page = Arc::new(MockPage::static_page("patience"));
    let mut config = test_config();
    config.oracle_timeout_ms = 50;
    config.max_steps = 2;
    let mut runner = runner_with(page, Arc::new(SlowOracle), config);

    let result = runner.run("do something", None).await;

    // Both steps timed out into waits; the run ends at the step budget.
    assert_eq!(result.steps_taken, 2);
    assert_eq!(result.reason.as_deref(), Some("max_steps"));
}

#[tokio::test]
async fn tool_results_accumulate_into_history_between_steps() {
    let page = Arc::new(MockPage::with_form());
    let oracle = ScriptedOracle::new(&[
        r#"{"type":"tool","tool_name":"form.detect","args":{}}"#,
        r#"{"type":"complete","extracted_data":{"done":true}}"#,
    ]);
    let mut runner = runner_with(page, oracle, test_config());

    let result = runner.run("check whether the page has a form", None).await;

    assert!(result.success);
    assert_eq!(result.steps_taken, 2);
    assert_eq!(result.data["done"], json!(true));
}
