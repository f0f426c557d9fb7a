//! Form tools: detection, field inspection, filling, validation, submission.
//!
//! The granular tools let the oracle drive a form step by step; `form.fill`
//! is the composite that does the whole flow - detect, map fields by
//! heuristic, fill, validate required fields, submit, check for success -
//! in one call.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{Tool, ToolError, ToolResult, opt_str};
use crate::page::PageSurface;
use crate::runner::{ContextBuilder, RuntimeConfig};
use crate::snapshot::{FormField, FormSummary};

/// Keys the composite fill understands, in fill order.
const FILL_KEYS: &[&str] = &["name", "email", "subject", "phone", "message"];

async fn detect_forms(page: &dyn PageSurface) -> Result<Vec<FormSummary>, ToolError> {
    ContextBuilder::query_forms(page)
        .await
        .map_err(ToolError::Failed)
}

/// Pick the target form: the one matching `selector`, or the first with
/// fields.
async fn target_form(
    page: &dyn PageSurface,
    selector: Option<&str>,
) -> Result<FormSummary, ToolError> {
    let forms = detect_forms(page).await?;
    let picked = match selector {
        Some(wanted) => forms.into_iter().find(|f| f.selector == wanted),
        None => forms.into_iter().find(|f| !f.fields.is_empty()),
    };
    picked.ok_or_else(|| ToolError::Failed("no form found on page".to_string()))
}

/// CSS selector for a field inside its form.
fn field_selector(form: &FormSummary, field: &FormField) -> Option<String> {
    if field.name.is_empty() {
        return None;
    }
    Some(format!("{} [name='{}']", form.selector, field.name))
}

/// Map a logical fill key onto a form field.
///
/// Matches on input kind first (email, tel, textarea), then on name, label,
/// and placeholder text. `used` prevents two keys from landing in the same
/// field.
fn match_field<'a>(
    form: &'a FormSummary,
    key: &str,
    used: &[&str],
) -> Option<&'a FormField> {
    let haystack = |field: &FormField| {
        let mut text = field.name.to_ascii_lowercase();
        if let Some(label) = &field.label {
            text.push(' ');
            text.push_str(&label.to_ascii_lowercase());
        }
        text
    };
    let available = |field: &&FormField| !used.contains(&field.name.as_str());

    match key {
        "email" => form
            .fields
            .iter()
            .filter(available)
            .find(|f| f.kind == "email" || haystack(f).contains("mail")),
        "phone" => form
            .fields
            .iter()
            .filter(available)
            .find(|f| f.kind == "tel" || haystack(f).contains("phone") || haystack(f).contains("tel")),
        "message" => form
            .fields
            .iter()
            .filter(available)
            .find(|f| f.kind == "textarea" || haystack(f).contains("message") || haystack(f).contains("comment")),
        "subject" => form
            .fields
            .iter()
            .filter(available)
            .find(|f| haystack(f).contains("subject") || haystack(f).contains("topic")),
        "name" => form
            .fields
            .iter()
            .filter(available)
            .filter(|f| !haystack(f).contains("username"))
            .find(|f| haystack(f).contains("name")),
        _ => None,
    }
}

fn escape_for_js(selector: &str) -> Result<String, ToolError> {
    serde_json::to_string(selector).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

async fn submit_form(page: &dyn PageSurface, form: &FormSummary) -> Result<bool, ToolError> {
    let form_js = escape_for_js(&form.selector)?;
    let script = format!(
        r#"
        (() => {{
            const form = document.querySelector({form_js});
            if (!form) return false;
            const button = form.querySelector(
                "button[type='submit'], input[type='submit'], button:not([type])");
            if (button) {{ button.click(); return true; }}
            if (form.requestSubmit) {{ form.requestSubmit(); return true; }}
            form.submit();
            return true;
        }})()
        "#
    );
    let value = page.evaluate(&script).await?;
    Ok(value.as_bool().unwrap_or(false))
}

async fn validate_form(page: &dyn PageSurface, form: &FormSummary) -> Result<Value, ToolError> {
    let form_js = escape_for_js(&form.selector)?;
    let script = format!(
        r#"
        (() => {{
            const form = document.querySelector({form_js});
            if (!form) return {{ valid: false, errors: [{{ name: '', message: 'form gone' }}] }};
            const errors = [];
            for (const el of form.querySelectorAll('input, select, textarea')) {{
                if (el.type === 'hidden') continue;
                if (!el.checkValidity()) {{
                    errors.push({{ name: el.name || el.id || '', message: el.validationMessage }});
                }}
            }}
            return {{ valid: errors.length === 0, errors }};
        }})()
        "#
    );
    page.evaluate(&script).await.map_err(ToolError::from)
}

async fn missing_required(
    page: &dyn PageSurface,
    form: &FormSummary,
) -> Result<Vec<String>, ToolError> {
    let form_js = escape_for_js(&form.selector)?;
    let script = format!(
        r#"
        (() => {{
            const form = document.querySelector({form_js});
            if (!form) return [];
            return Array.from(form.querySelectorAll('[required]'))
                .filter(el => !(el.value || '').trim())
                .map(el => el.name || el.id || '');
        }})()
        "#
    );
    let value = page.evaluate(&script).await?;
    Ok(value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default())
}

const SUCCESS_SCRIPT: &str = r#"
    (() => {
        const text = (document.body ? document.body.innerText : '').toLowerCase();
        const phrases = [
            'thank you', 'thanks for', 'message sent', 'successfully sent',
            'we will get back', 'submission received', 'your message has been'
        ];
        const matched = phrases.find(p => text.includes(p));
        return { success: !!matched, matched: matched || null };
    })()
"#;

async fn check_success(page: &dyn PageSurface, form: &FormSummary) -> Result<Value, ToolError> {
    let mut result = page.evaluate(SUCCESS_SCRIPT).await?;
    if result.get("success").and_then(Value::as_bool) != Some(true) {
        // A form that vanished after submit is also a success signal
        let form_js = escape_for_js(&form.selector)?;
        let gone = page
            .evaluate(&format!("document.querySelector({form_js}) === null"))
            .await?
            .as_bool()
            .unwrap_or(false);
        if gone {
            result = json!({ "success": true, "matched": "form removed" });
        }
    }
    Ok(result)
}

pub struct FormDetectTool;

#[async_trait]
impl Tool for FormDetectTool {
    fn name(&self) -> &'static str {
        "form.detect"
    }

    fn description(&self) -> &'static str {
        "Detect forms on the page, returning their selectors and field counts."
    }

    async fn execute(
        &self,
        _args: &Value,
        page: &dyn PageSurface,
        _config: &RuntimeConfig,
    ) -> ToolResult {
        let forms = detect_forms(page).await?;
        let summaries: Vec<Value> = forms
            .iter()
            .map(|f| {
                json!({
                    "selector": f.selector,
                    "field_count": f.fields.len(),
                    "submit_selector": f.submit_selector,
                })
            })
            .collect();
        Ok(json!({ "found": !summaries.is_empty(), "forms": summaries }))
    }
}

pub struct FormFieldsTool;

#[async_trait]
impl Tool for FormFieldsTool {
    fn name(&self) -> &'static str {
        "form.fields"
    }

    fn description(&self) -> &'static str {
        "List the fields of a form (first form, or the one given by `selector`)."
    }

    async fn execute(
        &self,
        args: &Value,
        page: &dyn PageSurface,
        _config: &RuntimeConfig,
    ) -> ToolResult {
        let form = target_form(page, opt_str(args, "selector").as_deref()).await?;
        Ok(json!({
            "selector": form.selector,
            "fields": serde_json::to_value(&form.fields)
                .map_err(|e| ToolError::Failed(e.to_string()))?,
        }))
    }
}

pub struct FormFillFieldTool;

#[async_trait]
impl Tool for FormFillFieldTool {
    fn name(&self) -> &'static str {
        "form.fill_field"
    }

    fn description(&self) -> &'static str {
        "Fill one field, addressed by `selector` or by field `name`."
    }

    fn read_only(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        args: &Value,
        page: &dyn PageSurface,
        _config: &RuntimeConfig,
    ) -> ToolResult {
        let value = opt_str(args, "value")
            .ok_or_else(|| ToolError::InvalidArguments("missing 'value'".to_string()))?;

        let selector = match opt_str(args, "selector") {
            Some(selector) => selector,
            None => {
                let name = opt_str(args, "name").ok_or_else(|| {
                    ToolError::InvalidArguments("need 'selector' or 'name'".to_string())
                })?;
                format!("[name='{name}']")
            }
        };

        page.fill(&selector, &value).await?;
        Ok(json!({ "filled": true, "selector": selector }))
    }
}

pub struct FormValidateTool;

#[async_trait]
impl Tool for FormValidateTool {
    fn name(&self) -> &'static str {
        "form.validate"
    }

    fn description(&self) -> &'static str {
        "Run browser-native validity checks over a form's fields."
    }

    async fn execute(
        &self,
        args: &Value,
        page: &dyn PageSurface,
        _config: &RuntimeConfig,
    ) -> ToolResult {
        let form = target_form(page, opt_str(args, "selector").as_deref()).await?;
        validate_form(page, &form).await
    }
}

pub struct FormCheckRequiredTool;

#[async_trait]
impl Tool for FormCheckRequiredTool {
    fn name(&self) -> &'static str {
        "form.check_required"
    }

    fn description(&self) -> &'static str {
        "List required fields that are still empty."
    }

    async fn execute(
        &self,
        args: &Value,
        page: &dyn PageSurface,
        _config: &RuntimeConfig,
    ) -> ToolResult {
        let form = target_form(page, opt_str(args, "selector").as_deref()).await?;
        let missing = missing_required(page, &form).await?;
        Ok(json!({ "missing": missing }))
    }
}

pub struct FormSubmitTool;

#[async_trait]
impl Tool for FormSubmitTool {
    fn name(&self) -> &'static str {
        "form.submit"
    }

    fn description(&self) -> &'static str {
        "Submit a form via its submit control."
    }

    fn read_only(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        args: &Value,
        page: &dyn PageSurface,
        _config: &RuntimeConfig,
    ) -> ToolResult {
        let form = target_form(page, opt_str(args, "selector").as_deref()).await?;
        let submitted = submit_form(page, &form).await?;
        Ok(json!({ "submitted": submitted }))
    }
}

pub struct FormCheckSuccessTool;

#[async_trait]
impl Tool for FormCheckSuccessTool {
    fn name(&self) -> &'static str {
        "form.check_success"
    }

    fn description(&self) -> &'static str {
        "Heuristically check whether a form submission succeeded."
    }

    async fn execute(
        &self,
        args: &Value,
        page: &dyn PageSurface,
        _config: &RuntimeConfig,
    ) -> ToolResult {
        let form = target_form(page, opt_str(args, "selector").as_deref()).await?;
        check_success(page, &form).await
    }
}

pub struct FormFillTool;

#[async_trait]
impl Tool for FormFillTool {
    fn name(&self) -> &'static str {
        "form.fill"
    }

    fn description(&self) -> &'static str {
        "Fill and submit a form from name/email/subject/phone/message values."
    }

    fn read_only(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        args: &Value,
        page: &dyn PageSurface,
        _config: &RuntimeConfig,
    ) -> ToolResult {
        let form = target_form(page, opt_str(args, "form_selector").as_deref()).await?;

        let mut filled = Map::new();
        let mut errors = Vec::new();
        let mut used: Vec<&str> = Vec::new();

        for key in FILL_KEYS {
            let Some(value) = opt_str(args, key) else {
                continue;
            };
            let Some(field) = match_field(&form, key, &used) else {
                errors.push(format!("no field matched '{key}'"));
                continue;
            };
            let Some(selector) = field_selector(&form, field) else {
                errors.push(format!("field for '{key}' has no usable selector"));
                continue;
            };
            match page.fill(&selector, &value).await {
                Ok(()) => {
                    debug!(key, selector, "Filled form field");
                    used.push(field.name.as_str());
                    filled.insert((*key).to_string(), Value::String(value));
                }
                Err(e) => errors.push(format!("{key}: {e}")),
            }
        }

        if filled.is_empty() {
            return Err(ToolError::Failed(format!(
                "no fields could be filled: {}",
                errors.join("; ")
            )));
        }

        // Refuse to submit with required fields still empty; the caller gets
        // the list and can supply the missing values.
        let missing = missing_required(page, &form).await?;
        if !missing.is_empty() {
            return Ok(json!({
                "submitted": false,
                "filled": Value::Object(filled),
                "errors": [format!("required fields empty: {}", missing.join(", "))],
            }));
        }

        let submitted = submit_form(page, &form).await?;
        if submitted {
            page.wait(800).await;
        }
        let success = check_success(page, &form).await.unwrap_or_else(|_| json!({}));

        let mut payload = json!({
            "submitted": submitted,
            "filled": Value::Object(filled),
            "success_check": success,
        });
        if !errors.is_empty() {
            payload["errors"] = json!(errors);
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> FormSummary {
        let field = |name: &str, kind: &str, label: Option<&str>| FormField {
            name: name.to_string(),
            kind: kind.to_string(),
            required: false,
            label: label.map(str::to_string),
            value_len: None,
        };
        FormSummary {
            selector: "#contact".to_string(),
            fields: vec![
                field("full_name", "text", Some("Your name")),
                field("email", "email", None),
                field("topic", "text", Some("Subject")),
                field("phone_number", "tel", None),
                field("body", "textarea", Some("Message")),
            ],
            submit_selector: Some("#contact button".to_string()),
        }
    }

    #[test]
    fn fill_keys_map_onto_heuristic_fields() {
        let form = form();
        assert_eq!(match_field(&form, "name", &[]).unwrap().name, "full_name");
        assert_eq!(match_field(&form, "email", &[]).unwrap().name, "email");
        assert_eq!(match_field(&form, "subject", &[]).unwrap().name, "topic");
        assert_eq!(match_field(&form, "phone", &[]).unwrap().name, "phone_number");
        assert_eq!(match_field(&form, "message", &[]).unwrap().name, "body");
    }

    #[test]
    fn used_fields_are_not_matched_twice() {
        let form = form();
        let first = match_field(&form, "name", &[]).unwrap();
        assert_eq!(first.name, "full_name");
        assert!(match_field(&form, "name", &["full_name"]).is_none());
    }

    #[test]
    fn field_selectors_scope_to_the_form() {
        let form = form();
        let selector = field_selector(&form, &form.fields[1]).unwrap();
        assert_eq!(selector, "#contact [name='email']");
    }
}
