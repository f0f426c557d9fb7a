//! Context builder: bounded, progressively detailed page snapshots.
//!
//! Two independent budget mechanisms apply. Progressive leveling by step
//! index decides *which* sections appear; the adaptive character cap decides
//! how much DOM preview fits. Form data is never level-gated for
//! form-oriented instructions - omitting it would make the task unsolvable.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use super::RuntimeConfig;
use crate::page::PageSurface;
use crate::snapshot::{FormSummary, FrameSummary, InteractiveElement, StateSnapshot, truncate};

/// Selector-producing helper shared by the element and form scripts.
const JS_SELECTOR_HELPER: &str = r#"
    const cssFor = (el) => {
        if (el.id) return '#' + CSS.escape(el.id);
        if (el.name) return el.tagName.toLowerCase() + "[name='" + el.name + "']";
        const cls = (el.className && typeof el.className === 'string')
            ? el.className.trim().split(/\s+/)[0] : '';
        if (cls) return el.tagName.toLowerCase() + '.' + CSS.escape(cls);
        return el.tagName.toLowerCase();
    };
"#;

static BASIC_SCRIPT: Lazy<String> = Lazy::new(|| {
    r#"
    (() => {
        const headings = Array.from(document.querySelectorAll('h1, h2, h3'))
            .map(h => (h.innerText || '').trim())
            .filter(t => t.length > 0)
            .slice(0, 12);
        return { title: document.title || '', url: location.href, headings };
    })()
    "#
    .to_string()
});

static INTERACTIVE_SCRIPT: Lazy<String> = Lazy::new(|| {
    format!(
        r#"
    (() => {{
        {JS_SELECTOR_HELPER}
        const picked = document.querySelectorAll(
            "a[href], button, input, select, textarea, [role='button']");
        return Array.from(picked).slice(0, 40).map(el => ({{
            tag: el.tagName.toLowerCase(),
            text: ((el.innerText || el.value || '').trim().slice(0, 60)) || null,
            selector: cssFor(el),
            name: el.name || null,
            href: el.href || null
        }}));
    }})()
    "#
    )
});

static FORMS_SCRIPT: Lazy<String> = Lazy::new(|| {
    format!(
        r#"
    (() => {{
        {JS_SELECTOR_HELPER}
        return Array.from(document.querySelectorAll('form')).slice(0, 5).map(form => {{
            const fields = Array.from(
                form.querySelectorAll('input, select, textarea'))
                .filter(el => el.type !== 'hidden')
                .slice(0, 25)
                .map(el => {{
                    let label = null;
                    if (el.id) {{
                        const l = form.querySelector("label[for='" + CSS.escape(el.id) + "']");
                        if (l) label = (l.innerText || '').trim().slice(0, 40) || null;
                    }}
                    return {{
                        name: el.name || el.id || '',
                        kind: el.tagName === 'TEXTAREA' ? 'textarea'
                            : el.tagName === 'SELECT' ? 'select'
                            : (el.type || 'text'),
                        required: !!el.required,
                        label: label || (el.placeholder || '').trim().slice(0, 40) || null,
                        value_len: (el.value || '').length
                    }};
                }});
            const submit = form.querySelector(
                "button[type='submit'], input[type='submit'], button:not([type])");
            return {{
                selector: cssFor(form),
                fields,
                submit_selector: submit ? cssFor(submit) : null
            }};
        }});
    }})()
    "#
    )
});

const FRAMES_SCRIPT: &str = r#"
    (() => Array.from(document.querySelectorAll('iframe')).slice(0, 8).map(f => ({
        src: f.src || null,
        title: f.title || null
    })))()
"#;

const DOM_TEXT_SCRIPT: &str = "document.body ? document.body.innerText : ''";
const DOM_HTML_SCRIPT: &str =
    "document.documentElement ? document.documentElement.outerHTML : ''";

static FORM_HINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(form|fill|submit|contact|sign\s*up|register|subscribe)\b|\b(name|email|subject|phone|message)\s*[=:]",
    )
    .expect("form hint regex")
});

/// Whether an instruction is form-oriented.
pub fn is_form_oriented(instruction: &str) -> bool {
    FORM_HINT_RE.is_match(instruction)
}

pub struct ContextBuilder;

impl ContextBuilder {
    /// Build a snapshot of the current page for one step.
    ///
    /// Never fails: an unreachable page yields a snapshot with only
    /// `status.error` populated.
    pub async fn build(
        page: &dyn PageSurface,
        instruction: &str,
        step: usize,
        config: &RuntimeConfig,
    ) -> StateSnapshot {
        let basic = match page.evaluate(&BASIC_SCRIPT).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Page unreachable while building context: {}", e);
                return StateSnapshot::error(e.to_string());
            }
        };

        let mut snapshot = StateSnapshot {
            title: string_field(&basic, "title"),
            url: string_field(&basic, "url"),
            headings: basic
                .get("headings")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            ..Default::default()
        };

        let form_oriented = is_form_oriented(instruction);
        // Step index gates detail; a stalled run's depth escalation re-opens
        // the same gates ahead of schedule.
        let depth = config.depth_level;
        let include_interactive = step > 2 || depth >= 2;
        let include_dom = step > 4 || depth >= 3;
        let include_frames = step > 6 || depth >= 3;

        // Forms are never level-gated for form-oriented instructions
        if form_oriented || include_interactive {
            match Self::query_forms(page).await {
                Ok(mut forms) => {
                    if !form_oriented {
                        for form in &mut forms {
                            simplify_form(form);
                        }
                    }
                    snapshot.forms = forms;
                }
                Err(e) => debug!("Form query failed: {}", e),
            }
        }

        if include_interactive {
            match page.evaluate(&INTERACTIVE_SCRIPT).await {
                Ok(value) => {
                    snapshot.interactive =
                        serde_json::from_value::<Vec<InteractiveElement>>(value)
                            .unwrap_or_default();
                }
                Err(e) => debug!("Interactive element query failed: {}", e),
            }
        }

        if include_dom {
            let budget = config.budget_for_step(step);
            if let Some(preview) = Self::dom_preview(page, budget).await {
                snapshot.dom_preview = Some(preview);
            }
        }

        if include_frames {
            match page.evaluate(FRAMES_SCRIPT).await {
                Ok(value) => {
                    snapshot.frames =
                        serde_json::from_value::<Vec<FrameSummary>>(value).unwrap_or_default();
                }
                Err(e) => debug!("Frame query failed: {}", e),
            }
        }

        debug!(
            step,
            depth,
            interactive = snapshot.interactive.len(),
            forms = snapshot.forms.len(),
            dom_chars = snapshot.dom_preview.as_deref().map_or(0, str::len),
            "Built context snapshot"
        );
        snapshot
    }

    pub(crate) async fn query_forms(page: &dyn PageSurface) -> Result<Vec<FormSummary>, String> {
        let value = page
            .evaluate(&FORMS_SCRIPT)
            .await
            .map_err(|e| e.to_string())?;
        serde_json::from_value::<Vec<FormSummary>>(value).map_err(|e| e.to_string())
    }

    /// Budget-capped text rendering of the page body.
    ///
    /// Visible text first; when a client-rendered page reports empty
    /// innerText, fall back to distilling the rendered HTML.
    async fn dom_preview(page: &dyn PageSurface, budget: usize) -> Option<String> {
        let text = page
            .evaluate(DOM_TEXT_SCRIPT)
            .await
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        let rendered = if text.trim().is_empty() {
            let html = page
                .evaluate(DOM_HTML_SCRIPT)
                .await
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            if html.trim().is_empty() {
                return None;
            }
            html2md::parse_html(&html)
        } else {
            text
        };

        let collapsed = collapse_whitespace(&rendered);
        if collapsed.is_empty() {
            return None;
        }
        Some(truncate(&collapsed, budget).into_owned())
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn simplify_form(form: &mut FormSummary) {
    for field in &mut form.fields {
        field.label = None;
        field.value_len = None;
    }
}

/// Collapse whitespace runs so the budget is spent on signal.
fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !last_was_space && !out.is_empty() {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_oriented_detection() {
        assert!(is_form_oriented("fill the contact form and submit"));
        assert!(is_form_oriented("fill name=Jane, email=jane@x.com"));
        assert!(is_form_oriented("Sign up for the newsletter"));
        assert!(!is_form_oriented("list the article titles on this page"));
        assert!(!is_form_oriented("find the cheapest laptop"));
    }

    #[test]
    fn whitespace_collapse_preserves_words() {
        assert_eq!(collapse_whitespace("a\n\n  b\t c  "), "a b c");
        assert_eq!(collapse_whitespace("   "), "");
    }

    #[test]
    fn simplified_forms_drop_labels_and_lengths() {
        use crate::snapshot::FormField;

        let mut form = FormSummary {
            selector: "#f".to_string(),
            fields: vec![FormField {
                name: "email".to_string(),
                kind: "email".to_string(),
                required: true,
                label: Some("Email".to_string()),
                value_len: Some(3),
            }],
            submit_selector: None,
        };
        simplify_form(&mut form);
        assert!(form.fields[0].label.is_none());
        assert!(form.fields[0].value_len.is_none());
        assert!(form.fields[0].required);
    }
}
