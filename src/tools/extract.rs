//! Read-only content extractors: emails, phone numbers, links.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};

use super::{Tool, ToolError, ToolResult, opt_str, opt_usize};
use crate::page::PageSurface;
use crate::runner::RuntimeConfig;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("email regex")
});

// International and common local formats; at least 7 digits total to keep
// order numbers and dates out of the result.
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\+?\d[\d\s().\-]{5,}\d").expect("phone regex")
});

const PAGE_TEXT_SCRIPT: &str = "document.body ? document.body.innerText : ''";

const MAILTO_SCRIPT: &str = r#"
    (() => Array.from(document.querySelectorAll("a[href^='mailto:']"))
        .map(a => a.href.slice(7).split('?')[0])
        .filter(v => v.length > 0))()
"#;

const TEL_SCRIPT: &str = r#"
    (() => Array.from(document.querySelectorAll("a[href^='tel:']"))
        .map(a => a.href.slice(4))
        .filter(v => v.length > 0))()
"#;

const LINKS_SCRIPT: &str = r#"
    (() => Array.from(document.querySelectorAll('a[href]')).map(a => ({
        text: (a.innerText || '').trim().slice(0, 120),
        href: a.href
    })).filter(l => l.href.length > 0))()
"#;

async fn page_text(page: &dyn PageSurface) -> Result<String, ToolError> {
    let value = page.evaluate(PAGE_TEXT_SCRIPT).await?;
    Ok(value.as_str().unwrap_or_default().to_string())
}

fn string_list(value: Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Dedupe while preserving order of first appearance.
fn dedupe(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.to_ascii_lowercase()))
        .collect()
}

pub struct ExtractEmailsTool;

#[async_trait]
impl Tool for ExtractEmailsTool {
    fn name(&self) -> &'static str {
        "extract.emails"
    }

    fn description(&self) -> &'static str {
        "Extract email addresses from page text and mailto: links."
    }

    async fn execute(
        &self,
        _args: &Value,
        page: &dyn PageSurface,
        _config: &RuntimeConfig,
    ) -> ToolResult {
        let text = page_text(page).await?;
        let mut emails: Vec<String> = EMAIL_RE
            .find_iter(&text)
            .map(|m| m.as_str().to_string())
            .collect();

        // mailto: anchors carry addresses the visible text often obfuscates
        if let Ok(value) = page.evaluate(MAILTO_SCRIPT).await {
            emails.extend(string_list(value));
        }

        Ok(json!({ "emails": dedupe(emails) }))
    }
}

pub struct ExtractPhonesTool;

#[async_trait]
impl Tool for ExtractPhonesTool {
    fn name(&self) -> &'static str {
        "extract.phones"
    }

    fn description(&self) -> &'static str {
        "Extract phone numbers from page text and tel: links."
    }

    async fn execute(
        &self,
        _args: &Value,
        page: &dyn PageSurface,
        _config: &RuntimeConfig,
    ) -> ToolResult {
        let text = page_text(page).await?;
        let mut phones: Vec<String> = PHONE_RE
            .find_iter(&text)
            .map(|m| m.as_str().trim().to_string())
            .filter(|candidate| candidate.chars().filter(char::is_ascii_digit).count() >= 7)
            .collect();

        if let Ok(value) = page.evaluate(TEL_SCRIPT).await {
            phones.extend(string_list(value));
        }

        Ok(json!({ "phones": dedupe(phones) }))
    }
}

pub struct ExtractLinksTool;

#[async_trait]
impl Tool for ExtractLinksTool {
    fn name(&self) -> &'static str {
        "extract.links"
    }

    fn description(&self) -> &'static str {
        "Extract links, optionally filtered by selector, href, or text patterns."
    }

    async fn execute(
        &self,
        args: &Value,
        page: &dyn PageSurface,
        _config: &RuntimeConfig,
    ) -> ToolResult {
        let script = match opt_str(args, "selector") {
            Some(selector) => {
                let scope = serde_json::to_string(&selector)
                    .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
                format!(
                    r#"
                    (() => {{
                        const root = document.querySelector({scope});
                        if (!root) return [];
                        return Array.from(root.querySelectorAll('a[href]')).map(a => ({{
                            text: (a.innerText || '').trim().slice(0, 120),
                            href: a.href
                        }})).filter(l => l.href.length > 0);
                    }})()
                    "#
                )
            }
            None => LINKS_SCRIPT.to_string(),
        };

        let raw = page.evaluate(&script).await?;
        let mut links: Vec<(String, String)> = raw
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|l| {
                        let href = l.get("href")?.as_str()?.to_string();
                        let text = l
                            .get("text")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        Some((text, href))
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some(fragment) = opt_str(args, "href_includes") {
            links.retain(|(_, href)| href.contains(&fragment));
        }
        if let Some(pattern) = opt_str(args, "href_regex") {
            let re = Regex::new(&pattern)
                .map_err(|e| ToolError::InvalidArguments(format!("href_regex: {e}")))?;
            links.retain(|(_, href)| re.is_match(href));
        }
        if let Some(pattern) = opt_str(args, "text_regex") {
            let re = Regex::new(&pattern)
                .map_err(|e| ToolError::InvalidArguments(format!("text_regex: {e}")))?;
            links.retain(|(text, _)| re.is_match(text));
        }

        let mut seen = std::collections::HashSet::new();
        links.retain(|(_, href)| seen.insert(href.clone()));

        let limit = opt_usize(args, "limit").unwrap_or(100);
        links.truncate(limit);

        let payload: Vec<Value> = links
            .into_iter()
            .map(|(text, href)| json!({ "text": text, "href": href }))
            .collect();
        Ok(json!({ "links": payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_regex_matches_plain_addresses() {
        let text = "reach us at sales@example.com or support@sub.example.co.uk.";
        let found: Vec<&str> = EMAIL_RE.find_iter(text).map(|m| m.as_str()).collect();
        assert_eq!(found, vec!["sales@example.com", "support@sub.example.co.uk"]);
    }

    #[test]
    fn phone_regex_requires_enough_digits() {
        let hits: Vec<String> = PHONE_RE
            .find_iter("call +1 (555) 123-4567 or ext. 12")
            .map(|m| m.as_str().trim().to_string())
            .filter(|c| c.chars().filter(char::is_ascii_digit).count() >= 7)
            .collect();
        assert_eq!(hits, vec!["+1 (555) 123-4567"]);
    }

    #[test]
    fn dedupe_is_case_insensitive_and_order_preserving() {
        let deduped = dedupe(vec![
            "A@x.com".to_string(),
            "b@x.com".to_string(),
            "a@x.com".to_string(),
        ]);
        assert_eq!(deduped, vec!["A@x.com", "b@x.com"]);
    }
}
