//! Consent and verification UI tools.
//!
//! Both tools probe a fixed candidate list first, then fall back to a
//! text-matching sweep over visible buttons. Solving actual challenges
//! (CAPTCHA, sliders) is out of scope; when no affordance is found the
//! tools report that honestly instead of failing.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::{Tool, ToolResult};
use crate::page::PageSurface;
use crate::runner::RuntimeConfig;

const COOKIE_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    "#CybotCookiebotDialogBodyLevelButtonLevelOptinAllowAll",
    "button[id*='accept']",
    "button[class*='accept']",
    "[data-testid*='accept']",
    "button[aria-label*='accept' i]",
];

const COOKIE_TEXT_SCRIPT: &str = r#"
    (() => {
        const words = ['accept', 'agree', 'allow all', 'got it', 'ok'];
        const buttons = document.querySelectorAll("button, a[role='button'], [role='button']");
        for (const el of buttons) {
            const t = (el.innerText || '').trim().toLowerCase();
            if (t.length > 0 && t.length < 40 && words.some(w => t.includes(w))) {
                el.click();
                return true;
            }
        }
        return false;
    })()
"#;

const VERIFY_SELECTORS: &[&str] = &[
    "input[type='checkbox'][name*='captcha']",
    "#recaptcha-anchor",
    ".recaptcha-checkbox",
    "button[class*='verify']",
    "[data-testid*='verify']",
];

const VERIFY_TEXT_SCRIPT: &str = r#"
    (() => {
        const words = ['verify', "i'm not a robot", 'i am not a robot', 'continue'];
        const nodes = document.querySelectorAll("button, input[type='checkbox'], [role='checkbox'], [role='button']");
        for (const el of nodes) {
            const t = ((el.innerText || el.getAttribute('aria-label') || '')).trim().toLowerCase();
            if (t.length > 0 && words.some(w => t.includes(w))) {
                el.click();
                return true;
            }
        }
        return false;
    })()
"#;

/// Try each candidate selector with a short click timeout; fall back to the
/// text sweep. Returns whether anything was clicked.
async fn probe_and_click(
    page: &dyn PageSurface,
    selectors: &[&str],
    text_script: &str,
) -> bool {
    for selector in selectors {
        if page
            .click(selector, Duration::from_millis(500))
            .await
            .is_ok()
        {
            debug!(selector, "Consent affordance clicked");
            return true;
        }
    }
    page.evaluate(text_script)
        .await
        .ok()
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

pub struct CookiesAcceptTool;

#[async_trait]
impl Tool for CookiesAcceptTool {
    fn name(&self) -> &'static str {
        "cookies.accept"
    }

    fn description(&self) -> &'static str {
        "Accept a cookie consent dialog if one is present."
    }

    fn read_only(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        _args: &Value,
        page: &dyn PageSurface,
        _config: &RuntimeConfig,
    ) -> ToolResult {
        let accepted = probe_and_click(page, COOKIE_SELECTORS, COOKIE_TEXT_SCRIPT).await;
        if accepted {
            // Give the overlay a moment to dismiss before the next snapshot
            page.wait(300).await;
        }
        Ok(json!({ "accepted": accepted }))
    }
}

pub struct HumanVerifyTool;

#[async_trait]
impl Tool for HumanVerifyTool {
    fn name(&self) -> &'static str {
        "human.verify"
    }

    fn description(&self) -> &'static str {
        "Click a visible human-verification affordance (checkbox-style). Does not solve challenges."
    }

    fn read_only(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        _args: &Value,
        page: &dyn PageSurface,
        _config: &RuntimeConfig,
    ) -> ToolResult {
        let ok = probe_and_click(page, VERIFY_SELECTORS, VERIFY_TEXT_SCRIPT).await;
        if ok {
            page.wait(500).await;
        }
        Ok(json!({ "ok": ok }))
    }
}
