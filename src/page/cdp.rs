//! chromiumoxide binding of [`PageSurface`].
//!
//! Wraps a live CDP page and maps every chromiumoxide failure into the
//! [`PageError`] taxonomy. Disconnect-shaped errors become
//! [`PageError::Fatal`]; everything else stays recoverable.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::element::Element;
use chromiumoxide::page::ScreenshotParams;
use serde_json::Value;
use tracing::{debug, warn};

use super::{PageError, PageResult, PageSurface};

/// Production page surface over a chromiumoxide [`Page`].
pub struct CdpPage {
    page: Page,
}

impl CdpPage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// Access the underlying CDP page.
    pub fn inner(&self) -> &Page {
        &self.page
    }

    /// Wait for an element to appear using exponential backoff polling.
    ///
    /// Single Page Applications render elements via JavaScript after the
    /// initial load event fires, so a one-shot `find_element` is not enough.
    /// Polling starts at 100ms, doubles each retry, and caps at 1 second.
    async fn wait_for_element(&self, selector: &str, timeout: Duration) -> PageResult<Element> {
        let start = std::time::Instant::now();
        let mut poll_interval = Duration::from_millis(100);
        let max_interval = Duration::from_secs(1);

        loop {
            if let Ok(element) = self.page.find_element(selector).await {
                return Ok(element);
            }

            if start.elapsed() >= timeout {
                return Err(PageError::ElementNotFound {
                    selector: selector.to_string(),
                });
            }

            tokio::time::sleep(poll_interval).await;
            poll_interval = (poll_interval * 2).min(max_interval);
        }
    }

    /// Classify a chromiumoxide error string, promoting disconnects to Fatal.
    fn classify(context: &str, message: String) -> PageError {
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("connection closed")
            || lowered.contains("browser closed")
            || lowered.contains("target crashed")
            || lowered.contains("session closed")
            || lowered.contains("channel closed")
        {
            PageError::Fatal(format!("{context}: {message}"))
        } else {
            PageError::Evaluation(format!("{context}: {message}"))
        }
    }
}

#[async_trait]
impl PageSurface for CdpPage {
    async fn navigate(&self, url: &str) -> PageResult<()> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(PageError::Navigation {
                url: url.to_string(),
                message: "URL must start with http:// or https://".to_string(),
            });
        }

        self.page.goto(url).await.map_err(|e| {
            let message = e.to_string();
            if Self::classify("goto", message.clone()).is_fatal() {
                PageError::Fatal(format!("navigation: {message}"))
            } else {
                PageError::Navigation {
                    url: url.to_string(),
                    message,
                }
            }
        })?;

        // wait_for_navigation ensures the page lifecycle completed before the
        // caller reads state from it
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| PageError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        debug!("Navigated to {}", url);
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> PageResult<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| Self::classify("evaluate", e.to_string()))?;

        result
            .into_value::<Value>()
            .map_err(|e| PageError::Evaluation(format!("result decode: {e}")))
    }

    async fn click(&self, selector: &str, timeout: Duration) -> PageResult<()> {
        let element = self.wait_for_element(selector, timeout).await?;

        // Scroll into view first, then click the resolved point directly.
        // Going through clickable_point() bypasses the IntersectionObserver
        // hang chromiumoxide's Element::click is prone to on busy pages.
        element
            .scroll_into_view()
            .await
            .map_err(|e| PageError::Interaction {
                selector: selector.to_string(),
                message: format!("scroll into view: {e}"),
            })?;

        let point = element
            .clickable_point()
            .await
            .map_err(|e| PageError::Interaction {
                selector: selector.to_string(),
                message: format!("element may not be visible: {e}"),
            })?;

        self.page
            .click(point)
            .await
            .map_err(|e| Self::classify("click", e.to_string()))?;

        debug!("Clicked {}", selector);
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> PageResult<()> {
        let element = self
            .wait_for_element(selector, Duration::from_secs(5))
            .await?;

        element
            .scroll_into_view()
            .await
            .map_err(|e| PageError::Interaction {
                selector: selector.to_string(),
                message: format!("scroll into view: {e}"),
            })?;

        // Click to focus before typing so key events land in the field
        let point = element
            .clickable_point()
            .await
            .map_err(|e| PageError::Interaction {
                selector: selector.to_string(),
                message: format!("element not focusable: {e}"),
            })?;
        self.page
            .click(point)
            .await
            .map_err(|e| Self::classify("focus click", e.to_string()))?;

        // Clear existing text. Plain value assignment does not fire input
        // events, so frameworks still see the typed replacement below.
        element
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .map_err(|e| PageError::Interaction {
                selector: selector.to_string(),
                message: format!("clear failed (read-only field?): {e}"),
            })?;

        element
            .type_str(value)
            .await
            .map_err(|e| Self::classify("type", e.to_string()))?;

        debug!("Filled {} ({} chars)", selector, value.len());
        Ok(())
    }

    async fn wait(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    async fn screenshot(&self, path: &Path) -> PageResult<()> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();

        let bytes = self
            .page
            .screenshot(params)
            .await
            .map_err(|e| PageError::Screenshot(e.to_string()))?;

        if let Err(e) = tokio::fs::write(path, bytes).await {
            warn!("Failed to write screenshot to {}: {}", path.display(), e);
            return Err(PageError::Screenshot(e.to_string()));
        }

        debug!("Screenshot saved to {}", path.display());
        Ok(())
    }
}
