//! Page automation surface - the capability boundary between the runner and
//! a live browser page.
//!
//! Everything the orchestrator and the tools do to a page goes through
//! [`PageSurface`]. Any binding that implements this minimal capability set
//! is acceptable; the production binding over chromiumoxide lives in
//! [`cdp`], and the test suite substitutes an in-memory double.

mod cdp;

pub use cdp::CdpPage;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by a page binding.
///
/// Only [`PageError::Fatal`] is allowed to propagate out of the runner loop;
/// every other variant is handled locally (retried, recorded, or degraded).
#[derive(Error, Debug)]
pub enum PageError {
    #[error("navigation failed for {url}: {message}")]
    Navigation { url: String, message: String },

    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("interaction failed for {selector}: {message}")]
    Interaction { selector: String, message: String },

    #[error("operation timed out after {0}ms")]
    Timeout(u128),

    #[error("screenshot failed: {0}")]
    Screenshot(String),

    #[error("page surface lost: {0}")]
    Fatal(String),
}

impl PageError {
    /// True when the underlying browser/page is gone and the run cannot
    /// continue on this surface.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PageError::Fatal(_))
    }
}

/// Result type for page surface operations
pub type PageResult<T> = Result<T, PageError>;

/// Narrow capability interface over a live browser page.
///
/// Implementations must be safe to share across await points; the runner
/// holds one surface per run and never shares it between runs.
#[async_trait]
pub trait PageSurface: Send + Sync {
    /// Navigate to a URL and wait for the load to settle.
    async fn navigate(&self, url: &str) -> PageResult<()>;

    /// Evaluate a JavaScript expression and return its JSON value.
    async fn evaluate(&self, script: &str) -> PageResult<Value>;

    /// Click the first element matching a CSS selector.
    async fn click(&self, selector: &str, timeout: Duration) -> PageResult<()>;

    /// Fill an input element with a value, clearing any existing text.
    async fn fill(&self, selector: &str, value: &str) -> PageResult<()>;

    /// Cooperatively sleep for the given number of milliseconds.
    async fn wait(&self, ms: u64);

    /// Capture a screenshot of the current viewport to `path`.
    async fn screenshot(&self, path: &Path) -> PageResult<()>;
}
