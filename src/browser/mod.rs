//! Browser lifecycle: executable discovery, launch, and wrapper ownership.
//!
//! Handles launching chromiumoxide browser instances with a conservative
//! flag set and an isolated temp profile per instance.

mod wrapper;

pub use wrapper::{BrowserWrapper, create_blank_page, get_current_page, launch_browser};

use thiserror::Error;

/// Errors from browser lifecycle management.
#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("no Chrome/Chromium executable found")]
    ExecutableNotFound,

    #[error("launch failed: {0}")]
    Launch(String),

    #[error("no page loaded; navigate first")]
    NoPage,
}

/// Result type for browser operations
pub type BrowserResult<T> = Result<T, BrowserError>;
