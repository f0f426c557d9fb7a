//! Shared browser manager with health checking and crash recovery.
//!
//! One browser process serves all concurrent runs; each run opens its own
//! page. Browser operations are async throughout, so the shared slot lives
//! behind a `tokio::sync::Mutex` - a sync lock must not be held across the
//! await points below.

use std::sync::{Arc, OnceLock};

use anyhow::Result;
use chromiumoxide::page::Page;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::BrowserConfig;
use crate::browser::{BrowserWrapper, create_blank_page, launch_browser};

static GLOBAL_MANAGER: OnceLock<Arc<BrowserManager>> = OnceLock::new();

/// Lazily launched, health-checked browser shared across runs.
pub struct BrowserManager {
    browser: Arc<Mutex<Option<BrowserWrapper>>>,
    config: Mutex<BrowserConfig>,
}

impl BrowserManager {
    /// Process-wide singleton instance.
    pub fn global() -> Arc<BrowserManager> {
        GLOBAL_MANAGER
            .get_or_init(|| Arc::new(BrowserManager::new()))
            .clone()
    }

    fn new() -> Self {
        Self {
            browser: Arc::new(Mutex::new(None)),
            config: Mutex::new(BrowserConfig::default()),
        }
    }

    /// Set launch options used the next time a browser starts.
    pub async fn set_config(&self, config: BrowserConfig) {
        *self.config.lock().await = config;
    }

    /// Open a fresh page, launching or recovering the browser as needed.
    ///
    /// Every call performs a health check via the `version()` CDP command;
    /// a crashed browser is cleaned up and relaunched transparently.
    pub async fn new_page(&self) -> Result<Page> {
        let mut guard = self.browser.lock().await;

        if let Some(wrapper) = guard.as_ref() {
            match wrapper.browser().version().await {
                Ok(_) => debug!("Browser health check passed"),
                Err(e) => {
                    warn!("Browser health check failed: {}. Recovering...", e);
                    if let Some(mut crashed) = guard.take() {
                        let _ = crashed.browser_mut().close().await;
                        let _ = crashed.browser_mut().wait().await;
                        crashed.cleanup_temp_dir();
                    }
                }
            }
        }

        if guard.is_none() {
            info!("Launching browser (first use or after recovery)");
            let config = self.config.lock().await.clone();
            let (browser, handler, user_data_dir) = launch_browser(&config).await?;
            *guard = Some(BrowserWrapper::new(browser, handler, user_data_dir));
        }

        let wrapper = guard
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("browser unavailable after launch"))?;
        let page = create_blank_page(wrapper).await?;
        Ok(page)
    }

    /// Shut the browser down if running. Safe to call repeatedly.
    ///
    /// Both `close()` and `wait()` are required: close() asks Chrome to
    /// exit, wait() reaps the process. Skipping wait() leaves a zombie and
    /// a locked profile directory.
    pub async fn shutdown(&self) -> Result<()> {
        let mut guard = self.browser.lock().await;

        if let Some(mut wrapper) = guard.take() {
            info!("Shutting down browser");
            if let Err(e) = wrapper.browser_mut().close().await {
                warn!("Failed to close browser cleanly: {}", e);
            }
            if let Err(e) = wrapper.browser_mut().wait().await {
                warn!("Failed to wait for browser exit: {}", e);
            }
            wrapper.cleanup_temp_dir();
            drop(wrapper);
        }

        Ok(())
    }

    pub async fn is_browser_running(&self) -> bool {
        self.browser.lock().await.is_some()
    }
}
