//! Browser wrapper and launcher.
//!
//! The wrapper owns the browser, its CDP event-handler task, and the temp
//! profile directory. The handler MUST be aborted when the browser goes
//! away, or it runs indefinitely against a dead websocket.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

use super::{BrowserError, BrowserResult};
use crate::BrowserConfig;

/// Wrapper for a browser, its event handler task, and its profile dir.
pub struct BrowserWrapper {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: Option<PathBuf>,
}

impl BrowserWrapper {
    pub(crate) fn new(browser: Browser, handler: JoinHandle<()>, user_data_dir: PathBuf) -> Self {
        Self {
            browser,
            handler,
            user_data_dir: Some(user_data_dir),
        }
    }

    pub(crate) fn browser(&self) -> &Browser {
        &self.browser
    }

    pub(crate) fn browser_mut(&mut self) -> &mut Browser {
        &mut self.browser
    }

    /// Remove the temp profile directory.
    ///
    /// Call only after `browser.wait()` completed; Chrome must have released
    /// its file handles first. Blocking on purpose - this also runs from
    /// Drop where async is unavailable.
    pub fn cleanup_temp_dir(&mut self) {
        if let Some(path) = self.user_data_dir.take() {
            info!("Cleaning up temp profile: {}", path.display());
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(
                    "Failed to remove temp profile {}: {}. Manual cleanup may be required.",
                    path.display(),
                    e
                );
            }
        }
    }
}

impl Drop for BrowserWrapper {
    fn drop(&mut self) {
        self.handler.abort();
        if self.user_data_dir.is_some() {
            warn!(
                "BrowserWrapper dropped without explicit shutdown; temp profile orphaned: {}",
                self.user_data_dir.as_ref().unwrap().display()
            );
        }
    }
}

/// Find a Chrome/Chromium executable.
///
/// `CHROMIUM_PATH` overrides everything; then common install locations per
/// platform; then `which` on Unix.
fn find_browser_executable() -> BrowserResult<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("Using browser from CHROMIUM_PATH: {}", path.display());
            return Ok(path);
        }
        warn!(
            "CHROMIUM_PATH points to non-existent file: {}",
            path.display()
        );
    }

    let paths: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    for candidate in paths {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!("Found browser at: {}", path.display());
            return Ok(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in &["chromium", "chromium-browser", "google-chrome", "chrome"] {
            if let Ok(output) = Command::new("which").arg(cmd).output()
                && output.status.success()
            {
                let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !found.is_empty() {
                    let path = PathBuf::from(found);
                    info!("Found browser via 'which': {}", path.display());
                    return Ok(path);
                }
            }
        }
    }

    Err(BrowserError::ExecutableNotFound)
}

/// Containerized environments need the sandbox off; setuid does not work
/// there.
fn should_disable_sandbox() -> bool {
    std::path::Path::new("/.dockerenv").exists()
        || std::env::var("container").is_ok()
        || std::env::var("KUBERNETES_SERVICE_HOST").is_ok()
}

/// Launch a browser with an isolated temp profile.
///
/// Returns `(Browser, JoinHandle, PathBuf)`; the path is the profile dir
/// that MUST be cleaned up after shutdown. The handle is the CDP event
/// pump, aborted by [`BrowserWrapper::drop`].
pub async fn launch_browser(
    config: &BrowserConfig,
) -> BrowserResult<(Browser, JoinHandle<()>, PathBuf)> {
    let chrome_path = find_browser_executable()?;

    let user_data_dir =
        std::env::temp_dir().join(format!("pagepilot_profile_{}", std::process::id()));
    std::fs::create_dir_all(&user_data_dir)
        .map_err(|e| BrowserError::Launch(format!("profile dir: {e}")))?;

    let mut builder = BrowserConfigBuilder::default()
        .request_timeout(Duration::from_secs(30))
        .window_size(config.window.width, config.window.height)
        .user_data_dir(&user_data_dir)
        .chrome_executable(chrome_path);

    if config.headless {
        builder = builder.headless_mode(HeadlessMode::default());
    } else {
        builder = builder.with_head();
    }

    builder = builder
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--disable-notifications")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-extensions")
        .arg("--disable-popup-blocking")
        .arg("--disable-background-networking")
        .arg("--disable-hang-monitor")
        .arg("--metrics-recording-only")
        .arg("--password-store=basic")
        .arg("--mute-audio");

    if should_disable_sandbox() {
        info!("Containerized environment detected, disabling sandbox");
        builder = builder.arg("--no-sandbox").arg("--disable-setuid-sandbox");
    }

    let browser_config = builder
        .build()
        .map_err(|e| BrowserError::Launch(format!("config: {e}")))?;

    info!("Launching browser");
    let (browser, mut handler) = Browser::launch(browser_config)
        .await
        .map_err(|e| BrowserError::Launch(e.to_string()))?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                let message = e.to_string();
                // Chrome sends CDP events chromiumoxide does not recognize;
                // those deserialization failures are noise, not faults.
                let benign = message
                    .contains("data did not match any variant of untagged enum Message")
                    || message.contains("Failed to deserialize WS response");
                if benign {
                    trace!("Suppressed benign CDP serialization error: {}", message);
                } else {
                    error!("Browser handler error: {:?}", e);
                }
            }
        }
        info!("Browser handler task completed");
    });

    Ok((browser, handler_task, user_data_dir))
}

/// Create a blank page ready for the first navigation.
pub async fn create_blank_page(wrapper: &BrowserWrapper) -> BrowserResult<Page> {
    wrapper
        .browser()
        .new_page("about:blank")
        .await
        .map_err(|e| BrowserError::Launch(format!("blank page: {e}")))
}

/// Get the current/active page from the browser.
pub async fn get_current_page(wrapper: &BrowserWrapper) -> BrowserResult<Page> {
    let pages = wrapper
        .browser()
        .pages()
        .await
        .map_err(|e| BrowserError::Launch(format!("pages: {e}")))?;

    pages.into_iter().next().ok_or(BrowserError::NoPage)
}
