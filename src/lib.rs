//! Oracle-guided web page automation.
//!
//! Drives autonomous, multi-step interaction with a page under the guidance
//! of an external decision oracle: build a bounded snapshot, ask the oracle
//! what to do, execute the action, and continue, escalate, or stop.

pub mod browser;
pub mod fallback;
mod manager;
pub mod page;
pub mod runner;
pub mod snapshot;
pub mod tools;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub use manager::BrowserManager;
pub use page::{CdpPage, PageError, PageSurface};
pub use runner::{
    Action, HttpOracle, OracleClient, OracleTransport, RunResult, Runner, RuntimeConfig,
};
pub use tools::{Tool, ToolRegistry};

/// Top-level configuration, loadable from `config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub oracle: OracleConfig,

    #[serde(default)]
    pub runner: RuntimeConfig,

    #[serde(default)]
    pub browser: BrowserConfig,
}

/// Decision oracle endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_oracle_endpoint")]
    pub endpoint: String,
}

/// Browser launch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Window dimensions
    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub width: u32,

    #[serde(default = "default_window_height")]
    pub height: u32,
}

fn default_oracle_endpoint() -> String {
    "http://127.0.0.1:8085/v1/complete".to_string()
}

fn default_headless() -> bool {
    true
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    720
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: default_oracle_endpoint(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            window: WindowConfig::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

/// Load config from `config.yaml` in the working directory, falling back to
/// defaults when the file is absent.
pub fn load_yaml_config() -> anyhow::Result<Config> {
    let config_path = PathBuf::from("config.yaml");

    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    } else {
        Ok(Config::default())
    }
}
