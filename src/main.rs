// pagepilot CLI: run one instruction against one page and print the result.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pagepilot::runner::{HttpOracle, OracleClient, Runner};
use pagepilot::tools::ToolRegistry;
use pagepilot::{BrowserManager, CdpPage};

/// Maximum accepted navigation timeout (5 minutes).
const MAX_NAVIGATION_TIMEOUT_MS: u64 = 300_000;
/// Maximum accepted interaction timeout (30 seconds).
const MAX_INTERACTION_TIMEOUT_MS: u64 = 30_000;

#[derive(Parser, Debug)]
#[command(name = "pagepilot", about = "Oracle-guided web page automation", version)]
struct Cli {
    /// Goal for the run, e.g. "extract all article titles"
    #[arg(long, short)]
    instruction: String,

    /// Start URL; omit to act on whatever page the browser already shows
    #[arg(long, short)]
    url: Option<String>,

    /// Decision oracle completion endpoint (overrides config.yaml)
    #[arg(long)]
    oracle_endpoint: Option<String>,

    /// Maximum loop steps
    #[arg(long)]
    max_steps: Option<usize>,

    /// Consecutive no-progress steps tolerated before stopping
    #[arg(long)]
    stall_limit: Option<u32>,

    /// Navigation timeout in milliseconds
    #[arg(long)]
    navigation_timeout_ms: Option<u64>,

    /// Click/fill timeout in milliseconds
    #[arg(long)]
    click_timeout_ms: Option<u64>,

    /// Rewrite the instruction once via the oracle before the loop starts
    #[arg(long)]
    refine: bool,

    /// Run the browser with a visible window
    #[arg(long)]
    headed: bool,

    /// Directory for the terminal screenshot
    #[arg(long)]
    screenshot_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = pagepilot::load_yaml_config()?;

    if let Some(endpoint) = cli.oracle_endpoint {
        config.oracle.endpoint = endpoint;
    }
    if let Some(max_steps) = cli.max_steps {
        config.runner.max_steps = max_steps;
    }
    if let Some(stall_limit) = cli.stall_limit {
        config.runner.stall_limit = stall_limit;
    }
    if let Some(timeout) = cli.navigation_timeout_ms {
        anyhow::ensure!(
            timeout <= MAX_NAVIGATION_TIMEOUT_MS,
            "navigation timeout cannot exceed {}ms, got {}ms",
            MAX_NAVIGATION_TIMEOUT_MS,
            timeout
        );
        config.runner.navigation_timeout_ms = timeout;
    }
    if let Some(timeout) = cli.click_timeout_ms {
        anyhow::ensure!(
            timeout <= MAX_INTERACTION_TIMEOUT_MS,
            "interaction timeout cannot exceed {}ms, got {}ms",
            MAX_INTERACTION_TIMEOUT_MS,
            timeout
        );
        config.runner.click_timeout_ms = timeout;
    }
    config.runner.refine_instruction |= cli.refine;
    config.browser.headless = !cli.headed && config.browser.headless;

    let manager = BrowserManager::global();
    manager.set_config(config.browser.clone()).await;

    let page = Arc::new(CdpPage::new(manager.new_page().await?));
    let oracle = OracleClient::new(Arc::new(HttpOracle::new(config.oracle.endpoint.clone())));
    let mut runner = Runner::new(page, oracle, ToolRegistry::standard(), config.runner);
    if let Some(dir) = cli.screenshot_dir {
        std::fs::create_dir_all(&dir)?;
        runner = runner.with_screenshot_dir(dir);
    }

    let result = runner.run(&cli.instruction, cli.url.as_deref()).await;

    manager.shutdown().await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
