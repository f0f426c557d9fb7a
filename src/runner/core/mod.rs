mod config;
mod context;
mod oracle;
mod progress;
mod retry;
mod runner;

pub use config::RuntimeConfig;
pub use context::ContextBuilder;
pub use oracle::{HttpOracle, OracleClient, OracleError, OracleTransport};
pub use progress::{Fingerprint, ProgressDecision, ProgressState, ProgressTracker};
pub use retry::{RetryManager, RetryStats};
pub use runner::Runner;
