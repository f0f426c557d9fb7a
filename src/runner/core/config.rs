//! Per-run budget and policy knobs.
//!
//! Created once per run from defaults plus caller overrides, then threaded
//! explicitly through every component call. Read-only during the loop except
//! for the two fields the progress tracker escalates
//! ([`RuntimeConfig::context_chars`] and [`RuntimeConfig::depth_level`]).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Initial DOM-preview character budget.
    #[serde(default = "default_base_context_chars")]
    pub base_context_chars: usize,

    /// Hard cap on the DOM-preview character budget.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    /// Budget growth per step.
    #[serde(default = "default_growth_per_step")]
    pub growth_per_step: usize,

    /// Current budget; starts at `base_context_chars` and is raised by the
    /// progress tracker when the run stalls.
    #[serde(default = "default_base_context_chars")]
    pub context_chars: usize,

    /// Current escalation tier, 1 through 3.
    #[serde(default = "default_depth_level")]
    pub depth_level: u32,

    /// Consecutive no-progress steps tolerated before the loop breaks.
    #[serde(default = "default_stall_limit")]
    pub stall_limit: u32,

    /// Maximum loop steps; the unconditional termination guarantee.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Timeout for element interaction (click, fill).
    #[serde(default = "default_click_timeout_ms")]
    pub click_timeout_ms: u64,

    /// Timeout for navigation.
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,

    /// Timeout for one tool call.
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,

    /// Timeout for one oracle exchange; a timed-out call degrades to a Wait
    /// action rather than aborting the run.
    #[serde(default = "default_oracle_timeout_ms")]
    pub oracle_timeout_ms: u64,

    /// How many times a tool may fail with the identical error before it is
    /// permanently skipped.
    #[serde(default = "default_max_same_error")]
    pub max_same_error: usize,

    /// Pause applied by the Wait action, milliseconds.
    #[serde(default = "default_wait_ms")]
    pub wait_ms: u64,

    /// When true, one oracle call before the loop may rewrite the
    /// instruction for clarity. The loop itself never mutates it.
    #[serde(default)]
    pub refine_instruction: bool,
}

fn default_base_context_chars() -> usize {
    4_000
}
fn default_max_context_chars() -> usize {
    24_000
}
fn default_growth_per_step() -> usize {
    1_500
}
fn default_depth_level() -> u32 {
    1
}
fn default_stall_limit() -> u32 {
    3
}
fn default_max_steps() -> usize {
    20
}
fn default_click_timeout_ms() -> u64 {
    5_000
}
fn default_navigation_timeout_ms() -> u64 {
    30_000
}
fn default_tool_timeout_ms() -> u64 {
    30_000
}
fn default_oracle_timeout_ms() -> u64 {
    60_000
}
fn default_max_same_error() -> usize {
    2
}
fn default_wait_ms() -> u64 {
    1_000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_context_chars: default_base_context_chars(),
            max_context_chars: default_max_context_chars(),
            growth_per_step: default_growth_per_step(),
            context_chars: default_base_context_chars(),
            depth_level: default_depth_level(),
            stall_limit: default_stall_limit(),
            max_steps: default_max_steps(),
            click_timeout_ms: default_click_timeout_ms(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            tool_timeout_ms: default_tool_timeout_ms(),
            oracle_timeout_ms: default_oracle_timeout_ms(),
            max_same_error: default_max_same_error(),
            wait_ms: default_wait_ms(),
            refine_instruction: false,
        }
    }
}

impl RuntimeConfig {
    /// Active DOM-preview budget for a given step:
    /// `min(current + step * growth, cap)`.
    ///
    /// Monotonically non-decreasing in `step` and never exceeds the cap.
    pub fn budget_for_step(&self, step: usize) -> usize {
        self.context_chars
            .saturating_add(step.saturating_mul(self.growth_per_step))
            .min(self.max_context_chars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_monotonic_and_capped() {
        let config = RuntimeConfig {
            base_context_chars: 1_000,
            context_chars: 1_000,
            growth_per_step: 300,
            max_context_chars: 2_500,
            ..Default::default()
        };
        let mut prev = 0;
        for step in 0..50 {
            let budget = config.budget_for_step(step);
            assert!(budget >= prev, "budget must not shrink with step");
            assert!(budget <= config.max_context_chars);
            prev = budget;
        }
        assert_eq!(config.budget_for_step(49), 2_500);
    }

    #[test]
    fn budget_handles_degenerate_growth() {
        let config = RuntimeConfig {
            base_context_chars: 500,
            context_chars: 500,
            growth_per_step: 0,
            max_context_chars: 500,
            ..Default::default()
        };
        assert_eq!(config.budget_for_step(0), 500);
        assert_eq!(config.budget_for_step(100), 500);
    }
}
