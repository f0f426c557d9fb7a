//! Stall detection via structural snapshot fingerprints.
//!
//! A fingerprint is a cheap structural signature, not a content hash: two
//! snapshots with the same url, title, interactive-element count, and
//! DOM-preview length are considered "no observable progress".

use serde::{Deserialize, Serialize};

use super::RuntimeConfig;
use crate::snapshot::StateSnapshot;

/// Structural signature of one snapshot. Compared with derived equality so
/// formatting changes can never collide two distinct states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub url: String,
    pub title: String,
    pub interactive_count: usize,
    pub dom_preview_len: usize,
}

impl Fingerprint {
    pub fn of(snapshot: &StateSnapshot) -> Self {
        Self {
            url: snapshot.url.clone(),
            title: snapshot.title.clone(),
            interactive_count: snapshot.interactive.len(),
            dom_preview_len: snapshot.dom_preview.as_deref().map_or(0, str::len),
        }
    }
}

/// Mutable per-run progress state, owned exclusively by one runner.
#[derive(Debug, Default)]
pub struct ProgressState {
    pub last_fingerprint: Option<Fingerprint>,
    pub no_progress_count: u32,
}

/// Outcome of one progress tick.
#[derive(Debug, Default)]
pub struct ProgressDecision {
    pub should_break: bool,
    pub hints: Vec<String>,
}

pub struct ProgressTracker;

impl ProgressTracker {
    /// Update progress state from a fresh snapshot and escalate context
    /// detail when the run stalls.
    ///
    /// - unchanged fingerprint: increment the stall counter; after more than
    ///   one stall, raise the depth level (capped at 3) and widen the DOM
    ///   budget to `min(base * depth, cap)`
    /// - changed fingerprint: counter back to 0, depth back to 1, budget
    ///   back to base
    /// - counter at the stall limit: force depth 3 once for a last look at
    ///   maximum detail, then break with remediation hints
    pub fn tick(
        snapshot: &StateSnapshot,
        state: &mut ProgressState,
        config: &mut RuntimeConfig,
    ) -> ProgressDecision {
        let fingerprint = Fingerprint::of(snapshot);
        let mut decision = ProgressDecision::default();

        match state.last_fingerprint.as_ref() {
            Some(last) if *last == fingerprint => {
                state.no_progress_count += 1;
                tracing::debug!(
                    no_progress = state.no_progress_count,
                    depth = config.depth_level,
                    "Snapshot fingerprint unchanged"
                );

                if state.no_progress_count >= config.stall_limit {
                    if config.depth_level < 3 {
                        // One more chance at maximum detail before giving up
                        config.depth_level = 3;
                        state.no_progress_count = config.stall_limit.saturating_sub(1);
                        Self::widen_budget(config);
                        tracing::info!("Stall limit hit, escalating to maximum context depth");
                    } else {
                        decision.should_break = true;
                        decision.hints.push(format!(
                            "No observable page progress for {} consecutive steps; consider raising stall_limit (currently {})",
                            state.no_progress_count, config.stall_limit
                        ));
                        decision.hints.push(format!(
                            "Context budget was escalated to {} chars without effect; widen max_context_chars (currently {})",
                            config.context_chars, config.max_context_chars
                        ));
                        decision.hints.push(
                            "The page may require stealth measures or manual verification"
                                .to_string(),
                        );
                    }
                } else if state.no_progress_count > 1 && config.depth_level < 3 {
                    config.depth_level += 1;
                    Self::widen_budget(config);
                    tracing::debug!(depth = config.depth_level, "Escalated context depth");
                }
            }
            _ => {
                state.no_progress_count = 0;
                config.depth_level = 1;
                config.context_chars = config.base_context_chars;
            }
        }

        state.last_fingerprint = Some(fingerprint);
        decision
    }

    fn widen_budget(config: &mut RuntimeConfig) {
        config.context_chars = config
            .base_context_chars
            .saturating_mul(config.depth_level as usize)
            .min(config.max_context_chars);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(url: &str, interactive: usize) -> StateSnapshot {
        StateSnapshot {
            url: url.to_string(),
            title: "t".to_string(),
            interactive: (0..interactive)
                .map(|i| crate::snapshot::InteractiveElement {
                    tag: "a".to_string(),
                    selector: Some(format!("#e{i}")),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn identical_fingerprints_strictly_increase_counter() {
        let mut state = ProgressState::default();
        let mut config = RuntimeConfig::default();
        let snap = snapshot("https://a", 2);

        ProgressTracker::tick(&snap, &mut state, &mut config);
        assert_eq!(state.no_progress_count, 0);

        for expected in 1..3 {
            ProgressTracker::tick(&snap, &mut state, &mut config);
            assert_eq!(state.no_progress_count, expected);
        }
    }

    #[test]
    fn changed_fingerprint_resets_counter_and_depth() {
        let mut state = ProgressState::default();
        let mut config = RuntimeConfig::default();
        let first = snapshot("https://a", 2);
        let second = snapshot("https://b", 2);

        ProgressTracker::tick(&first, &mut state, &mut config);
        ProgressTracker::tick(&first, &mut state, &mut config);
        ProgressTracker::tick(&first, &mut state, &mut config);
        assert!(config.depth_level > 1);

        ProgressTracker::tick(&second, &mut state, &mut config);
        assert_eq!(state.no_progress_count, 0);
        assert_eq!(config.depth_level, 1);
        assert_eq!(config.context_chars, config.base_context_chars);
    }

    #[test]
    fn stall_limit_forces_max_depth_then_breaks() {
        let mut state = ProgressState::default();
        let mut config = RuntimeConfig {
            stall_limit: 3,
            ..Default::default()
        };
        let snap = snapshot("https://a", 2);

        // Baseline + 3 stalls reaches the limit with depth still below 3:
        // the tracker grants one more chance at maximum detail.
        ProgressTracker::tick(&snap, &mut state, &mut config);
        ProgressTracker::tick(&snap, &mut state, &mut config);
        ProgressTracker::tick(&snap, &mut state, &mut config);
        let third = ProgressTracker::tick(&snap, &mut state, &mut config);
        assert!(!third.should_break);
        assert_eq!(config.depth_level, 3);
        assert_eq!(state.no_progress_count, 2);

        // Next identical snapshot exhausts the escalation sequence.
        let last = ProgressTracker::tick(&snap, &mut state, &mut config);
        assert!(last.should_break);
        assert!(!last.hints.is_empty());
    }

    #[test]
    fn budget_widens_with_depth_but_respects_cap() {
        let mut state = ProgressState::default();
        let mut config = RuntimeConfig {
            base_context_chars: 10_000,
            context_chars: 10_000,
            max_context_chars: 25_000,
            stall_limit: 10,
            ..Default::default()
        };
        let snap = snapshot("https://a", 0);

        for _ in 0..5 {
            ProgressTracker::tick(&snap, &mut state, &mut config);
        }
        assert_eq!(config.depth_level, 3);
        assert_eq!(config.context_chars, 25_000);
    }

    #[test]
    fn fingerprint_uses_structural_equality() {
        let a = snapshot("https://a", 3);
        let mut b = snapshot("https://a", 3);
        b.interactive[0].selector = Some("#other".to_string());
        // Same structure counts, different content: still "no progress"
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }
}
