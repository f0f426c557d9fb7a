//! Per-tool retry bounds keyed on exact error strings.
//!
//! One instance per run; never shared across runs. A tool may fail with the
//! same error string `max_same_error` times; once that error recurs past the
//! bound, the tool is permanently skipped for that error and an alternative
//! is suggested where one exists.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

/// Aggregate view of one tool's failure history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryStats {
    pub attempts: usize,
    pub distinct_errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub struct RetryManager {
    max_same_error: usize,
    errors: HashMap<String, Vec<String>>,
}

/// Fixed alternative per tool; absent an entry, no alternative is suggested.
const ALTERNATIVES: &[(&str, &str)] = &[
    ("form.fill", "llm_guided_field_fill"),
    ("click", "navigate"),
    ("extract.links", "dom.snapshot"),
    ("navigate", "wait"),
];

impl RetryManager {
    pub fn new(max_same_error: usize) -> Self {
        Self {
            max_same_error,
            errors: HashMap::new(),
        }
    }

    /// Whether `tool` should be retried after failing with `error`.
    ///
    /// Returns true while the identical error has been seen fewer than
    /// `max_same_error` times, recording the error as a side effect of a
    /// true answer. Once the bound is reached the answer is permanently
    /// false for that `(tool, error)` pair; other error strings for the
    /// same tool keep their own counts.
    pub fn should_retry(&mut self, tool: &str, error: &str) -> bool {
        let seen = self.errors.entry(tool.to_string()).or_default();
        let same = seen.iter().filter(|e| e.as_str() == error).count();
        if same < self.max_same_error {
            seen.push(error.to_string());
            true
        } else {
            debug!(
                tool,
                error, "Identical error recurred {} times, giving up", same
            );
            false
        }
    }

    /// Suggested replacement tool, if the lookup table has one.
    pub fn alternative(&self, tool: &str) -> Option<&'static str> {
        ALTERNATIVES
            .iter()
            .find(|(name, _)| *name == tool)
            .map(|(_, alt)| *alt)
    }

    pub fn summary(&self, tool: &str) -> RetryStats {
        match self.errors.get(tool) {
            Some(seen) => {
                let mut distinct: Vec<&str> = seen.iter().map(String::as_str).collect();
                distinct.sort_unstable();
                distinct.dedup();
                RetryStats {
                    attempts: seen.len(),
                    distinct_errors: distinct.len(),
                    last_error: seen.last().cloned(),
                }
            }
            None => RetryStats::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_error_allowed_exactly_max_times() {
        let mut retry = RetryManager::new(2);
        assert!(retry.should_retry("form.fill", "selector not found"));
        assert!(retry.should_retry("form.fill", "selector not found"));
        assert!(!retry.should_retry("form.fill", "selector not found"));
        // Permanently false from here on
        assert!(!retry.should_retry("form.fill", "selector not found"));
    }

    #[test]
    fn different_error_strings_count_independently() {
        let mut retry = RetryManager::new(2);
        assert!(retry.should_retry("form.fill", "selector not found"));
        assert!(retry.should_retry("form.fill", "selector not found"));
        assert!(!retry.should_retry("form.fill", "selector not found"));
        // A fresh error string for the same tool is unaffected
        assert!(retry.should_retry("form.fill", "timeout"));
        assert!(retry.should_retry("form.fill", "timeout"));
        assert!(!retry.should_retry("form.fill", "timeout"));
    }

    #[test]
    fn tools_do_not_share_counts() {
        let mut retry = RetryManager::new(1);
        assert!(retry.should_retry("extract.links", "boom"));
        assert!(!retry.should_retry("extract.links", "boom"));
        assert!(retry.should_retry("extract.emails", "boom"));
    }

    #[test]
    fn alternative_table_lookup() {
        let retry = RetryManager::new(2);
        assert_eq!(retry.alternative("form.fill"), Some("llm_guided_field_fill"));
        assert_eq!(retry.alternative("click"), Some("navigate"));
        assert_eq!(retry.alternative("products.extract"), None);
    }

    #[test]
    fn summary_reports_attempts_and_distinct_errors() {
        let mut retry = RetryManager::new(3);
        retry.should_retry("form.fill", "a");
        retry.should_retry("form.fill", "a");
        retry.should_retry("form.fill", "b");
        let stats = retry.summary("form.fill");
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.distinct_errors, 2);
        assert_eq!(stats.last_error.as_deref(), Some("b"));

        let empty = retry.summary("never.seen");
        assert_eq!(empty.attempts, 0);
    }
}
