//! Test outcomes and results.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity-ranked status of a test or test step.
///
/// The ordering is significant: `Passed < Skipped < Inconclusive < Failed`.
/// Combining outcomes always keeps the most severe status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Skipped,
    Inconclusive,
    Failed,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Skipped => "skipped",
            TestStatus::Inconclusive => "inconclusive",
            TestStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a test: a status plus an optional refining category
/// (e.g. `failed/timeout`, `skipped/ignored`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TestOutcome {
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl TestOutcome {
    pub fn new(status: TestStatus) -> Self {
        Self {
            status,
            category: None,
        }
    }

    pub fn with_category(status: TestStatus, category: impl Into<String>) -> Self {
        Self {
            status,
            category: Some(category.into()),
        }
    }

    pub fn passed() -> Self {
        Self::new(TestStatus::Passed)
    }

    pub fn failed() -> Self {
        Self::new(TestStatus::Failed)
    }

    pub fn error() -> Self {
        Self::with_category(TestStatus::Failed, "error")
    }

    pub fn timeout() -> Self {
        Self::with_category(TestStatus::Failed, "timeout")
    }

    pub fn inconclusive() -> Self {
        Self::new(TestStatus::Inconclusive)
    }

    pub fn canceled() -> Self {
        Self::with_category(TestStatus::Inconclusive, "canceled")
    }

    pub fn skipped() -> Self {
        Self::new(TestStatus::Skipped)
    }

    pub fn ignored() -> Self {
        Self::with_category(TestStatus::Skipped, "ignored")
    }

    pub fn pending() -> Self {
        Self::with_category(TestStatus::Skipped, "pending")
    }

    /// Combine two outcomes, keeping the more severe one.
    ///
    /// Returns `other` if its status is strictly worse, or if the statuses are
    /// equal and only `other` carries a category. Otherwise returns `self`, so
    /// the first failure encountered is preserved across repeated combines.
    pub fn combine_with(&self, other: &TestOutcome) -> TestOutcome {
        let other_wins = other.status > self.status
            || (other.status == self.status && self.category.is_none() && other.category.is_some());
        if other_wins {
            other.clone()
        } else {
            self.clone()
        }
    }

    /// Same status, category dropped.
    pub fn generalize(&self) -> TestOutcome {
        TestOutcome::new(self.status)
    }

    /// Category if present, otherwise the lowercase status.
    pub fn display_name(&self) -> &str {
        self.category.as_deref().unwrap_or_else(|| self.status.as_str())
    }
}

impl Default for TestOutcome {
    fn default() -> Self {
        Self::passed()
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Result of a finished test step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestResult {
    pub outcome: TestOutcome,

    /// Number of assertions evaluated by the step.
    pub assert_count: u32,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl TestResult {
    pub fn new(outcome: TestOutcome, assert_count: u32, duration_ms: u64) -> Self {
        Self {
            outcome,
            assert_count,
            duration_ms,
        }
    }

    /// Fold another result into this one: outcomes combine, assert counts add.
    pub fn absorb(&mut self, other: &TestResult) {
        self.outcome = self.outcome.combine_with(&other.outcome);
        self.assert_count = self.assert_count.saturating_add(other.assert_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ranking() {
        assert!(TestStatus::Failed > TestStatus::Inconclusive);
        assert!(TestStatus::Inconclusive > TestStatus::Skipped);
        assert!(TestStatus::Skipped > TestStatus::Passed);
    }

    #[test]
    fn test_combine_worst_wins() {
        let combined = [TestOutcome::passed(), TestOutcome::failed(), TestOutcome::passed()]
            .iter()
            .fold(TestOutcome::passed(), |acc, o| acc.combine_with(o));
        assert_eq!(combined, TestOutcome::failed());

        let combined = TestOutcome::passed().combine_with(&TestOutcome::passed());
        assert_eq!(combined, TestOutcome::passed());
    }

    #[test]
    fn test_combine_order_independent_status() {
        let a = TestOutcome::skipped().combine_with(&TestOutcome::passed());
        let b = TestOutcome::passed().combine_with(&TestOutcome::skipped());
        assert_eq!(a.status, TestStatus::Skipped);
        assert_eq!(a, b);
    }

    #[test]
    fn test_combine_keeps_first_failure() {
        let first = TestOutcome::timeout();
        let combined = first.combine_with(&TestOutcome::error());
        assert_eq!(combined, TestOutcome::timeout());
    }

    #[test]
    fn test_combine_prefers_category_on_tie() {
        let combined = TestOutcome::failed().combine_with(&TestOutcome::error());
        assert_eq!(combined.category.as_deref(), Some("error"));
    }

    #[test]
    fn test_combine_is_associative() {
        let outcomes = [
            TestOutcome::passed(),
            TestOutcome::ignored(),
            TestOutcome::canceled(),
            TestOutcome::failed(),
        ];
        for a in &outcomes {
            for b in &outcomes {
                for c in &outcomes {
                    let left = a.combine_with(b).combine_with(c);
                    let right = a.combine_with(&b.combine_with(c));
                    assert_eq!(left, right);
                }
            }
        }
    }

    #[test]
    fn test_generalize_and_display() {
        assert_eq!(TestOutcome::pending().generalize(), TestOutcome::skipped());
        assert_eq!(TestOutcome::pending().to_string(), "pending");
        assert_eq!(TestOutcome::inconclusive().to_string(), "inconclusive");
    }

    #[test]
    fn test_result_absorb() {
        let mut total = TestResult::default();
        total.absorb(&TestResult::new(TestOutcome::passed(), 3, 10));
        total.absorb(&TestResult::new(TestOutcome::inconclusive(), 4, 10));
        assert_eq!(total.assert_count, 7);
        assert_eq!(total.outcome, TestOutcome::inconclusive());
    }
}
