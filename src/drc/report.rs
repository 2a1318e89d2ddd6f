//! Violation accumulation and progress reporting
//!
//! The reporter owns the violations found during one pass and enforces an
//! independent error-count cap per constraint kind: once a kind's cap is
//! reached, further tests of that kind are skipped while other kinds
//! continue.

use std::collections::HashMap;

use super::types::Violation;
use crate::rules::model::ConstraintKind;

/// Progress/cancellation callbacks; return `false` to abort the pass
pub trait ProgressReporter {
    fn report_phase(&mut self, label: &str) -> bool;
    fn report_progress(&mut self, done: usize, total: usize) -> bool;
}

/// Progress sink that never cancels
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn report_phase(&mut self, _label: &str) -> bool {
        true
    }

    fn report_progress(&mut self, _done: usize, _total: usize) -> bool {
        true
    }
}

/// Accumulates violations with per-kind caps
#[derive(Debug, Default)]
pub struct ViolationReporter {
    violations: Vec<Violation>,
    limits: HashMap<ConstraintKind, usize>,
    counts: HashMap<ConstraintKind, usize>,
}

impl ViolationReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of reported violations for one kind; unset kinds
    /// are unlimited
    pub fn set_limit(&mut self, kind: ConstraintKind, limit: usize) {
        self.limits.insert(kind, limit);
    }

    /// True once the kind's cap is reached; callers skip further tests of
    /// that kind
    pub fn kind_exhausted(&self, kind: ConstraintKind) -> bool {
        match self.limits.get(&kind) {
            Some(limit) => self.counts.get(&kind).copied().unwrap_or(0) >= *limit,
            None => false,
        }
    }

    /// Record a violation; returns false (dropping it) when the kind is
    /// already capped
    pub fn report(&mut self, violation: Violation) -> bool {
        if self.kind_exhausted(violation.kind) {
            return false;
        }
        *self.counts.entry(violation.kind).or_insert(0) += 1;
        self.violations.push(violation);
        true
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn into_violations(self) -> Vec<Violation> {
        self.violations
    }

    /// JSON export for report generators
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::diagnostics::Severity;

    fn violation(kind: ConstraintKind) -> Violation {
        Violation {
            kind,
            severity: Severity::Error,
            message: String::new(),
            position: [0.0, 0.0],
            item_a: 1,
            item_b: Some(2),
            layer: None,
            rule: "r".into(),
            actual_mm: 0.1,
            required_mm: 0.2,
        }
    }

    #[test]
    fn test_per_kind_caps_independent() {
        let mut reporter = ViolationReporter::new();
        reporter.set_limit(ConstraintKind::Clearance, 2);
        assert!(reporter.report(violation(ConstraintKind::Clearance)));
        assert!(reporter.report(violation(ConstraintKind::Clearance)));
        assert!(reporter.kind_exhausted(ConstraintKind::Clearance));
        assert!(!reporter.report(violation(ConstraintKind::Clearance)));
        // other kinds keep flowing
        assert!(!reporter.kind_exhausted(ConstraintKind::HoleClearance));
        assert!(reporter.report(violation(ConstraintKind::HoleClearance)));
        assert_eq!(reporter.len(), 3);
    }

    #[test]
    fn test_json_export() {
        let mut reporter = ViolationReporter::new();
        reporter.report(violation(ConstraintKind::Clearance));
        let json = reporter.to_json().unwrap();
        assert!(json.contains("\"Clearance\""));
        assert!(json.contains("\"required_mm\""));
    }
}
