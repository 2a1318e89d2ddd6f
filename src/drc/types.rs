//! DRC data types
//!
//! Violation records produced by the clearance engine, read-only once
//! created.

use serde::Serialize;

use crate::geometry::layers::LayerId;
use crate::rules::diagnostics::Severity;
use crate::rules::model::ConstraintKind;

/// One reported instance of a constraint not being satisfied
#[derive(Clone, Debug, Serialize)]
pub struct Violation {
    pub kind: ConstraintKind,
    pub severity: Severity,
    pub message: String,
    /// Witness point of the closest approach
    pub position: [f32; 2],
    pub item_a: u64,
    pub item_b: Option<u64>,
    pub layer: Option<LayerId>,
    /// Name of the rule that supplied the constraint
    pub rule: String,
    /// Measured separation (mm); negative when overlapping
    pub actual_mm: f32,
    /// Configured clearance (mm)
    pub required_mm: f32,
}

impl Violation {
    /// Standard message format: `(clearance 0.2000 mm; actual 0.0500 mm)`
    pub fn format_message(kind: ConstraintKind, required: f32, actual: f32) -> String {
        format!(
            "({} {:.4} mm; actual {:.4} mm)",
            kind.keyword(),
            required,
            actual
        )
    }
}

/// Result summary of one checking pass
#[derive(Clone, Debug, Default, Serialize)]
pub struct CheckOutcome {
    /// The pass was aborted by the progress callback
    pub cancelled: bool,
    pub items_gathered: usize,
    pub pairs_tested: usize,
    pub violations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_format() {
        let msg = Violation::format_message(ConstraintKind::Clearance, 0.2, 0.05);
        assert_eq!(msg, "(clearance 0.2000 mm; actual 0.0500 mm)");
    }
}
