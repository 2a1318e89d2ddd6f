//! Pairwise clearance checking
//!
//! Resolves the best-matching constraint for an (item, item, layer)
//! triple through the rule model, then runs the shape/shape collision
//! test and the directional hole tests. A constraint with severity
//! `ignore` or a non-positive clearance counts as not configured.

use super::types::Violation;
use crate::geometry::distance::shape_distance;
use crate::geometry::items::DesignItem;
use crate::geometry::layers::{LayerId, LayerTable};
use crate::geometry::shapes::Shape;
use crate::rules::diagnostics::Severity;
use crate::rules::model::{ConstraintKind, RuleDocument};

/// A clearance requirement resolved from the first matching rule
#[derive(Clone, Debug)]
pub struct MatchedClearance {
    pub required: f32,
    pub severity: Severity,
    pub rule: String,
}

/// Find the effective clearance of `kind` for the pair on `layer`.
///
/// First rule in document order wins. Returns None when no rule matches,
/// the matched severity is `ignore`, or the resolved value is <= 0.
pub fn match_clearance(
    doc: &RuleDocument,
    layers: &LayerTable,
    kind: ConstraintKind,
    a: &dyn DesignItem,
    b: Option<&dyn DesignItem>,
    layer: LayerId,
    default_severity: Severity,
) -> Option<MatchedClearance> {
    let (rule, constraint) = doc.matching_constraint(kind, a, b, layer, layers)?;
    let severity = rule.severity.unwrap_or(default_severity);
    if severity == Severity::Ignore {
        return None;
    }
    let required = constraint.value.min?;
    if required <= 0.0 {
        return None;
    }
    Some(MatchedClearance {
        required,
        severity,
        rule: rule.name.clone(),
    })
}

/// Items on the same net never clear against each other
pub fn should_check_pair(a: &dyn DesignItem, b: &dyn DesignItem) -> bool {
    match (a.net(), b.net()) {
        (Some(na), Some(nb)) if na == nb => false,
        _ => true,
    }
}

/// Shape/shape minimum-distance test; emits a violation at the witness
/// point when the separation is below the matched clearance
pub fn check_shape_clearance(
    kind: ConstraintKind,
    matched: &MatchedClearance,
    shape_a: &Shape,
    shape_b: &Shape,
    item_a: u64,
    item_b: u64,
    layer: LayerId,
) -> Option<Violation> {
    let (actual, witness) = shape_distance(shape_a, shape_b);
    if actual >= matched.required {
        return None;
    }
    Some(Violation {
        kind,
        severity: matched.severity,
        message: Violation::format_message(kind, matched.required, actual),
        position: witness,
        item_a,
        item_b: Some(item_b),
        layer: Some(layer),
        rule: matched.rule.clone(),
        actual_mm: actual,
        required_mm: matched.required,
    })
}

/// Directional hole test: `holder`'s drill against `other`'s outline on
/// the layer. The constraint is matched in the (holder, other) direction
/// since the effective clearance may differ by direction.
pub fn check_hole_clearance(
    doc: &RuleDocument,
    layers: &LayerTable,
    holder: &dyn DesignItem,
    other: &dyn DesignItem,
    other_shape: &Shape,
    layer: LayerId,
    default_severity: Severity,
) -> Option<Violation> {
    let hole = holder.hole_shape()?;
    let matched = match_clearance(
        doc,
        layers,
        ConstraintKind::HoleClearance,
        holder,
        Some(other),
        layer,
        default_severity,
    )?;
    check_shape_clearance(
        ConstraintKind::HoleClearance,
        &matched,
        &hole,
        other_shape,
        holder.id(),
        other.id(),
        layer,
    )
}
