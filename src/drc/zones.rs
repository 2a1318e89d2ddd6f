//! Zone-fill clearance testing
//!
//! A zone's computed fill is a list of islands (outline plus interior
//! holes). Three tests run per filled layer: island against island,
//! each island outline against its own holes, and the fill against
//! other copper items. Fill contours are bare chains (no stroke), so
//! the chain-to-chain distance is the surface distance directly.

use super::clearance::MatchedClearance;
use super::slivers::{check_outline_self_clearance, SliverHit};
use super::types::Violation;
use crate::geometry::distance::{segment_distance, shape_distance};
use crate::geometry::items::{DesignItem, ZoneFill};
use crate::geometry::layers::LayerId;
use crate::geometry::shapes::Shape;
use crate::rules::model::ConstraintKind;

/// Minimum distance between two closed point chains, with its witness
fn chain_min_distance(a: &[[f32; 2]], b: &[[f32; 2]]) -> Option<(f32, [f32; 2])> {
    if a.len() < 2 || b.len() < 2 {
        return None;
    }
    let mut best: Option<(f32, [f32; 2])> = None;
    for i in 0..a.len() {
        let a1 = a[i];
        let a2 = a[(i + 1) % a.len()];
        for j in 0..b.len() {
            let b1 = b[j];
            let b2 = b[(j + 1) % b.len()];
            let (d, witness) = segment_distance(a1, a2, b1, b2);
            if best.map_or(true, |(bd, _)| d < bd) {
                best = Some((d, witness));
            }
        }
    }
    best
}

fn fill_violation(
    matched: &MatchedClearance,
    zone_id: u64,
    layer: LayerId,
    actual: f32,
    position: [f32; 2],
) -> Violation {
    Violation {
        kind: ConstraintKind::Clearance,
        severity: matched.severity,
        message: Violation::format_message(ConstraintKind::Clearance, matched.required, actual),
        position,
        item_a: zone_id,
        item_b: None,
        layer: Some(layer),
        rule: matched.rule.clone(),
        actual_mm: actual,
        required_mm: matched.required,
    }
}

/// Islands of one fill against each other, and each island's outline
/// against its own holes
pub fn check_fill_islands(
    fill: &ZoneFill,
    matched: &MatchedClearance,
    zone_id: u64,
    layer: LayerId,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    for i in 0..fill.contours.len() {
        let island = &fill.contours[i];
        for other in fill.contours.iter().skip(i + 1) {
            if let Some((d, witness)) = chain_min_distance(&island.outline, &other.outline) {
                if d < matched.required {
                    violations.push(fill_violation(matched, zone_id, layer, d, witness));
                }
            }
        }
        for hole in &island.holes {
            if let Some((d, witness)) = chain_min_distance(&island.outline, hole) {
                if d < matched.required {
                    violations.push(fill_violation(matched, zone_id, layer, d, witness));
                }
            }
        }
    }
    violations
}

/// Narrow necks within one fill: the self-clearance primitive over each
/// island outline and hole chain
pub fn check_fill_slivers(fill: &ZoneFill, clearance: f32, angle_tolerance_deg: f32) -> Vec<SliverHit> {
    let mut hits = Vec::new();
    for island in &fill.contours {
        hits.extend(check_outline_self_clearance(
            &island.outline,
            true,
            0.0,
            clearance,
            angle_tolerance_deg,
        ));
        for hole in &island.holes {
            hits.extend(check_outline_self_clearance(
                hole,
                true,
                0.0,
                clearance,
                angle_tolerance_deg,
            ));
        }
    }
    hits
}

/// One fill against another item's effective copper on the layer.
///
/// An item that does not flash on the layer is represented only by its
/// drilled hole there; `other_shape` is that effective shape.
pub fn check_zone_against_item(
    zone: &dyn DesignItem,
    fill: &ZoneFill,
    other: &dyn DesignItem,
    other_shape: &Shape,
    matched: &MatchedClearance,
    layer: LayerId,
) -> Option<Violation> {
    let mut best: Option<(f32, [f32; 2])> = None;
    for island in &fill.contours {
        if island.outline.len() < 3 {
            continue;
        }
        let island_shape = Shape::filled_polygon(island.outline.clone());
        let (d, witness) = shape_distance(&island_shape, other_shape);
        if best.map_or(true, |(bd, _)| d < bd) {
            best = Some((d, witness));
        }
    }
    let (actual, position) = best?;
    if actual >= matched.required {
        return None;
    }
    Some(Violation {
        kind: ConstraintKind::Clearance,
        severity: matched.severity,
        message: Violation::format_message(ConstraintKind::Clearance, matched.required, actual),
        position,
        item_a: zone.id(),
        item_b: Some(other.id()),
        layer: Some(layer),
        rule: matched.rule.clone(),
        actual_mm: actual,
        required_mm: matched.required,
    })
}

/// One fill against another zone's fill, island by island on both sides
pub fn check_zone_against_zone(
    zone: &dyn DesignItem,
    fill: &ZoneFill,
    other: &dyn DesignItem,
    other_fill: &ZoneFill,
    matched: &MatchedClearance,
    layer: LayerId,
) -> Option<Violation> {
    let mut best: Option<(f32, [f32; 2])> = None;
    for island in &fill.contours {
        if island.outline.len() < 3 {
            continue;
        }
        let island_shape = Shape::filled_polygon(island.outline.clone());
        for other_island in &other_fill.contours {
            if other_island.outline.len() < 3 {
                continue;
            }
            let other_shape = Shape::filled_polygon(other_island.outline.clone());
            let (d, witness) = shape_distance(&island_shape, &other_shape);
            if best.map_or(true, |(bd, _)| d < bd) {
                best = Some((d, witness));
            }
        }
    }
    let (actual, position) = best?;
    if actual >= matched.required {
        return None;
    }
    Some(Violation {
        kind: ConstraintKind::Clearance,
        severity: matched.severity,
        message: Violation::format_message(ConstraintKind::Clearance, matched.required, actual),
        position,
        item_a: zone.id(),
        item_b: Some(other.id()),
        layer: Some(layer),
        rule: matched.rule.clone(),
        actual_mm: actual,
        required_mm: matched.required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::items::{BoardItem, ZoneContour};
    use crate::geometry::layers::LayerSet;
    use crate::rules::diagnostics::Severity;

    fn matched(required: f32) -> MatchedClearance {
        MatchedClearance {
            required,
            severity: Severity::Error,
            rule: "zones".into(),
        }
    }

    fn square(origin: [f32; 2], size: f32) -> Vec<[f32; 2]> {
        vec![
            origin,
            [origin[0] + size, origin[1]],
            [origin[0] + size, origin[1] + size],
            [origin[0], origin[1] + size],
        ]
    }

    #[test]
    fn test_island_pair_too_close() {
        // two 4x4 islands 0.3 apart under a 0.5 clearance
        let fill = ZoneFill {
            contours: vec![
                ZoneContour { outline: square([0.0, 0.0], 4.0), holes: vec![] },
                ZoneContour { outline: square([4.3, 0.0], 4.0), holes: vec![] },
            ],
        };
        let violations = check_fill_islands(&fill, &matched(0.5), 7, LayerId(0));
        assert_eq!(violations.len(), 1);
        assert!((violations[0].actual_mm - 0.3).abs() < 1e-5);
        assert_eq!(violations[0].item_a, 7);
        // spaced wider, nothing
        let fill = ZoneFill {
            contours: vec![
                ZoneContour { outline: square([0.0, 0.0], 4.0), holes: vec![] },
                ZoneContour { outline: square([5.0, 0.0], 4.0), holes: vec![] },
            ],
        };
        assert!(check_fill_islands(&fill, &matched(0.5), 7, LayerId(0)).is_empty());
    }

    #[test]
    fn test_hole_near_outline() {
        // hole wall 0.2 from the outline
        let fill = ZoneFill {
            contours: vec![ZoneContour {
                outline: square([0.0, 0.0], 10.0),
                holes: vec![square([0.2, 4.0], 2.0)],
            }],
        };
        let violations = check_fill_islands(&fill, &matched(0.5), 1, LayerId(0));
        assert_eq!(violations.len(), 1);
        assert!((violations[0].actual_mm - 0.2).abs() < 1e-5);
    }

    #[test]
    fn test_fill_neck_sliver() {
        // outline pinched to a 0.4 throat in the middle
        let outline = vec![
            [0.0, 0.0],
            [10.0, 0.0],
            [10.0, 4.0],
            [5.0, 0.2],
            [0.0, 4.0],
        ];
        let hits = check_fill_slivers(
            &ZoneFill {
                contours: vec![ZoneContour { outline, holes: vec![] }],
            },
            0.5,
            20.0,
        );
        assert!(!hits.is_empty());
    }

    #[test]
    fn test_zone_pair_island_distance() {
        // two islands far apart straddling a second zone's island; the
        // gap that matters is island to island, never envelope overlap
        let split = ZoneFill {
            contours: vec![
                ZoneContour { outline: square([0.0, 0.0], 4.0), holes: vec![] },
                ZoneContour { outline: square([10.0, 0.0], 4.0), holes: vec![] },
            ],
        };
        let layer = LayerSet::single(LayerId(0));
        let a = BoardItem::zone(1, layer, split.clone());

        // 1.9 away from both islands: clear at 0.5
        let middle = ZoneFill {
            contours: vec![ZoneContour {
                outline: vec![[5.9, 0.0], [8.1, 0.0], [8.1, 4.0], [5.9, 4.0]],
                holes: vec![],
            }],
        };
        let b = BoardItem::zone(2, layer, middle.clone());
        assert!(check_zone_against_zone(&a, &split, &b, &middle, &matched(0.5), LayerId(0))
            .is_none());

        // shifted to 0.2 from the left island
        let close = ZoneFill {
            contours: vec![ZoneContour {
                outline: vec![[4.2, 0.0], [6.4, 0.0], [6.4, 4.0], [4.2, 4.0]],
                holes: vec![],
            }],
        };
        let c = BoardItem::zone(3, layer, close.clone());
        let v = check_zone_against_zone(&a, &split, &c, &close, &matched(0.5), LayerId(0))
            .unwrap();
        assert!((v.actual_mm - 0.2).abs() < 1e-5);
        assert_eq!(v.item_b, Some(3));
    }

    #[test]
    fn test_zone_against_pad() {
        let fill = ZoneFill {
            contours: vec![ZoneContour { outline: square([0.0, 0.0], 10.0), holes: vec![] }],
        };
        let layer = LayerSet::single(LayerId(0));
        let zone = BoardItem::zone(1, layer, fill.clone());
        let pad = BoardItem::circle_pad(2, layer, [10.3, 5.0], 0.2);
        let v = check_zone_against_item(
            &zone,
            &fill,
            &pad,
            &Shape::circle([10.3, 5.0], 0.1),
            &matched(0.5),
            LayerId(0),
        )
        .unwrap();
        assert!((v.actual_mm - 0.2).abs() < 1e-5);
        assert_eq!(v.item_b, Some(2));
    }
}
