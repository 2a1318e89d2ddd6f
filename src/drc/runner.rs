//! Clearance pass orchestration
//!
//! One pass over a flat item list: gather effective shapes (parallel),
//! build the per-layer spatial index, then run the pairwise, hole,
//! self-clearance and zone-fill phases sequentially so progress and
//! cancellation stay exact. Query radii are sized by the worst clearance
//! any rule can demand, so candidate filtering never loses a pair.

use std::collections::HashMap;
use std::time::Instant;

use log::debug;
use rayon::prelude::*;

use super::clearance::{
    check_hole_clearance, check_shape_clearance, match_clearance, should_check_pair,
};
use super::report::{ProgressReporter, ViolationReporter};
use super::slivers::check_outline_self_clearance;
use super::spatial::SpatialItemIndex;
use super::types::{CheckOutcome, Violation};
use super::zones::{
    check_fill_islands, check_fill_slivers, check_zone_against_item, check_zone_against_zone,
};
use crate::geometry::items::{DesignItem, ItemKind};
use crate::geometry::layers::{LayerId, LayerTable};
use crate::geometry::shapes::Shape;
use crate::rules::diagnostics::Severity;
use crate::rules::model::{ConstraintKind, RuleDocument};

/// Outer-loop iterations between progress callbacks
const PROGRESS_GRANULARITY: usize = 64;

/// Engine tuning knobs
#[derive(Clone, Debug)]
pub struct CheckerConfig {
    /// Severity applied when a matching rule does not set one
    pub default_severity: Severity,
    /// Corner-angle tolerance for the self-clearance tests (degrees)
    pub angle_tolerance_deg: f32,
    /// Cap on reported violations per constraint kind; None is unlimited
    pub per_kind_limit: Option<usize>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            default_severity: Severity::Error,
            angle_tolerance_deg: 20.0,
            per_kind_limit: Some(500),
        }
    }
}

/// Runs the clearance rules of one document against a board's items
pub struct ClearanceChecker<'a> {
    doc: &'a RuleDocument,
    layers: &'a LayerTable,
    config: CheckerConfig,
}

/// Copper an item presents on a layer: its flashed shape, or just its
/// drilled hole when it does not flash there
fn effective_shape(item: &dyn DesignItem, layer: LayerId) -> Option<Shape> {
    if item.flashes_on(layer) {
        item.shape_on(layer)
    } else {
        item.hole_shape()
    }
}

impl<'a> ClearanceChecker<'a> {
    pub fn new(doc: &'a RuleDocument, layers: &'a LayerTable, config: CheckerConfig) -> Self {
        Self { doc, layers, config }
    }

    /// Run the full pass. Violations land in `reporter`; the outcome
    /// summarizes the pass including whether it was cancelled.
    pub fn run(
        &self,
        items: &[&dyn DesignItem],
        progress: &mut dyn ProgressReporter,
        reporter: &mut ViolationReporter,
    ) -> CheckOutcome {
        let start = Instant::now();
        let mut outcome = CheckOutcome::default();

        if let Some(limit) = self.config.per_kind_limit {
            for kind in ConstraintKind::ALL {
                if kind.is_clearance_style() {
                    reporter.set_limit(*kind, limit);
                }
            }
        }

        if !progress.report_phase("gathering items") {
            outcome.cancelled = true;
            return outcome;
        }
        let worst = self.doc.worst_clearance();
        let shapes: HashMap<(usize, LayerId), Shape> = items
            .par_iter()
            .enumerate()
            .flat_map_iter(|(idx, item)| {
                item.layers()
                    .iter()
                    .filter_map(move |layer| {
                        effective_shape(*item, layer).map(|shape| ((idx, layer), shape))
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        debug!(
            "gathered {} shapes for {} items in {:?}",
            shapes.len(),
            items.len(),
            start.elapsed()
        );

        let mut index = SpatialItemIndex::new();
        for (idx, item) in items.iter().enumerate() {
            if idx % PROGRESS_GRANULARITY == 0
                && !progress.report_progress(idx, items.len())
            {
                outcome.cancelled = true;
                return outcome;
            }
            for layer in item.layers().iter() {
                if let Some(shape) = shapes.get(&(idx, layer)) {
                    let mut bounds = shape.bounding_box();
                    if let Some(hole) = item.hole_shape() {
                        bounds = bounds.merged(&hole.bounding_box());
                    }
                    index.insert(idx, layer, bounds, worst);
                }
            }
        }
        index.build();
        outcome.items_gathered = items.len();
        debug!("index built over {} layers", index.layer_count());

        if !self.run_pairwise(items, &shapes, &index, worst, progress, reporter, &mut outcome) {
            outcome.cancelled = true;
            outcome.violations = reporter.len();
            return outcome;
        }
        if !self.run_self_clearance(items, &shapes, progress, reporter) {
            outcome.cancelled = true;
            outcome.violations = reporter.len();
            return outcome;
        }
        if !self.run_zones(items, &shapes, &index, worst, progress, reporter) {
            outcome.cancelled = true;
            outcome.violations = reporter.len();
            return outcome;
        }

        outcome.violations = reporter.len();
        debug!(
            "clearance pass: {} pairs tested, {} violations in {:?}",
            outcome.pairs_tested,
            outcome.violations,
            start.elapsed()
        );
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn run_pairwise(
        &self,
        items: &[&dyn DesignItem],
        shapes: &HashMap<(usize, LayerId), Shape>,
        index: &SpatialItemIndex,
        worst: f32,
        progress: &mut dyn ProgressReporter,
        reporter: &mut ViolationReporter,
        outcome: &mut CheckOutcome,
    ) -> bool {
        if !progress.report_phase("checking item clearances") {
            return false;
        }
        for (a_idx, a) in items.iter().enumerate() {
            if a_idx % PROGRESS_GRANULARITY == 0
                && !progress.report_progress(a_idx, items.len())
            {
                return false;
            }
            if a.kind() == ItemKind::Zone {
                continue;
            }
            for layer in a.layers().iter() {
                let shape_a = match shapes.get(&(a_idx, layer)) {
                    Some(shape) => shape,
                    None => continue,
                };
                index.query_colliding(
                    layer,
                    &shape_a.bounding_box(),
                    worst,
                    |entry| entry.item > a_idx,
                    |entry| {
                        let b = items[entry.item];
                        if b.kind() == ItemKind::Zone {
                            return true;
                        }
                        let shape_b = match shapes.get(&(entry.item, layer)) {
                            Some(shape) => shape,
                            None => return true,
                        };
                        outcome.pairs_tested += 1;
                        self.test_pair(*a, b, shape_a, shape_b, layer, reporter);
                        true
                    },
                );
            }
        }
        true
    }

    fn test_pair(
        &self,
        a: &dyn DesignItem,
        b: &dyn DesignItem,
        shape_a: &Shape,
        shape_b: &Shape,
        layer: LayerId,
        reporter: &mut ViolationReporter,
    ) {
        if should_check_pair(a, b) && !reporter.kind_exhausted(ConstraintKind::Clearance) {
            if let Some(matched) = match_clearance(
                self.doc,
                self.layers,
                ConstraintKind::Clearance,
                a,
                Some(b),
                layer,
                self.config.default_severity,
            ) {
                if let Some(violation) = check_shape_clearance(
                    ConstraintKind::Clearance,
                    &matched,
                    shape_a,
                    shape_b,
                    a.id(),
                    b.id(),
                    layer,
                ) {
                    reporter.report(violation);
                }
            }
        }
        // drills clear copper regardless of net, in both directions
        if !reporter.kind_exhausted(ConstraintKind::HoleClearance) {
            if let Some(violation) = check_hole_clearance(
                self.doc,
                self.layers,
                a,
                b,
                shape_b,
                layer,
                self.config.default_severity,
            ) {
                reporter.report(violation);
            }
            if let Some(violation) = check_hole_clearance(
                self.doc,
                self.layers,
                b,
                a,
                shape_a,
                layer,
                self.config.default_severity,
            ) {
                reporter.report(violation);
            }
        }
    }

    fn run_self_clearance(
        &self,
        items: &[&dyn DesignItem],
        shapes: &HashMap<(usize, LayerId), Shape>,
        progress: &mut dyn ProgressReporter,
        reporter: &mut ViolationReporter,
    ) -> bool {
        if !progress.report_phase("checking self clearances") {
            return false;
        }
        for (idx, item) in items.iter().enumerate() {
            if idx % PROGRESS_GRANULARITY == 0
                && !progress.report_progress(idx, items.len())
            {
                return false;
            }
            if item.kind() == ItemKind::Zone {
                continue;
            }
            for layer in item.layers().iter() {
                if reporter.kind_exhausted(ConstraintKind::Clearance) {
                    return true;
                }
                let (points, width) = match shapes.get(&(idx, layer)) {
                    Some(Shape::Polygon { points, width, .. }) => (points, *width),
                    _ => continue,
                };
                let matched = match match_clearance(
                    self.doc,
                    self.layers,
                    ConstraintKind::Clearance,
                    *item,
                    None,
                    layer,
                    self.config.default_severity,
                ) {
                    Some(matched) => matched,
                    None => continue,
                };
                for hit in check_outline_self_clearance(
                    points,
                    true,
                    width,
                    matched.required,
                    self.config.angle_tolerance_deg,
                ) {
                    reporter.report(Violation {
                        kind: ConstraintKind::Clearance,
                        severity: matched.severity,
                        message: Violation::format_message(
                            ConstraintKind::Clearance,
                            matched.required,
                            hit.actual,
                        ),
                        position: hit.position,
                        item_a: item.id(),
                        item_b: None,
                        layer: Some(layer),
                        rule: matched.rule.clone(),
                        actual_mm: hit.actual,
                        required_mm: matched.required,
                    });
                }
            }
        }
        true
    }

    fn run_zones(
        &self,
        items: &[&dyn DesignItem],
        shapes: &HashMap<(usize, LayerId), Shape>,
        index: &SpatialItemIndex,
        worst: f32,
        progress: &mut dyn ProgressReporter,
        reporter: &mut ViolationReporter,
    ) -> bool {
        if !progress.report_phase("checking zone fills") {
            return false;
        }
        for (zone_idx, zone) in items.iter().enumerate() {
            if zone_idx % PROGRESS_GRANULARITY == 0
                && !progress.report_progress(zone_idx, items.len())
            {
                return false;
            }
            for layer in zone.layers().iter() {
                let fill = match zone.zone_fill(layer) {
                    Some(fill) => fill,
                    None => continue,
                };
                if reporter.kind_exhausted(ConstraintKind::Clearance) {
                    return true;
                }
                if let Some(matched) = match_clearance(
                    self.doc,
                    self.layers,
                    ConstraintKind::Clearance,
                    *zone,
                    None,
                    layer,
                    self.config.default_severity,
                ) {
                    for violation in check_fill_islands(fill, &matched, zone.id(), layer) {
                        reporter.report(violation);
                    }
                    for hit in check_fill_slivers(
                        fill,
                        matched.required,
                        self.config.angle_tolerance_deg,
                    ) {
                        reporter.report(Violation {
                            kind: ConstraintKind::Clearance,
                            severity: matched.severity,
                            message: Violation::format_message(
                                ConstraintKind::Clearance,
                                matched.required,
                                hit.actual,
                            ),
                            position: hit.position,
                            item_a: zone.id(),
                            item_b: None,
                            layer: Some(layer),
                            rule: matched.rule.clone(),
                            actual_mm: hit.actual,
                            required_mm: matched.required,
                        });
                    }
                }

                let probe = zone.bounding_box();
                index.query_colliding(
                    layer,
                    &probe,
                    worst,
                    |entry| {
                        // zone pairs once; zone/item pairs are only seen here
                        if entry.item == zone_idx {
                            return false;
                        }
                        if items[entry.item].kind() == ItemKind::Zone {
                            entry.item > zone_idx
                        } else {
                            true
                        }
                    },
                    |entry| {
                        let other = items[entry.item];
                        if !should_check_pair(*zone, other)
                            || reporter.kind_exhausted(ConstraintKind::Clearance)
                        {
                            return true;
                        }
                        let matched = match match_clearance(
                            self.doc,
                            self.layers,
                            ConstraintKind::Clearance,
                            *zone,
                            Some(other),
                            layer,
                            self.config.default_severity,
                        ) {
                            Some(matched) => matched,
                            None => return true,
                        };
                        // another zone is tested fill to fill; its indexed
                        // shape is only an envelope rectangle
                        let violation = if let Some(other_fill) = other.zone_fill(layer) {
                            check_zone_against_zone(
                                *zone,
                                fill,
                                other,
                                other_fill,
                                &matched,
                                layer,
                            )
                        } else {
                            let other_shape = match shapes.get(&(entry.item, layer)) {
                                Some(shape) => shape,
                                None => return true,
                            };
                            check_zone_against_item(
                                *zone,
                                fill,
                                other,
                                other_shape,
                                &matched,
                                layer,
                            )
                        };
                        if let Some(violation) = violation {
                            reporter.report(violation);
                        }
                        true
                    },
                );
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::items::BoardItem;
    use crate::geometry::layers::LayerSet;
    use crate::rules::diagnostics::DiagnosticLog;
    use crate::rules::parser::RuleParser;

    fn parse(src: &str, table: &LayerTable) -> RuleDocument {
        let mut log = DiagnosticLog::new();
        RuleParser::new(table).parse(src, Some(&mut log)).unwrap()
    }

    #[test]
    fn test_two_pads_too_close() {
        let table = LayerTable::copper(&["F.Cu", "B.Cu"]);
        let doc = parse(
            "(version 1)(rule \"basic\" (constraint clearance (min 0.2mm)))",
            &table,
        );
        let layer = LayerSet::single(LayerId(0));
        // 1mm pads with 0.05mm surface gap
        let a = BoardItem::circle_pad(1, layer, [0.0, 0.0], 1.0);
        let b = BoardItem::circle_pad(2, layer, [1.05, 0.0], 1.0);
        let items: Vec<&dyn DesignItem> = vec![&a, &b];

        let checker = ClearanceChecker::new(&doc, &table, CheckerConfig::default());
        let mut reporter = ViolationReporter::new();
        let outcome = checker.run(
            &items,
            &mut crate::drc::report::NullProgress,
            &mut reporter,
        );
        assert!(!outcome.cancelled);
        assert_eq!(reporter.len(), 1);
        let v = &reporter.violations()[0];
        assert_eq!(v.kind, ConstraintKind::Clearance);
        assert!((v.actual_mm - 0.05).abs() < 1e-4);
        assert!((v.required_mm - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_pair_reported_once_per_layer() {
        // both pads span two layers: one violation per shared layer
        let table = LayerTable::copper(&["F.Cu", "B.Cu"]);
        let doc = parse(
            "(version 1)(rule \"basic\" (constraint clearance (min 0.2mm)))",
            &table,
        );
        let both = table.all();
        let a = BoardItem::circle_pad(1, both, [0.0, 0.0], 1.0);
        let b = BoardItem::circle_pad(2, both, [1.05, 0.0], 1.0);
        let items: Vec<&dyn DesignItem> = vec![&a, &b];

        let checker = ClearanceChecker::new(&doc, &table, CheckerConfig::default());
        let mut reporter = ViolationReporter::new();
        checker.run(&items, &mut crate::drc::report::NullProgress, &mut reporter);
        assert_eq!(reporter.len(), 2);
    }

    #[test]
    fn test_hole_clearance_both_directions() {
        let table = LayerTable::copper(&["F.Cu", "B.Cu"]);
        let doc = parse(
            "(version 1)(rule \"holes\" (constraint hole_clearance (min 0.3mm)))",
            &table,
        );
        let layer = LayerSet::single(LayerId(0));
        // same net so plain clearance never fires; the drill still must clear
        let via = BoardItem::via(1, layer, [0.0, 0.0], 0.6, 0.3).with_net("GND");
        let track =
            BoardItem::track(2, layer, [0.3, 0.0], [5.0, 0.0], 0.2).with_net("GND");
        let items: Vec<&dyn DesignItem> = vec![&via, &track];

        let checker = ClearanceChecker::new(&doc, &table, CheckerConfig::default());
        let mut reporter = ViolationReporter::new();
        checker.run(&items, &mut crate::drc::report::NullProgress, &mut reporter);
        assert_eq!(reporter.len(), 1);
        let v = &reporter.violations()[0];
        assert_eq!(v.kind, ConstraintKind::HoleClearance);
        assert_eq!(v.item_a, 1);
        assert_eq!(v.item_b, Some(2));
    }

    #[test]
    fn test_cancellation_stops_pass() {
        struct CancelAfterGather {
            phases: usize,
        }
        impl ProgressReporter for CancelAfterGather {
            fn report_phase(&mut self, _label: &str) -> bool {
                self.phases += 1;
                self.phases < 2
            }
            fn report_progress(&mut self, _done: usize, _total: usize) -> bool {
                true
            }
        }

        let table = LayerTable::copper(&["F.Cu", "B.Cu"]);
        let doc = parse(
            "(version 1)(rule \"basic\" (constraint clearance (min 0.2mm)))",
            &table,
        );
        let layer = LayerSet::single(LayerId(0));
        let a = BoardItem::circle_pad(1, layer, [0.0, 0.0], 1.0);
        let b = BoardItem::circle_pad(2, layer, [1.05, 0.0], 1.0);
        let items: Vec<&dyn DesignItem> = vec![&a, &b];

        let checker = ClearanceChecker::new(&doc, &table, CheckerConfig::default());
        let mut reporter = ViolationReporter::new();
        let mut progress = CancelAfterGather { phases: 0 };
        let outcome = checker.run(&items, &mut progress, &mut reporter);
        assert!(outcome.cancelled);
        assert!(reporter.is_empty());
    }

    #[test]
    fn test_zone_pair_checked_fill_to_fill() {
        use crate::geometry::items::{ZoneContour, ZoneFill};

        let table = LayerTable::copper(&["F.Cu", "B.Cu"]);
        let doc = parse(
            "(version 1)(rule \"pours\" (constraint clearance (min 0.5mm)))",
            &table,
        );
        let layer = LayerSet::single(LayerId(0));
        let square = |origin: [f32; 2], size: f32| ZoneContour {
            outline: vec![
                origin,
                [origin[0] + size, origin[1]],
                [origin[0] + size, origin[1] + size],
                [origin[0], origin[1] + size],
            ],
            holes: vec![],
        };
        // two islands with a second pour's island between them; the
        // bounding envelopes overlap but every fill gap is 1.9
        let split = BoardItem::zone(
            1,
            layer,
            ZoneFill {
                contours: vec![square([0.0, 0.0], 4.0), square([10.0, 0.0], 4.0)],
            },
        );
        let middle = BoardItem::zone(
            2,
            layer,
            ZoneFill {
                contours: vec![ZoneContour {
                    outline: vec![[5.9, 0.0], [8.1, 0.0], [8.1, 4.0], [5.9, 4.0]],
                    holes: vec![],
                }],
            },
        );
        let items: Vec<&dyn DesignItem> = vec![&split, &middle];
        let checker = ClearanceChecker::new(&doc, &table, CheckerConfig::default());
        let mut reporter = ViolationReporter::new();
        checker.run(&items, &mut crate::drc::report::NullProgress, &mut reporter);
        assert!(reporter.is_empty());

        // moved to 0.2 from the left island: exactly one violation
        let close = BoardItem::zone(
            2,
            layer,
            ZoneFill {
                contours: vec![ZoneContour {
                    outline: vec![[4.2, 0.0], [6.4, 0.0], [6.4, 4.0], [4.2, 4.0]],
                    holes: vec![],
                }],
            },
        );
        let items: Vec<&dyn DesignItem> = vec![&split, &close];
        let mut reporter = ViolationReporter::new();
        checker.run(&items, &mut crate::drc::report::NullProgress, &mut reporter);
        assert_eq!(reporter.len(), 1);
        let v = &reporter.violations()[0];
        assert!((v.actual_mm - 0.2).abs() < 1e-4);
        assert_eq!(v.item_a, 1);
        assert_eq!(v.item_b, Some(2));
    }

    #[test]
    fn test_per_kind_cap_limits_output() {
        let table = LayerTable::copper(&["F.Cu", "B.Cu"]);
        let doc = parse(
            "(version 1)(rule \"basic\" (constraint clearance (min 0.5mm)))",
            &table,
        );
        let layer = LayerSet::single(LayerId(0));
        // a cluster of pads all violating each other
        let pads: Vec<BoardItem> = (0..6)
            .map(|i| BoardItem::circle_pad(i as u64, layer, [i as f32 * 0.4, 0.0], 0.3))
            .collect();
        let items: Vec<&dyn DesignItem> =
            pads.iter().map(|p| p as &dyn DesignItem).collect();

        let config = CheckerConfig {
            per_kind_limit: Some(3),
            ..CheckerConfig::default()
        };
        let checker = ClearanceChecker::new(&doc, &table, config);
        let mut reporter = ViolationReporter::new();
        checker.run(&items, &mut crate::drc::report::NullProgress, &mut reporter);
        assert_eq!(reporter.len(), 3);
    }
}
