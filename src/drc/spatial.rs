//! Per-layer spatial index for clearance queries
//!
//! R-tree based candidate filtering: entries are arena indices into the
//! engine's flat item list, one tree per layer, built once before any
//! query runs. A query with radius R visits at least every entry whose
//! bounding volume is within R of the probe box; false positives are
//! expected and filtered by the precise distance tests downstream.

use indexmap::IndexMap;
use rstar::{RTree, RTreeObject, AABB};

use crate::geometry::layers::LayerId;
use crate::geometry::shapes::Aabb;

/// One indexed shape: an arena back-reference plus its inflated envelope
#[derive(Clone, Debug)]
pub struct IndexEntry {
    /// Index into the engine's item arena
    pub item: usize,
    pub layer: LayerId,
    /// Shape bounds without inflation
    pub bounds: Aabb,
    /// Largest clearance this entry may be queried at
    pub query_radius: f32,
    envelope: AABB<[f32; 2]>,
}

impl RTreeObject for IndexEntry {
    type Envelope = AABB<[f32; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Insert-once/query-many index, one R-tree per layer
#[derive(Debug, Default)]
pub struct SpatialItemIndex {
    pending: IndexMap<LayerId, Vec<IndexEntry>>,
    trees: IndexMap<LayerId, RTree<IndexEntry>>,
}

impl SpatialItemIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an entry; call `build` once all items are inserted
    pub fn insert(&mut self, item: usize, layer: LayerId, bounds: Aabb, max_query_radius: f32) {
        let inflated = bounds.inflated(max_query_radius.max(0.0));
        self.pending.entry(layer).or_default().push(IndexEntry {
            item,
            layer,
            bounds,
            query_radius: max_query_radius,
            envelope: AABB::from_corners(inflated.min, inflated.max),
        });
    }

    /// Bulk-load the staged entries into per-layer trees
    pub fn build(&mut self) {
        self.trees.clear();
        for (layer, entries) in self.pending.drain(..) {
            self.trees.insert(layer, RTree::bulk_load(entries));
        }
    }

    pub fn layer_count(&self) -> usize {
        self.trees.len()
    }

    /// Visit entries whose envelope intersects `probe` inflated by
    /// `radius` on the given layer. `filter` prunes entries (canonical
    /// pair ordering lives there); `visit` returns false to stop early.
    /// Returns false when the visitor stopped the scan.
    pub fn query_colliding<F, V>(
        &self,
        layer: LayerId,
        probe: &Aabb,
        radius: f32,
        mut filter: F,
        mut visit: V,
    ) -> bool
    where
        F: FnMut(&IndexEntry) -> bool,
        V: FnMut(&IndexEntry) -> bool,
    {
        let tree = match self.trees.get(&layer) {
            Some(tree) => tree,
            None => return true,
        };
        let inflated = probe.inflated(radius.max(0.0));
        let search = AABB::from_corners(inflated.min, inflated.max);
        for entry in tree.locate_in_envelope_intersecting(&search) {
            if !filter(entry) {
                continue;
            }
            if !visit(entry) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(min: [f32; 2], max: [f32; 2]) -> Aabb {
        Aabb::new(min, max)
    }

    #[test]
    fn test_query_finds_nearby() {
        let layer = LayerId(0);
        let mut index = SpatialItemIndex::new();
        index.insert(0, layer, bbox([0.0, 0.0], [1.0, 1.0]), 0.5);
        index.insert(1, layer, bbox([3.0, 0.0], [4.0, 1.0]), 0.5);
        index.insert(2, layer, bbox([100.0, 100.0], [101.0, 101.0]), 0.5);
        index.build();

        let mut hits = Vec::new();
        let complete = index.query_colliding(
            layer,
            &bbox([0.0, 0.0], [1.0, 1.0]),
            2.0,
            |_| true,
            |e| {
                hits.push(e.item);
                true
            },
        );
        assert!(complete);
        hits.sort_unstable();
        // entry 1 is 2mm away: must be visited; entry 2 must not
        assert!(hits.contains(&0));
        assert!(hits.contains(&1));
        assert!(!hits.contains(&2));
    }

    #[test]
    fn test_no_false_negatives_at_radius_boundary() {
        let layer = LayerId(0);
        let mut index = SpatialItemIndex::new();
        // gap between boxes is exactly 1.0
        index.insert(0, layer, bbox([2.0, 0.0], [3.0, 1.0]), 0.0);
        index.build();

        let mut found = false;
        index.query_colliding(
            layer,
            &bbox([0.0, 0.0], [1.0, 1.0]),
            1.0,
            |_| true,
            |_| {
                found = true;
                true
            },
        );
        assert!(found);
    }

    #[test]
    fn test_filter_and_early_stop() {
        let layer = LayerId(0);
        let mut index = SpatialItemIndex::new();
        for i in 0..10usize {
            index.insert(i, layer, bbox([0.0, 0.0], [1.0, 1.0]), 0.0);
        }
        index.build();

        let mut visited = 0usize;
        let complete = index.query_colliding(
            layer,
            &bbox([0.0, 0.0], [1.0, 1.0]),
            0.0,
            |e| e.item % 2 == 0,
            |_| {
                visited += 1;
                visited < 3
            },
        );
        assert!(!complete);
        assert_eq!(visited, 3);
    }

    #[test]
    fn test_layers_are_independent() {
        let mut index = SpatialItemIndex::new();
        index.insert(0, LayerId(0), bbox([0.0, 0.0], [1.0, 1.0]), 0.0);
        index.build();

        let mut hits = 0;
        index.query_colliding(
            LayerId(1),
            &bbox([0.0, 0.0], [1.0, 1.0]),
            10.0,
            |_| true,
            |_| {
                hits += 1;
                true
            },
        );
        assert_eq!(hits, 0);
    }
}
