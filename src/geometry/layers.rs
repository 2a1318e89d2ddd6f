//! Board layers
//!
//! Layers are small integer ids into a `LayerTable`; sets of layers are a
//! 64-bit bitmask. The table knows which layers are copper and which of
//! those are outer (external) vs inner (internal), and resolves the layer
//! names used by rule documents, including `*`/`?` wildcards.

use serde::Serialize;

/// Maximum addressable layers; bit 63 is reserved for the rescue layer
pub const MAX_LAYERS: usize = 63;

/// Sentinel layer that unresolved layer names fall back to, so a rule with
/// a bad `layer` clause still parses with a non-empty selector
pub const RESCUE_LAYER: LayerId = LayerId(MAX_LAYERS as u32);

/// Index of one layer in the owning `LayerTable`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LayerId(pub u32);

/// Bitmask over layer ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LayerSet(pub u64);

impl LayerSet {
    pub const EMPTY: LayerSet = LayerSet(0);

    pub fn single(layer: LayerId) -> Self {
        LayerSet(1u64 << layer.0)
    }

    pub fn insert(&mut self, layer: LayerId) {
        self.0 |= 1u64 << layer.0;
    }

    pub fn contains(&self, layer: LayerId) -> bool {
        self.0 & (1u64 << layer.0) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: LayerSet) -> LayerSet {
        LayerSet(self.0 | other.0)
    }

    pub fn intersects(&self, other: LayerSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = LayerId> + '_ {
        let bits = self.0;
        (0..64u32).filter_map(move |i| {
            if bits & (1u64 << i) != 0 {
                Some(LayerId(i))
            } else {
                None
            }
        })
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }
}

impl FromIterator<LayerId> for LayerSet {
    fn from_iter<T: IntoIterator<Item = LayerId>>(iter: T) -> Self {
        let mut set = LayerSet::EMPTY;
        for layer in iter {
            set.insert(layer);
        }
        set
    }
}

/// One layer definition
#[derive(Debug, Clone)]
pub struct LayerDef {
    pub name: String,
    pub copper: bool,
}

/// The engine's known-layer table
#[derive(Debug, Clone, Default)]
pub struct LayerTable {
    layers: Vec<LayerDef>,
}

impl LayerTable {
    /// Table of copper layers in stackup order (first and last are the
    /// external layers)
    pub fn copper(names: &[&str]) -> Self {
        Self {
            layers: names
                .iter()
                .map(|n| LayerDef {
                    name: n.to_string(),
                    copper: true,
                })
                .collect(),
        }
    }

    pub fn add_layer(&mut self, name: &str, copper: bool) -> LayerId {
        assert!(self.layers.len() < MAX_LAYERS, "layer table full");
        self.layers.push(LayerDef {
            name: name.to_string(),
            copper,
        });
        LayerId(self.layers.len() as u32 - 1)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn name(&self, layer: LayerId) -> &str {
        if layer == RESCUE_LAYER {
            return "<rescue>";
        }
        &self.layers[layer.0 as usize].name
    }

    pub fn all(&self) -> LayerSet {
        (0..self.layers.len() as u32).map(LayerId).collect()
    }

    fn copper_ids(&self) -> impl Iterator<Item = LayerId> + '_ {
        self.layers
            .iter()
            .enumerate()
            .filter(|(_, l)| l.copper)
            .map(|(i, _)| LayerId(i as u32))
    }

    /// External copper layers: first and last of the copper stackup
    pub fn outer(&self) -> LayerSet {
        let ids: Vec<LayerId> = self.copper_ids().collect();
        let mut set = LayerSet::EMPTY;
        if let Some(&first) = ids.first() {
            set.insert(first);
        }
        if let Some(&last) = ids.last() {
            set.insert(last);
        }
        set
    }

    /// Internal copper layers: everything between the external pair
    pub fn inner(&self) -> LayerSet {
        let outer = self.outer();
        self.copper_ids().filter(|id| !outer.contains(*id)).collect()
    }

    /// Resolve a layer name from a rule document, case-sensitively, with
    /// `*`/`?` wildcard support. Empty set means no match.
    pub fn resolve(&self, pattern: &str) -> LayerSet {
        self.layers
            .iter()
            .enumerate()
            .filter(|(_, l)| wildcard_match(pattern, &l.name))
            .map(|(i, _)| LayerId(i as u32))
            .collect()
    }
}

/// Case-sensitive glob match supporting `*` (any run) and `?` (any one)
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    match_from(&pat, &txt)
}

fn match_from(pat: &[char], txt: &[char]) -> bool {
    match (pat.first(), txt.first()) {
        (None, None) => true,
        (Some('*'), _) => {
            match_from(&pat[1..], txt) || (!txt.is_empty() && match_from(pat, &txt[1..]))
        }
        (Some('?'), Some(_)) => match_from(&pat[1..], &txt[1..]),
        (Some(p), Some(t)) if p == t => match_from(&pat[1..], &txt[1..]),
        _ => false,
    }
}
