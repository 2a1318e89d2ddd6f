//! Board items consumed by the clearance engine
//!
//! The engine checks anything implementing `DesignItem`: a shape, a set of
//! layers, optionally a drilled hole, and the attributes that rule
//! condition expressions read. `BoardItem` is a concrete implementation
//! covering pads, vias, track segments, graphic polygons, and zone fills.

use std::collections::HashMap;

use serde::Serialize;

use super::layers::{LayerId, LayerSet};
use super::shapes::{Aabb, Shape};

/// Runtime value of an item attribute, as seen by condition expressions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AttrValue {
    Number(f32),
    Text(String),
    Flag(bool),
}

impl AttrValue {
    pub fn as_number(&self) -> Option<f32> {
        match self {
            AttrValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// What kind of board object an item is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ItemKind {
    Track,
    ThroughVia,
    BlindVia,
    BuriedVia,
    MicroVia,
    Pad,
    Hole,
    Graphic,
    Text,
    Zone,
    Footprint,
}

impl ItemKind {
    pub fn name(&self) -> &'static str {
        match self {
            ItemKind::Track => "Track",
            ItemKind::ThroughVia => "Via",
            ItemKind::BlindVia => "BlindVia",
            ItemKind::BuriedVia => "BuriedVia",
            ItemKind::MicroVia => "MicroVia",
            ItemKind::Pad => "Pad",
            ItemKind::Hole => "Hole",
            ItemKind::Graphic => "Graphic",
            ItemKind::Text => "Text",
            ItemKind::Zone => "Zone",
            ItemKind::Footprint => "Footprint",
        }
    }

    pub fn flag(&self) -> ItemTypeFlags {
        match self {
            ItemKind::Track => ItemTypeFlags::TRACK,
            ItemKind::ThroughVia => ItemTypeFlags::THROUGH_VIA,
            ItemKind::BlindVia => ItemTypeFlags::BLIND_VIA,
            ItemKind::BuriedVia => ItemTypeFlags::BURIED_VIA,
            ItemKind::MicroVia => ItemTypeFlags::MICRO_VIA,
            ItemKind::Pad => ItemTypeFlags::PAD,
            ItemKind::Hole => ItemTypeFlags::HOLE,
            ItemKind::Graphic => ItemTypeFlags::GRAPHIC,
            ItemKind::Text => ItemTypeFlags::TEXT,
            ItemKind::Zone => ItemTypeFlags::ZONE,
            ItemKind::Footprint => ItemTypeFlags::FOOTPRINT,
        }
    }
}

/// Bit-flag set of item types, parsed from `disallow` constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ItemTypeFlags(pub u32);

impl ItemTypeFlags {
    pub const NONE: ItemTypeFlags = ItemTypeFlags(0);
    pub const TRACK: ItemTypeFlags = ItemTypeFlags(1 << 0);
    pub const THROUGH_VIA: ItemTypeFlags = ItemTypeFlags(1 << 1);
    pub const BLIND_VIA: ItemTypeFlags = ItemTypeFlags(1 << 2);
    pub const BURIED_VIA: ItemTypeFlags = ItemTypeFlags(1 << 3);
    pub const MICRO_VIA: ItemTypeFlags = ItemTypeFlags(1 << 4);
    pub const PAD: ItemTypeFlags = ItemTypeFlags(1 << 5);
    pub const ZONE: ItemTypeFlags = ItemTypeFlags(1 << 6);
    pub const TEXT: ItemTypeFlags = ItemTypeFlags(1 << 7);
    pub const GRAPHIC: ItemTypeFlags = ItemTypeFlags(1 << 8);
    pub const HOLE: ItemTypeFlags = ItemTypeFlags(1 << 9);
    pub const FOOTPRINT: ItemTypeFlags = ItemTypeFlags(1 << 10);

    /// `via` in a rule file means any via variety
    pub const ANY_VIA: ItemTypeFlags = ItemTypeFlags(
        Self::THROUGH_VIA.0 | Self::BLIND_VIA.0 | Self::BURIED_VIA.0 | Self::MICRO_VIA.0,
    );

    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "track" => Some(Self::TRACK),
            "via" => Some(Self::ANY_VIA),
            "micro_via" => Some(Self::MICRO_VIA),
            "buried_via" => Some(Self::BURIED_VIA),
            "blind_via" => Some(Self::BLIND_VIA),
            "pad" => Some(Self::PAD),
            "zone" => Some(Self::ZONE),
            "text" => Some(Self::TEXT),
            "graphic" => Some(Self::GRAPHIC),
            "hole" => Some(Self::HOLE),
            "footprint" => Some(Self::FOOTPRINT),
            _ => None,
        }
    }

    pub fn union(self, other: ItemTypeFlags) -> Self {
        ItemTypeFlags(self.0 | other.0)
    }

    pub fn contains(&self, other: ItemTypeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// One island of a zone fill: an outline with interior holes
#[derive(Debug, Clone, Serialize)]
pub struct ZoneContour {
    pub outline: Vec<[f32; 2]>,
    pub holes: Vec<Vec<[f32; 2]>>,
}

/// Computed fill of a copper pour on one layer
#[derive(Debug, Clone, Default, Serialize)]
pub struct ZoneFill {
    pub contours: Vec<ZoneContour>,
}

/// Interface the clearance engine consumes; implemented by the surrounding
/// board model (here, by `BoardItem`)
pub trait DesignItem: Sync {
    fn id(&self) -> u64;
    fn kind(&self) -> ItemKind;
    fn layers(&self) -> LayerSet;

    /// Copper shape this item presents on the given layer
    fn shape_on(&self, layer: LayerId) -> Option<Shape>;

    /// Drilled hole outline (circle for round drills, stroked segment for
    /// slots), independent of layer
    fn hole_shape(&self) -> Option<Shape>;

    fn bounding_box(&self) -> Aabb;

    /// Whether the item exposes copper on the layer; a pad that does not
    /// flash is represented only by its hole there
    fn flashes_on(&self, layer: LayerId) -> bool {
        self.layers().contains(layer)
    }

    fn net(&self) -> Option<&str> {
        None
    }

    /// Attribute lookup for condition expressions; unknown names are None
    fn attribute(&self, name: &str) -> Option<AttrValue>;

    /// Fill contours when the item is a zone on this layer
    fn zone_fill(&self, _layer: LayerId) -> Option<&ZoneFill> {
        None
    }
}

/// Concrete board item used by the engine's callers and tests
#[derive(Debug, Clone)]
pub struct BoardItem {
    pub id: u64,
    pub kind: ItemKind,
    pub layers: LayerSet,
    pub shape: Shape,
    pub hole: Option<Shape>,
    pub net: Option<String>,
    pub component: Option<String>,
    /// Layers where copper is actually exposed; None means all of `layers`
    pub flash_layers: Option<LayerSet>,
    pub zone: Option<ZoneFill>,
    attributes: HashMap<String, AttrValue>,
}

impl BoardItem {
    fn new(id: u64, kind: ItemKind, layers: LayerSet, shape: Shape) -> Self {
        Self {
            id,
            kind,
            layers,
            shape,
            hole: None,
            net: None,
            component: None,
            flash_layers: None,
            zone: None,
            attributes: HashMap::new(),
        }
    }

    pub fn track(id: u64, layers: LayerSet, a: [f32; 2], b: [f32; 2], width: f32) -> Self {
        Self::new(id, ItemKind::Track, layers, Shape::segment(a, b, width))
    }

    pub fn via(id: u64, layers: LayerSet, center: [f32; 2], diameter: f32, drill: f32) -> Self {
        let mut item = Self::new(
            id,
            ItemKind::ThroughVia,
            layers,
            Shape::circle(center, diameter / 2.0),
        );
        item.hole = Some(Shape::circle(center, drill / 2.0));
        item
    }

    pub fn circle_pad(id: u64, layers: LayerSet, center: [f32; 2], diameter: f32) -> Self {
        Self::new(id, ItemKind::Pad, layers, Shape::circle(center, diameter / 2.0))
    }

    pub fn rect_pad(id: u64, layers: LayerSet, center: [f32; 2], w: f32, h: f32) -> Self {
        Self::new(id, ItemKind::Pad, layers, Shape::rect(center, w, h))
    }

    pub fn graphic(id: u64, layers: LayerSet, shape: Shape) -> Self {
        Self::new(id, ItemKind::Graphic, layers, shape)
    }

    pub fn zone(id: u64, layers: LayerSet, fill: ZoneFill) -> Self {
        // Envelope rectangle over every island, used only for spatial
        // indexing; distance tests always go through the fill contours
        let points: Vec<[f32; 2]> = fill
            .contours
            .iter()
            .flat_map(|c| c.outline.iter().copied())
            .collect();
        let envelope = if points.is_empty() {
            Shape::rect([0.0, 0.0], 0.0, 0.0)
        } else {
            let bbox = Aabb::from_points(&points);
            Shape::rect(
                bbox.center(),
                bbox.max[0] - bbox.min[0],
                bbox.max[1] - bbox.min[1],
            )
        };
        let mut item = Self::new(id, ItemKind::Zone, layers, envelope);
        item.zone = Some(fill);
        item
    }

    pub fn with_drill(mut self, center: [f32; 2], diameter: f32) -> Self {
        self.hole = Some(Shape::circle(center, diameter / 2.0));
        self
    }

    pub fn with_net(mut self, net: &str) -> Self {
        self.net = Some(net.to_string());
        self
    }

    pub fn set_attribute(&mut self, name: &str, value: AttrValue) {
        self.attributes.insert(name.to_string(), value);
    }
}

impl DesignItem for BoardItem {
    fn id(&self) -> u64 {
        self.id
    }

    fn kind(&self) -> ItemKind {
        self.kind
    }

    fn layers(&self) -> LayerSet {
        self.layers
    }

    fn shape_on(&self, layer: LayerId) -> Option<Shape> {
        if self.layers.contains(layer) && self.flashes_on(layer) {
            Some(self.shape.clone())
        } else {
            None
        }
    }

    fn hole_shape(&self) -> Option<Shape> {
        self.hole.clone()
    }

    fn bounding_box(&self) -> Aabb {
        let mut bbox = self.shape.bounding_box();
        if let Some(hole) = &self.hole {
            bbox = bbox.merged(&hole.bounding_box());
        }
        bbox
    }

    fn flashes_on(&self, layer: LayerId) -> bool {
        match self.flash_layers {
            Some(flash) => flash.contains(layer),
            None => self.layers.contains(layer),
        }
    }

    fn net(&self) -> Option<&str> {
        self.net.as_deref()
    }

    fn attribute(&self, name: &str) -> Option<AttrValue> {
        if let Some(value) = self.attributes.get(name) {
            return Some(value.clone());
        }
        match name {
            "Net" | "NetName" => self.net.clone().map(AttrValue::Text),
            "Type" => Some(AttrValue::Text(self.kind.name().to_string())),
            "Reference" | "Component" => self.component.clone().map(AttrValue::Text),
            _ => None,
        }
    }

    fn zone_fill(&self, layer: LayerId) -> Option<&ZoneFill> {
        if self.layers.contains(layer) {
            self.zone.as_ref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::layers::LayerId;

    #[test]
    fn test_disallow_via_expands() {
        let flags = ItemTypeFlags::from_keyword("via").unwrap();
        assert!(flags.contains(ItemTypeFlags::THROUGH_VIA));
        assert!(flags.contains(ItemTypeFlags::BLIND_VIA));
        assert!(flags.contains(ItemTypeFlags::BURIED_VIA));
        assert!(flags.contains(ItemTypeFlags::MICRO_VIA));
        assert!(!flags.contains(ItemTypeFlags::TRACK));
    }

    #[test]
    fn test_via_item_shapes() {
        let layers = LayerSet::single(LayerId(0)).union(LayerSet::single(LayerId(1)));
        let via = BoardItem::via(7, layers, [1.0, 1.0], 0.6, 0.3);
        assert!(via.shape_on(LayerId(0)).is_some());
        assert!(via.shape_on(LayerId(2)).is_none());
        match via.hole_shape().unwrap() {
            Shape::Circle { radius, .. } => assert!((radius - 0.15).abs() < 1e-6),
            other => panic!("unexpected hole shape {:?}", other),
        }
    }

    #[test]
    fn test_flash_layers() {
        let layers = LayerSet::single(LayerId(0)).union(LayerSet::single(LayerId(1)));
        let mut pad = BoardItem::circle_pad(1, layers, [0.0, 0.0], 1.0).with_drill([0.0, 0.0], 0.5);
        pad.flash_layers = Some(LayerSet::single(LayerId(0)));
        assert!(pad.flashes_on(LayerId(0)));
        assert!(!pad.flashes_on(LayerId(1)));
        assert!(pad.shape_on(LayerId(1)).is_none());
    }

    #[test]
    fn test_builtin_attributes() {
        let item = BoardItem::track(
            1,
            LayerSet::single(LayerId(0)),
            [0.0, 0.0],
            [1.0, 0.0],
            0.2,
        )
        .with_net("CLK");
        assert_eq!(item.attribute("Net"), Some(AttrValue::Text("CLK".into())));
        assert_eq!(item.attribute("Type"), Some(AttrValue::Text("Track".into())));
        assert_eq!(item.attribute("Bogus"), None);
    }
}
