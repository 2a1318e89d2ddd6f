//! Rule and constraint data model
//!
//! Objects produced by the rule parser: immutable once built, consumed
//! many times during checking. Constraint kinds are a closed enum with a
//! keyword table so both the parser dispatch and the engine's matching
//! stay exhaustive and compiler-checked.

use serde::Serialize;

use super::diagnostics::Severity;
use super::expr::{ConditionExpr, EvalContext, ValueDomain};
use crate::geometry::items::{DesignItem, ItemTypeFlags};
use crate::geometry::layers::{LayerId, LayerSet, LayerTable};

/// Highest rule-document version this engine understands
pub const SUPPORTED_RULES_VERSION: u32 = 9;

/// Every constraint kind a rule clause can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConstraintKind {
    Clearance,
    HoleClearance,
    HoleToHole,
    EdgeClearance,
    CourtyardClearance,
    SilkClearance,
    PhysicalClearance,
    PhysicalHoleClearance,
    MechanicalClearance,
    MechanicalHoleClearance,
    HoleSize,
    AnnularWidth,
    TrackWidth,
    TrackAngle,
    TrackSegmentLength,
    ConnectionWidth,
    ViaCount,
    ViaDiameter,
    ViaDangling,
    DiffPairGap,
    DiffPairUncoupled,
    Length,
    Skew,
    ZoneConnection,
    ThermalReliefGap,
    ThermalSpokeWidth,
    MinResolvedSpokes,
    SolderMaskExpansion,
    SolderPasteMargin,
    Disallow,
    Assertion,
    BridgedMask,
}

impl ConstraintKind {
    pub const ALL: &'static [ConstraintKind] = &[
        ConstraintKind::Clearance,
        ConstraintKind::HoleClearance,
        ConstraintKind::HoleToHole,
        ConstraintKind::EdgeClearance,
        ConstraintKind::CourtyardClearance,
        ConstraintKind::SilkClearance,
        ConstraintKind::PhysicalClearance,
        ConstraintKind::PhysicalHoleClearance,
        ConstraintKind::MechanicalClearance,
        ConstraintKind::MechanicalHoleClearance,
        ConstraintKind::HoleSize,
        ConstraintKind::AnnularWidth,
        ConstraintKind::TrackWidth,
        ConstraintKind::TrackAngle,
        ConstraintKind::TrackSegmentLength,
        ConstraintKind::ConnectionWidth,
        ConstraintKind::ViaCount,
        ConstraintKind::ViaDiameter,
        ConstraintKind::ViaDangling,
        ConstraintKind::DiffPairGap,
        ConstraintKind::DiffPairUncoupled,
        ConstraintKind::Length,
        ConstraintKind::Skew,
        ConstraintKind::ZoneConnection,
        ConstraintKind::ThermalReliefGap,
        ConstraintKind::ThermalSpokeWidth,
        ConstraintKind::MinResolvedSpokes,
        ConstraintKind::SolderMaskExpansion,
        ConstraintKind::SolderPasteMargin,
        ConstraintKind::Disallow,
        ConstraintKind::Assertion,
        ConstraintKind::BridgedMask,
    ];

    pub fn keyword(&self) -> &'static str {
        match self {
            ConstraintKind::Clearance => "clearance",
            ConstraintKind::HoleClearance => "hole_clearance",
            ConstraintKind::HoleToHole => "hole_to_hole",
            ConstraintKind::EdgeClearance => "edge_clearance",
            ConstraintKind::CourtyardClearance => "courtyard_clearance",
            ConstraintKind::SilkClearance => "silk_clearance",
            ConstraintKind::PhysicalClearance => "physical_clearance",
            ConstraintKind::PhysicalHoleClearance => "physical_hole_clearance",
            ConstraintKind::MechanicalClearance => "mechanical_clearance",
            ConstraintKind::MechanicalHoleClearance => "mechanical_hole_clearance",
            ConstraintKind::HoleSize => "hole_size",
            ConstraintKind::AnnularWidth => "annular_width",
            ConstraintKind::TrackWidth => "track_width",
            ConstraintKind::TrackAngle => "track_angle",
            ConstraintKind::TrackSegmentLength => "track_segment_length",
            ConstraintKind::ConnectionWidth => "connection_width",
            ConstraintKind::ViaCount => "via_count",
            ConstraintKind::ViaDiameter => "via_diameter",
            ConstraintKind::ViaDangling => "via_dangling",
            ConstraintKind::DiffPairGap => "diff_pair_gap",
            ConstraintKind::DiffPairUncoupled => "diff_pair_uncoupled",
            ConstraintKind::Length => "length",
            ConstraintKind::Skew => "skew",
            ConstraintKind::ZoneConnection => "zone_connection",
            ConstraintKind::ThermalReliefGap => "thermal_relief_gap",
            ConstraintKind::ThermalSpokeWidth => "thermal_spoke_width",
            ConstraintKind::MinResolvedSpokes => "min_resolved_spokes",
            ConstraintKind::SolderMaskExpansion => "solder_mask_expansion",
            ConstraintKind::SolderPasteMargin => "solder_paste_margin",
            ConstraintKind::Disallow => "disallow",
            ConstraintKind::Assertion => "assertion",
            ConstraintKind::BridgedMask => "bridged_mask",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.keyword() == word)
    }

    /// Kinds whose value clauses never carry a unit suffix
    pub fn is_unitless(&self) -> bool {
        matches!(
            self,
            ConstraintKind::ViaCount
                | ConstraintKind::TrackAngle
                | ConstraintKind::MinResolvedSpokes
                | ConstraintKind::ViaDangling
                | ConstraintKind::BridgedMask
        )
    }

    /// The pairwise clearance family sized into the spatial-index query
    /// radius
    pub fn is_clearance_style(&self) -> bool {
        matches!(
            self,
            ConstraintKind::Clearance
                | ConstraintKind::HoleClearance
                | ConstraintKind::HoleToHole
                | ConstraintKind::EdgeClearance
                | ConstraintKind::PhysicalClearance
                | ConstraintKind::PhysicalHoleClearance
                | ConstraintKind::MechanicalClearance
                | ConstraintKind::MechanicalHoleClearance
                | ConstraintKind::CourtyardClearance
                | ConstraintKind::SilkClearance
        )
    }
}

/// `zone_connection` constraint value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ZoneConnectionMode {
    Solid,
    ThermalReliefs,
    None,
}

impl ZoneConnectionMode {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "solid" => Some(ZoneConnectionMode::Solid),
            "thermal_reliefs" => Some(ZoneConnectionMode::ThermalReliefs),
            "none" => Some(ZoneConnectionMode::None),
            _ => None,
        }
    }
}

/// min/opt/max values of one constraint, canonical scale, with the value
/// domain detected from the units used
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ValueRange {
    pub min: Option<f32>,
    pub opt: Option<f32>,
    pub max: Option<f32>,
    pub domain: Option<ValueDomain>,
}

impl ValueRange {
    /// Record one sub-clause value; rejects mixing length and time domains
    /// within the range
    pub fn set(
        &mut self,
        slot: ValueSlot,
        value: f32,
        domain: Option<ValueDomain>,
    ) -> Result<(), String> {
        match (self.domain, domain) {
            (Some(have), Some(new)) if have != new => {
                return Err("constraint mixes length and time values".to_string());
            }
            (None, Some(new)) => self.domain = Some(new),
            _ => {}
        }
        let target = match slot {
            ValueSlot::Min => &mut self.min,
            ValueSlot::Opt => &mut self.opt,
            ValueSlot::Max => &mut self.max,
        };
        *target = Some(value);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.opt.is_none() && self.max.is_none()
    }
}

/// Which sub-clause of a generic constraint a value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSlot {
    Min,
    Opt,
    Max,
}

impl ValueSlot {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "min" => Some(ValueSlot::Min),
            "opt" => Some(ValueSlot::Opt),
            "max" => Some(ValueSlot::Max),
            _ => None,
        }
    }
}

/// One named requirement attached to a rule
#[derive(Debug, Clone)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub value: ValueRange,
    /// `disallow` payload
    pub disallow: ItemTypeFlags,
    /// `zone_connection` payload
    pub zone_connection: Option<ZoneConnectionMode>,
    /// `assertion` payload
    pub assertion: Option<ConditionExpr>,
    /// `min_resolved_spokes` payload
    pub min_spokes: Option<u32>,
    /// Restricts the constraint to items inside diff-pairs
    pub within_diff_pairs: bool,
    /// Owning rule name, for diagnostics
    pub rule: String,
}

impl Constraint {
    pub fn new(kind: ConstraintKind) -> Self {
        Self {
            kind,
            value: ValueRange::default(),
            disallow: ItemTypeFlags::NONE,
            zone_connection: None,
            assertion: None,
            min_spokes: None,
            within_diff_pairs: false,
            rule: String::new(),
        }
    }
}

/// Which layers a rule applies to, with the source token kept for
/// diagnostics
#[derive(Debug, Clone)]
pub struct LayerSelector {
    pub set: LayerSet,
    pub source: String,
}

impl LayerSelector {
    pub fn all(table: &LayerTable) -> Self {
        Self {
            set: table.all(),
            source: "(all)".to_string(),
        }
    }
}

/// One parsed rule: selection condition, layer scope, severity override,
/// and an ordered set of constraints (one per kind)
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub condition: Option<ConditionExpr>,
    pub layers: LayerSelector,
    pub severity: Option<Severity>,
    pub constraints: Vec<Constraint>,
}

impl Rule {
    pub fn new(name: &str, table: &LayerTable) -> Self {
        Self {
            name: name.to_string(),
            condition: None,
            layers: LayerSelector::all(table),
            severity: None,
            constraints: Vec::new(),
        }
    }

    pub fn constraint(&self, kind: ConstraintKind) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.kind == kind)
    }

    pub fn has_constraint(&self, kind: ConstraintKind) -> bool {
        self.constraint(kind).is_some()
    }
}

/// Component-class assignment; evaluated by an external classifier
#[derive(Debug, Clone)]
pub struct ComponentClassRule {
    pub class: String,
    pub condition: Option<ConditionExpr>,
}

/// A fully parsed rule document
#[derive(Debug, Clone, Default)]
pub struct RuleDocument {
    pub version: u32,
    /// Declared version exceeds `SUPPORTED_RULES_VERSION`; the document
    /// was still parsed best-effort
    pub from_future: bool,
    pub rules: Vec<Rule>,
    pub class_assignments: Vec<ComponentClassRule>,
}

impl RuleDocument {
    /// First rule in document order carrying `kind` whose layer selector
    /// includes `layer` and whose condition matches the item pair. Rule
    /// order is the tiebreak: first match wins.
    pub fn matching_constraint<'a>(
        &'a self,
        kind: ConstraintKind,
        a: &dyn DesignItem,
        b: Option<&dyn DesignItem>,
        layer: LayerId,
        layers: &LayerTable,
    ) -> Option<(&'a Rule, &'a Constraint)> {
        for rule in &self.rules {
            if !rule.layers.set.contains(layer) {
                continue;
            }
            let constraint = match rule.constraint(kind) {
                Some(c) => c,
                None => continue,
            };
            if let Some(cond) = &rule.condition {
                let ctx = EvalContext {
                    a,
                    b,
                    layer: Some(layer),
                    layers,
                };
                let forward = cond.evaluate(&ctx);
                // Conditions naming both items must match either
                // orientation of an unordered pair
                let matched = forward
                    || match b {
                        Some(b_item) => {
                            let swapped = EvalContext {
                                a: b_item,
                                b: Some(a),
                                layer: Some(layer),
                                layers,
                            };
                            cond.evaluate(&swapped)
                        }
                        None => false,
                    };
                if !matched {
                    continue;
                }
            }
            return Some((rule, constraint));
        }
        None
    }

    /// Largest configured min clearance across the clearance-style kinds;
    /// sizes the spatial-index query radius
    pub fn worst_clearance(&self) -> f32 {
        let mut worst = 0.0f32;
        for rule in &self.rules {
            for constraint in &rule.constraints {
                if constraint.kind.is_clearance_style() {
                    if let Some(min) = constraint.value.min {
                        worst = worst.max(min);
                    }
                }
            }
        }
        worst
    }
}
