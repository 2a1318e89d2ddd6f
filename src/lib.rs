//! Manufacturing-constraint verification for PCB designs.
//!
//! Two halves: a rule-language front end (`rules`) that compiles
//! s-expression rule documents into a constraint model with recoverable
//! diagnostics, and a clearance engine (`drc`) that tests board items
//! against that model through a per-layer spatial index. The `geometry`
//! module carries the shared shape, distance and layer primitives.
//!
//! ```ignore
//! let layers = LayerTable::copper(&["F.Cu", "B.Cu"]);
//! let doc = RuleParser::new(&layers).parse(source, Some(&mut log))?;
//! let checker = ClearanceChecker::new(&doc, &layers, CheckerConfig::default());
//! let outcome = checker.run(&items, &mut progress, &mut reporter);
//! ```

pub mod drc;
pub mod geometry;
pub mod rules;

pub use drc::{CheckOutcome, CheckerConfig, ClearanceChecker, ViolationReporter};
pub use geometry::{BoardItem, DesignItem, LayerTable};
pub use rules::{RuleDocument, RuleParser};
