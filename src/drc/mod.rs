//! Clearance engine: spatial indexing, pairwise and zone tests, reporting

pub mod clearance;
pub mod report;
pub mod runner;
pub mod slivers;
pub mod spatial;
pub mod types;
pub mod zones;

pub use report::{NullProgress, ProgressReporter, ViolationReporter};
pub use runner::{CheckerConfig, ClearanceChecker};
pub use types::{CheckOutcome, Violation};
