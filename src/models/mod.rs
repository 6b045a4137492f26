//! Data models for hirawatch.

mod document;
mod outcome;
mod version;

pub use document::{FileFormat, LinkLabelTiers, TrackedDocument};
pub use outcome::{CheckOutcome, CheckReport, CheckResult, StatusEntry};
pub use version::{FileVersion, KeyRecord, PublishedFile};
