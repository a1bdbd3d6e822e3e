//! Domain models - core types shared by sensing and reconciliation
//!
//! This module contains the canonical data types used throughout the system:
//! - `SlotId` - stable identifier of a physical parking slot
//! - `SlotRecord` - the shared document of per-slot flags plus aggregate
//! - `OccupancyReading` - one sampled distance (or unknown) for a slot

pub mod types;

// Re-export commonly used types at module level
pub use types::{OccupancyReading, Sample, SlotId, SlotRecord, UnknownReason};
