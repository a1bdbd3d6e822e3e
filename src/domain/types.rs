//! Shared types for the parking monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key under which the aggregate count lives in the shared record
pub const AVAILABLE_KEY: &str = "available";

/// Newtype wrapper for slot identifiers (e.g. "slotid1")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub String);

impl SlotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The shared slot document.
///
/// Serialized flat, one boolean per slot plus the aggregate:
/// `{"slotid1": true, "slotid2": false, "available": 1}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub available: i64,
    #[serde(flatten)]
    pub slots: BTreeMap<String, bool>,
}

impl SlotRecord {
    /// Record for first run: every slot available, aggregate equal to slot count
    pub fn initial(slots: &[SlotId]) -> Self {
        let slots: BTreeMap<String, bool> =
            slots.iter().map(|id| (id.0.clone(), true)).collect();
        Self { available: slots.len() as i64, slots }
    }

    /// Stored flag for a slot; slots missing from the record count as available
    pub fn slot(&self, id: &SlotId) -> bool {
        self.slots.get(id.as_str()).copied().unwrap_or(true)
    }

    /// Number of slots flagged available
    pub fn true_count(&self) -> i64 {
        self.slots.values().filter(|v| **v).count() as i64
    }

    /// Aggregate matches the per-slot flags
    pub fn is_consistent(&self) -> bool {
        self.available == self.true_count()
    }
}

/// Why a sample produced no usable distance
#[derive(Debug, Clone, PartialEq)]
pub enum UnknownReason {
    /// Echo edge not seen within the wait window
    Timeout,
    /// Distance outside the sensor's valid range
    Implausible { distance_cm: f64 },
    /// Pulse end observed at or before pulse start
    NonPositive,
    /// Reading or driving a line failed
    LineError(String),
}

impl UnknownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnknownReason::Timeout => "timeout",
            UnknownReason::Implausible { .. } => "implausible",
            UnknownReason::NonPositive => "non_positive",
            UnknownReason::LineError(_) => "line_error",
        }
    }
}

/// Result of sampling one sensor
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    /// Plausible distance; `available` is true when no car is present
    Known { distance_cm: f64, available: bool },
    Unknown(UnknownReason),
}

/// One sampled reading, tagged with its slot and sample time
#[derive(Debug, Clone)]
pub struct OccupancyReading {
    pub slot: SlotId,
    pub sampled_at: DateTime<Utc>,
    pub sample: Sample,
}

impl OccupancyReading {
    /// Derived occupancy, `None` for unknown readings
    #[inline]
    pub fn available(&self) -> Option<bool> {
        match self.sample {
            Sample::Known { available, .. } => Some(available),
            Sample::Unknown(_) => None,
        }
    }
}
