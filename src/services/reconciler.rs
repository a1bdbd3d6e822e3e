//! Transactional update of the shared slot record
//!
//! Each transition flips one slot flag and moves the aggregate by one in the
//! same versioned write, so `available == count(true)` holds in the store no
//! matter how many writers race. A write that loses the race re-reads and
//! tries again, up to `max_attempts`.

use crate::domain::types::{SlotId, SlotRecord};
use crate::infra::metrics::Metrics;
use crate::io::store::{SlotStore, StoreError, Versioned};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of reconciling one transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Record updated; `available` is the new aggregate
    Committed { available: i64 },
    /// Record already held this value; nothing written
    Skipped,
    /// Conflicts exhausted or the store failed; nothing written
    Failed,
}

pub struct ReconciliationEngine {
    store: Arc<dyn SlotStore>,
    max_attempts: u32,
    metrics: Arc<Metrics>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn SlotStore>, max_attempts: u32, metrics: Arc<Metrics>) -> Self {
        Self { store, max_attempts: max_attempts.max(1), metrics }
    }

    /// Create the record (every slot available) unless it exists, then read it back.
    ///
    /// Configured slots missing from an existing record are added as
    /// available, with the aggregate raised to match.
    pub async fn ensure_record(&self, slots: &[SlotId]) -> Result<SlotRecord, StoreError> {
        let initial = SlotRecord::initial(slots);
        if self.store.create_if_absent(&initial).await? {
            info!(slots = slots.len(), available = initial.available, "slot_record_created");
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let Versioned { version, value: mut record } = self.store.load().await?;
            if !record.is_consistent() {
                warn!(
                    available = record.available,
                    flagged = record.true_count(),
                    "slot_record_inconsistent"
                );
            }

            let missing: Vec<&SlotId> =
                slots.iter().filter(|id| !record.slots.contains_key(id.as_str())).collect();
            if missing.is_empty() {
                debug!(version = version, available = record.available, "slot_record_ready");
                return Ok(record);
            }

            for id in &missing {
                record.slots.insert(id.as_str().to_string(), true);
            }
            record.available += missing.len() as i64;

            match self.store.compare_and_swap(version, &record).await {
                Ok(_) => {
                    info!(added = missing.len(), available = record.available, "slot_record_extended");
                    return Ok(record);
                }
                Err(StoreError::Conflict { .. }) if attempt < self.max_attempts => {
                    self.metrics.record_conflict();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Apply one slot transition to the shared record
    pub async fn reconcile(&self, slot: &SlotId, available: bool) -> ReconcileOutcome {
        let started = Instant::now();
        let outcome = self.try_reconcile(slot, available).await;
        let latency_us = started.elapsed().as_micros() as u64;

        match outcome {
            ReconcileOutcome::Committed { available: aggregate } => {
                self.metrics.record_committed(latency_us);
                info!(
                    slot = %slot,
                    available = available,
                    aggregate = aggregate,
                    latency_us = latency_us,
                    "slot_committed"
                );
            }
            ReconcileOutcome::Skipped => {
                self.metrics.record_skipped(latency_us);
                debug!(slot = %slot, available = available, "slot_already_current");
            }
            ReconcileOutcome::Failed => {
                self.metrics.record_failed(latency_us);
            }
        }
        outcome
    }

    async fn try_reconcile(&self, slot: &SlotId, available: bool) -> ReconcileOutcome {
        for attempt in 1..=self.max_attempts {
            let Versioned { version, value: mut record } = match self.store.load().await {
                Ok(current) => current,
                Err(e) => {
                    warn!(slot = %slot, error = %e, "reconcile_read_failed");
                    return ReconcileOutcome::Failed;
                }
            };

            if record.slot(slot) == available {
                return ReconcileOutcome::Skipped;
            }

            record.available += if available { 1 } else { -1 };
            record.slots.insert(slot.as_str().to_string(), available);

            match self.store.compare_and_swap(version, &record).await {
                Ok(new_version) => {
                    debug!(slot = %slot, version = new_version, attempt = attempt, "reconcile_written");
                    return ReconcileOutcome::Committed { available: record.available };
                }
                Err(StoreError::Conflict { .. }) => {
                    self.metrics.record_conflict();
                    debug!(slot = %slot, attempt = attempt, "reconcile_conflict");
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    warn!(slot = %slot, error = %e, "reconcile_write_failed");
                    return ReconcileOutcome::Failed;
                }
            }
        }

        warn!(slot = %slot, attempts = self.max_attempts, "reconcile_conflicts_exhausted");
        ReconcileOutcome::Failed
    }
}
