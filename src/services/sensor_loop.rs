//! Sensor polling loop
//!
//! Samples every slot in configuration order, reconciles transitions with
//! the shared record, drives the indicators and pushes the committed count
//! to the displays. Runs as one sequential task; every sleep observes the
//! shutdown signal.

use crate::domain::types::{Sample, SlotId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::display::AvailabilityDisplay;
use crate::io::gpio::SensorBinding;
use crate::io::store::StoreError;
use crate::services::reconciler::{ReconcileOutcome, ReconciliationEngine};
use crate::services::registry::SlotRegistry;
use crate::services::sampler::DistanceSampler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Sleep for `duration` unless shutdown is signalled first.
/// Returns true on shutdown (or when the signal's sender is gone).
async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return true;
                }
            }
        }
    }
}

fn set_indicator(binding: &mut SensorBinding, available: bool) {
    if let Err(e) = binding.indicator.set_state(available) {
        warn!(slot = %binding.slot, error = %e, "indicator_write_failed");
    }
}

pub struct SensorLoop {
    bindings: Vec<SensorBinding>,
    sampler: DistanceSampler,
    registry: SlotRegistry,
    reconciler: ReconciliationEngine,
    displays: Vec<Box<dyn AvailabilityDisplay>>,
    metrics: Arc<Metrics>,
    poll_interval: Duration,
    inter_slot_delay: Duration,
    settle_time: Duration,
}

impl SensorLoop {
    pub fn new(
        config: &Config,
        bindings: Vec<SensorBinding>,
        reconciler: ReconciliationEngine,
        displays: Vec<Box<dyn AvailabilityDisplay>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            bindings,
            sampler: DistanceSampler::from_config(config),
            registry: SlotRegistry::new(),
            reconciler,
            displays,
            metrics,
            poll_interval: config.poll_interval(),
            inter_slot_delay: config.inter_slot_delay(),
            settle_time: config.settle_time(),
        }
    }

    pub fn registry(&self) -> &SlotRegistry {
        &self.registry
    }

    /// Ensure the shared record exists and seed registry and indicators from it
    pub async fn initialize(&mut self) -> Result<(), StoreError> {
        let slot_ids: Vec<SlotId> = self.bindings.iter().map(|b| b.slot.clone()).collect();
        let record = self.reconciler.ensure_record(&slot_ids).await?;

        for binding in &mut self.bindings {
            let available = record.slot(&binding.slot);
            self.registry.commit(&binding.slot, available);
            set_indicator(binding, available);
        }

        let available = self.registry.available_count();
        let total = self.bindings.len();
        self.metrics.set_availability(available, total);
        info!(available = available, total = total, "registry_seeded");
        Ok(())
    }

    /// One pass over every slot. Returns `None` if shutdown arrived mid-cycle.
    pub async fn run_cycle(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<(usize, usize)> {
        for (index, binding) in self.bindings.iter_mut().enumerate() {
            if index > 0 && pause(self.inter_slot_delay, shutdown).await {
                return None;
            }

            let reading = self.sampler.sample(binding);
            self.metrics.record_sample();

            let available = match &reading.sample {
                Sample::Known { available, .. } => *available,
                Sample::Unknown(reason) => {
                    self.metrics.record_unknown(reason);
                    continue;
                }
            };

            if !self.registry.transitioned(&binding.slot, available) {
                continue;
            }

            debug!(slot = %binding.slot, available = available, "slot_transition");
            if let ReconcileOutcome::Committed { .. } =
                self.reconciler.reconcile(&binding.slot, available).await
            {
                set_indicator(binding, available);
                self.registry.commit(&binding.slot, available);
            }
        }

        let available = self.registry.available_count();
        let total = self.bindings.len();
        for display in &mut self.displays {
            if let Err(e) = display.show(available, total) {
                warn!(error = %e, "display_update_failed");
            }
        }
        self.metrics.set_availability(available, total);
        self.metrics.record_cycle();
        Some((available, total))
    }

    /// Poll until shutdown, then drive every output low
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            slots = self.bindings.len(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            settle_ms = self.settle_time.as_millis() as u64,
            "sensor_loop_started"
        );

        if !self.settle_time.is_zero() && pause(self.settle_time, &mut shutdown).await {
            info!("sensor_loop_shutdown");
            return;
        }

        loop {
            if self.run_cycle(&mut shutdown).await.is_none() {
                break;
            }
            if pause(self.poll_interval, &mut shutdown).await {
                break;
            }
        }

        for binding in &mut self.bindings {
            binding.release();
        }
        info!("sensor_loop_shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SlotRecord;
    use crate::infra::config::GpioBackend;
    use crate::io::display::testing::RecordingDisplay;
    use crate::io::sim_gpio::SimulatedBoard;
    use crate::io::store::{MemoryStore, SlotStore, Versioned};
    use async_trait::async_trait;

    /// Reads go through to the inner store; every write loses the race
    struct ConflictingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl SlotStore for ConflictingStore {
        async fn create_if_absent(&self, record: &SlotRecord) -> Result<bool, StoreError> {
            self.inner.create_if_absent(record).await
        }

        async fn load(&self) -> Result<Versioned<SlotRecord>, StoreError> {
            self.inner.load().await
        }

        async fn compare_and_swap(
            &self,
            expected_version: u64,
            _record: &SlotRecord,
        ) -> Result<u64, StoreError> {
            Err(StoreError::Conflict { expected: expected_version })
        }
    }

    fn config() -> Config {
        Config::default().with_gpio_backend(GpioBackend::Simulated).with_timing(10, 1)
    }

    struct Harness {
        sensor_loop: SensorLoop,
        board: SimulatedBoard,
        store: MemoryStore,
        display: RecordingDisplay,
        metrics: Arc<Metrics>,
    }

    fn harness(config: &Config, store: MemoryStore) -> Harness {
        let backend = Arc::new(store.clone());
        harness_with(config, store, backend)
    }

    fn harness_with(config: &Config, store: MemoryStore, backend: Arc<dyn SlotStore>) -> Harness {
        let (bindings, board) = SimulatedBoard::from_config(config).into_bindings();
        let metrics = Arc::new(Metrics::new());
        let reconciler = ReconciliationEngine::new(backend, 5, metrics.clone());
        let display = RecordingDisplay::default();
        let sensor_loop = SensorLoop::new(
            config,
            bindings,
            reconciler,
            vec![Box::new(display.clone())],
            metrics.clone(),
        );
        Harness { sensor_loop, board, store, display, metrics }
    }

    #[tokio::test]
    async fn test_occupied_slot_is_committed() {
        let config = config().with_simulated_distance("slotid2", 15.0);
        let mut h = harness(&config, MemoryStore::new());
        let (_tx, mut rx) = watch::channel(false);

        h.sensor_loop.initialize().await.unwrap();
        assert_eq!(h.store.snapshot().unwrap().available, 3);
        assert!(h.board.slot("slotid2").unwrap().indicator_on());

        let shown = h.sensor_loop.run_cycle(&mut rx).await;
        assert_eq!(shown, Some((2, 3)));

        let record = h.store.snapshot().unwrap();
        assert!(!record.slot(&SlotId::new("slotid2")));
        assert!(record.slot(&SlotId::new("slotid1")));
        assert_eq!(record.available, 2);
        assert!(!h.board.slot("slotid2").unwrap().indicator_on());
        assert!(h.board.slot("slotid1").unwrap().indicator_on());
        assert_eq!(h.display.shown.lock().last(), Some(&(2, 3)));
        assert_eq!(h.metrics.reconcile_committed_total(), 1);
    }

    #[tokio::test]
    async fn test_unknown_slot_left_untouched() {
        let config = config();
        let mut h = harness(&config, MemoryStore::new());
        let (_tx, mut rx) = watch::channel(false);

        h.sensor_loop.initialize().await.unwrap();
        h.board.slot("slotid3").unwrap().set_distance(None);
        let before = h.store.load().await.unwrap().version;

        for _ in 0..5 {
            assert_eq!(h.sensor_loop.run_cycle(&mut rx).await, Some((3, 3)));
        }

        assert_eq!(h.sensor_loop.registry().get(&SlotId::new("slotid3")), Some(true));
        assert_eq!(h.store.load().await.unwrap().version, before);
        assert!(h.board.slot("slotid3").unwrap().indicator_on());
        assert_eq!(h.metrics.report().sensor_timeouts_total, 5);
    }

    #[tokio::test]
    async fn test_failed_reconcile_keeps_local_state() {
        let config = config().with_simulated_distance("slotid2", 15.0);
        let store = MemoryStore::new();
        let backend = Arc::new(ConflictingStore { inner: store.clone() });
        let mut h = harness_with(&config, store, backend);
        let (_tx, mut rx) = watch::channel(false);

        h.sensor_loop.initialize().await.unwrap();
        assert_eq!(h.sensor_loop.run_cycle(&mut rx).await, Some((3, 3)));

        let slot2 = SlotId::new("slotid2");
        assert_eq!(h.sensor_loop.registry().get(&slot2), Some(true));
        assert!(h.board.slot("slotid2").unwrap().indicator_on());
        assert_eq!(h.display.shown.lock().last(), Some(&(3, 3)));
        assert_eq!(h.metrics.reconcile_failed_total(), 1);
        assert_eq!(h.store.snapshot().unwrap().available, 3);

        // slotid3 was still sampled after slotid2 failed
        assert_eq!(h.metrics.report().samples_total, 3);

        // Registry did not move, so the next cycle tries again
        assert_eq!(h.sensor_loop.run_cycle(&mut rx).await, Some((3, 3)));
        assert_eq!(h.metrics.reconcile_failed_total(), 2);
    }

    #[tokio::test]
    async fn test_skipped_reconcile_keeps_local_state() {
        let config = config().with_simulated_distance("slotid2", 15.0);
        let mut h = harness(&config, MemoryStore::new());
        let (_tx, mut rx) = watch::channel(false);
        h.sensor_loop.initialize().await.unwrap();

        // Another instance already recorded slotid2 as taken
        let current = h.store.load().await.unwrap();
        let mut record = current.value;
        record.slots.insert("slotid2".to_string(), false);
        record.available = 2;
        h.store.compare_and_swap(current.version, &record).await.unwrap();
        let version = h.store.load().await.unwrap().version;

        for _ in 0..3 {
            assert_eq!(h.sensor_loop.run_cycle(&mut rx).await, Some((3, 3)));
        }

        assert_eq!(h.sensor_loop.registry().get(&SlotId::new("slotid2")), Some(true));
        assert!(h.board.slot("slotid2").unwrap().indicator_on());
        assert_eq!(h.metrics.report().reconcile_skipped_total, 3);
        assert_eq!(h.store.load().await.unwrap().version, version);
    }

    #[tokio::test]
    async fn test_seeding_from_existing_record() {
        let ids = [SlotId::new("slotid1"), SlotId::new("slotid2"), SlotId::new("slotid3")];
        let mut record = SlotRecord::initial(&ids);
        record.slots.insert("slotid1".to_string(), false);
        record.available = 2;

        let config = config();
        let mut h = harness(&config, MemoryStore::with_record(record));
        let (_tx, mut rx) = watch::channel(false);

        h.sensor_loop.initialize().await.unwrap();
        assert!(!h.board.slot("slotid1").unwrap().indicator_on());
        assert_eq!(h.sensor_loop.registry().available_count(), 2);

        // Every simulated slot reads 100 cm, so slotid1 frees up
        assert_eq!(h.sensor_loop.run_cycle(&mut rx).await, Some((3, 3)));
        assert_eq!(h.store.snapshot().unwrap().available, 3);
        assert!(h.board.slot("slotid1").unwrap().indicator_on());
        assert_eq!(h.metrics.reconcile_committed_total(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_releases_lines() {
        let config = config();
        let mut h = harness(&config, MemoryStore::new());
        h.sensor_loop.initialize().await.unwrap();
        assert!(h.board.slot("slotid1").unwrap().indicator_on());

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(h.sensor_loop.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert!(!h.board.slot("slotid1").unwrap().indicator_on());
        assert!(h.metrics.report().cycles_total >= 1);
    }

    #[tokio::test]
    async fn test_pause_observes_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        assert!(pause(Duration::from_secs(60), &mut rx).await);

        let (_tx, mut rx) = watch::channel(false);
        assert!(!pause(Duration::from_millis(1), &mut rx).await);
    }
}
