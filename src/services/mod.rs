//! Services - sensing and reconciliation logic
//!
//! - `pulse_timer` - Trigger a ping and time the echo pulse
//! - `sampler` - Pulse width to distance and occupancy
//! - `registry` - Last-committed occupancy per slot
//! - `reconciler` - Transactional updates of the shared slot record
//! - `sensor_loop` - Per-cycle orchestration of all slots

pub mod pulse_timer;
pub mod reconciler;
pub mod registry;
pub mod sampler;
pub mod sensor_loop;

// Re-export commonly used types
pub use pulse_timer::{Pulse, PulseTimer};
pub use reconciler::{ReconcileOutcome, ReconciliationEngine};
pub use registry::SlotRegistry;
pub use sampler::DistanceSampler;
pub use sensor_loop::SensorLoop;
