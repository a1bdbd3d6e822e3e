//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `gpio` - Line traits and per-slot sensor bindings
//! - `sysfs_gpio` - Linux sysfs GPIO backend
//! - `sim_gpio` - Simulated sensors for development and tests
//! - `store` - Shared slot record storage (memory, HTTP)
//! - `store_server` - HTTP document store server (for `mock_slotstore`)
//! - `display` - Availability display sinks
//! - `mqtt_display` - Retained MQTT availability status
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod display;
pub mod gpio;
pub mod mqtt_display;
pub mod prometheus;
pub mod sim_gpio;
pub mod store;
pub mod store_server;
pub mod sysfs_gpio;

// Re-export commonly used types
pub use display::{AvailabilityDisplay, LogDisplay};
pub use gpio::{open_bindings, InputLine, OutputLine, SensorBinding};
pub use mqtt_display::MqttDisplay;
pub use sim_gpio::{SimulatedBoard, SimulatedSlot};
pub use store::{build_store, HttpStore, MemoryStore, SlotStore, StoreError, Versioned};
