//! Simulated sensor lines
//!
//! Each simulated slot models an ultrasonic sensor: the falling edge of the
//! trigger pulse starts a ping, the echo line rises after a short lead time
//! and stays high for the round-trip time of the configured distance.
//! Indicators record their level so tests can observe them.

use crate::domain::types::SlotId;
use crate::infra::config::Config;
use crate::io::gpio::{InputLine, OutputLine, SensorBinding};
use crate::services::sampler::CM_PER_SECOND;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Delay between trigger falling edge and echo rising edge
const ECHO_LEAD: Duration = Duration::from_micros(200);

#[derive(Debug, Default)]
struct SensorState {
    /// `None` simulates a sensor that never answers
    distance_cm: Option<f64>,
    trigger_high: bool,
    pinged_at: Option<Instant>,
    /// Fail trigger and echo operations
    faulty: bool,
}

/// Shared handle to one simulated slot
#[derive(Clone)]
pub struct SimulatedSlot {
    pub slot: SlotId,
    sensor: Arc<Mutex<SensorState>>,
    indicator: Arc<AtomicBool>,
}

impl SimulatedSlot {
    pub fn new(slot: SlotId, distance_cm: Option<f64>) -> Self {
        Self {
            slot,
            sensor: Arc::new(Mutex::new(SensorState { distance_cm, ..Default::default() })),
            indicator: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Move the simulated obstacle
    pub fn set_distance(&self, distance_cm: Option<f64>) {
        self.sensor.lock().distance_cm = distance_cm;
    }

    /// Make the echo line fail reads
    pub fn set_faulty(&self, faulty: bool) {
        self.sensor.lock().faulty = faulty;
    }

    /// Current indicator level
    pub fn indicator_on(&self) -> bool {
        self.indicator.load(Ordering::Relaxed)
    }

    pub fn binding(&self) -> SensorBinding {
        SensorBinding::new(
            self.slot.clone(),
            Box::new(SimTrigger { sensor: self.sensor.clone() }),
            Box::new(SimEcho { sensor: self.sensor.clone() }),
            Box::new(SimIndicator { level: self.indicator.clone() }),
        )
    }
}

/// All simulated slots of a configuration
pub struct SimulatedBoard {
    slots: Vec<SimulatedSlot>,
}

impl SimulatedBoard {
    pub fn from_config(config: &Config) -> Self {
        let slots = config
            .slots()
            .iter()
            .map(|s| SimulatedSlot::new(SlotId::new(s.id.clone()), Some(s.simulated_distance_cm)))
            .collect();
        Self { slots }
    }

    pub fn slot(&self, id: &str) -> Option<&SimulatedSlot> {
        self.slots.iter().find(|s| s.slot.as_str() == id)
    }

    /// Bindings for the sensor loop, plus the board for observation
    pub fn into_bindings(self) -> (Vec<SensorBinding>, Self) {
        let bindings = self.slots.iter().map(SimulatedSlot::binding).collect();
        (bindings, self)
    }
}

fn fault() -> io::Error {
    io::Error::other("simulated line fault")
}

struct SimTrigger {
    sensor: Arc<Mutex<SensorState>>,
}

impl OutputLine for SimTrigger {
    fn set_high(&mut self) -> io::Result<()> {
        let mut state = self.sensor.lock();
        if state.faulty {
            return Err(fault());
        }
        state.trigger_high = true;
        Ok(())
    }

    fn set_low(&mut self) -> io::Result<()> {
        let mut state = self.sensor.lock();
        if state.trigger_high {
            state.pinged_at = Some(Instant::now());
        }
        state.trigger_high = false;
        Ok(())
    }
}

struct SimEcho {
    sensor: Arc<Mutex<SensorState>>,
}

impl InputLine for SimEcho {
    fn is_high(&mut self) -> io::Result<bool> {
        let state = self.sensor.lock();
        if state.faulty {
            return Err(fault());
        }
        let (Some(pinged_at), Some(distance_cm)) = (state.pinged_at, state.distance_cm) else {
            return Ok(false);
        };
        let width = Duration::from_secs_f64(distance_cm.max(0.0) / CM_PER_SECOND);
        let elapsed = pinged_at.elapsed();
        Ok(elapsed >= ECHO_LEAD && elapsed < ECHO_LEAD + width)
    }
}

struct SimIndicator {
    level: Arc<AtomicBool>,
}

impl OutputLine for SimIndicator {
    fn set_high(&mut self) -> io::Result<()> {
        self.level.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn set_low(&mut self) -> io::Result<()> {
        self.level.store(false, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_low_before_ping() {
        let slot = SimulatedSlot::new(SlotId::new("a"), Some(50.0));
        let mut binding = slot.binding();
        assert!(binding.echo.is_low().unwrap());
    }

    #[test]
    fn test_echo_pulse_after_trigger() {
        let slot = SimulatedSlot::new(SlotId::new("a"), Some(100.0));
        let mut binding = slot.binding();
        binding.trigger.set_high().unwrap();
        binding.trigger.set_low().unwrap();

        let deadline = Instant::now() + Duration::from_millis(50);
        let mut saw_high = false;
        while Instant::now() < deadline {
            if binding.echo.is_high().unwrap() {
                saw_high = true;
                break;
            }
        }
        assert!(saw_high);

        // 100cm round trip is ~5.8ms; well past it the line is low again
        std::thread::sleep(Duration::from_millis(10));
        assert!(binding.echo.is_low().unwrap());
    }

    #[test]
    fn test_silent_sensor_never_rises() {
        let slot = SimulatedSlot::new(SlotId::new("a"), None);
        let mut binding = slot.binding();
        binding.trigger.set_high().unwrap();
        binding.trigger.set_low().unwrap();
        std::thread::sleep(Duration::from_millis(1));
        assert!(binding.echo.is_low().unwrap());
    }

    #[test]
    fn test_indicator_and_release() {
        let slot = SimulatedSlot::new(SlotId::new("a"), Some(50.0));
        let mut binding = slot.binding();
        binding.indicator.set_state(true).unwrap();
        assert!(slot.indicator_on());
        binding.release();
        assert!(!slot.indicator_on());
    }

    #[test]
    fn test_faulty_echo_errors() {
        let slot = SimulatedSlot::new(SlotId::new("a"), Some(50.0));
        slot.set_faulty(true);
        let mut binding = slot.binding();
        assert!(binding.echo.is_high().is_err());
    }

    #[test]
    fn test_board_from_config() {
        let config = Config::default().with_simulated_distance("slotid2", 15.0);
        let (bindings, board) = SimulatedBoard::from_config(&config).into_bindings();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[1].slot, SlotId::new("slotid2"));
        assert!(board.slot("slotid2").is_some());
        assert!(board.slot("slotid9").is_none());
    }
}
