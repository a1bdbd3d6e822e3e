//! Echo pulse timing
//!
//! Triggers an ultrasonic ping and measures how long the echo line stays
//! high. The echo line is busy-polled with no sleep between reads (1 cm of
//! range is ~58 µs of round trip). Both waits are bounded by an absolute
//! deadline computed once on entry; a dead or stuck sensor costs at most two
//! echo windows.

use crate::io::gpio::{InputLine, OutputLine};
use std::io;
use std::time::{Duration, Instant};

/// Result of one measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pulse {
    /// Echo high time; zero when no interval could be observed
    Width(Duration),
    /// An echo edge did not arrive inside its window
    Timeout,
}

#[derive(Debug, Clone, Copy)]
pub struct PulseTimer {
    trigger_width: Duration,
    echo_window: Duration,
}

impl PulseTimer {
    pub fn new(trigger_width: Duration, echo_window: Duration) -> Self {
        Self { trigger_width, echo_window }
    }

    /// Fire one ping and time its echo.
    ///
    /// Line failures are returned as errors; a missing echo is `Ok(Timeout)`.
    pub fn measure(
        &self,
        trigger: &mut dyn OutputLine,
        echo: &mut dyn InputLine,
    ) -> io::Result<Pulse> {
        let called_at = Instant::now();

        trigger.set_high()?;
        let trigger_end = called_at + self.trigger_width;
        while Instant::now() < trigger_end {
            std::hint::spin_loop();
        }
        trigger.set_low()?;

        let rise_deadline = called_at + self.echo_window;
        let pulse_start = loop {
            if echo.is_high()? {
                break Instant::now();
            }
            if Instant::now() >= rise_deadline {
                return Ok(Pulse::Timeout);
            }
        };

        let fall_deadline = pulse_start + self.echo_window;
        let pulse_end = loop {
            if echo.is_low()? {
                break Instant::now();
            }
            if Instant::now() >= fall_deadline {
                return Ok(Pulse::Timeout);
            }
        };

        Ok(Pulse::Width(pulse_end.saturating_duration_since(pulse_start)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SlotId;
    use crate::io::sim_gpio::SimulatedSlot;

    struct StuckInput(bool);

    impl InputLine for StuckInput {
        fn is_high(&mut self) -> io::Result<bool> {
            Ok(self.0)
        }
    }

    struct NullOutput;

    impl OutputLine for NullOutput {
        fn set_high(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn set_low(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenInput;

    impl InputLine for BrokenInput {
        fn is_high(&mut self) -> io::Result<bool> {
            Err(io::Error::other("EIO"))
        }
    }

    fn timer() -> PulseTimer {
        PulseTimer::new(Duration::from_micros(10), Duration::from_millis(100))
    }

    #[test]
    fn test_never_rising_echo_times_out() {
        let started = Instant::now();
        let pulse = timer().measure(&mut NullOutput, &mut StuckInput(false)).unwrap();
        let elapsed = started.elapsed();

        assert_eq!(pulse, Pulse::Timeout);
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(500), "took {:?}", elapsed);
    }

    #[test]
    fn test_stuck_high_echo_times_out() {
        let started = Instant::now();
        let pulse = timer().measure(&mut NullOutput, &mut StuckInput(true)).unwrap();

        assert_eq!(pulse, Pulse::Timeout);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_line_error_propagates() {
        assert!(timer().measure(&mut NullOutput, &mut BrokenInput).is_err());
    }

    #[test]
    fn test_simulated_echo_width() {
        // 100 cm -> 100 / 17150 s ≈ 5.83 ms
        let slot = SimulatedSlot::new(SlotId::new("a"), Some(100.0));
        let mut binding = slot.binding();

        let pulse = timer().measure(binding.trigger.as_mut(), binding.echo.as_mut()).unwrap();
        let Pulse::Width(width) = pulse else {
            panic!("expected a width, got {:?}", pulse);
        };
        assert!(width >= Duration::from_millis(4), "width {:?}", width);
        assert!(width < Duration::from_millis(20), "width {:?}", width);
    }
}
