//! Distance sampling and occupancy classification

use crate::domain::types::{OccupancyReading, Sample, UnknownReason};
use crate::infra::config::Config;
use crate::io::gpio::SensorBinding;
use crate::services::pulse_timer::{Pulse, PulseTimer};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Round-trip centimeters per second of echo (speed of sound / 2)
pub const CM_PER_SECOND: f64 = 17150.0;

/// Echo width to distance, rounded to two decimals
#[inline]
pub fn distance_cm(width: Duration) -> f64 {
    (width.as_secs_f64() * CM_PER_SECOND * 100.0).round() / 100.0
}

pub struct DistanceSampler {
    timer: PulseTimer,
    threshold_cm: f64,
    min_cm: f64,
    max_cm: f64,
}

impl DistanceSampler {
    pub fn new(timer: PulseTimer, threshold_cm: f64, min_cm: f64, max_cm: f64) -> Self {
        Self { timer, threshold_cm, min_cm, max_cm }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            PulseTimer::new(config.trigger_pulse(), config.echo_timeout()),
            config.distance_threshold_cm(),
            config.min_distance_cm(),
            config.max_distance_cm(),
        )
    }

    /// Map an echo width to a sample. Bounds are exclusive.
    pub fn classify(&self, width: Duration) -> Sample {
        if width.is_zero() {
            return Sample::Unknown(UnknownReason::NonPositive);
        }
        let distance_cm = distance_cm(width);
        if distance_cm <= self.min_cm || distance_cm >= self.max_cm {
            return Sample::Unknown(UnknownReason::Implausible { distance_cm });
        }
        Sample::Known { distance_cm, available: distance_cm > self.threshold_cm }
    }

    /// Sample one slot's sensor
    pub fn sample(&self, binding: &mut SensorBinding) -> OccupancyReading {
        let measured = self.timer.measure(binding.trigger.as_mut(), binding.echo.as_mut());
        let sampled_at = Utc::now();

        let sample = match measured {
            Ok(Pulse::Width(width)) => self.classify(width),
            Ok(Pulse::Timeout) => Sample::Unknown(UnknownReason::Timeout),
            Err(e) => {
                // Leave the trigger low so the next ping starts clean
                let _ = binding.trigger.set_low();
                Sample::Unknown(UnknownReason::LineError(e.to_string()))
            }
        };

        match &sample {
            Sample::Known { distance_cm, available } => {
                trace!(slot = %binding.slot, distance_cm = distance_cm, available = available, "sample");
            }
            Sample::Unknown(UnknownReason::LineError(error)) => {
                warn!(slot = %binding.slot, error = %error, "sensor_line_error");
            }
            Sample::Unknown(UnknownReason::Implausible { distance_cm }) => {
                debug!(slot = %binding.slot, distance_cm = distance_cm, "sensor_implausible");
            }
            Sample::Unknown(reason) => {
                debug!(slot = %binding.slot, reason = reason.as_str(), "sensor_unknown");
            }
        }

        OccupancyReading { slot: binding.slot.clone(), sampled_at, sample }
    }
}
