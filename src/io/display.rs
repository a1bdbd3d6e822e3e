//! Availability display sinks
//!
//! The sensor loop hands every sink the committed count once per cycle.
//! Sinks decide themselves whether anything changed.

use tracing::{info, trace};

/// Shows the "available / total" count somewhere
pub trait AvailabilityDisplay: Send {
    fn show(&mut self, available: usize, total: usize) -> anyhow::Result<()>;
}

/// Writes the count to the log, at info level only when it changes
#[derive(Debug, Default)]
pub struct LogDisplay {
    last: Option<(usize, usize)>,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AvailabilityDisplay for LogDisplay {
    fn show(&mut self, available: usize, total: usize) -> anyhow::Result<()> {
        if self.last == Some((available, total)) {
            trace!(available = available, total = total, "availability");
            return Ok(());
        }
        self.last = Some((available, total));
        info!(available = available, total = total, "Available: {}/{}", available, total);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::AvailabilityDisplay;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Display that records every call for assertions
    #[derive(Clone, Default)]
    pub struct RecordingDisplay {
        pub shown: Arc<Mutex<Vec<(usize, usize)>>>,
    }

    impl AvailabilityDisplay for RecordingDisplay {
        fn show(&mut self, available: usize, total: usize) -> anyhow::Result<()> {
            self.shown.lock().push((available, total));
            Ok(())
        }
    }
}
