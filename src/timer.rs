use std::time::{Duration, Instant};

use log::debug;

/// Logs how long a pipeline stage took.
pub struct Timer {
    name: &'static str,
    started: Instant,
}

impl Timer {
    pub fn start(name: &'static str) -> Self {
        Timer {
            name,
            started: Instant::now(),
        }
    }

    pub fn stop(self) -> Duration {
        let elapsed = self.started.elapsed();
        debug!("{} took {} msec", self.name, elapsed.as_millis());
        elapsed
    }
}
