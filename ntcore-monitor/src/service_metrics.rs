//! Request-level metrics for model serving code.

use std::fmt::Display;
use std::time::Instant;
use tracing::warn;

use crate::monitor::Monitor;

/// Records `Success` or `Error` and `Latency` (milliseconds) for each tracked
/// call. Metric delivery failures are logged and never change the call's
/// outcome.
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    monitor: Monitor,
}

impl ServiceMetrics {
    pub fn new(monitor: Monitor) -> Self {
        Self { monitor }
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Run `call` and publish its outcome and latency.
    pub fn track<T, E, F>(&self, call: F) -> Result<T, E>
    where
        E: Display,
        F: FnOnce() -> Result<T, E>,
    {
        let started = Instant::now();
        let result = call();
        match &result {
            Ok(_) => self.emit("Success", 1.0),
            Err(e) => {
                warn!(error = %e, "Tracked call failed");
                self.emit("Error", 1.0);
            }
        }
        self.emit("Latency", started.elapsed().as_millis() as f64);
        result
    }

    fn emit(&self, name: &str, value: f64) {
        if let Err(e) = self.monitor.add_metric(name, value) {
            warn!(metric = name, error = %e, "Failed to publish service metric");
        }
    }
}
