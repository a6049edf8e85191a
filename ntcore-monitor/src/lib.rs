//! # NTCore Monitor
//!
//! Monitoring for models deployed from an NTCore workspace: custom metrics,
//! ground truth for past predictions, log lines, host metrics published by a
//! background daemon, and per-call service metrics.
//!
//! ```no_run
//! use ntcore_monitor::{Monitor, ServiceMetrics, SystemMetricsDaemon, SystemMetricsPublisher};
//! use std::time::Duration;
//!
//! # fn main() -> ntcore_monitor::Result<()> {
//! let monitor = Monitor::from_env(None)?;
//! let daemon = SystemMetricsDaemon::start(
//!     SystemMetricsPublisher::procfs(monitor.clone())?,
//!     Duration::from_secs(60),
//! )?;
//!
//! let service = ServiceMetrics::new(monitor);
//! let prediction = service.track(|| Ok::<_, std::io::Error>(0.7))?;
//! # let _ = prediction;
//! daemon.stop();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod monitor;
pub mod service_metrics;
pub mod system_metrics;

pub use error::{MonitorError, Result};
pub use monitor::{ENDPOINT_ENV, Monitor, endpoint_override};
pub use service_metrics::ServiceMetrics;
pub use system_metrics::{
    MetricsSampler, ProcfsSampler, SystemMetricsDaemon, SystemMetricsPublisher, SystemSnapshot,
};
