//! Host metrics published on a fixed interval.
//!
//! A [`MetricsSampler`] reads the host counters, a [`SystemMetricsPublisher`]
//! turns them into `Cpu`, `MemoryUsed`, `BytesSent` and `BytesRecv` metrics,
//! and a [`SystemMetricsDaemon`] runs the publisher on a background thread.
//! None of this touches experiment state.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{MonitorError, Result};
use crate::monitor::Monitor;

/// Name of the publishing thread.
pub const DAEMON_THREAD_NAME: &str = "publish_sys_metrics";

/// One reading of the host counters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SystemSnapshot {
    /// Busy CPU share since the previous sample, in percent.
    pub cpu_percent: f64,
    pub memory_used_percent: f64,
    /// Cumulative bytes over all non-loopback interfaces.
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

pub trait MetricsSampler: Send {
    fn sample(&mut self) -> Result<SystemSnapshot>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

/// Reads `/proc/stat`, `/proc/meminfo` and `/proc/net/dev`.
#[derive(Debug)]
pub struct ProcfsSampler {
    root: PathBuf,
    last_cpu: Option<CpuTimes>,
}

impl Default for ProcfsSampler {
    fn default() -> Self {
        Self::with_root("/proc")
    }
}

impl ProcfsSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sampler reading a procfs tree mounted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            last_cpu: None,
        }
    }

    fn read(&self, relative: impl AsRef<Path>) -> Result<String> {
        Ok(std::fs::read_to_string(self.root.join(relative))?)
    }
}

impl MetricsSampler for ProcfsSampler {
    fn sample(&mut self) -> Result<SystemSnapshot> {
        let cpu = parse_cpu_times(&self.read("stat")?)?;
        let since = self.last_cpu.replace(cpu).unwrap_or_default();
        let (busy, total) = (
            cpu.busy.saturating_sub(since.busy),
            cpu.total.saturating_sub(since.total),
        );
        let cpu_percent = if total == 0 {
            0.0
        } else {
            busy as f64 / total as f64 * 100.0
        };

        let memory_used_percent = parse_memory_used_percent(&self.read("meminfo")?)?;
        let (bytes_sent, bytes_recv) = parse_net_bytes(&self.read("net/dev")?)?;

        Ok(SystemSnapshot {
            cpu_percent,
            memory_used_percent,
            bytes_sent,
            bytes_recv,
        })
    }
}

/// Aggregate `cpu` line of `/proc/stat`. Idle time is `idle + iowait`.
fn parse_cpu_times(stat: &str) -> Result<CpuTimes> {
    let line = stat
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| MonitorError::parse("/proc/stat", "missing aggregate cpu line"))?;
    let fields = line
        .split_whitespace()
        .skip(1)
        .map(str::parse::<u64>)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| MonitorError::parse("/proc/stat", e.to_string()))?;
    if fields.len() < 4 {
        return Err(MonitorError::parse("/proc/stat", "too few cpu fields"));
    }

    // guest and guest_nice are already part of user and nice
    let total: u64 = fields.iter().take(8).sum();
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Ok(CpuTimes {
        busy: total.saturating_sub(idle),
        total,
    })
}

fn parse_memory_used_percent(meminfo: &str) -> Result<f64> {
    let value = |key: &str| {
        meminfo
            .lines()
            .find_map(|l| l.strip_prefix(key))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|v| v.parse::<u64>().ok())
    };
    let total = value("MemTotal")
        .filter(|&t| t > 0)
        .ok_or_else(|| MonitorError::parse("/proc/meminfo", "missing MemTotal"))?;
    let available = match value("MemAvailable") {
        Some(available) => available,
        None => value("MemFree").unwrap_or(0) + value("Buffers").unwrap_or(0) + value("Cached").unwrap_or(0),
    };
    Ok(total.saturating_sub(available) as f64 / total as f64 * 100.0)
}

/// Sum of transmitted and received bytes over all interfaces except `lo`.
fn parse_net_bytes(net_dev: &str) -> Result<(u64, u64)> {
    let (mut sent, mut recv) = (0u64, 0u64);
    for line in net_dev.lines().skip(2) {
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let counters: Vec<&str> = counters.split_whitespace().collect();
        let field = |i: usize| -> Result<u64> {
            counters
                .get(i)
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| MonitorError::parse("/proc/net/dev", format!("bad counters for {}", iface.trim())))
        };
        recv += field(0)?;
        sent += field(8)?;
    }
    Ok((sent, recv))
}

/// Publishes one round of host metrics per [`publish`](Self::publish) call.
/// Network metrics are the bytes moved since the previous round.
pub struct SystemMetricsPublisher<S> {
    monitor: Monitor,
    sampler: S,
    last_bytes_sent: u64,
    last_bytes_recv: u64,
}

impl<S: MetricsSampler> SystemMetricsPublisher<S> {
    /// Takes a baseline sample so the first round reports deltas.
    pub fn new(monitor: Monitor, mut sampler: S) -> Result<Self> {
        let baseline = sampler.sample()?;
        Ok(Self {
            monitor,
            sampler,
            last_bytes_sent: baseline.bytes_sent,
            last_bytes_recv: baseline.bytes_recv,
        })
    }

    pub fn publish(&mut self) -> Result<()> {
        let snapshot = self.sampler.sample()?;
        self.monitor.add_metric("Cpu", snapshot.cpu_percent)?;
        self.monitor
            .add_metric("MemoryUsed", snapshot.memory_used_percent)?;

        let sent = snapshot.bytes_sent.saturating_sub(self.last_bytes_sent);
        let recv = snapshot.bytes_recv.saturating_sub(self.last_bytes_recv);
        self.monitor.add_metric("BytesSent", sent as f64)?;
        self.monitor.add_metric("BytesRecv", recv as f64)?;
        self.last_bytes_sent = snapshot.bytes_sent;
        self.last_bytes_recv = snapshot.bytes_recv;

        debug!(
            workspace_id = self.monitor.workspace_id(),
            cpu = snapshot.cpu_percent,
            memory = snapshot.memory_used_percent,
            sent,
            recv,
            "Published system metrics"
        );
        Ok(())
    }
}

impl SystemMetricsPublisher<ProcfsSampler> {
    pub fn procfs(monitor: Monitor) -> Result<Self> {
        Self::new(monitor, ProcfsSampler::new())
    }
}

/// Background thread publishing system metrics every interval.
///
/// The thread publishes once right away. Publishing failures are logged and
/// the loop keeps going. Dropping the handle stops the thread at its next
/// wake-up; [`stop`](Self::stop) also waits for it.
#[derive(Debug)]
pub struct SystemMetricsDaemon {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl SystemMetricsDaemon {
    pub fn start<S>(mut publisher: SystemMetricsPublisher<S>, interval: Duration) -> Result<Self>
    where
        S: MetricsSampler + 'static,
    {
        let (shutdown, shutdown_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(DAEMON_THREAD_NAME.to_string())
            .spawn(move || {
                info!(interval_secs = interval.as_secs(), "System metrics daemon started");
                loop {
                    if let Err(e) = publisher.publish() {
                        warn!(error = %e, "Failed to publish system metrics");
                    }
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("System metrics daemon stopped");
            })?;
        Ok(Self { shutdown, handle })
    }

    /// Start with the interval from `monitor.publish_interval_secs`.
    pub fn start_with_config(
        monitor: Monitor,
        config: &ntcore_core::config::MonitorConfig,
    ) -> Result<Self> {
        let publisher = SystemMetricsPublisher::procfs(monitor)?;
        Self::start(
            publisher,
            Duration::from_secs(config.publish_interval_secs.max(1)),
        )
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the thread and wait for it to exit.
    pub fn stop(self) {
        let _ = self.shutdown.send(());
        if self.handle.join().is_err() {
            warn!("System metrics daemon panicked");
        }
    }
}
