//! Resource Usage Monitoring
//!
//! Samples the engine process's CPU and memory while jobs run so the
//! final report can state what the run cost.

use std::time::{Duration, Instant};

use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, System};

/// One CPU/memory reading.
#[derive(Debug, Clone, Copy)]
pub struct UsageSample {
    /// CPU usage percentage (0-100 per core).
    pub cpu_percent: f32,
    /// Resident memory in megabytes.
    pub memory_mb: u64,
}

/// Samples resource usage of the current process.
///
/// The first call to [`sample`](ResourceMonitor::sample) only warms up
/// the CPU counters; real readings start with the second call. Calls
/// closer together than the sampling interval are ignored.
pub struct ResourceMonitor {
    system: System,
    pid: Pid,
    samples: Vec<UsageSample>,
    warmed_up: bool,
    last_sample: Option<Instant>,
    interval: Duration,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: get_current_pid().expect("Failed to get process ID"),
            samples: Vec::new(),
            warmed_up: false,
            last_sample: None,
            interval: Duration::from_millis(250),
        }
    }

    /// Overrides the minimum time between readings.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Takes one reading, or warms up the counters on the first call.
    pub fn sample(&mut self) {
        let now = Instant::now();
        let refresh = ProcessRefreshKind::new().with_cpu().with_memory();

        if !self.warmed_up {
            self.system.refresh_processes_specifics(refresh);
            self.warmed_up = true;
            self.last_sample = Some(now);
            return;
        }

        if let Some(last) = self.last_sample {
            if now.duration_since(last) < self.interval {
                return;
            }
        }

        self.system.refresh_processes_specifics(refresh);
        self.last_sample = Some(now);

        if let Some(process) = self.system.process(self.pid) {
            self.samples.push(UsageSample {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() / (1024 * 1024),
            });
        }
    }

    pub fn samples(&self) -> &[UsageSample] {
        &self.samples
    }

    pub fn peak_memory_mb(&self) -> u64 {
        self.samples.iter().map(|s| s.memory_mb).max().unwrap_or(0)
    }

    pub fn average_cpu(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.cpu_percent).sum::<f32>() / self.samples.len() as f32
    }

    /// One-line usage summary for the run report.
    pub fn summary(&self) -> String {
        if self.samples.is_empty() {
            return "no resource data collected".to_string();
        }
        format!(
            "peak memory {} MB, average CPU {:.1}% ({} samples)",
            self.peak_memory_mb(),
            self.average_cpu(),
            self.samples.len()
        )
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
