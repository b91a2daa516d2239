//! Process and host resource sampling

use std::sync::Mutex;

use sysinfo::{Pid, System};

/// Raw resource readings
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemSample {
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub process_rss_bytes: Option<u64>,
    pub load_average: [f64; 3],
    pub cpu_count: usize,
}

impl SystemSample {
    pub fn memory_usage_percent(&self) -> f64 {
        if self.memory_total_bytes == 0 {
            return 0.0;
        }
        self.memory_used_bytes as f64 / self.memory_total_bytes as f64 * 100.0
    }
}

pub trait SystemSampler: Send + Sync {
    fn sample(&self) -> SystemSample;
}

/// Samples the current host through `sysinfo`
pub struct HostSampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl HostSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();

        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot resolve own pid, process memory unavailable");
                None
            }
        };

        Self {
            system: Mutex::new(system),
            pid,
        }
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler for HostSampler {
    fn sample(&self) -> SystemSample {
        let mut system = self.system.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_memory();

        let process_rss_bytes = self.pid.and_then(|pid| {
            system.refresh_process(pid);
            system.process(pid).map(|p| p.memory())
        });

        let load = System::load_average();

        SystemSample {
            memory_used_bytes: system.used_memory(),
            memory_total_bytes: system.total_memory(),
            process_rss_bytes,
            load_average: [load.one, load.five, load.fifteen],
            cpu_count: system.cpus().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_percent() {
        let sample = SystemSample {
            memory_used_bytes: 3,
            memory_total_bytes: 4,
            ..Default::default()
        };
        assert_eq!(sample.memory_usage_percent(), 75.0);
        assert_eq!(SystemSample::default().memory_usage_percent(), 0.0);
    }

    #[test]
    fn test_host_sampler_reads_memory() {
        let sample = HostSampler::new().sample();
        assert!(sample.memory_total_bytes > 0);
        assert!(sample.memory_usage_percent() <= 100.0);
    }
}
