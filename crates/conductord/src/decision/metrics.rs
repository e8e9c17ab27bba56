//! Host resource sampling for the resource-availability factor.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use sysinfo::System;

/// Snapshot of host load, each value in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub memory_pressure: f64,
    /// One-minute load average divided by CPU count
    pub load_ratio: f64,
}

impl ResourceSample {
    /// Combined host pressure, memory weighted heavier than load
    pub fn pressure(&self) -> f64 {
        (self.memory_pressure * 0.6 + self.load_ratio * 0.4).clamp(0.0, 1.0)
    }
}

pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> ResourceSample;
}

/// Samples the host through sysinfo, reusing a reading for `max_age`
pub struct SysinfoSampler {
    system: Mutex<System>,
    last: Mutex<Option<(Instant, ResourceSample)>>,
    max_age: Duration,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self::with_max_age(Duration::from_secs(2))
    }

    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            system: Mutex::new(System::new()),
            last: Mutex::new(None),
            max_age,
        }
    }

    fn read(&self) -> ResourceSample {
        let memory_pressure = match self.system.lock() {
            Ok(mut system) => {
                system.refresh_memory();
                let total = system.total_memory();
                if total == 0 {
                    0.0
                } else {
                    system.used_memory() as f64 / total as f64
                }
            }
            Err(_) => 0.0,
        };

        let cpus = num_cpus::get().max(1) as f64;
        let load_ratio = System::load_average().one / cpus;

        ResourceSample {
            memory_pressure: memory_pressure.clamp(0.0, 1.0),
            load_ratio: load_ratio.clamp(0.0, 1.0),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&self) -> ResourceSample {
        let now = Instant::now();
        if let Ok(last) = self.last.lock() {
            if let Some((at, sample)) = *last {
                if now.duration_since(at) < self.max_age {
                    return sample;
                }
            }
        }

        let sample = self.read();
        if let Ok(mut last) = self.last.lock() {
            *last = Some((now, sample));
        }
        sample
    }
}

/// Constant sample, for tests and hosts without metrics
pub struct FixedResourceSampler(pub ResourceSample);

impl ResourceSampler for FixedResourceSampler {
    fn sample(&self) -> ResourceSample {
        self.0
    }
}
