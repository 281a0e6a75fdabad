//! ==============================================================================
//! system.rs - host statistics (cpu load, memory, cpu temperature)
//! ==============================================================================
//!
//! purpose:
//!     samples the machine the monitor runs on (usually a raspberry pi) so
//!     every stored reading also records how the host was doing, and serves
//!     the same numbers to /api/system.
//!
//! notes:
//!     - cpu usage is the load since the previous refresh; the very first
//!       sample after start-up may read 0
//!     - cpu temperature comes from the thermal zone in sysfs; hosts without
//!       one report it as absent, not as zero
//!
//! ==============================================================================

use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use sysinfo::System;

use crate::clock::{Clock, Timestamp};
use crate::domain::HostMetrics;

const THERMAL_ZONES: [&str; 2] = [
    "/sys/class/thermal/thermal_zone0/temp",
    "/sys/devices/virtual/thermal/thermal_zone0/temp",
];

#[derive(Clone, Debug, Serialize)]
pub struct SystemReport {
    #[serde(flatten)]
    pub metrics: HostMetrics,
    pub timestamp: Timestamp,
}

pub struct SystemMonitor {
    sys: Mutex<System>,
    clock: Arc<dyn Clock>,
}

impl SystemMonitor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();
        Self { sys: Mutex::new(sys), clock }
    }

    /// refresh and read the current host metrics
    pub fn sample(&self) -> HostMetrics {
        let mut sys = self.sys.lock().unwrap_or_else(|e| e.into_inner());
        sys.refresh_cpu();
        sys.refresh_memory();

        let cpu_usage_pct = Some(percent(f64::from(sys.global_cpu_info().cpu_usage())));
        let total = sys.total_memory();
        let ram_usage_pct = (total > 0).then(|| {
            let used = total.saturating_sub(sys.available_memory());
            percent(used as f64 / total as f64 * 100.0)
        });

        HostMetrics {
            cpu_usage_pct,
            ram_usage_pct,
            cpu_temp_c: read_cpu_temp(),
        }
    }

    pub fn report(&self) -> SystemReport {
        SystemReport {
            metrics: self.sample(),
            timestamp: self.clock.now(),
        }
    }
}

/// clamp to 0..=100 and round to one decimal
fn percent(value: f64) -> f64 {
    (value.clamp(0.0, 100.0) * 10.0).round() / 10.0
}

fn read_cpu_temp() -> Option<f64> {
    THERMAL_ZONES.iter().find_map(|zone| read_millidegrees(Path::new(zone)))
}

/// sysfs reports millidegrees celsius (e.g. 45000 = 45.0°C)
fn read_millidegrees(path: &Path) -> Option<f64> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .map(|milli| (milli / 100.0).round() / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[test]
    fn percent_clamps_and_rounds() {
        assert_eq!(percent(12.345), 12.3);
        assert_eq!(percent(-3.0), 0.0);
        assert_eq!(percent(140.0), 100.0);
    }

    #[test]
    fn millidegrees_are_converted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp");
        std::fs::write(&path, "48312\n").unwrap();
        assert_eq!(read_millidegrees(&path), Some(48.3));
        assert_eq!(read_millidegrees(&dir.path().join("missing")), None);
    }

    #[test]
    fn sample_stays_in_plausible_ranges() {
        let monitor = SystemMonitor::new(Arc::new(SystemClock::with_offset_hours(8)));
        let metrics = monitor.sample();
        if let Some(cpu) = metrics.cpu_usage_pct {
            assert!((0.0..=100.0).contains(&cpu));
        }
        if let Some(ram) = metrics.ram_usage_pct {
            assert!((0.0..=100.0).contains(&ram));
        }
    }
}
