//! System memory sampling.
//!
//! The merge loop only needs two numbers per sample: how much memory the
//! machine has and how much of it is still available. Everything else (used
//! percentage, watermark checks) is derived from those.

use log::debug;

/// Point-in-time view of system memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemorySnapshot {
    pub fn new(total_bytes: u64, available_bytes: u64) -> Self {
        Self {
            total_bytes,
            available_bytes: available_bytes.min(total_bytes),
        }
    }

    /// Snapshot of a machine with `total_bytes` of memory at `used_percent` usage.
    pub fn at_usage(total_bytes: u64, used_percent: f64) -> Self {
        let used = used_percent.clamp(0.0, 100.0) / 100.0;
        let available = (total_bytes as f64 * (1.0 - used)).round() as u64;
        Self::new(total_bytes, available)
    }

    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        let used = self.total_bytes - self.available_bytes;
        used as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Source of memory readings. Implementations must not cache.
pub trait MemorySampler: Sync {
    fn sample(&self) -> MemorySnapshot;
}

/// Reads the live system state.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl MemorySampler for SystemMemory {
    fn sample(&self) -> MemorySnapshot {
        let snapshot = read_system_memory();
        debug!(
            "Memory sample: {:.1}% used, {} MiB available of {} MiB",
            snapshot.used_percent(),
            snapshot.available_bytes / MIB,
            snapshot.total_bytes / MIB
        );
        snapshot
    }
}

const MIB: u64 = 1024 * 1024;

#[cfg(target_os = "linux")]
fn read_system_memory() -> MemorySnapshot {
    match std::fs::read_to_string("/proc/meminfo") {
        Ok(content) => parse_meminfo(&content).unwrap_or_else(fallback_memory),
        Err(_) => fallback_memory(),
    }
}

#[cfg(not(target_os = "linux"))]
fn read_system_memory() -> MemorySnapshot {
    fallback_memory()
}

/// Parse `MemTotal` and `MemAvailable` (falling back to `MemFree`) from
/// `/proc/meminfo` content. Values there are in kB.
pub fn parse_meminfo(content: &str) -> Option<MemorySnapshot> {
    let mut total = None;
    let mut available = None;
    let mut free = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let key = parts.next();
        let value = parts.next().and_then(|v| v.parse::<u64>().ok());
        match (key, value) {
            (Some("MemTotal:"), Some(kb)) => total = Some(kb * 1024),
            (Some("MemAvailable:"), Some(kb)) => available = Some(kb * 1024),
            (Some("MemFree:"), Some(kb)) => free = Some(kb * 1024),
            _ => {}
        }
    }

    let total = total?;
    Some(MemorySnapshot::new(total, available.or(free)?))
}

/// 8 GiB machine, half in use.
fn fallback_memory() -> MemorySnapshot {
    let total = 8 * 1024 * MIB;
    MemorySnapshot::new(total, total / 2)
}
