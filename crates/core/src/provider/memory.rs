use super::Provider;
#[cfg(all(target_os = "linux", feature = "linux_procfs"))]
use procfs::Current;
use crate::{
    error::Result,
    model::{MemoryStats, MetricType, RawSample},
};
use sysinfo::System;

pub struct MemoryProvider {
    sys: System,
}

impl MemoryProvider {
    pub fn new() -> Result<Self> {
        let sys = System::new();

        Ok(Self { sys })
    }

    pub fn collect(&mut self) -> Result<MemoryStats> {
        #[cfg(all(target_os = "linux", feature = "linux_procfs"))]
        {
            match procfs::Meminfo::current() {
                Ok(meminfo) => return Ok(Self::from_meminfo(&meminfo)),
                Err(e) => tracing::debug!(error = %e, "meminfo unavailable, using sysinfo"),
            }
        }

        Ok(self.read_sysinfo())
    }

    /// `used` follows the `free(1)` convention of excluding buffers and page cache.
    #[cfg(all(target_os = "linux", feature = "linux_procfs"))]
    fn from_meminfo(meminfo: &procfs::Meminfo) -> MemoryStats {
        let total = meminfo.mem_total;
        let free = meminfo.mem_free;
        let used = total
            .saturating_sub(free)
            .saturating_sub(meminfo.buffers)
            .saturating_sub(meminfo.cached);

        MemoryStats {
            free,
            total,
            active: meminfo.active,
            cached: meminfo.cached,
            inactive: meminfo.inactive,
            swap_free: meminfo.swap_free,
            swap_total: meminfo.swap_total,
            swap_used: meminfo.swap_total.saturating_sub(meminfo.swap_free),
            used,
        }
    }

    // sysinfo has no active/inactive split; those stay zero.
    fn read_sysinfo(&mut self) -> MemoryStats {
        self.sys.refresh_memory();

        let total = self.sys.total_memory();
        let free = self.sys.free_memory();
        let available = self.sys.available_memory();
        let cached = available.saturating_sub(free);

        MemoryStats {
            free,
            total,
            active: 0,
            cached,
            inactive: 0,
            swap_free: self.sys.free_swap(),
            swap_total: self.sys.total_swap(),
            swap_used: self.sys.used_swap(),
            used: self.sys.used_memory(),
        }
    }
}

impl Provider for MemoryProvider {
    fn metric(&self) -> MetricType {
        MetricType::Mem
    }

    fn sample(&mut self) -> Result<RawSample> {
        self.collect().map(RawSample::Memory)
    }
}
