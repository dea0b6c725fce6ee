use super::Provider;
#[cfg(all(target_os = "linux", feature = "linux_procfs"))]
use procfs::CurrentSI;
use crate::{
    error::Result,
    model::{CpuTimes, MetricType, RawSample},
};

/// Aggregate CPU time counters from `/proc/stat`.
pub struct CpuProvider {
    _private: (),
}

impl CpuProvider {
    #[cfg(all(target_os = "linux", feature = "linux_procfs"))]
    pub fn new() -> Result<Self> {
        // Fail at startup rather than on every tick if /proc/stat is unusable.
        procfs::KernelStats::current()?;
        Ok(Self { _private: () })
    }

    #[cfg(not(all(target_os = "linux", feature = "linux_procfs")))]
    pub fn new() -> Result<Self> {
        Err(crate::error::CoreError::unsupported_platform(
            "cumulative CPU counters need /proc/stat (linux_procfs feature)",
        ))
    }

    #[cfg(all(target_os = "linux", feature = "linux_procfs"))]
    fn read_times(&self) -> Result<CpuTimes> {
        let stat = procfs::KernelStats::current()?;
        let cpu = stat.total;

        let total = cpu.user
            + cpu.nice
            + cpu.system
            + cpu.idle
            + cpu.iowait.unwrap_or(0)
            + cpu.irq.unwrap_or(0)
            + cpu.softirq.unwrap_or(0)
            + cpu.steal.unwrap_or(0);

        Ok(CpuTimes {
            user: cpu.user,
            system: cpu.system,
            idle: cpu.idle,
            nice: cpu.nice,
            total,
        })
    }

    #[cfg(not(all(target_os = "linux", feature = "linux_procfs")))]
    fn read_times(&self) -> Result<CpuTimes> {
        Err(crate::error::CoreError::unsupported_platform(
            "cumulative CPU counters",
        ))
    }
}

impl Provider for CpuProvider {
    fn metric(&self) -> MetricType {
        MetricType::Cpu
    }

    fn sample(&mut self) -> Result<RawSample> {
        self.read_times().map(RawSample::Cpu)
    }
}
