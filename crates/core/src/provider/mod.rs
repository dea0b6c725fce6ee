//! Sources of raw OS counters, one per metric type.

pub mod cpu;
pub mod memory;
pub mod network;

pub use cpu::CpuProvider;
pub use memory::MemoryProvider;
pub use network::NetworkProvider;

use crate::{
    error::Result,
    model::{MetricType, RawSample},
};

/// Synchronous source of raw counters for one metric type.
///
/// Calls may block on OS I/O; the sampler runs them off the async runtime
/// and bounds them with a timeout.
pub trait Provider: Send + 'static {
    fn metric(&self) -> MetricType;

    fn sample(&mut self) -> Result<RawSample>;
}

/// Builds the system provider for `metric`.
pub fn for_metric(metric: MetricType) -> Result<Box<dyn Provider>> {
    Ok(match metric {
        MetricType::Cpu => Box::new(CpuProvider::new()?),
        MetricType::Mem => Box::new(MemoryProvider::new()?),
        MetricType::Net => Box::new(NetworkProvider::new()?),
    })
}
