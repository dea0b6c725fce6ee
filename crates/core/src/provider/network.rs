use super::Provider;
use crate::{
    error::Result,
    model::{InterfaceCounters, MetricType, RawSample},
};
use sysinfo::Networks;

/// Cumulative byte counters of every network interface.
pub struct NetworkProvider {
    networks: Networks,
}

impl NetworkProvider {
    pub fn new() -> Result<Self> {
        let networks = Networks::new_with_refreshed_list();

        Ok(Self { networks })
    }

    pub fn collect(&mut self) -> Result<Vec<InterfaceCounters>> {
        // Picks up interfaces plugged in since the last tick.
        self.networks.refresh_list();
        self.networks.refresh();

        let mut interfaces = Vec::new();
        for (interface_name, data) in &self.networks {
            interfaces.push(InterfaceCounters::new(
                interface_name.clone(),
                data.total_received(),
                data.total_transmitted(),
            ));
        }
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(interfaces)
    }
}

impl Provider for NetworkProvider {
    fn metric(&self) -> MetricType {
        MetricType::Net
    }

    fn sample(&mut self) -> Result<RawSample> {
        self.collect().map(RawSample::Network)
    }
}
