pub mod config;
pub mod delta;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod sampler;
pub mod scheduler;
pub mod sink;

#[cfg(test)]
mod testing;

pub use config::{CliConfig, Config};
pub use dispatch::{Dispatcher, RouteStats};
pub use error::{CoreError, Result};
pub use model::*;
pub use orchestrator::{shutdown_signal, Orchestrator, Pipeline, RunSummary, StopReason};
pub use provider::Provider;
pub use sampler::{Sampler, SamplerReport};
pub use scheduler::Scheduler;
pub use sink::{HealthEvent, Sink, SinkReport, SinkRunner};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.interval_ms, 1000);
        assert_eq!(config.format, OutputFormat::Csv);
        assert_eq!(config.duration_secs, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_metric_type_parse() {
        assert_eq!("cpu".parse::<MetricType>().unwrap(), MetricType::Cpu);
        assert_eq!("1".parse::<MetricType>().unwrap(), MetricType::Mem);
        assert_eq!("net".parse::<MetricType>().unwrap(), MetricType::Net);
        assert!("disk".parse::<MetricType>().is_err());
    }

    #[test]
    fn test_measurement_serialization() {
        let measurement = Measurement::Net(NetworkMeasurement {
            timestamp: 1_700_000_000,
            interface: "eth0".to_string(),
            rx_bytes: 1024,
            tx_bytes: 512,
            kind: CounterKind::FirstSeen,
        });

        let json = serde_json::to_string(&measurement);
        assert!(json.is_ok());

        let deserialized: std::result::Result<Measurement, _> = serde_json::from_str(&json.unwrap());
        assert_eq!(deserialized.unwrap(), measurement);
    }
}
