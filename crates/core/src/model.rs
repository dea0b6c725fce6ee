use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of statistic being recorded. Selects both the provider that is
/// sampled and the sink that receives the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Cpu,
    #[serde(alias = "memory")]
    Mem,
    #[serde(alias = "network")]
    Net,
}

impl MetricType {
    pub const ALL: [MetricType; 3] = [MetricType::Cpu, MetricType::Mem, MetricType::Net];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Mem => "mem",
            Self::Net => "net",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The numeric forms are the selectors older stattrack releases used.
        match s.trim() {
            "cpu" | "0" => Ok(Self::Cpu),
            "mem" | "1" => Ok(Self::Mem),
            "net" | "2" => Ok(Self::Net),
            other => Err(CoreError::config(format!(
                "unknown metric type '{}' (expected cpu, mem or net)",
                other
            ))),
        }
    }
}

/// Cumulative CPU time counters, in clock ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub system: u64,
    pub idle: u64,
    pub nice: u64,
    pub total: u64,
}

/// Absolute memory figures in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub free: u64,
    pub total: u64,
    pub active: u64,
    pub cached: u64,
    pub inactive: u64,
    pub swap_free: u64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub used: u64,
}

/// Byte counters of one network interface, cumulative since boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl InterfaceCounters {
    pub fn new(name: impl Into<String>, rx_bytes: u64, tx_bytes: u64) -> Self {
        Self {
            name: name.into(),
            rx_bytes,
            tx_bytes,
        }
    }
}

/// Unprocessed provider output for one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum RawSample {
    Cpu(CpuTimes),
    Memory(MemoryStats),
    Network(Vec<InterfaceCounters>),
}

impl RawSample {
    pub fn metric(&self) -> MetricType {
        match self {
            Self::Cpu(_) => MetricType::Cpu,
            Self::Memory(_) => MetricType::Mem,
            Self::Network(_) => MetricType::Net,
        }
    }
}

/// Share of elapsed CPU time spent in each state, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuUsage {
    pub user_pct: f64,
    pub system_pct: f64,
    pub idle_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuMeasurement {
    pub timestamp: i64,
    pub user: u64,
    pub system: u64,
    pub idle: u64,
    pub nice: u64,
    pub total: u64,
    /// `None` when no earlier sample existed to compare against.
    pub usage: Option<CpuUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMeasurement {
    pub timestamp: i64,
    pub free: u64,
    pub total: u64,
    pub active: u64,
    pub cached: u64,
    pub inactive: u64,
    pub swap_free: u64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub used: u64,
    pub free_pct: f64,
}

/// How the byte figures of a [`NetworkMeasurement`] relate to the
/// interface counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    /// Bytes moved since the previous tick.
    Delta,
    /// Interface not seen before in this run; figures are absolute counters.
    FirstSeen,
    /// A counter went backwards; figures are the new absolute counters.
    Reset,
}

impl CounterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delta => "delta",
            Self::FirstSeen => "first_seen",
            Self::Reset => "reset",
        }
    }

    pub fn is_delta(self) -> bool {
        self == Self::Delta
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMeasurement {
    pub timestamp: i64,
    pub interface: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub kind: CounterKind,
}

/// Sink-ready record for one metric type at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric", rename_all = "lowercase")]
pub enum Measurement {
    Cpu(CpuMeasurement),
    Mem(MemoryMeasurement),
    Net(NetworkMeasurement),
}

impl Measurement {
    pub fn metric(&self) -> MetricType {
        match self {
            Self::Cpu(_) => MetricType::Cpu,
            Self::Mem(_) => MetricType::Mem,
            Self::Net(_) => MetricType::Net,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Cpu(m) => m.timestamp,
            Self::Mem(m) => m.timestamp,
            Self::Net(m) => m.timestamp,
        }
    }
}

impl From<CpuMeasurement> for Measurement {
    fn from(m: CpuMeasurement) -> Self {
        Self::Cpu(m)
    }
}

impl From<MemoryMeasurement> for Measurement {
    fn from(m: MemoryMeasurement) -> Self {
        Self::Mem(m)
    }
}

impl From<NetworkMeasurement> for Measurement {
    fn from(m: NetworkMeasurement) -> Self {
        Self::Net(m)
    }
}

/// Persistence backend selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Sqlite,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Csv
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csv => f.write_str("csv"),
            Self::Sqlite => f.write_str("sqlite"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(Self::Csv),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(CoreError::config(format!(
                "invalid output format '{}' (expected csv or sqlite)",
                other
            ))),
        }
    }
}
