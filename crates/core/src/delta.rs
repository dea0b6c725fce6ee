//! Turns raw counters into measurements.
//!
//! Everything in here is a pure function of its inputs: the caller owns the
//! baseline and decides what to do with a failed computation.

use crate::model::{
    CounterKind, CpuMeasurement, CpuTimes, CpuUsage, InterfaceCounters, Measurement,
    MemoryMeasurement, MemoryStats, MetricType, NetworkMeasurement, RawSample,
};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeltaError {
    /// No CPU time elapsed between the two samples.
    #[error("total CPU ticks did not advance (both samples at {total})")]
    DivisionDegenerate { total: u64 },

    #[error("total memory reported as zero")]
    InvalidTotal,

    /// A cumulative counter went backwards.
    #[error("{field} counter went backwards ({previous} -> {current})")]
    CounterRegression {
        field: &'static str,
        previous: u64,
        current: u64,
    },

    #[error("expected a {expected} sample, got {actual}")]
    MetricMismatch {
        expected: MetricType,
        actual: MetricType,
    },
}

impl DeltaError {
    /// The current sample is good and should replace the baseline even
    /// though nothing could be derived from it.
    pub fn rebaselines(&self) -> bool {
        matches!(self, Self::CounterRegression { .. })
    }
}

/// Delta of a cumulative counter, `None` when it went backwards.
fn du64(current: u64, previous: u64) -> Option<u64> {
    current.checked_sub(previous)
}

fn regression(field: &'static str, current: u64, previous: u64) -> DeltaError {
    DeltaError::CounterRegression {
        field,
        previous,
        current,
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    part as f64 / whole as f64 * 100.0
}

/// CPU usage over the interval between `previous` and `current`.
///
/// Without a previous sample the measurement carries the raw counters and no
/// usage figures.
pub fn cpu(
    previous: Option<&CpuTimes>,
    current: &CpuTimes,
    timestamp: i64,
) -> Result<CpuMeasurement, DeltaError> {
    let usage = match previous {
        None => None,
        Some(prev) => {
            let total = du64(current.total, prev.total)
                .ok_or_else(|| regression("total", current.total, prev.total))?;
            if total == 0 {
                return Err(DeltaError::DivisionDegenerate {
                    total: current.total,
                });
            }
            let user = du64(current.user, prev.user)
                .ok_or_else(|| regression("user", current.user, prev.user))?;
            let system = du64(current.system, prev.system)
                .ok_or_else(|| regression("system", current.system, prev.system))?;
            let idle = du64(current.idle, prev.idle)
                .ok_or_else(|| regression("idle", current.idle, prev.idle))?;

            Some(CpuUsage {
                user_pct: percent(user, total),
                system_pct: percent(system, total),
                idle_pct: percent(idle, total),
            })
        }
    };

    Ok(CpuMeasurement {
        timestamp,
        user: current.user,
        system: current.system,
        idle: current.idle,
        nice: current.nice,
        total: current.total,
        usage,
    })
}

/// Memory figures are absolute, so no baseline is involved.
pub fn memory(current: &MemoryStats, timestamp: i64) -> Result<MemoryMeasurement, DeltaError> {
    if current.total == 0 {
        return Err(DeltaError::InvalidTotal);
    }

    Ok(MemoryMeasurement {
        timestamp,
        free: current.free,
        total: current.total,
        active: current.active,
        cached: current.cached,
        inactive: current.inactive,
        swap_free: current.swap_free,
        swap_total: current.swap_total,
        swap_used: current.swap_used,
        used: current.used,
        free_pct: percent(current.free, current.total),
    })
}

/// Traffic of one interface since its previous sample.
pub fn interface(
    previous: Option<&InterfaceCounters>,
    current: &InterfaceCounters,
    timestamp: i64,
) -> NetworkMeasurement {
    let (rx_bytes, tx_bytes, kind) = match previous {
        None => (current.rx_bytes, current.tx_bytes, CounterKind::FirstSeen),
        Some(prev) => match (
            du64(current.rx_bytes, prev.rx_bytes),
            du64(current.tx_bytes, prev.tx_bytes),
        ) {
            (Some(rx), Some(tx)) => (rx, tx, CounterKind::Delta),
            _ => (current.rx_bytes, current.tx_bytes, CounterKind::Reset),
        },
    };

    NetworkMeasurement {
        timestamp,
        interface: current.name.clone(),
        rx_bytes,
        tx_bytes,
        kind,
    }
}

/// Per-interface traffic for every interface in `current`, in provider order.
pub fn network(
    previous: Option<&[InterfaceCounters]>,
    current: &[InterfaceCounters],
    timestamp: i64,
) -> Vec<NetworkMeasurement> {
    let previous: HashMap<&str, &InterfaceCounters> = previous
        .unwrap_or_default()
        .iter()
        .map(|counters| (counters.name.as_str(), counters))
        .collect();

    current
        .iter()
        .map(|counters| interface(previous.get(counters.name.as_str()).copied(), counters, timestamp))
        .collect()
}

/// Derives the measurements for `current` against the previous raw sample of
/// the same metric type.
pub fn compute(
    metric: MetricType,
    previous: Option<&RawSample>,
    current: &RawSample,
    timestamp: i64,
) -> Result<Vec<Measurement>, DeltaError> {
    let mismatch = |actual: MetricType| DeltaError::MetricMismatch {
        expected: metric,
        actual,
    };
    if current.metric() != metric {
        return Err(mismatch(current.metric()));
    }
    if let Some(prev) = previous {
        if prev.metric() != metric {
            return Err(mismatch(prev.metric()));
        }
    }

    match (previous, current) {
        (prev, RawSample::Cpu(curr)) => {
            let prev = match prev {
                Some(RawSample::Cpu(p)) => Some(p),
                _ => None,
            };
            Ok(vec![cpu(prev, curr, timestamp)?.into()])
        }
        (_, RawSample::Memory(curr)) => Ok(vec![memory(curr, timestamp)?.into()]),
        (prev, RawSample::Network(curr)) => {
            let prev = match prev {
                Some(RawSample::Network(p)) => Some(p.as_slice()),
                _ => None,
            };
            Ok(network(prev, curr, timestamp)
                .into_iter()
                .map(Measurement::from)
                .collect())
        }
    }
}
