//! Scripted providers and in-memory sinks for tests.

use crate::{
    error::{CoreError, Result},
    model::{CpuMeasurement, CpuTimes, Measurement, MetricType, RawSample},
    provider::Provider,
    sink::Sink,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn cpu_measurement(timestamp: i64) -> Measurement {
    Measurement::Cpu(CpuMeasurement {
        timestamp,
        user: 0,
        system: 0,
        idle: 0,
        nice: 0,
        total: 0,
        usage: None,
    })
}

pub fn cpu_times(user: u64, system: u64, idle: u64, total: u64) -> RawSample {
    RawSample::Cpu(CpuTimes {
        user,
        system,
        idle,
        nice: 0,
        total,
    })
}

/// Replays a fixed list of provider results, then fails every call (or, in
/// ramp mode, produces ever-increasing CPU counters).
pub struct ScriptedProvider {
    metric: MetricType,
    script: VecDeque<Result<RawSample>>,
    ramp: Option<u64>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(metric: MetricType, samples: Vec<RawSample>) -> Self {
        Self {
            metric,
            script: samples.into_iter().map(Ok).collect(),
            ramp: None,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn cpu_ramp() -> Self {
        let mut provider = Self::new(MetricType::Cpu, Vec::new());
        provider.ramp = Some(0);
        provider
    }

    pub fn then_fail(mut self, message: &str) -> Self {
        self.script
            .push_back(Err(CoreError::provider(self.metric, message)));
        self
    }

    pub fn then(mut self, sample: RawSample) -> Self {
        self.script.push_back(Ok(sample));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Provider for ScriptedProvider {
    fn metric(&self) -> MetricType {
        self.metric
    }

    fn sample(&mut self) -> Result<RawSample> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if let Some(step) = self.ramp.as_mut() {
            *step += 1;
            let s = *step;
            return Ok(cpu_times(s * 3, s * 2, s * 5, s * 10));
        }
        self.script
            .pop_front()
            .unwrap_or_else(|| Err(CoreError::provider(self.metric, "script exhausted")))
    }
}

/// Keeps every written measurement in memory.
pub struct MemorySink {
    metric: MetricType,
    records: Arc<Mutex<Vec<Measurement>>>,
    closed: Arc<AtomicBool>,
    delay: Option<Duration>,
    fail_first: u32,
}

impl MemorySink {
    pub fn new(metric: MetricType) -> Self {
        Self {
            metric,
            records: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            delay: None,
            fail_first: 0,
        }
    }

    /// Every write blocks for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_first(mut self, writes: u32) -> Self {
        self.fail_first = writes;
        self
    }

    pub fn records(&self) -> Arc<Mutex<Vec<Measurement>>> {
        Arc::clone(&self.records)
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl Sink for MemorySink {
    fn metric(&self) -> MetricType {
        self.metric
    }

    fn location(&self) -> String {
        "memory".to_string()
    }

    fn write(&mut self, measurement: &Measurement) -> Result<()> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_first > 0 {
            self.fail_first -= 1;
            return Err(CoreError::sink(self.metric, "injected failure"));
        }
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(measurement.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
