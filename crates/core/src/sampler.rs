//! Per-metric sampling loop.
//!
//! A sampler owns its provider and the baseline of the previous good raw
//! sample. On every tick it reads the provider, derives measurements against
//! the baseline, and hands them to its route in order.

use crate::{
    delta,
    dispatch::{Delivery, Route},
    error::{CoreError, Result},
    model::{Measurement, MetricType, RawSample},
    provider::Provider,
    scheduler::TickReceiver,
};
use chrono::Utc;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    /// Waiting for the next tick.
    Idle,
    /// Reading the provider and emitting the result.
    Sampling,
    /// Cancelled; the provider is never called again.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerReport {
    pub metric: MetricType,
    pub ticks: u64,
    pub emitted: u64,
    /// Ticks that produced nothing (provider failure or unusable counters).
    pub skipped: u64,
    /// Measurements the sink was no longer there to take.
    pub dropped: u64,
}

pub struct Sampler {
    metric: MetricType,
    provider: Arc<Mutex<Box<dyn Provider>>>,
    provider_timeout: Duration,
    baseline: Option<RawSample>,
    last_timestamp: i64,
    state: SamplerState,
    report: SamplerReport,
}

impl Sampler {
    pub fn new(provider: Box<dyn Provider>, provider_timeout: Duration) -> Self {
        let metric = provider.metric();
        Self {
            metric,
            provider: Arc::new(Mutex::new(provider)),
            provider_timeout,
            baseline: None,
            last_timestamp: i64::MIN,
            state: SamplerState::Idle,
            report: SamplerReport {
                metric,
                ticks: 0,
                emitted: 0,
                skipped: 0,
                dropped: 0,
            },
        }
    }

    pub fn metric(&self) -> MetricType {
        self.metric
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn baseline(&self) -> Option<&RawSample> {
        self.baseline.as_ref()
    }

    pub fn report(&self) -> SamplerReport {
        self.report
    }

    /// Samples on every tick until `cancel` fires or the clock stops.
    ///
    /// Cancellation is only observed between ticks: a tick that has started
    /// is emitted in full first.
    pub async fn run(
        mut self,
        mut ticks: TickReceiver,
        route: Route,
        cancel: CancellationToken,
    ) -> SamplerReport {
        info!(metric = %self.metric, "sampler started");

        loop {
            let tick = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                tick = ticks.next() => match tick {
                    Some(tick) => tick,
                    None => break,
                },
            };

            self.report.ticks += 1;
            match self.sample_once().await {
                Ok(measurements) => {
                    trace!(metric = %self.metric, seq = tick.seq, count = measurements.len(), "emitting");
                    self.emit(measurements, &route).await;
                    self.state = SamplerState::Idle;
                }
                Err(e) => {
                    self.report.skipped += 1;
                    warn!(metric = %self.metric, seq = tick.seq, error = %e, "tick skipped");
                }
            }
        }

        self.state = SamplerState::Stopped;
        info!(
            metric = %self.metric,
            ticks = self.report.ticks,
            emitted = self.report.emitted,
            skipped = self.report.skipped,
            dropped = self.report.dropped,
            "sampler stopped"
        );
        self.report
    }

    /// Reads the provider once and derives this tick's measurements.
    ///
    /// On success the sampler stays in [`SamplerState::Sampling`] until the
    /// caller has emitted the result. On failure it is back to idle and the
    /// baseline is left as it was, so the next good tick is compared against
    /// the last good sample.
    pub async fn sample_once(&mut self) -> Result<Vec<Measurement>> {
        if self.state == SamplerState::Stopped {
            return Err(CoreError::provider(self.metric, "sampler is stopped"));
        }

        self.state = SamplerState::Sampling;
        let timestamp = self.next_timestamp();
        let result = match self.fetch().await {
            Ok(raw) => self.derive(raw, timestamp),
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.state = SamplerState::Idle;
        }
        result
    }

    fn derive(&mut self, raw: RawSample, timestamp: i64) -> Result<Vec<Measurement>> {
        match delta::compute(self.metric, self.baseline.as_ref(), &raw, timestamp) {
            Ok(measurements) => {
                self.baseline = Some(raw);
                Ok(measurements)
            }
            Err(e) => {
                if e.rebaselines() {
                    debug!(metric = %self.metric, error = %e, "counters restarted, new baseline");
                    self.baseline = Some(raw);
                }
                Err(e.into())
            }
        }
    }

    /// Wall-clock seconds, never earlier than the previous tick's.
    fn next_timestamp(&mut self) -> i64 {
        let now = Utc::now().timestamp().max(self.last_timestamp);
        self.last_timestamp = now;
        now
    }

    /// Runs the provider on the blocking pool, bounded by the provider
    /// timeout. A call that overruns keeps the provider locked; later ticks
    /// fail fast with `ProviderBusy` until it returns.
    async fn fetch(&self) -> Result<RawSample> {
        let metric = self.metric;
        let provider = Arc::clone(&self.provider);
        let call = tokio::task::spawn_blocking(move || {
            let mut provider = match provider.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return Err(CoreError::ProviderBusy(metric)),
            };
            provider.sample()
        });

        match tokio::time::timeout(self.provider_timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(CoreError::provider(
                metric,
                format!("provider call aborted: {}", join_error),
            )),
            Err(_) => Err(CoreError::ProviderTimeout {
                metric,
                timeout: self.provider_timeout,
            }),
        }
    }

    async fn emit(&mut self, measurements: Vec<Measurement>, route: &Route) {
        for measurement in measurements {
            match route.deliver(measurement).await {
                Ok(Delivery::Delivered) => self.report.emitted += 1,
                Ok(Delivery::Dropped) => {
                    self.report.dropped += 1;
                    debug!(metric = %self.metric, "sink gone, measurement dropped");
                }
                Err(e) => {
                    self.report.dropped += 1;
                    error!(metric = %self.metric, error = %e, "measurement not routable");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::model::{CounterKind, InterfaceCounters};
    use crate::scheduler::Scheduler;
    use crate::testing::{cpu_times, ScriptedProvider};
    use std::sync::atomic::Ordering;

    const TIMEOUT: Duration = Duration::from_millis(200);

    fn sampler(provider: ScriptedProvider) -> Sampler {
        Sampler::new(Box::new(provider), TIMEOUT)
    }

    fn cpu_usage(m: &Measurement) -> Option<crate::model::CpuUsage> {
        match m {
            Measurement::Cpu(cpu) => cpu.usage,
            other => panic!("expected cpu measurement, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn first_cpu_tick_has_no_usage() {
        let mut s = sampler(ScriptedProvider::new(
            MetricType::Cpu,
            vec![cpu_times(50, 20, 30, 100), cpu_times(120, 40, 40, 200)],
        ));

        let first = s.sample_once().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(cpu_usage(&first[0]), None);

        let second = s.sample_once().await.unwrap();
        let usage = cpu_usage(&second[0]).unwrap();
        assert!((usage.user_pct - 70.0).abs() < 1e-9);
        assert_eq!(s.state(), SamplerState::Sampling);
    }

    #[tokio::test]
    async fn provider_failure_keeps_the_last_good_baseline() {
        let provider = ScriptedProvider::new(MetricType::Cpu, vec![cpu_times(10, 10, 10, 100)])
            .then_fail("stat unavailable")
            .then(cpu_times(60, 20, 20, 200));
        let mut s = sampler(provider);

        s.sample_once().await.unwrap();
        let err = s.sample_once().await.unwrap_err();
        assert!(matches!(err, CoreError::Provider { .. }));
        assert_eq!(s.state(), SamplerState::Idle);
        assert_eq!(s.baseline(), Some(&cpu_times(10, 10, 10, 100)));

        let usage = cpu_usage(&s.sample_once().await.unwrap()[0]).unwrap();
        assert!((usage.user_pct - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn frozen_cpu_counters_skip_the_tick() {
        let mut s = sampler(ScriptedProvider::new(
            MetricType::Cpu,
            vec![
                cpu_times(10, 10, 10, 100),
                cpu_times(10, 10, 10, 100),
                cpu_times(20, 10, 20, 120),
            ],
        ));

        s.sample_once().await.unwrap();
        let err = s.sample_once().await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Delta(delta::DeltaError::DivisionDegenerate { .. })
        ));
        let usage = cpu_usage(&s.sample_once().await.unwrap()[0]).unwrap();
        assert!((usage.user_pct - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn slow_provider_times_out_then_reports_busy() {
        let provider = ScriptedProvider::new(MetricType::Cpu, vec![cpu_times(1, 1, 1, 3)])
            .with_delay(Duration::from_millis(300));
        let calls = provider.calls();
        let mut s = Sampler::new(Box::new(provider), Duration::from_millis(50));

        let err = s.sample_once().await.unwrap_err();
        assert!(matches!(err, CoreError::ProviderTimeout { .. }));
        assert!(matches!(
            s.sample_once().await.unwrap_err(),
            CoreError::ProviderBusy(MetricType::Cpu)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(s.baseline(), None);
    }

    #[tokio::test]
    async fn network_counter_reset_is_flagged() {
        let mut s = sampler(ScriptedProvider::new(
            MetricType::Net,
            vec![
                RawSample::Network(vec![InterfaceCounters::new("eth0", 5_000, 100)]),
                RawSample::Network(vec![InterfaceCounters::new("eth0", 10, 200)]),
                RawSample::Network(vec![InterfaceCounters::new("eth0", 60, 260)]),
            ],
        ));

        let kinds: Vec<(CounterKind, u64)> = {
            let mut out = Vec::new();
            for _ in 0..3 {
                for m in s.sample_once().await.unwrap() {
                    if let Measurement::Net(net) = m {
                        out.push((net.kind, net.rx_bytes));
                    }
                }
            }
            out
        };
        assert_eq!(
            kinds,
            vec![
                (CounterKind::FirstSeen, 5_000),
                (CounterKind::Reset, 10),
                (CounterKind::Delta, 50),
            ]
        );
    }

    #[tokio::test]
    async fn run_emits_in_order_and_stops_on_cancel() {
        let mut dispatcher = Dispatcher::new(8).unwrap();
        let mut rx = dispatcher.register(MetricType::Cpu).unwrap();
        let route = dispatcher.route(MetricType::Cpu).unwrap();

        let provider = ScriptedProvider::cpu_ramp();
        let calls = provider.calls();
        let scheduler = Scheduler::new(Duration::from_millis(10));
        let ticks = scheduler.subscribe();
        let cancel = CancellationToken::new();

        let clock = tokio::spawn(scheduler.run(cancel.clone()));
        let task = tokio::spawn(sampler(provider).run(ticks, route, cancel.clone()));

        let mut totals = Vec::new();
        for _ in 0..3 {
            match rx.recv().await.unwrap() {
                Measurement::Cpu(cpu) => totals.push(cpu.total),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(totals.windows(2).all(|w| w[0] < w[1]));

        cancel.cancel();
        // A sampler blocked on a full buffer only gets to the cancel check
        // once its delivery resolves.
        drop(rx);
        let report = task.await.unwrap();
        clock.await.unwrap();

        let calls_at_stop = calls.load(Ordering::SeqCst);
        assert_eq!(report.ticks as usize, calls_at_stop);
        assert!(report.emitted >= 3);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(calls.load(Ordering::SeqCst), calls_at_stop);
    }
}
