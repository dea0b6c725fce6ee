//! Wires providers and sinks into a running recorder and shuts it down in
//! two phases: samplers first, sinks after.
//!
//! Sinks are only told to drain once every sampler has stopped, so nothing a
//! sampler produced can be left behind in a channel nobody reads.

use crate::{
    config::Config,
    dispatch::{Dispatcher, RouteStats},
    error::{CoreError, Result},
    model::MetricType,
    provider::Provider,
    sampler::{Sampler, SamplerReport},
    scheduler::Scheduler,
    sink::{HealthEvent, Sink, SinkReport, SinkRunner},
};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    DurationElapsed,
    Interrupted,
    SinkFailure(MetricType),
}

/// A provider and the sink that records its output.
pub struct Pipeline {
    provider: Box<dyn Provider>,
    sink: Box<dyn Sink>,
}

impl Pipeline {
    pub fn new(provider: Box<dyn Provider>, sink: Box<dyn Sink>) -> Result<Self> {
        if provider.metric() != sink.metric() {
            return Err(CoreError::config(format!(
                "{} provider paired with a {} sink",
                provider.metric(),
                sink.metric()
            )));
        }
        Ok(Self { provider, sink })
    }

    pub fn metric(&self) -> MetricType {
        self.provider.metric()
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub reason: StopReason,
    pub samplers: Vec<SamplerReport>,
    pub sinks: Vec<SinkReport>,
    pub dispatch: Vec<RouteStats>,
}

impl RunSummary {
    pub fn persisted(&self) -> u64 {
        self.sinks.iter().map(|s| s.persisted).sum()
    }

    pub fn dropped(&self) -> u64 {
        self.dispatch.iter().map(|d| d.dropped).sum()
    }
}

pub struct Orchestrator {
    config: Config,
    pipelines: Vec<Pipeline>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            pipelines: Vec::new(),
        }
    }

    pub fn add(&mut self, pipeline: Pipeline) -> Result<()> {
        if self.pipelines.iter().any(|p| p.metric() == pipeline.metric()) {
            return Err(CoreError::config(format!(
                "{} is already being recorded",
                pipeline.metric()
            )));
        }
        self.pipelines.push(pipeline);
        Ok(())
    }

    pub fn metrics(&self) -> Vec<MetricType> {
        self.pipelines.iter().map(Pipeline::metric).collect()
    }

    /// Records until `stop` resolves (or a sink turns unhealthy and the
    /// configuration says to give up), then shuts down.
    pub async fn run<F>(self, stop: F) -> Result<RunSummary>
    where
        F: Future<Output = StopReason>,
    {
        let Orchestrator { config, pipelines } = self;
        if pipelines.is_empty() {
            return Err(CoreError::config("nothing to record"));
        }

        let grace = config.shutdown_grace();
        let mut dispatcher = Dispatcher::new(config.channel_capacity)?;

        let mut parts = Vec::with_capacity(pipelines.len());
        for pipeline in pipelines {
            let rx = dispatcher.register(pipeline.metric())?;
            parts.push((pipeline, rx));
        }

        // Cancelled on every exit path; the normal path cancels it explicitly
        // once the samplers are gone.
        let drain = CancellationToken::new();
        let _drain_on_exit = drain.clone().drop_guard();
        let stop_sampling = CancellationToken::new();
        let _stop_on_exit = stop_sampling.clone().drop_guard();

        let (health_tx, mut health_rx) = mpsc::channel(16);
        let scheduler = Scheduler::new(config.interval());
        let mut sinks = Vec::with_capacity(parts.len());
        let mut samplers = Vec::with_capacity(parts.len());

        for (pipeline, rx) in parts {
            let metric = pipeline.metric();
            let runner = SinkRunner::new(pipeline.sink, rx, drain.clone())
                .with_health(health_tx.clone(), config.sink_failure_limit);
            sinks.push((metric, tokio::spawn(runner.start())));

            let route = dispatcher.route(metric)?;
            let sampler = Sampler::new(pipeline.provider, config.provider_timeout());
            let task = sampler.run(scheduler.subscribe(), route, stop_sampling.child_token());
            samplers.push((metric, tokio::spawn(task)));
        }
        drop(health_tx);

        info!(
            metrics = ?dispatcher.metrics(),
            interval_ms = scheduler.interval().as_millis() as u64,
            "recording"
        );
        let clock = tokio::spawn(scheduler.run(stop_sampling.clone()));

        tokio::pin!(stop);
        let reason = loop {
            tokio::select! {
                reason = &mut stop => break reason,
                Some(event) = health_rx.recv() => {
                    let HealthEvent::SinkDegraded { metric, consecutive_failures } = event;
                    if config.fail_on_sink_error {
                        error!(metric = %metric, consecutive_failures, "sink unhealthy, stopping");
                        break StopReason::SinkFailure(metric);
                    }
                    warn!(metric = %metric, consecutive_failures, "sink unhealthy");
                }
            }
        };

        // Phase 1: samplers.
        info!(reason = ?reason, "stopping samplers");
        stop_sampling.cancel();
        let deadline = Instant::now() + grace;
        let mut sampler_reports = Vec::with_capacity(samplers.len());
        for (metric, handle) in samplers {
            sampler_reports.push(join_within(deadline, grace, format!("{} sampler", metric), handle).await?);
        }
        join_within(deadline, grace, "scheduler".to_string(), clock).await?;

        // Phase 2: sinks.
        info!("samplers stopped, draining sinks");
        dispatcher.close();
        drain.cancel();
        let deadline = Instant::now() + grace;
        let mut sink_reports = Vec::with_capacity(sinks.len());
        for (metric, handle) in sinks {
            sink_reports.push(join_within(deadline, grace, format!("{} sink", metric), handle).await?);
        }

        let summary = RunSummary {
            reason,
            samplers: sampler_reports,
            sinks: sink_reports,
            dispatch: dispatcher.stats(),
        };
        info!(
            persisted = summary.persisted(),
            dropped = summary.dropped(),
            "recording finished"
        );

        if let StopReason::SinkFailure(metric) = reason {
            return Err(CoreError::SinkUnhealthy {
                metric,
                consecutive_failures: config.sink_failure_limit,
            });
        }
        Ok(summary)
    }
}

async fn join_within<T>(
    deadline: Instant,
    grace: Duration,
    component: String,
    handle: JoinHandle<T>,
) -> Result<T> {
    match tokio::time::timeout_at(deadline, handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_error)) => {
            error!(component = %component, error = %join_error, "task failed");
            Err(CoreError::TaskFailed {
                component,
                message: join_error.to_string(),
            })
        }
        Err(_) => {
            error!(component = %component, grace_ms = grace.as_millis() as u64, "did not stop in time");
            Err(CoreError::ShutdownTimeout { component, grace })
        }
    }
}

/// Resolves when `duration` has elapsed or Ctrl-C is pressed, whichever
/// comes first. Without a duration only Ctrl-C ends the run.
pub async fn shutdown_signal(duration: Option<Duration>) -> StopReason {
    let timer = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = timer => {
            info!("run duration elapsed");
            StopReason::DurationElapsed
        }
        _ = interrupt => {
            info!("interrupted");
            StopReason::Interrupted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CounterKind, InterfaceCounters, Measurement, RawSample};
    use crate::testing::{cpu_times, MemorySink, ScriptedProvider};
    use std::sync::{Arc, Mutex};

    fn fast_config() -> Config {
        Config {
            interval_ms: 20,
            provider_timeout_ms: 15,
            shutdown_grace_ms: 2_000,
            channel_capacity: 4,
            ..Config::default()
        }
    }

    async fn after(duration: Duration) -> StopReason {
        tokio::time::sleep(duration).await;
        StopReason::DurationElapsed
    }

    fn records(sink: &Arc<Mutex<Vec<Measurement>>>) -> Vec<Measurement> {
        sink.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn cpu_run_emits_sentinel_then_usage() {
        let provider = ScriptedProvider::new(
            MetricType::Cpu,
            vec![cpu_times(50, 20, 30, 100), cpu_times(120, 40, 40, 200)],
        );
        let sink = MemorySink::new(MetricType::Cpu);
        let stored = sink.records();

        let mut orchestrator = Orchestrator::new(fast_config());
        orchestrator
            .add(Pipeline::new(Box::new(provider), Box::new(sink)).unwrap())
            .unwrap();
        let summary = orchestrator.run(after(Duration::from_millis(200))).await.unwrap();

        let stored = records(&stored);
        assert_eq!(stored.len(), 2);
        match (&stored[0], &stored[1]) {
            (Measurement::Cpu(first), Measurement::Cpu(second)) => {
                assert_eq!(first.usage, None);
                let usage = second.usage.unwrap();
                assert!((usage.user_pct - 70.0).abs() < 1e-9);
            }
            other => panic!("unexpected records {:?}", other),
        }
        assert_eq!(summary.reason, StopReason::DurationElapsed);
        assert_eq!(summary.persisted(), 2);
        assert!(summary.samplers[0].skipped >= 1);
    }

    #[tokio::test]
    async fn new_interface_is_marked_first_seen() {
        let provider = ScriptedProvider::new(
            MetricType::Net,
            vec![
                RawSample::Network(vec![InterfaceCounters::new("eth0", 1_000, 100)]),
                RawSample::Network(vec![
                    InterfaceCounters::new("eth0", 1_500, 160),
                    InterfaceCounters::new("lo", 42, 42),
                ]),
            ],
        );
        let sink = MemorySink::new(MetricType::Net);
        let stored = sink.records();

        let mut orchestrator = Orchestrator::new(fast_config());
        orchestrator
            .add(Pipeline::new(Box::new(provider), Box::new(sink)).unwrap())
            .unwrap();
        orchestrator.run(after(Duration::from_millis(200))).await.unwrap();

        let rows: Vec<(String, u64, CounterKind)> = records(&stored)
            .into_iter()
            .map(|m| match m {
                Measurement::Net(net) => (net.interface, net.rx_bytes, net.kind),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(
            rows,
            vec![
                ("eth0".to_string(), 1_000, CounterKind::FirstSeen),
                ("eth0".to_string(), 500, CounterKind::Delta),
                ("lo".to_string(), 42, CounterKind::FirstSeen),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_sink_keeps_every_delivered_measurement() {
        let sink = MemorySink::new(MetricType::Cpu).with_delay(Duration::from_millis(15));
        let stored = sink.records();
        let closed = sink.closed_flag();

        let mut orchestrator = Orchestrator::new(fast_config());
        orchestrator
            .add(Pipeline::new(Box::new(ScriptedProvider::cpu_ramp()), Box::new(sink)).unwrap())
            .unwrap();
        let summary = orchestrator.run(after(Duration::from_millis(250))).await.unwrap();

        let stored = records(&stored);
        let delivered = summary.dispatch[0].delivered;
        assert!(delivered > 0);
        assert_eq!(stored.len() as u64, delivered);
        assert_eq!(summary.samplers[0].emitted, delivered);
        assert_eq!(summary.dropped(), 0);

        let mut totals: Vec<u64> = stored
            .iter()
            .map(|m| match m {
                Measurement::Cpu(cpu) => cpu.total,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        let sorted = totals.windows(2).all(|w| w[0] < w[1]);
        assert!(sorted, "measurements reordered");
        totals.dedup();
        assert_eq!(totals.len(), stored.len());
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn slow_sink_does_not_starve_other_metrics() {
        let slow = MemorySink::new(MetricType::Cpu).with_delay(Duration::from_millis(100));
        let fast = ScriptedProvider::new(MetricType::Mem, Vec::new());
        let mem_calls = fast.calls();

        let mut orchestrator = Orchestrator::new(fast_config());
        orchestrator
            .add(Pipeline::new(Box::new(ScriptedProvider::cpu_ramp()), Box::new(slow)).unwrap())
            .unwrap();
        orchestrator
            .add(Pipeline::new(Box::new(fast), Box::new(MemorySink::new(MetricType::Mem))).unwrap())
            .unwrap();
        let summary = orchestrator.run(after(Duration::from_millis(600))).await.unwrap();

        let mem = summary
            .samplers
            .iter()
            .find(|r| r.metric == MetricType::Mem)
            .unwrap();
        // About 30 ticks fit in the run; a blocked runtime manages a handful.
        assert!(mem.ticks >= 20, "mem sampler saw only {} ticks", mem.ticks);
        assert_eq!(mem_calls.load(std::sync::atomic::Ordering::SeqCst) as u64, mem.ticks);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stuck_sink_turns_into_a_shutdown_timeout() {
        let sink = MemorySink::new(MetricType::Cpu).with_delay(Duration::from_millis(600));
        let config = Config {
            channel_capacity: 1,
            shutdown_grace_ms: 100,
            ..fast_config()
        };

        let mut orchestrator = Orchestrator::new(config);
        orchestrator
            .add(Pipeline::new(Box::new(ScriptedProvider::cpu_ramp()), Box::new(sink)).unwrap())
            .unwrap();
        let err = orchestrator.run(after(Duration::from_millis(150))).await.unwrap_err();

        match err {
            CoreError::ShutdownTimeout { component, .. } => assert_eq!(component, "cpu sampler"),
            other => panic!("expected shutdown timeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn unhealthy_sink_can_end_the_run() {
        let sink = MemorySink::new(MetricType::Cpu).failing_first(u32::MAX);
        let config = Config {
            sink_failure_limit: 2,
            fail_on_sink_error: true,
            ..fast_config()
        };

        let mut orchestrator = Orchestrator::new(config);
        orchestrator
            .add(Pipeline::new(Box::new(ScriptedProvider::cpu_ramp()), Box::new(sink)).unwrap())
            .unwrap();
        let err = orchestrator
            .run(after(Duration::from_secs(30)))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CoreError::SinkUnhealthy {
                metric: MetricType::Cpu,
                ..
            }
        ));
    }

    #[test]
    fn pipeline_metrics_must_agree() {
        let provider = ScriptedProvider::new(MetricType::Cpu, Vec::new());
        let sink = MemorySink::new(MetricType::Net);
        assert!(Pipeline::new(Box::new(provider), Box::new(sink)).is_err());
    }

    #[test]
    fn one_pipeline_per_metric() {
        let mut orchestrator = Orchestrator::new(Config::default());
        let pipeline = || {
            Pipeline::new(
                Box::new(ScriptedProvider::new(MetricType::Mem, Vec::new())),
                Box::new(MemorySink::new(MetricType::Mem)),
            )
            .unwrap()
        };
        orchestrator.add(pipeline()).unwrap();
        assert!(orchestrator.add(pipeline()).is_err());
        assert_eq!(orchestrator.metrics(), vec![MetricType::Mem]);
    }

    #[tokio::test]
    async fn empty_run_is_refused() {
        let orchestrator = Orchestrator::new(Config::default());
        assert!(matches!(
            orchestrator.run(after(Duration::from_millis(1))).await,
            Err(CoreError::Config(_))
        ));
    }
}
