//! The contract persistence backends implement, and the task that drives
//! one backend from its channel.

use crate::{
    error::{CoreError, Result},
    model::{Measurement, MetricType},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Persistence backend for the measurements of one metric type.
///
/// Calls may block on disk I/O; [`SinkRunner`] makes them from the blocking
/// pool, one at a time.
pub trait Sink: Send + 'static {
    fn metric(&self) -> MetricType;

    /// Where the data ends up, for log messages.
    fn location(&self) -> String;

    fn write(&mut self, measurement: &Measurement) -> Result<()>;

    /// Flushes and releases the backend. Called once, after the last write.
    fn close(&mut self) -> Result<()>;
}

/// Reported by sinks while the run is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    SinkDegraded {
        metric: MetricType,
        consecutive_failures: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReport {
    pub metric: MetricType,
    pub persisted: u64,
    pub failed: u64,
    pub closed_cleanly: bool,
}

pub struct SinkRunner {
    sink: Box<dyn Sink>,
    rx: mpsc::Receiver<Measurement>,
    drain: CancellationToken,
    health: Option<mpsc::Sender<HealthEvent>>,
    failure_limit: u32,
}

impl SinkRunner {
    pub fn new(
        sink: Box<dyn Sink>,
        rx: mpsc::Receiver<Measurement>,
        drain: CancellationToken,
    ) -> Self {
        Self {
            sink,
            rx,
            drain,
            health: None,
            failure_limit: u32::MAX,
        }
    }

    /// Report a [`HealthEvent`] once `limit` writes in a row have failed.
    pub fn with_health(mut self, health: mpsc::Sender<HealthEvent>, limit: u32) -> Self {
        self.health = Some(health);
        self.failure_limit = limit.max(1);
        self
    }

    /// Consumes measurements until `drain` is cancelled, then persists
    /// whatever is still buffered and closes the backend.
    ///
    /// Every call into the backend runs on the blocking pool, so a slow disk
    /// never holds up the runtime's workers.
    pub async fn start(self) -> SinkReport {
        let SinkRunner {
            sink,
            mut rx,
            drain,
            health,
            failure_limit,
        } = self;

        let metric = sink.metric();
        info!(metric = %metric, location = %sink.location(), "sink started");

        let mut writer = Writer {
            metric,
            sink: Some(sink),
            health,
            failure_limit,
            streak: 0,
            persisted: 0,
            failed: 0,
        };

        loop {
            tokio::select! {
                biased;
                received = rx.recv() => match received {
                    Some(measurement) => writer.write(measurement).await,
                    None => {
                        // Every sender is gone; nothing else can arrive.
                        drain.cancelled().await;
                        break;
                    }
                },
                _ = drain.cancelled() => {
                    rx.close();
                    let mut drained = 0u64;
                    while let Some(measurement) = rx.recv().await {
                        writer.write(measurement).await;
                        drained += 1;
                    }
                    debug!(metric = %metric, drained, "sink drained");
                    break;
                }
            }
        }

        let closed_cleanly = match writer.close().await {
            Ok(()) => true,
            Err(e) => {
                error!(metric = %metric, error = %e, "sink failed to close");
                false
            }
        };

        info!(
            metric = %metric,
            persisted = writer.persisted,
            failed = writer.failed,
            "sink stopped"
        );

        SinkReport {
            metric,
            persisted: writer.persisted,
            failed: writer.failed,
            closed_cleanly,
        }
    }
}

struct Writer {
    metric: MetricType,
    /// `None` once a backend call panicked; later writes count as failed.
    sink: Option<Box<dyn Sink>>,
    health: Option<mpsc::Sender<HealthEvent>>,
    failure_limit: u32,
    streak: u32,
    persisted: u64,
    failed: u64,
}

impl Writer {
    async fn write(&mut self, measurement: Measurement) {
        match self.with_sink(move |sink| sink.write(&measurement)).await {
            Ok(()) => {
                self.persisted += 1;
                self.streak = 0;
            }
            Err(e) => {
                self.failed += 1;
                self.streak = self.streak.saturating_add(1);
                warn!(metric = %self.metric, error = %e, streak = self.streak, "write failed");
                if self.streak == self.failure_limit {
                    self.report_degraded();
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.with_sink(|sink| sink.close()).await
    }

    /// Hands the backend to the blocking pool for one call and takes it back.
    async fn with_sink<F>(&mut self, call: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Sink) -> Result<()> + Send + 'static,
    {
        let Some(mut sink) = self.sink.take() else {
            return Err(CoreError::sink(self.metric, "backend lost after a panic"));
        };

        let joined = tokio::task::spawn_blocking(move || {
            let result = call(sink.as_mut());
            (sink, result)
        })
        .await;

        match joined {
            Ok((sink, result)) => {
                self.sink = Some(sink);
                result
            }
            Err(join_error) => Err(CoreError::TaskFailed {
                component: format!("{} sink", self.metric),
                message: join_error.to_string(),
            }),
        }
    }

    fn report_degraded(&self) {
        let Some(health) = &self.health else {
            return;
        };
        let event = HealthEvent::SinkDegraded {
            metric: self.metric,
            consecutive_failures: self.streak,
        };
        if health.try_send(event).is_err() {
            debug!(metric = %self.metric, "health channel full, event dropped");
        }
    }
}
