//! Shared sampling clock.
//!
//! A single interval timer publishes ticks through a `watch` channel. Every
//! sampler holds its own receiver, so subscribers come and go without
//! touching each other's phase. A receiver only ever observes the latest
//! tick: a subscriber that falls behind skips ticks instead of replaying a
//! backlog.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One firing of the shared clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Zero-based index; tick `n` is due at `start + n * interval`.
    pub seq: u64,
    pub scheduled: Instant,
}

pub struct Scheduler {
    interval: Duration,
    tx: watch::Sender<Option<Tick>>,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { interval, tx }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// A receiver that sees every tick published after this call.
    pub fn subscribe(&self) -> TickReceiver {
        TickReceiver {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscribers(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publishes ticks until `cancel` fires. The first tick is immediate.
    pub async fn run(self, cancel: CancellationToken) -> u64 {
        let start = Instant::now();
        let mut ticker = time::interval_at(start, self.interval);
        // Keep the grid anchored to `start`; late ticks are dropped, not bunched.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_ms = self.interval.as_millis() as u64, "scheduler started");

        let mut published = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                scheduled = ticker.tick() => {
                    let seq = grid_index(start, scheduled, self.interval);
                    self.tx.send_replace(Some(Tick { seq, scheduled }));
                    published += 1;
                    debug!(seq, "tick");
                }
            }
        }

        info!(published, "scheduler stopped");
        published
    }
}

fn grid_index(start: Instant, scheduled: Instant, interval: Duration) -> u64 {
    let elapsed = scheduled.saturating_duration_since(start).as_nanos();
    let step = interval.as_nanos().max(1);
    (elapsed / step) as u64
}

/// A sampler's view of the shared clock.
pub struct TickReceiver {
    rx: watch::Receiver<Option<Tick>>,
}

impl TickReceiver {
    /// Waits for a tick newer than the last one returned. `None` once the
    /// scheduler has stopped.
    pub async fn next(&mut self) -> Option<Tick> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(tick) = *self.rx.borrow_and_update() {
                return Some(tick);
            }
        }
    }
}
