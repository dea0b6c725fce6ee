//! Routes measurements from samplers to the sink registered for their
//! metric type.
//!
//! Each sink gets one bounded channel. A sampler delivering into a full
//! channel waits for room, so a slow sink slows sampling down instead of
//! piling up delivery tasks. A delivery to a sink whose receiver is gone is
//! counted as dropped and never retried.

use crate::{
    error::{CoreError, Result},
    model::{Measurement, MetricType},
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Delivery totals for one metric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteStats {
    pub metric: MetricType,
    pub delivered: u64,
    pub dropped: u64,
}

/// Outcome of a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The sink has stopped consuming.
    Dropped,
}

/// Sending half of one sink's channel, held by that metric's sampler.
#[derive(Debug, Clone)]
pub struct Route {
    metric: MetricType,
    tx: mpsc::Sender<Measurement>,
    counters: Arc<Counters>,
}

impl Route {
    /// Hands `measurement` to the sink, waiting while its buffer is full.
    pub async fn deliver(&self, measurement: Measurement) -> Result<Delivery> {
        if measurement.metric() != self.metric {
            return Err(CoreError::dispatch(format!(
                "{} measurement sent on the {} route",
                measurement.metric(),
                self.metric
            )));
        }

        match self.tx.send(measurement).await {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(Delivery::Delivered)
            }
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(Delivery::Dropped)
            }
        }
    }

    /// Free slots in the sink's buffer.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

pub struct Dispatcher {
    capacity: usize,
    routes: BTreeMap<MetricType, Route>,
    closed: Vec<(MetricType, Arc<Counters>)>,
}

impl Dispatcher {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(CoreError::config("dispatch buffer capacity must be at least 1"));
        }

        Ok(Self {
            capacity,
            routes: BTreeMap::new(),
            closed: Vec::new(),
        })
    }

    /// Opens the channel for `metric` and returns the receiving half for its
    /// sink. Only one sink may be registered per metric type.
    pub fn register(&mut self, metric: MetricType) -> Result<mpsc::Receiver<Measurement>> {
        if self.routes.contains_key(&metric) {
            return Err(CoreError::dispatch(format!(
                "a sink is already registered for {}",
                metric
            )));
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let route = Route {
            metric,
            tx,
            counters: Arc::new(Counters::default()),
        };
        self.routes.insert(metric, route);
        Ok(rx)
    }

    pub fn route(&self, metric: MetricType) -> Result<Route> {
        self.routes
            .get(&metric)
            .cloned()
            .ok_or_else(|| CoreError::dispatch(format!("no sink registered for {}", metric)))
    }

    pub fn metrics(&self) -> Vec<MetricType> {
        self.routes.keys().copied().collect()
    }

    /// Drops the dispatcher's own senders. Each channel closes once the
    /// routes handed to samplers are gone as well.
    pub fn close(&mut self) {
        let routes = std::mem::take(&mut self.routes);
        for (metric, route) in routes {
            self.closed.push((metric, route.counters));
        }
    }

    pub fn stats(&self) -> Vec<RouteStats> {
        let open = self
            .routes
            .iter()
            .map(|(metric, route)| (*metric, &route.counters));
        let closed = self.closed.iter().map(|(metric, counters)| (*metric, counters));

        let mut stats: Vec<RouteStats> = open
            .chain(closed)
            .map(|(metric, counters)| RouteStats {
                metric,
                delivered: counters.delivered.load(Ordering::Relaxed),
                dropped: counters.dropped.load(Ordering::Relaxed),
            })
            .collect();
        stats.sort_by_key(|s| s.metric);
        stats
    }
}
