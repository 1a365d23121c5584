//! Periodic, sensor-driven data sources.
//!
//! [`PeriodicDataSource`] runs one independent sampling loop per subject.
//! The [`node`] and [`account`] submodules wire it to the fleet so that
//! subjects are discovered as nodes and applications appear.

pub mod account;
pub mod node;

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{task::JoinSet, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{ErrorList, MonitorError},
    metric::Metric,
    sensor::Sensor,
    series::{Series, SyncedSeries, Time},
    source::Source,
    subject::Subject,
};

pub use account::{AccountHandle, PeriodicAccountDataSource};
pub use node::PeriodicNodeDataSource;

/// Default sampling period.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

struct State<S, V> {
    series: HashMap<S, Arc<SyncedSeries<Time, V>>>,
    /// One task per subject ever added; each yields the errors it saw.
    collectors: JoinSet<Vec<anyhow::Error>>,
}

/// A generic source periodically querying one [`Sensor`] per subject.
pub struct PeriodicDataSource<S, V> {
    metric: Metric<S, Time, V>,
    period: Duration,
    state: Mutex<State<S, V>>,
    cancel: CancellationToken,
    /// Held while collectors are drained, so every shutdown caller returns
    /// only once all of them have finished.
    drain: tokio::sync::Mutex<()>,
}

impl<S, V> fmt::Debug for PeriodicDataSource<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicDataSource")
            .field("metric", &self.metric.name())
            .field("period", &self.period)
            .field("subjects", &self.state.lock().series.len())
            .finish()
    }
}

impl<S: Subject, V: Clone + Send + Sync + 'static> PeriodicDataSource<S, V> {
    pub fn new(metric: Metric<S, Time, V>) -> Self {
        Self::with_period(metric, DEFAULT_PERIOD)
    }

    /// # Panics
    ///
    /// If `period` is zero.
    pub fn with_period(metric: Metric<S, Time, V>, period: Duration) -> Self {
        assert!(!period.is_zero(), "sampling period of {metric} must be non-zero");
        Self {
            metric,
            period,
            state: Mutex::new(State { series: HashMap::new(), collectors: JoinSet::new() }),
            cancel: CancellationToken::new(),
            drain: tokio::sync::Mutex::new(()),
        }
    }

    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Registers `subject`, creates its series and starts its sampling loop.
    pub fn add_subject(&self, subject: S, sensor: Box<dyn Sensor<V>>) -> Result<(), MonitorError> {
        let mut state = self.state.lock();
        if self.cancel.is_cancelled() {
            return Err(MonitorError::ShutDown(self.metric.name().to_string()));
        }
        if state.series.contains_key(&subject) {
            return Err(MonitorError::SubjectAlreadyPresent {
                metric: self.metric.name().to_string(),
                subject: subject.to_string(),
            });
        }

        let series = Arc::new(SyncedSeries::new());
        state.series.insert(subject.clone(), Arc::clone(&series));

        debug!(metric = self.metric.name(), %subject, "starting collector");
        state.collectors.spawn(collect(
            self.metric.name().to_string(),
            subject,
            sensor,
            series,
            self.period,
            self.cancel.clone(),
        ));
        Ok(())
    }

    /// The concrete series of a known subject.
    pub fn synced_data(&self, subject: &S) -> Option<Arc<SyncedSeries<Time, V>>> {
        self.state.lock().series.get(subject).cloned()
    }

    /// Cancels every collector and waits for each of them to finish.
    /// Concurrent callers wait for the same drain; only the caller that
    /// performs it reports the collected errors.
    async fn stop(&self) -> Result<(), MonitorError> {
        self.cancel.cancel();
        let _drain = self.drain.lock().await;

        // Subjects added before the cancellation are in this set, later
        // ones are rejected by `add_subject`.
        let mut collectors = std::mem::take(&mut self.state.lock().collectors);

        let mut errors = ErrorList::new();
        while let Some(result) = collectors.join_next().await {
            match result {
                Ok(errs) => errors.extend(errs),
                Err(e) => errors.push(anyhow::Error::new(e).context("collector task failed")),
            }
        }
        debug!(metric = self.metric.name(), errors = errors.len(), "all collectors stopped");
        errors.into_result()
    }
}

#[async_trait]
impl<S: Subject, V: Clone + Send + Sync + 'static> Source<S, Time, V> for PeriodicDataSource<S, V> {
    fn metric(&self) -> Metric<S, Time, V> {
        self.metric.clone()
    }

    fn subjects(&self) -> Vec<S> {
        self.state.lock().series.keys().cloned().collect()
    }

    fn data(&self, subject: &S) -> Option<Arc<dyn Series<Time, V>>> {
        self.synced_data(subject).map(|s| s as Arc<dyn Series<Time, V>>)
    }

    async fn shutdown(&self) -> Result<(), MonitorError> {
        self.stop().await
    }
}

/// Sampling loop of a single subject.
///
/// Read failures are kept and returned when the loop is cancelled; they
/// never stop the loop. An in-flight read is not interrupted.
async fn collect<S: Subject, V: Clone + Send + Sync + 'static>(
    metric: String,
    subject: S,
    mut sensor: Box<dyn Sensor<V>>,
    series: Arc<SyncedSeries<Time, V>>,
    period: Duration,
    cancel: CancellationToken,
) -> Vec<anyhow::Error> {
    let mut errors = Vec::new();
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let now = sample_time(&series);
                match sensor.read_value().await {
                    Ok(value) => series.append(now, value),
                    Err(e) => {
                        debug!(metric = %metric, %subject, error = %e, "sensor read failed");
                        errors.push(e.context(format!("{metric}: failed to sample {subject}")));
                    }
                }
            }
        }
    }

    debug!(metric = %metric, %subject, errors = errors.len(), "collector stopped");
    errors
}

/// The current time, clamped so keys never decrease when the wall clock
/// steps backwards.
fn sample_time<V: Clone + Send + Sync>(series: &SyncedSeries<Time, V>) -> Time {
    let now = Time::now();
    series.latest().map_or(now, |last| last.key.max(now))
}
