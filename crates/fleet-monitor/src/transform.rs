//! Sources whose series are derived on demand from another source.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use tracing::info;

use crate::{
    error::MonitorError,
    metric::Metric,
    monitor::Monitor,
    series::{Series, SeriesData, SeriesKey, SeriesValue},
    source::Source,
    subject::Subject,
};

type Transform<K, V, W> = Box<dyn Fn(&dyn Series<K, V>) -> SeriesData<K, W> + Send + Sync>;

/// A [`Source`] applying a pure function to the series of an upstream
/// source. Nothing is cached: every [`Source::data`] call recomputes the
/// derived series from the current upstream state.
pub struct SeriesTransformation<S, K, V, W> {
    metric: Metric<S, K, W>,
    upstream: Arc<dyn Source<S, K, V>>,
    transform: Transform<K, V, W>,
}

impl<S, K, V, W> fmt::Debug for SeriesTransformation<S, K, V, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesTransformation").field("metric", &self.metric).finish_non_exhaustive()
    }
}

impl<S, K, V, W> SeriesTransformation<S, K, V, W> {
    pub fn new(
        metric: Metric<S, K, W>,
        upstream: Arc<dyn Source<S, K, V>>,
        transform: impl Fn(&dyn Series<K, V>) -> SeriesData<K, W> + Send + Sync + 'static,
    ) -> Self {
        Self { metric, upstream, transform: Box::new(transform) }
    }
}

#[async_trait]
impl<S, K, V, W> Source<S, K, W> for SeriesTransformation<S, K, V, W>
where
    S: Subject,
    K: SeriesKey,
    V: SeriesValue,
    W: SeriesValue,
{
    fn metric(&self) -> Metric<S, K, W> {
        self.metric.clone()
    }

    fn subjects(&self) -> Vec<S> {
        self.upstream.subjects()
    }

    fn data(&self, subject: &S) -> Option<Arc<dyn Series<K, W>>> {
        let input = self.upstream.data(subject)?;
        Some(Arc::new((self.transform)(input.as_ref())))
    }

    /// The upstream source is shut down by its owner.
    async fn shutdown(&self) -> Result<(), MonitorError> {
        Ok(())
    }
}

/// Installs a transformation of the source installed for `input` under
/// `metric`, and registers it for export.
pub fn install_transformation<S, K, V, W>(
    monitor: &Monitor,
    metric: Metric<S, K, W>,
    input: &Metric<S, K, V>,
    transform: impl Fn(&dyn Series<K, V>) -> SeriesData<K, W> + Send + Sync + 'static,
) -> Result<Arc<dyn Source<S, K, W>>, MonitorError>
where
    S: Subject,
    K: SeriesKey,
    V: SeriesValue,
    W: SeriesValue,
{
    let upstream =
        monitor.get_source(input).ok_or_else(|| MonitorError::UnknownSource(input.to_string()))?;
    let source: Arc<dyn Source<S, K, W>> =
        Arc::new(SeriesTransformation::new(metric, upstream, transform));

    monitor.add_source(Arc::clone(&source))?;
    monitor.writer().add_source(Arc::clone(&source));
    info!(metric = %source.metric(), input = %input, "transformation installed");
    Ok(source)
}

/// Simple moving average over `period` consecutive points.
///
/// The point at position `i >= period - 1` carries the mean of the values at
/// positions `i - period + 1 ..= i` and the key of position `i`. Shorter
/// inputs, and a zero period, yield an empty series.
pub fn simple_moving_average<K, V>(series: &dyn Series<K, V>, period: usize) -> SeriesData<K, f64>
where
    K: SeriesKey,
    V: Copy + Into<f64>,
{
    let mut output = SeriesData::new();
    if period == 0 {
        return output;
    }

    let points = series.points();
    for window in points.windows(period) {
        let sum: f64 = window.iter().map(|p| p.value.into()).sum();
        output.append(window[period - 1].key, sum / period as f64);
    }
    output
}
