//! The [`Source`] trait: the live realization of a metric across subjects.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{error::MonitorError, metric::Metric, series::Series};

/// Maps a metric to a growing set of `subject → series` associations.
///
/// Implemented by the periodic data sources, the log-driven sources and the
/// transformation sources.
#[async_trait]
pub trait Source<S, K, V>: Send + Sync {
    fn metric(&self) -> Metric<S, K, V>;

    /// Every subject ever added, in no particular order.
    fn subjects(&self) -> Vec<S>;

    /// The series of a known subject.
    fn data(&self, subject: &S) -> Option<Arc<dyn Series<K, V>>>;

    /// Stops collection. Collected data stays queryable.
    async fn shutdown(&self) -> Result<(), MonitorError>;
}
