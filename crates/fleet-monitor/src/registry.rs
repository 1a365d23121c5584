//! Process-wide registry of the metrics a monitor can install.

use std::{
    fmt,
    sync::{Arc, LazyLock},
};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    error::MonitorError,
    metric::Metric,
    monitor::Monitor,
    series::{SeriesKey, SeriesValue},
    source::Source,
    sources,
    subject::Subject,
};

/// Builds the source of one metric for a monitor.
#[async_trait]
pub trait SourceFactory<S, K, V>: Send + Sync {
    fn metric(&self) -> Metric<S, K, V>;

    async fn create_source(
        &self,
        monitor: &Monitor,
    ) -> Result<Arc<dyn Source<S, K, V>>, MonitorError>;
}

/// A registry entry with its metric types erased.
#[async_trait]
pub trait RegisteredSource: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Creates the source and installs it into `monitor`.
    async fn install(&self, monitor: &Monitor) -> Result<(), MonitorError>;
}

struct Registration<S, K, V> {
    metric: Metric<S, K, V>,
    factory: Box<dyn SourceFactory<S, K, V>>,
}

#[async_trait]
impl<S: Subject, K: SeriesKey, V: SeriesValue> RegisteredSource for Registration<S, K, V> {
    fn name(&self) -> &str {
        self.metric.name()
    }

    fn description(&self) -> &str {
        self.metric.description()
    }

    async fn install(&self, monitor: &Monitor) -> Result<(), MonitorError> {
        monitor.install_source(self.factory.as_ref()).await.map(|_| ())
    }
}

/// Metric name to source factory, in registration order.
#[derive(Default)]
pub struct SourceRegistry {
    entries: RwLock<Vec<Arc<dyn RegisteredSource>>>,
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.read().iter().map(|e| e.name().to_string())).finish()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under its metric's name. Names are unique.
    pub fn register<S, K, V>(
        &self,
        factory: impl SourceFactory<S, K, V> + 'static,
    ) -> Result<(), MonitorError>
    where
        S: Subject,
        K: SeriesKey,
        V: SeriesValue,
    {
        let metric = factory.metric();
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.name() == metric.name()) {
            return Err(MonitorError::DuplicateMetric(metric.to_string()));
        }
        entries.push(Arc::new(Registration { metric, factory: Box::new(factory) }));
        Ok(())
    }

    pub fn entries(&self) -> Vec<Arc<dyn RegisteredSource>> {
        self.entries.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.name().to_string()).collect()
    }
}

static REGISTRY: LazyLock<SourceRegistry> = LazyLock::new(|| {
    let registry = SourceRegistry::new();
    sources::register_builtin(&registry).expect("built-in metrics have unique names");
    registry
});

/// The global registry, holding every built-in metric.
pub fn registry() -> &'static SourceRegistry {
    &REGISTRY
}
