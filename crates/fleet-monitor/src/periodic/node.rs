//! Periodic per-node sources kept in sync with the fleet.

use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::PeriodicDataSource;
use crate::{
    error::MonitorError,
    metric::Metric,
    monitor::Monitor,
    network::{Network, NetworkListener, NodeHandle},
    sensor::SensorFactory,
    series::{Series, SeriesValue, Time},
    source::Source,
    subject::Node,
};

/// A [`PeriodicDataSource`] over nodes. Existing nodes are added at
/// construction, nodes created later are added when the fleet announces them.
pub struct PeriodicNodeDataSource<V> {
    inner: PeriodicDataSource<Node, V>,
    network: Arc<dyn Network>,
    factory: Box<dyn SensorFactory<Arc<dyn NodeHandle>, V>>,
    me: Weak<Self>,
}

impl<V> fmt::Debug for PeriodicNodeDataSource<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicNodeDataSource").field("inner", &self.inner).finish_non_exhaustive()
    }
}

impl<V: SeriesValue> PeriodicNodeDataSource<V> {
    /// Creates the source, tracks every active node and registers the source
    /// for export with the monitor's writer chain.
    pub async fn new(
        metric: Metric<Node, Time, V>,
        monitor: &Monitor,
        period: Duration,
        factory: impl SensorFactory<Arc<dyn NodeHandle>, V> + 'static,
    ) -> Arc<Self> {
        let network = Arc::clone(monitor.network());
        let source = Arc::new_cyclic(|me| Self {
            inner: PeriodicDataSource::with_period(metric, period),
            network: Arc::clone(&network),
            factory: Box::new(factory),
            me: me.clone(),
        });

        network.register_listener(Arc::clone(&source) as Arc<dyn NetworkListener>);
        for node in network.active_nodes() {
            source.add_node(&node).await;
        }

        monitor.writer().add_source(Arc::clone(&source) as Arc<dyn Source<Node, Time, V>>);
        source
    }

    async fn add_node(&self, node: &Arc<dyn NodeHandle>) {
        let metric = self.inner.metric.name();
        let subject = Node::new(node.label());
        if self.inner.synced_data(&subject).is_some() {
            debug!(metric, node = %subject, "node already monitored");
            return;
        }

        let sensor = match self.factory.create_sensor(node).await {
            Ok(sensor) => sensor,
            Err(e) => {
                let err = MonitorError::SensorCreation {
                    metric: metric.to_string(),
                    subject: subject.to_string(),
                    source: e.into(),
                };
                warn!(error = %err, "node is not monitored");
                return;
            }
        };

        if let Err(e) = self.inner.add_subject(subject, sensor) {
            debug!(metric, error = %e, "node not added");
        }
    }
}

#[async_trait]
impl<V: SeriesValue> NetworkListener for PeriodicNodeDataSource<V> {
    async fn after_node_creation(&self, node: Arc<dyn NodeHandle>) {
        self.add_node(&node).await;
    }
}

#[async_trait]
impl<V: SeriesValue> Source<Node, Time, V> for PeriodicNodeDataSource<V> {
    fn metric(&self) -> Metric<Node, Time, V> {
        self.inner.metric()
    }

    fn subjects(&self) -> Vec<Node> {
        self.inner.subjects()
    }

    fn data(&self, subject: &Node) -> Option<Arc<dyn Series<Time, V>>> {
        self.inner.data(subject)
    }

    async fn shutdown(&self) -> Result<(), MonitorError> {
        if let Some(me) = self.me.upgrade() {
            self.network.unregister_listener(&(me as Arc<dyn NetworkListener>));
        }
        self.inner.shutdown().await
    }
}
