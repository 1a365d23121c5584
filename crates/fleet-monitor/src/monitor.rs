//! The monitor: owner of every installed source and of the export chain.

use std::{any::Any, fmt, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{ErrorList, MonitorError},
    export::WriterChain,
    logs::NodeLogDispatcher,
    metric::Metric,
    network::Network,
    registry::{SourceFactory, registry},
    series::{SeriesKey, SeriesValue},
    source::Source,
    subject::Subject,
};

/// Name of the export file created in [`MonitorConfig::output_dir`].
pub const EXPORT_FILE_NAME: &str = "monitoring.csv";

/// Monitor settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Directory receiving the export file.
    pub output_dir: PathBuf,
    /// Sampling period of the periodic sources.
    pub sampling_period: Duration,
    /// Interval of the background export flush.
    pub flush_interval: Duration,
}

impl MonitorConfig {
    /// Both periods drive timers and must be non-zero.
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.sampling_period.is_zero() {
            return Err(MonitorError::InvalidConfig("sampling period must be non-zero".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(MonitorError::InvalidConfig("flush interval must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./output"),
            sampling_period: Duration::from_secs(1),
            flush_interval: Duration::from_secs(5),
        }
    }
}

/// Type-erased view of an installed source.
#[async_trait]
trait InstalledSource: Send + Sync {
    fn name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    async fn shutdown(&self) -> Result<(), MonitorError>;
}

struct Installed<S, K, V> {
    name: String,
    source: Arc<dyn Source<S, K, V>>,
}

#[async_trait]
impl<S: Subject, K: SeriesKey, V: SeriesValue> InstalledSource for Installed<S, K, V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn shutdown(&self) -> Result<(), MonitorError> {
        self.source.shutdown().await
    }
}

/// Holds the fleet handle, the export chain, the node log dispatcher and at
/// most one source per metric name.
pub struct Monitor {
    network: Arc<dyn Network>,
    config: MonitorConfig,
    writer: Arc<WriterChain>,
    log_dispatcher: Arc<NodeLogDispatcher>,
    /// In installation order.
    sources: Mutex<Vec<Arc<dyn InstalledSource>>>,
    cancel: CancellationToken,
    flusher: Mutex<Option<JoinHandle<()>>>,
    /// Serializes installations so a metric's source is only ever created once.
    installing: tokio::sync::Mutex<()>,
    /// Held for the whole shutdown sequence.
    stopping: tokio::sync::Mutex<()>,
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("config", &self.config)
            .field("sources", &self.source_names())
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Creates a monitor exporting into `<output_dir>/monitoring.csv`.
    pub fn new(network: Arc<dyn Network>, config: MonitorConfig) -> anyhow::Result<Arc<Self>> {
        config.validate()?;
        std::fs::create_dir_all(&config.output_dir).with_context(|| {
            format!("failed to create output directory {}", config.output_dir.display())
        })?;
        let path = config.output_dir.join(EXPORT_FILE_NAME);
        let writer = WriterChain::create(&path)
            .with_context(|| format!("failed to create export file {}", path.display()))?;

        info!(path = %path.display(), "exporting monitoring data");
        Self::with_writer(network, config, writer).map_err(Into::into)
    }

    pub fn with_writer(
        network: Arc<dyn Network>,
        config: MonitorConfig,
        writer: WriterChain,
    ) -> Result<Arc<Self>, MonitorError> {
        config.validate()?;
        let log_dispatcher = NodeLogDispatcher::new(Arc::clone(&network));
        Ok(Arc::new(Self {
            network,
            config,
            writer: Arc::new(writer),
            log_dispatcher,
            sources: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            flusher: Mutex::new(None),
            installing: tokio::sync::Mutex::new(()),
            stopping: tokio::sync::Mutex::new(()),
        }))
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn writer(&self) -> &Arc<WriterChain> {
        &self.writer
    }

    pub fn log_dispatcher(&self) -> &Arc<NodeLogDispatcher> {
        &self.log_dispatcher
    }

    /// Names of the installed metrics, in installation order.
    pub fn source_names(&self) -> Vec<String> {
        self.sources.lock().iter().map(|s| s.name().to_string()).collect()
    }

    fn is_installed(&self, name: &str) -> bool {
        self.sources.lock().iter().any(|s| s.name() == name)
    }

    /// Creates the source of `factory`'s metric and installs it.
    pub async fn install_source<S, K, V>(
        &self,
        factory: &dyn SourceFactory<S, K, V>,
    ) -> Result<Arc<dyn Source<S, K, V>>, MonitorError>
    where
        S: Subject,
        K: SeriesKey,
        V: SeriesValue,
    {
        let metric = factory.metric();
        let _installing = self.installing.lock().await;
        if self.is_installed(metric.name()) {
            return Err(MonitorError::DuplicateSource(metric.to_string()));
        }

        let source = factory.create_source(self).await?;
        if let Err(e) = self.add_source(Arc::clone(&source)) {
            // A source for the metric was added directly in the meantime.
            if let Err(shutdown) = source.shutdown().await {
                warn!(metric = %metric, error = %shutdown, "failed to stop rejected source");
            }
            return Err(e);
        }
        info!(metric = %metric, "source installed");
        Ok(source)
    }

    /// Installs an already running source. Export registration is left to
    /// the source.
    pub fn add_source<S, K, V>(&self, source: Arc<dyn Source<S, K, V>>) -> Result<(), MonitorError>
    where
        S: Subject,
        K: SeriesKey,
        V: SeriesValue,
    {
        let name = source.metric().name().to_string();
        let mut sources = self.sources.lock();
        if sources.iter().any(|s| s.name() == name) {
            return Err(MonitorError::DuplicateSource(name));
        }
        sources.push(Arc::new(Installed { name, source }));
        Ok(())
    }

    /// The source installed for `metric`, if its types match.
    pub fn get_source<S, K, V>(&self, metric: &Metric<S, K, V>) -> Option<Arc<dyn Source<S, K, V>>>
    where
        S: Subject,
        K: SeriesKey,
        V: SeriesValue,
    {
        let sources = self.sources.lock();
        let installed = sources.iter().find(|s| s.name() == metric.name())?;
        let typed = installed.as_any().downcast_ref::<Installed<S, K, V>>()?;
        Some(Arc::clone(&typed.source))
    }

    /// Installs a source for every metric of the global registry.
    pub async fn install_registered_sources(&self) -> Result<(), MonitorError> {
        for entry in registry().entries() {
            entry.install(self).await?;
        }
        Ok(())
    }

    /// Starts the periodic export flush. Repeated calls have no effect.
    pub fn start_flusher(&self) {
        let mut flusher = self.flusher.lock();
        if flusher.is_none() && !self.cancel.is_cancelled() {
            let handle = self.writer.spawn_flusher(self.config.flush_interval, self.cancel.clone());
            *flusher = Some(handle);
        }
    }

    /// Shuts sources down in reverse installation order, then the log
    /// dispatcher, then flushes and closes the export. Every error is
    /// collected; collected data stays queryable.
    pub async fn shutdown(&self) -> Result<(), MonitorError> {
        let _stopping = self.stopping.lock().await;
        info!("shutting down monitor");
        let mut errors = ErrorList::new();

        let sources = self.sources.lock().clone();
        for source in sources.iter().rev() {
            debug!(metric = source.name(), "shutting down source");
            if let Err(e) = source.shutdown().await {
                errors.push(anyhow::Error::new(e).context(format!("source {}", source.name())));
            }
        }

        if let Err(e) = self.log_dispatcher.shutdown().await {
            errors.push(anyhow::Error::new(e).context("log dispatcher"));
        }

        self.cancel.cancel();
        let flusher = self.flusher.lock().take();
        if let Some(flusher) = flusher {
            if let Err(e) = flusher.await {
                errors.push(anyhow::Error::new(e).context("export flusher failed"));
            }
        }

        if let Err(e) = self.writer.close() {
            errors.push(anyhow::Error::new(e).context("final export"));
        }
        errors.into_result()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        periodic::PeriodicNodeDataSource,
        series::{BlockNumber, Time},
        sources::{ACCOUNT_BALANCE, NODE_BLOCK_HEIGHT, TRANSACTIONS_THROUGHPUT},
        subject::Node,
        test_helpers::{
            IncrementingSensorFactory, NODE_A_LOG, NODE_B_LOG, NODE_C_LOG, test_monitor,
            test_monitor_with_output, test_node,
        },
    };

    const TEST_METRIC: Metric<Node, Time, u64> = Metric::new("TestNodeMetric", "A test metric.");

    struct TestSourceFactory;

    #[async_trait]
    impl SourceFactory<Node, Time, u64> for TestSourceFactory {
        fn metric(&self) -> Metric<Node, Time, u64> {
            TEST_METRIC
        }

        async fn create_source(
            &self,
            monitor: &Monitor,
        ) -> Result<Arc<dyn Source<Node, Time, u64>>, MonitorError> {
            Ok(PeriodicNodeDataSource::new(
                TEST_METRIC,
                monitor,
                Duration::from_millis(10),
                IncrementingSensorFactory,
            )
            .await)
        }
    }

    #[tokio::test]
    async fn installs_each_metric_once() {
        let (network, monitor) = test_monitor();
        network.add_node(test_node("A", "")).await;

        let source: Arc<dyn Source<Node, Time, u64>> =
            monitor.install_source(&TestSourceFactory).await.unwrap();
        assert_eq!(source.subjects(), vec![Node::new("A")]);

        let err = monitor.install_source(&TestSourceFactory).await.err().unwrap();
        assert!(matches!(err, MonitorError::DuplicateSource(name) if name == "TestNodeMetric"));

        let found = monitor.get_source(&TEST_METRIC).expect("source is installed");
        assert!(std::ptr::addr_eq(Arc::as_ptr(&found), Arc::as_ptr(&source)));

        // Same name, different types.
        let mistyped = Metric::<Node, Time, f64>::new("TestNodeMetric", "");
        assert!(monitor.get_source(&mistyped).is_none());

        monitor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn installs_registered_sources() {
        let (_network, monitor) = test_monitor();
        monitor.install_registered_sources().await.unwrap();

        let names = monitor.source_names();
        let builtin = [
            NODE_BLOCK_HEIGHT.to_string(),
            ACCOUNT_BALANCE.to_string(),
            TRANSACTIONS_THROUGHPUT.to_string(),
        ];
        for metric in &builtin {
            assert!(names.contains(metric), "{metric} not installed");
        }
        assert!(monitor.get_source(&TRANSACTIONS_THROUGHPUT).is_some());

        let err = monitor.install_registered_sources().await.unwrap_err();
        assert!(matches!(err, MonitorError::DuplicateSource(_)));
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_exports_everything_and_can_be_repeated() {
        let (network, monitor, output) = test_monitor_with_output();
        network.add_node(test_node("A", NODE_A_LOG)).await;
        network.add_node(test_node("B", NODE_B_LOG)).await;
        network.add_node(test_node("C", NODE_C_LOG)).await;

        monitor.install_registered_sources().await.unwrap();
        let throughput = monitor.get_source(&TRANSACTIONS_THROUGHPUT).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            let len = |node: &str| throughput.data(&Node::new(node)).map_or(0, |s| s.len());
            while len("A") < 3 || len("B") < 2 || len("C") < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("throughput was not computed in time");

        monitor.shutdown().await.unwrap();
        let a = throughput.data(&Node::new("A")).unwrap().range(BlockNumber::MIN, BlockNumber::MAX);
        assert_eq!(a.len(), 3);

        let contents = output.contents();
        assert!(contents.contains("TransactionsThroughput, network, A, , , 2, , 40\n"));
        assert!(contents.contains("TransactionsThroughput, network, B, , , 3, , 20\n"));

        monitor.shutdown().await.unwrap();
        assert_eq!(output.contents(), contents);
    }

    #[tokio::test]
    async fn concurrent_installations_create_one_source() {
        let (network, monitor) = test_monitor();
        network.add_node(test_node("A", "")).await;

        let (first, second) = tokio::join!(
            monitor.install_source(&TestSourceFactory),
            monitor.install_source(&TestSourceFactory)
        );
        assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);
        let err = first.err().or(second.err()).unwrap();
        assert!(matches!(err, MonitorError::DuplicateSource(_)));
        assert_eq!(monitor.writer().num_sources(), 1);
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn overlapping_shutdowns_both_finish_the_export() {
        let (network, monitor, output) = test_monitor_with_output();
        network.add_node(test_node("A", NODE_A_LOG)).await;
        monitor.install_registered_sources().await.unwrap();
        let throughput = monitor.get_source(&TRANSACTIONS_THROUGHPUT).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while throughput.data(&Node::new("A")).map_or(0, |s| s.len()) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("throughput was not computed in time");

        let (first, second) = tokio::join!(monitor.shutdown(), monitor.shutdown());
        first.unwrap();
        second.unwrap();
        assert!(output.contents().contains("TransactionsThroughput, network, A, , , 2, , 40\n"));
    }

    #[test]
    fn zero_periods_are_rejected() {
        let network: Arc<dyn Network> = Arc::new(crate::network::StaticNetwork::new());
        let config = MonitorConfig { sampling_period: Duration::ZERO, ..MonitorConfig::default() };
        let err = Monitor::with_writer(Arc::clone(&network), config, WriterChain::new(Vec::new()))
            .err()
            .unwrap();
        assert!(matches!(err, MonitorError::InvalidConfig(_)));

        let config = MonitorConfig { flush_interval: Duration::ZERO, ..MonitorConfig::default() };
        assert!(config.validate().is_err());
        assert!(MonitorConfig::default().validate().is_ok());
    }

    #[test]
    fn config_defaults() {
        let config: MonitorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.output_dir, PathBuf::from("./output"));
        assert_eq!(config.sampling_period, Duration::from_secs(1));
        assert_eq!(config.flush_interval, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn creates_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = MonitorConfig {
            output_dir: dir.path().join("nested").join("out"),
            ..MonitorConfig::default()
        };
        let network: Arc<dyn Network> = Arc::new(crate::network::StaticNetwork::new());
        let monitor = Monitor::new(network, config).unwrap();
        monitor.shutdown().await.unwrap();
        assert!(dir.path().join("nested").join("out").join(EXPORT_FILE_NAME).exists());
    }
}
