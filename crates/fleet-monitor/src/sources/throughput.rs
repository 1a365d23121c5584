//! Per-node transaction throughput, derived from the blocks in node logs.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use crate::{
    error::MonitorError,
    logs::{Block, BlockListener},
    metric::Metric,
    monitor::Monitor,
    registry::SourceFactory,
    series::{BlockNumber, Series, SyncedSeries},
    source::Source,
    subject::Node,
    transform::{install_transformation, simple_moving_average},
};

/// Transactions per second of every node, indexed by block height.
pub const TRANSACTIONS_THROUGHPUT: Metric<Node, BlockNumber, f64> = Metric::new(
    "TransactionsThroughput",
    "Transactions per second observed by nodes, computed between consecutive blocks.",
);

#[derive(Default)]
struct State {
    series: HashMap<Node, Arc<SyncedSeries<BlockNumber, f64>>>,
    /// Last accepted block per node.
    last: HashMap<Node, Block>,
    closed: bool,
}

/// Computes `txs / seconds since the previous block` for every block after
/// the first one of each node.
#[derive(Default)]
pub struct TransactionsThroughputSource {
    state: Mutex<State>,
}

impl fmt::Debug for TransactionsThroughputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionsThroughputSource")
            .field("nodes", &self.state.lock().series.len())
            .finish()
    }
}

impl TransactionsThroughputSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source fed by `monitor`'s log dispatcher and exported by
    /// its writer chain.
    pub fn attach(monitor: &Monitor) -> Arc<Self> {
        let source = Arc::new(Self::new());
        let listener: Arc<dyn BlockListener> = Arc::clone(&source) as _;
        monitor.log_dispatcher().register_log_listener(listener);
        let exported: Arc<dyn Source<Node, BlockNumber, f64>> = Arc::clone(&source) as _;
        monitor.writer().add_source(exported);
        source
    }
}

impl BlockListener for TransactionsThroughputSource {
    fn on_block(&self, node: &Node, block: &Block) {
        let mut state = self.state.lock();
        if state.closed || block.height == 0 {
            return;
        }

        let series = Arc::clone(state.series.entry(node.clone()).or_default());
        if let Some(prev) = state.last.get(node) {
            let elapsed =
                (block.time - prev.time).to_std().map(|d| d.as_secs_f64()).unwrap_or_default();
            if block.height <= prev.height || elapsed <= 0.0 {
                trace!(%node, height = block.height, "block out of order, skipped");
                return;
            }
            series.append(BlockNumber(block.height), block.txs as f64 / elapsed);
        }
        state.last.insert(node.clone(), block.clone());
    }
}

#[async_trait]
impl Source<Node, BlockNumber, f64> for TransactionsThroughputSource {
    fn metric(&self) -> Metric<Node, BlockNumber, f64> {
        TRANSACTIONS_THROUGHPUT
    }

    fn subjects(&self) -> Vec<Node> {
        self.state.lock().series.keys().cloned().collect()
    }

    fn data(&self, subject: &Node) -> Option<Arc<dyn Series<BlockNumber, f64>>> {
        let series = Arc::clone(self.state.lock().series.get(subject)?);
        Some(series)
    }

    /// Blocks delivered afterwards are ignored.
    async fn shutdown(&self) -> Result<(), MonitorError> {
        self.state.lock().closed = true;
        Ok(())
    }
}

pub(super) struct TransactionsThroughputSourceFactory;

#[async_trait]
impl SourceFactory<Node, BlockNumber, f64> for TransactionsThroughputSourceFactory {
    fn metric(&self) -> Metric<Node, BlockNumber, f64> {
        TRANSACTIONS_THROUGHPUT
    }

    async fn create_source(
        &self,
        monitor: &Monitor,
    ) -> Result<Arc<dyn Source<Node, BlockNumber, f64>>, MonitorError> {
        Ok(TransactionsThroughputSource::attach(monitor))
    }
}

/// The simple moving average of [`TRANSACTIONS_THROUGHPUT`] over `period` blocks.
pub fn transactions_throughput_sma(period: usize) -> Metric<Node, BlockNumber, f64> {
    Metric::owned(
        format!("TransactionsThroughputSMA_{period}"),
        format!("Simple moving average of transactions throughput over {period} blocks."),
    )
}

/// Installs [`transactions_throughput_sma`] of `period` into `monitor`. The
/// throughput source must be installed already.
pub fn install_transactions_throughput_sma(
    monitor: &Monitor,
    period: usize,
) -> Result<Arc<dyn Source<Node, BlockNumber, f64>>, MonitorError> {
    install_transformation(
        monitor,
        transactions_throughput_sma(period),
        &TRANSACTIONS_THROUGHPUT,
        move |series| simple_moving_average(series, period),
    )
}
