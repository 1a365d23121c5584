//! Per-node block height, polled over JSON-RPC.

use std::sync::Arc;

use alloy::providers::{Provider, ProviderBuilder};
use anyhow::Context;
use async_trait::async_trait;

use crate::{
    error::MonitorError,
    metric::Metric,
    monitor::Monitor,
    network::NodeHandle,
    periodic::PeriodicNodeDataSource,
    registry::SourceFactory,
    sensor::{Sensor, SensorFactory},
    series::Time,
    source::Source,
    subject::Node,
};

/// Block height of every node over time.
pub const NODE_BLOCK_HEIGHT: Metric<Node, Time, u64> =
    Metric::new("NodeBlockHeight", "The block height of nodes at various times.");

struct BlockHeightSensor<P> {
    provider: P,
}

#[async_trait]
impl<P: Provider + Send + Sync> Sensor<u64> for BlockHeightSensor<P> {
    async fn read_value(&mut self) -> anyhow::Result<u64> {
        self.provider.get_block_number().await.context("eth_blockNumber failed")
    }
}

/// Connects a [`BlockHeightSensor`] to the node's RPC endpoint.
#[derive(Debug)]
pub struct BlockHeightSensorFactory;

#[async_trait]
impl SensorFactory<Arc<dyn NodeHandle>, u64> for BlockHeightSensorFactory {
    async fn create_sensor(
        &self,
        node: &Arc<dyn NodeHandle>,
    ) -> anyhow::Result<Box<dyn Sensor<u64>>> {
        let url = node
            .rpc_url()
            .with_context(|| format!("node {} does not expose an RPC endpoint", node.label()))?;
        let provider = ProviderBuilder::new().disable_recommended_fillers().connect_http(url.clone());
        Ok(Box::new(BlockHeightSensor { provider }))
    }
}

pub(super) struct NodeBlockHeightSourceFactory;

#[async_trait]
impl SourceFactory<Node, Time, u64> for NodeBlockHeightSourceFactory {
    fn metric(&self) -> Metric<Node, Time, u64> {
        NODE_BLOCK_HEIGHT
    }

    async fn create_source(
        &self,
        monitor: &Monitor,
    ) -> Result<Arc<dyn Source<Node, Time, u64>>, MonitorError> {
        let period = monitor.config().sampling_period;
        Ok(PeriodicNodeDataSource::new(NODE_BLOCK_HEIGHT, monitor, period, BlockHeightSensorFactory)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{network::StaticNode, test_helpers::test_node};

    #[tokio::test]
    async fn nodes_without_rpc_have_no_sensor() {
        let err = BlockHeightSensorFactory.create_sensor(&test_node("A", "")).await.err().unwrap();
        assert!(err.to_string().contains("does not expose an RPC endpoint"));
    }

    #[tokio::test]
    async fn unreachable_node_fails_reads() {
        let node: Arc<dyn NodeHandle> = Arc::new(StaticNode {
            label: "A".to_string(),
            rpc_url: Some("http://127.0.0.1:1".parse().unwrap()),
            log_path: None,
        });
        let mut sensor = BlockHeightSensorFactory.create_sensor(&node).await.unwrap();
        let err = sensor.read_value().await.unwrap_err();
        assert!(format!("{err:#}").contains("eth_blockNumber failed"));
    }
}
