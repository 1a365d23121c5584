//! Fakes shared by the unit tests.

use std::{
    io::{self, Cursor, Write},
    sync::Arc,
    time::Duration,
};

use alloy::primitives::Address;
use async_trait::async_trait;
use parking_lot::Mutex;
use url::Url;

use crate::{
    export::WriterChain,
    monitor::{Monitor, MonitorConfig},
    network::{
        ApplicationHandle, LogStream, Network, NodeHandle, StaticApplication, StaticNetwork,
    },
    sensor::{Sensor, SensorFactory},
    subject::Node,
};

/// Returns 1, 2, 3, ... on successive reads.
#[derive(Debug, Default)]
pub(crate) struct IncrementingSensor {
    next: u64,
}

#[async_trait]
impl Sensor<u64> for IncrementingSensor {
    async fn read_value(&mut self) -> anyhow::Result<u64> {
        self.next += 1;
        Ok(self.next)
    }
}

/// Like [`IncrementingSensor`], but every read takes `delay`.
#[derive(Debug)]
pub(crate) struct SlowSensor {
    pub delay: Duration,
    next: u64,
}

impl SlowSensor {
    pub fn new(delay: Duration) -> Self {
        Self { delay, next: 0 }
    }
}

#[async_trait]
impl Sensor<u64> for SlowSensor {
    async fn read_value(&mut self) -> anyhow::Result<u64> {
        tokio::time::sleep(self.delay).await;
        self.next += 1;
        Ok(self.next)
    }
}

#[derive(Debug)]
pub(crate) struct FailingSensor;

#[async_trait]
impl Sensor<u64> for FailingSensor {
    async fn read_value(&mut self) -> anyhow::Result<u64> {
        anyhow::bail!("sensor unavailable")
    }
}

/// Hands out a fresh [`IncrementingSensor`] for any subject.
#[derive(Debug)]
pub(crate) struct IncrementingSensorFactory;

#[async_trait]
impl<H: Sync + ?Sized> SensorFactory<H, u64> for IncrementingSensorFactory {
    async fn create_sensor(&self, _handle: &H) -> anyhow::Result<Box<dyn Sensor<u64>>> {
        Ok(Box::new(IncrementingSensor::default()))
    }
}

/// Fails to create a sensor for the node labelled `reject`.
#[derive(Debug)]
pub(crate) struct RejectingNodeFactory {
    pub reject: &'static str,
}

#[async_trait]
impl SensorFactory<Arc<dyn NodeHandle>, u64> for RejectingNodeFactory {
    async fn create_sensor(
        &self,
        node: &Arc<dyn NodeHandle>,
    ) -> anyhow::Result<Box<dyn Sensor<u64>>> {
        if node.label() == self.reject {
            anyhow::bail!("node {} has no sensor", node.label());
        }
        Ok(Box::new(IncrementingSensor::default()))
    }
}

/// A `Write` sink whose content stays inspectable after it was handed over.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An empty fleet and a monitor exporting into memory.
pub(crate) fn test_monitor() -> (Arc<StaticNetwork>, Arc<Monitor>) {
    let (network, monitor, _) = test_monitor_with_output();
    (network, monitor)
}

pub(crate) fn test_monitor_with_output() -> (Arc<StaticNetwork>, Arc<Monitor>, SharedBuffer) {
    let network = Arc::new(StaticNetwork::new());
    let output = SharedBuffer::default();
    let monitor = Monitor::with_writer(
        Arc::clone(&network) as Arc<dyn Network>,
        MonitorConfig::default(),
        WriterChain::new(output.clone()),
    )
    .unwrap();
    (network, monitor, output)
}

struct MemoryNode {
    label: String,
    log: &'static str,
}

#[async_trait]
impl NodeHandle for MemoryNode {
    fn label(&self) -> &str {
        &self.label
    }

    fn rpc_url(&self) -> Option<&Url> {
        None
    }

    async fn stream_log(&self) -> anyhow::Result<LogStream> {
        Ok(Box::new(Cursor::new(self.log.as_bytes())))
    }
}

/// A node without RPC endpoint whose log is `log`.
pub(crate) fn test_node(label: &str, log: &'static str) -> Arc<dyn NodeHandle> {
    Arc::new(MemoryNode { label: label.to_string(), log })
}

/// An application with `accounts` distinct addresses.
pub(crate) fn test_app(name: &str, accounts: usize) -> Arc<dyn ApplicationHandle> {
    Arc::new(StaticApplication {
        name: name.to_string(),
        rpc_url: None,
        accounts: (0..accounts).map(|i| Address::with_last_byte(i as u8)).collect(),
    })
}

// ── Node logs ────────────────────────────────────────────────

pub(crate) const NODE_A_LOG: &str = "\
INFO [05-04|08:59:59.000] Starting peer-to-peer node               instance=node-a
INFO [05-04|09:00:00.000] New block                                index=1 id=1:1:c0cb46 gas_used=1,000 txs=10/0 age=1.5ms t=2.1ms
INFO [05-04|09:00:00.500] New block                                index=2 id=1:2:9d2f1a gas_used=21,000 txs=20/0 age=1.1ms t=2.0ms
WARN [05-04|09:00:00.600] New block                                index=abc txs=1/0
INFO [05-04|09:00:01.000] New block                                index=3 id=1:3:e5a201 gas_used=417,928 txs=25/1 age=0.9ms t=3.0ms
INFO [05-04|09:00:01.100] Looking for peers                        peercount=2 tried=0 static=2
INFO [05-04|09:00:01.250] New block                                index=4 id=1:4:77ab02 txs=15/0 age=0.8ms t=1.0ms
";

pub(crate) const NODE_B_LOG: &str = "\
INFO [05-04|09:00:00.000] New block                                index=1 id=1:1:c0cb46 gas_used=500 txs=5/0 age=1.5ms t=2.1ms
INFO [05-04|09:00:00.250] New block                                index=2 id=1:2:9d2f1a gas_used=10,500 txs=10/0 age=1.2ms t=2.0ms
INFO [05-04|09:00:00.500] New block                                index=3 id=1:3:e5a201 gas_used=2,500 txs=5/0 age=1.0ms t=1.9ms
";

pub(crate) const NODE_C_LOG: &str = "\
INFO [05-04|09:00:00.000] New block                                index=1 id=1:1:c0cb46 gas_used=21,000 txs=1/0 age=1.5ms t=2.1ms
Unexpected line without a timestamp
INFO [05-04|09:00:01.000] New block                                index=2 id=1:2:9d2f1a gas_used=147,000 txs=7/0 age=1.0ms t=2.0ms
";

/// `(height, txs, gas_used)` of the blocks in the log of `node`.
pub(crate) fn expected_blocks(node: &Node) -> Vec<(u64, u64, u64)> {
    match node.label() {
        "A" => vec![(1, 10, 1_000), (2, 20, 21_000), (3, 25, 417_928), (4, 15, 0)],
        "B" => vec![(1, 5, 500), (2, 10, 10_500), (3, 5, 2_500)],
        "C" => vec![(1, 1, 21_000), (2, 7, 147_000)],
        _ => vec![],
    }
}
