//! Fan-out of the blocks parsed from node logs.

use std::{
    collections::BTreeSet,
    fmt,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{Block, parse_block_line};
use crate::{
    error::{ErrorList, MonitorError},
    network::{Network, NetworkListener, NodeHandle},
    subject::Node,
};

/// Receives every block parsed from every node's log.
pub trait BlockListener: Send + Sync {
    fn on_block(&self, node: &Node, block: &Block);
}

type Delivery = (Node, Block);

#[derive(Default)]
struct Fanout {
    /// Every block published so far, in publication order.
    history: Vec<Delivery>,
    listeners: Vec<mpsc::UnboundedSender<Delivery>>,
}

impl Fanout {
    fn publish(&mut self, node: &Node, block: Block) {
        self.listeners.retain(|tx| tx.send((node.clone(), block.clone())).is_ok());
        self.history.push((node.clone(), block));
    }
}

/// Streams the log of every node in the fleet and fans the parsed blocks
/// out to registered [`BlockListener`]s.
///
/// Each node is parsed by its own task and each listener is served by its
/// own delivery task, so a slow listener never holds up parsing. A listener
/// registered late first receives the blocks published before it.
pub struct NodeLogDispatcher {
    network: Arc<dyn Network>,
    nodes: Mutex<BTreeSet<Node>>,
    fanout: Arc<Mutex<Fanout>>,
    tasks: Mutex<JoinSet<()>>,
    cancel: CancellationToken,
    /// Held while tasks are drained.
    drain: tokio::sync::Mutex<()>,
    me: Weak<Self>,
}

impl fmt::Debug for NodeLogDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeLogDispatcher")
            .field("nodes", &self.nodes.lock().len())
            .field("listeners", &self.fanout.lock().listeners.len())
            .finish_non_exhaustive()
    }
}

impl NodeLogDispatcher {
    /// Creates the dispatcher and starts parsing the logs of active nodes.
    pub fn new(network: Arc<dyn Network>) -> Arc<Self> {
        let dispatcher = Arc::new_cyclic(|me| Self {
            network: Arc::clone(&network),
            nodes: Mutex::new(BTreeSet::new()),
            fanout: Arc::new(Mutex::new(Fanout::default())),
            tasks: Mutex::new(JoinSet::new()),
            cancel: CancellationToken::new(),
            drain: tokio::sync::Mutex::new(()),
            me: me.clone(),
        });

        network.register_listener(Arc::clone(&dispatcher) as Arc<dyn NetworkListener>);
        for node in network.active_nodes() {
            dispatcher.add_node(node);
        }
        dispatcher
    }

    pub fn register_log_listener(&self, listener: Arc<dyn BlockListener>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        {
            let mut fanout = self.fanout.lock();
            for (node, block) in &fanout.history {
                let _ = tx.send((node.clone(), block.clone()));
            }
            fanout.listeners.push(tx);
        }

        let cancel = self.cancel.clone();
        self.tasks.lock().spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some((node, block)) => listener.on_block(&node, &block),
                        None => break,
                    },
                }
            }
        });
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.lock().iter().cloned().collect()
    }

    fn add_node(&self, handle: Arc<dyn NodeHandle>) {
        let node = Node::new(handle.label());
        if self.cancel.is_cancelled() || !self.nodes.lock().insert(node.clone()) {
            return;
        }
        debug!(%node, "following node log");
        self.tasks.lock().spawn(follow_log(
            node,
            handle,
            Arc::clone(&self.fanout),
            self.cancel.clone(),
        ));
    }

    /// Stops parsing and delivery and waits for every task to finish, also
    /// when another shutdown is already in progress.
    pub async fn shutdown(&self) -> Result<(), MonitorError> {
        if let Some(me) = self.me.upgrade() {
            self.network.unregister_listener(&(me as Arc<dyn NetworkListener>));
        }
        self.cancel.cancel();
        let _drain = self.drain.lock().await;

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let mut errors = ErrorList::new();
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                errors.push(anyhow::Error::new(e).context("log dispatcher task failed"));
            }
        }
        errors.into_result()
    }
}

#[async_trait]
impl NetworkListener for NodeLogDispatcher {
    async fn after_node_creation(&self, node: Arc<dyn NodeHandle>) {
        self.add_node(node);
    }
}

/// Parses one node's log until it ends or the dispatcher is cancelled.
/// Lines that are not blocks are skipped.
async fn follow_log(
    node: Node,
    handle: Arc<dyn NodeHandle>,
    fanout: Arc<Mutex<Fanout>>,
    cancel: CancellationToken,
) {
    let stream = match handle.stream_log().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%node, error = %e, "failed to open node log");
            return;
        }
    };

    let year = Utc::now().year();
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = reader.read_until(b'\n', &mut line) => {
                match read {
                    Ok(0) => {
                        debug!(%node, "node log ended");
                        break;
                    }
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        match parse_block_line(&text, year) {
                            Some(block) => fanout.lock().publish(&node, block),
                            None => trace!(%node, line = %text.trim_end(), "skipping log line"),
                        }
                        line.clear();
                    }
                    Err(e) => {
                        warn!(%node, error = %e, "failed to read node log");
                        break;
                    }
                }
            }
        }
    }
}
