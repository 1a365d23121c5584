//! Contracts of the fleet collaborator and an in-process implementation.
//!
//! The monitoring engine never creates nodes or applications. It observes
//! the fleet through [`Network`]: enumerating what is already active and
//! registering a [`NetworkListener`] to hear about what is created later.

use std::{fmt, path::PathBuf, sync::Arc};

use alloy::primitives::Address;
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncRead;
use tracing::debug;
use url::Url;

/// A raw, line-oriented node log.
pub type LogStream = Box<dyn AsyncRead + Send + Unpin>;

/// Handle to a running node.
#[async_trait]
pub trait NodeHandle: Send + Sync {
    fn label(&self) -> &str;

    /// JSON-RPC endpoint, if the node exposes one.
    fn rpc_url(&self) -> Option<&Url>;

    /// Opens the node's log from the beginning.
    async fn stream_log(&self) -> anyhow::Result<LogStream>;
}

/// Handle to an application generating load on the network.
pub trait ApplicationHandle: Send + Sync {
    fn name(&self) -> &str;

    fn num_accounts(&self) -> usize;

    fn account_address(&self, id: usize) -> Option<Address>;

    fn rpc_url(&self) -> Option<&Url>;
}

/// Receives fleet population changes. Each callback fires once per subject.
#[async_trait]
pub trait NetworkListener: Send + Sync {
    async fn after_node_creation(&self, _node: Arc<dyn NodeHandle>) {}

    async fn after_application_creation(&self, _app: Arc<dyn ApplicationHandle>) {}
}

/// The fleet collaborator.
pub trait Network: Send + Sync {
    fn active_nodes(&self) -> Vec<Arc<dyn NodeHandle>>;

    fn active_applications(&self) -> Vec<Arc<dyn ApplicationHandle>>;

    fn register_listener(&self, listener: Arc<dyn NetworkListener>);

    fn unregister_listener(&self, listener: &Arc<dyn NetworkListener>);
}

/// Compares listeners by identity.
pub fn same_listener(a: &Arc<dyn NetworkListener>, b: &Arc<dyn NetworkListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

// ── Static fleet ─────────────────────────────────────────────

/// A node described by configuration: an RPC endpoint and a log file.
#[derive(Debug, Clone)]
pub struct StaticNode {
    pub label: String,
    pub rpc_url: Option<Url>,
    pub log_path: Option<PathBuf>,
}

#[async_trait]
impl NodeHandle for StaticNode {
    fn label(&self) -> &str {
        &self.label
    }

    fn rpc_url(&self) -> Option<&Url> {
        self.rpc_url.as_ref()
    }

    async fn stream_log(&self) -> anyhow::Result<LogStream> {
        let path = self
            .log_path
            .as_ref()
            .with_context(|| format!("node {} does not expose a log", self.label))?;
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("failed to open log {}", path.display()))?;
        Ok(Box::new(file))
    }
}

/// An application described by configuration.
#[derive(Debug, Clone)]
pub struct StaticApplication {
    pub name: String,
    pub rpc_url: Option<Url>,
    pub accounts: Vec<Address>,
}

impl ApplicationHandle for StaticApplication {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_accounts(&self) -> usize {
        self.accounts.len()
    }

    fn account_address(&self, id: usize) -> Option<Address> {
        self.accounts.get(id).copied()
    }

    fn rpc_url(&self) -> Option<&Url> {
        self.rpc_url.as_ref()
    }
}

/// An in-process fleet. Nodes and applications added at runtime are
/// announced to every registered listener.
#[derive(Default)]
pub struct StaticNetwork {
    nodes: Mutex<Vec<Arc<dyn NodeHandle>>>,
    apps: Mutex<Vec<Arc<dyn ApplicationHandle>>>,
    listeners: Mutex<Vec<Arc<dyn NetworkListener>>>,
}

impl fmt::Debug for StaticNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticNetwork")
            .field("nodes", &self.nodes.lock().len())
            .field("apps", &self.apps.lock().len())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl StaticNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node and notifies listeners. Listeners are called outside the
    /// listener lock so they may (un)register themselves.
    pub async fn add_node(&self, node: Arc<dyn NodeHandle>) {
        self.nodes.lock().push(Arc::clone(&node));
        debug!(node = node.label(), "node added to fleet");
        for listener in self.listeners() {
            listener.after_node_creation(Arc::clone(&node)).await;
        }
    }

    pub async fn add_application(&self, app: Arc<dyn ApplicationHandle>) {
        self.apps.lock().push(Arc::clone(&app));
        debug!(app = app.name(), "application added to fleet");
        for listener in self.listeners() {
            listener.after_application_creation(Arc::clone(&app)).await;
        }
    }

    pub fn num_listeners(&self) -> usize {
        self.listeners.lock().len()
    }

    fn listeners(&self) -> Vec<Arc<dyn NetworkListener>> {
        self.listeners.lock().clone()
    }
}

impl Network for StaticNetwork {
    fn active_nodes(&self) -> Vec<Arc<dyn NodeHandle>> {
        self.nodes.lock().clone()
    }

    fn active_applications(&self) -> Vec<Arc<dyn ApplicationHandle>> {
        self.apps.lock().clone()
    }

    fn register_listener(&self, listener: Arc<dyn NetworkListener>) {
        let mut listeners = self.listeners.lock();
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    fn unregister_listener(&self, listener: &Arc<dyn NetworkListener>) {
        self.listeners.lock().retain(|l| !same_listener(l, listener));
    }
}
