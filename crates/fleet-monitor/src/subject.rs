//! Identities of the entities metrics are measured against.

use std::{fmt, hash::Hash};

use serde::{Deserialize, Serialize};

/// Bound shared by every subject type.
///
/// Subjects are opaque, totally ordered identities; their [`fmt::Display`]
/// output is the label used in logs and exported rows.
pub trait Subject:
    Clone + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
}

impl<T> Subject for T where
    T: Clone + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
}

/// A node of the network, identified by its label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Node(String);

impl Node {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn label(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Node {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

/// An application running on the network, identified by its name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct App(String);

impl App {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One account of an application. Orders by application, then index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Account {
    pub app: App,
    pub id: usize,
}

impl Account {
    pub fn new(app: impl Into<String>, id: usize) -> Self {
        Self { app: App::new(app), id }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.app, self.id)
    }
}
