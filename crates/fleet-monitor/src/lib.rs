//! Fleet monitor: samples metrics from a changing population of nodes and
//! applications, keeps them as series, derives new series from them and
//! exports everything as comma-separated rows.

pub mod error;
pub mod export;
pub mod logs;
pub mod metric;
pub mod monitor;
pub mod network;
pub mod periodic;
pub mod registry;
pub mod sensor;
pub mod series;
pub mod source;
pub mod sources;
pub mod subject;
pub mod transform;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::{ErrorList, MonitorError};
pub use metric::Metric;
pub use monitor::{Monitor, MonitorConfig};
pub use source::Source;
