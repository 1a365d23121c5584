//! Built-in metrics and their sources.

mod balance;
mod block_height;
mod throughput;

pub use balance::{ACCOUNT_BALANCE, BalanceSensorFactory, wei_to_ether};
pub use block_height::{BlockHeightSensorFactory, NODE_BLOCK_HEIGHT};
pub use throughput::{
    TRANSACTIONS_THROUGHPUT, TransactionsThroughputSource, install_transactions_throughput_sma,
    transactions_throughput_sma,
};

use crate::{error::MonitorError, registry::SourceRegistry};

/// Registers every built-in metric, in installation order.
pub(crate) fn register_builtin(registry: &SourceRegistry) -> Result<(), MonitorError> {
    registry.register(block_height::NodeBlockHeightSourceFactory)?;
    registry.register(balance::AccountBalanceSourceFactory)?;
    registry.register(throughput::TransactionsThroughputSourceFactory)?;
    Ok(())
}
