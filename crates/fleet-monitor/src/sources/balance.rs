//! Per-account balance, polled over JSON-RPC.

use std::sync::Arc;

use alloy::{
    primitives::{Address, U256, utils::Unit},
    providers::{Provider, ProviderBuilder},
};
use anyhow::Context;
use async_trait::async_trait;

use crate::{
    error::MonitorError,
    metric::Metric,
    monitor::Monitor,
    periodic::{AccountHandle, PeriodicAccountDataSource},
    registry::SourceFactory,
    sensor::{Sensor, SensorFactory},
    series::Time,
    source::Source,
    subject::Account,
};

/// Balance of every application account over time, in ether.
pub const ACCOUNT_BALANCE: Metric<Account, Time, f64> =
    Metric::new("AccountBalance", "The balance of application accounts in ether.");

/// Converts a wei amount to ether. Amounts beyond `u128` saturate.
pub fn wei_to_ether(wei: U256) -> f64 {
    let divisor = 10_f64.powi(Unit::ETHER.get() as i32);
    u128::try_from(wei).unwrap_or(u128::MAX) as f64 / divisor
}

struct BalanceSensor<P> {
    provider: P,
    address: Address,
}

#[async_trait]
impl<P: Provider + Send + Sync> Sensor<f64> for BalanceSensor<P> {
    async fn read_value(&mut self) -> anyhow::Result<f64> {
        let wei = self
            .provider
            .get_balance(self.address)
            .await
            .with_context(|| format!("eth_getBalance failed for {}", self.address))?;
        Ok(wei_to_ether(wei))
    }
}

#[derive(Debug)]
pub struct BalanceSensorFactory;

#[async_trait]
impl SensorFactory<AccountHandle, f64> for BalanceSensorFactory {
    async fn create_sensor(&self, account: &AccountHandle) -> anyhow::Result<Box<dyn Sensor<f64>>> {
        let app = &account.app;
        let address = app
            .account_address(account.id)
            .with_context(|| format!("application {} has no account {}", app.name(), account.id))?;
        let url = app
            .rpc_url()
            .with_context(|| format!("application {} does not expose an RPC endpoint", app.name()))?;
        let provider = ProviderBuilder::new().disable_recommended_fillers().connect_http(url.clone());
        Ok(Box::new(BalanceSensor { provider, address }))
    }
}

pub(super) struct AccountBalanceSourceFactory;

#[async_trait]
impl SourceFactory<Account, Time, f64> for AccountBalanceSourceFactory {
    fn metric(&self) -> Metric<Account, Time, f64> {
        ACCOUNT_BALANCE
    }

    async fn create_source(
        &self,
        monitor: &Monitor,
    ) -> Result<Arc<dyn Source<Account, Time, f64>>, MonitorError> {
        let period = monitor.config().sampling_period;
        Ok(PeriodicAccountDataSource::new(ACCOUNT_BALANCE, monitor, period, BalanceSensorFactory)
            .await)
    }
}
