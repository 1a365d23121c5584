//! Periodic per-account sources kept in sync with the fleet.

use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::PeriodicDataSource;
use crate::{
    error::MonitorError,
    metric::Metric,
    monitor::Monitor,
    network::{ApplicationHandle, Network, NetworkListener},
    sensor::SensorFactory,
    series::{Series, SeriesValue, Time},
    source::Source,
    subject::Account,
};

/// One account of an application, handed to sensor factories.
#[derive(Clone)]
pub struct AccountHandle {
    pub app: Arc<dyn ApplicationHandle>,
    pub id: usize,
}

impl fmt::Debug for AccountHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountHandle").field("app", &self.app.name()).field("id", &self.id).finish()
    }
}

/// A [`PeriodicDataSource`] over application accounts. An application
/// with `n` accounts contributes the subjects `app#0 .. app#n-1`.
pub struct PeriodicAccountDataSource<V> {
    inner: PeriodicDataSource<Account, V>,
    network: Arc<dyn Network>,
    factory: Box<dyn SensorFactory<AccountHandle, V>>,
    me: Weak<Self>,
}

impl<V> fmt::Debug for PeriodicAccountDataSource<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicAccountDataSource")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<V: SeriesValue> PeriodicAccountDataSource<V> {
    pub async fn new(
        metric: Metric<Account, Time, V>,
        monitor: &Monitor,
        period: Duration,
        factory: impl SensorFactory<AccountHandle, V> + 'static,
    ) -> Arc<Self> {
        let network = Arc::clone(monitor.network());
        let source = Arc::new_cyclic(|me| Self {
            inner: PeriodicDataSource::with_period(metric, period),
            network: Arc::clone(&network),
            factory: Box::new(factory),
            me: me.clone(),
        });

        network.register_listener(Arc::clone(&source) as Arc<dyn NetworkListener>);
        for app in network.active_applications() {
            source.add_application(&app).await;
        }

        monitor.writer().add_source(Arc::clone(&source) as Arc<dyn Source<Account, Time, V>>);
        source
    }

    async fn add_application(&self, app: &Arc<dyn ApplicationHandle>) {
        let metric = self.inner.metric.name();
        for id in 0..app.num_accounts() {
            let subject = Account::new(app.name(), id);
            if self.inner.synced_data(&subject).is_some() {
                continue;
            }

            let handle = AccountHandle { app: Arc::clone(app), id };
            match self.factory.create_sensor(&handle).await {
                Ok(sensor) => {
                    if let Err(e) = self.inner.add_subject(subject, sensor) {
                        debug!(metric, error = %e, "account not added");
                    }
                }
                Err(e) => {
                    let err = MonitorError::SensorCreation {
                        metric: metric.to_string(),
                        subject: subject.to_string(),
                        source: e.into(),
                    };
                    warn!(error = %err, "account is not monitored");
                }
            }
        }
    }
}

#[async_trait]
impl<V: SeriesValue> NetworkListener for PeriodicAccountDataSource<V> {
    async fn after_application_creation(&self, app: Arc<dyn ApplicationHandle>) {
        self.add_application(&app).await;
    }
}

#[async_trait]
impl<V: SeriesValue> Source<Account, Time, V> for PeriodicAccountDataSource<V> {
    fn metric(&self) -> Metric<Account, Time, V> {
        self.inner.metric()
    }

    fn subjects(&self) -> Vec<Account> {
        self.inner.subjects()
    }

    fn data(&self, subject: &Account) -> Option<Arc<dyn Series<Time, V>>> {
        self.inner.data(subject)
    }

    async fn shutdown(&self) -> Result<(), MonitorError> {
        if let Some(me) = self.me.upgrade() {
            self.network.unregister_listener(&(me as Arc<dyn NetworkListener>));
        }
        self.inner.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{IncrementingSensorFactory, test_app, test_monitor};

    const TEST_ACCOUNT_METRIC: Metric<Account, Time, u64> =
        Metric::new("TestAccountMetric", "A test metric for this unit test.");

    fn sorted(mut subjects: Vec<Account>) -> Vec<Account> {
        subjects.sort();
        subjects
    }

    #[tokio::test]
    async fn app_source_retrieves_sensor_data() {
        let (network, monitor) = test_monitor();
        network.add_application(test_app("A", 2)).await;
        network.add_application(test_app("B", 1)).await;

        let source = PeriodicAccountDataSource::new(
            TEST_ACCOUNT_METRIC,
            &monitor,
            Duration::from_millis(50),
            IncrementingSensorFactory,
        )
        .await;

        let mut want = vec![Account::new("A", 0), Account::new("A", 1), Account::new("B", 0)];
        assert_eq!(sorted(source.subjects()), want);

        // Simulate the creation of an application after source initialization.
        network.add_application(test_app("C", 3)).await;
        want.extend([Account::new("C", 0), Account::new("C", 1), Account::new("C", 2)]);
        assert_eq!(sorted(source.subjects()), want);

        tokio::time::sleep(Duration::from_millis(200)).await;
        source.shutdown().await.unwrap();

        assert_eq!(sorted(source.subjects()), want);
        for subject in &want {
            let data = source.data(subject).expect("series exists");
            let points = data.range(Time::MIN, Time::MAX);
            assert!(!points.is_empty(), "no data collected for {subject}");
            for (i, point) in points.iter().enumerate() {
                assert_eq!(point.value, i as u64 + 1, "unexpected value for {subject}");
            }
        }
    }
}
