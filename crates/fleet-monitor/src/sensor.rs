//! Pluggable probes producing one sample per invocation.

use async_trait::async_trait;

/// A probe for one subject. Implementations own whatever state is needed
/// to sample repeatedly (an RPC connection, a counter, ...).
#[async_trait]
pub trait Sensor<T>: Send {
    async fn read_value(&mut self) -> anyhow::Result<T>;
}

/// Creates a [`Sensor`] for a subject handle `H` at discovery time.
///
/// A failure is permanent for that subject: it is logged and the subject is
/// not tracked.
#[async_trait]
pub trait SensorFactory<H: ?Sized, T>: Send + Sync {
    async fn create_sensor(&self, handle: &H) -> anyhow::Result<Box<dyn Sensor<T>>>;
}
