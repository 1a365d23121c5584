//! Metric identities.

use std::{borrow::Cow, fmt, marker::PhantomData};

/// A named, typed definition of what is measured.
///
/// `S` is the subject type, `K` and `V` the index and value types of the
/// per-subject series. Two metrics with the same name are the same metric.
pub struct Metric<S, K, V> {
    name: Cow<'static, str>,
    description: Cow<'static, str>,
    _types: PhantomData<fn() -> (S, K, V)>,
}

impl<S, K, V> Metric<S, K, V> {
    pub const fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            description: Cow::Borrowed(description),
            _types: PhantomData,
        }
    }

    /// A metric whose name is only known at runtime, e.g. a parameterised
    /// moving average.
    pub fn owned(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            description: Cow::Owned(description.into()),
            _types: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl<S, K, V> Clone for Metric<S, K, V> {
    fn clone(&self) -> Self {
        Self { name: self.name.clone(), description: self.description.clone(), _types: PhantomData }
    }
}

impl<S, K, V> PartialEq for Metric<S, K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<S, K, V> Eq for Metric<S, K, V> {}

impl<S, K, V> fmt::Debug for Metric<S, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

impl<S, K, V> fmt::Display for Metric<S, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{series::Time, subject::Node};

    const TEST_METRIC: Metric<Node, Time, u64> = Metric::new("TestMetric", "A test metric.");

    #[test]
    fn metrics_compare_by_name() {
        let other = Metric::<Node, Time, u64>::owned("TestMetric", "Different description.");
        assert_eq!(TEST_METRIC, other);
        assert_ne!(TEST_METRIC, Metric::new("Other", ""));
        assert_eq!(TEST_METRIC.to_string(), "TestMetric");
        assert_eq!(TEST_METRIC.description(), "A test metric.");
    }
}
