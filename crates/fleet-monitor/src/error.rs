//! Error types shared by every monitoring component.

use std::fmt;

/// Errors returned by sources, the registry, the monitor and the exporter.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// A subject was added twice to the same source.
    #[error("sensor for subject {subject} already present in {metric}")]
    SubjectAlreadyPresent { metric: String, subject: String },

    /// Two metrics were registered under the same name.
    #[error("metric {0} is already registered")]
    DuplicateMetric(String),

    /// A monitor already holds a source for this metric.
    #[error("source for metric {0} is already installed")]
    DuplicateSource(String),

    /// A source for this metric was requested but never installed.
    #[error("no source installed for metric {0}")]
    UnknownSource(String),

    /// A sensor could not be created for a subject.
    #[error("failed to create {metric} sensor for {subject}: {source}")]
    SensorCreation {
        metric: String,
        subject: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The source no longer accepts subjects.
    #[error("source {0} has been shut down")]
    ShutDown(String),

    /// Errors accumulated by background tasks, reported at shutdown.
    #[error(transparent)]
    Collection(#[from] ErrorList),

    /// Writing exported rows failed.
    #[error("export failed: {0}")]
    Export(#[from] std::io::Error),
}

/// An ordered list of errors joined into one, displayed one per line.
#[derive(Debug, Default)]
pub struct ErrorList(Vec<anyhow::Error>);

impl ErrorList {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, error: impl Into<anyhow::Error>) {
        self.0.push(error.into());
    }

    pub fn extend(&mut self, errors: impl IntoIterator<Item = anyhow::Error>) {
        self.0.extend(errors);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &anyhow::Error> {
        self.0.iter()
    }

    /// `Ok(())` when nothing was collected, the joined error otherwise.
    pub fn into_result(self) -> Result<(), MonitorError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(MonitorError::Collection(self))
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{e:#}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorList {}

impl From<Vec<anyhow::Error>> for ErrorList {
    fn from(errors: Vec<anyhow::Error>) -> Self {
        Self(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_is_ok() {
        assert!(ErrorList::new().into_result().is_ok());
    }

    #[test]
    fn joined_errors_display_one_per_line() {
        let mut errors = ErrorList::new();
        errors.push(anyhow::anyhow!("first"));
        errors.push(anyhow::anyhow!("second"));
        assert_eq!(errors.len(), 2);

        let err = errors.into_result().unwrap_err();
        assert_eq!(err.to_string(), "first\nsecond");
    }

    #[test]
    fn subject_already_present_display() {
        let err = MonitorError::SubjectAlreadyPresent {
            metric: "NodeBlockHeight".to_string(),
            subject: "A".to_string(),
        };
        assert_eq!(err.to_string(), "sensor for subject A already present in NodeBlockHeight");
    }
}
