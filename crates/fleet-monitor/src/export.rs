//! Export of collected series as comma-separated rows.
//!
//! Every registered source is written as one row per subject and newly
//! available point:
//!
//! ```text
//! TransactionsThroughput, network, A, , , 11, , 10
//! ```

use std::{
    collections::HashMap,
    fmt,
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{
    error::MonitorError,
    series::{SeriesKey, SeriesValue},
    source::Source,
    subject::Subject,
};

/// Scope column of every exported row.
const SCOPE: &str = "network";

/// Writes whatever its source collected since the previous call.
trait Exporter: Send {
    fn export(&mut self, out: &mut dyn Write) -> io::Result<()>;
}

struct SeriesExporter<S, K, V> {
    source: Arc<dyn Source<S, K, V>>,
    /// Number of points already written, per subject.
    written: HashMap<S, usize>,
}

impl<S: Subject, K: SeriesKey, V: SeriesValue> Exporter for SeriesExporter<S, K, V> {
    fn export(&mut self, out: &mut dyn Write) -> io::Result<()> {
        let metric = self.source.metric();
        let mut subjects = self.source.subjects();
        subjects.sort();

        for subject in subjects {
            let Some(series) = self.source.data(&subject) else { continue };
            let written = self.written.entry(subject.clone()).or_default();
            for point in series.points_from(*written) {
                writeln!(out, "{metric}, {SCOPE}, {subject}, , , {}, , {}", point.key, point.value)?;
                *written += 1;
            }
        }
        Ok(())
    }
}

struct Chain {
    /// `None` once closed.
    sink: Option<Box<dyn Write + Send>>,
    exporters: Vec<Box<dyn Exporter>>,
}

/// The ordered set of exporters sharing one output sink.
pub struct WriterChain {
    inner: Mutex<Chain>,
}

impl fmt::Debug for WriterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("WriterChain")
            .field("exporters", &inner.exporters.len())
            .field("closed", &inner.sink.is_none())
            .finish()
    }
}

impl WriterChain {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self { inner: Mutex::new(Chain { sink: Some(Box::new(sink)), exporters: Vec::new() }) }
    }

    /// Creates (or truncates) `path` and exports into it.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }

    /// Exports `source` on every subsequent flush, after the sources added
    /// before it.
    pub fn add_source<S: Subject, K: SeriesKey, V: SeriesValue>(
        &self,
        source: Arc<dyn Source<S, K, V>>,
    ) {
        debug!(metric = %source.metric(), "source registered for export");
        let exporter = SeriesExporter { source, written: HashMap::new() };
        self.inner.lock().exporters.push(Box::new(exporter));
    }

    pub fn num_sources(&self) -> usize {
        self.inner.lock().exporters.len()
    }

    /// Writes every point collected since the last flush. A no-op once closed.
    pub fn flush(&self) -> Result<(), MonitorError> {
        let mut inner = self.inner.lock();
        let Chain { sink, exporters } = &mut *inner;
        let Some(sink) = sink else { return Ok(()) };

        for exporter in exporters.iter_mut() {
            exporter.export(sink.as_mut())?;
        }
        sink.flush()?;
        Ok(())
    }

    /// Flushes a final time and releases the sink. Later calls are no-ops.
    pub fn close(&self) -> Result<(), MonitorError> {
        let result = self.flush();
        self.inner.lock().sink = None;
        result
    }

    /// Spawns a task flushing every `interval` until `cancel` fires.
    ///
    /// # Panics
    ///
    /// If `interval` is zero.
    pub fn spawn_flusher(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        assert!(!interval.is_zero(), "flush interval must be non-zero");
        let writer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = writer.flush() {
                            error!(error = %e, "periodic export failed");
                        }
                    }
                }
            }
            debug!("export flusher stopped");
        })
    }
}
