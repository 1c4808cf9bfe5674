use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rowcast_observe::metrics::{Counter, DurationAgg, Gauge};

use crate::batcher::Batcher;
use crate::error::{CancelReason, FailureLatch, LoadError};
use crate::sink::BulkSink;
use crate::source::RecordSource;

/// Source-to-batcher handoff capacity. One slot keeps the producer at most
/// one record ahead of the accumulator.
const HANDOFF_SLOTS: usize = 1;

#[derive(Debug, Default)]
pub struct LoadMetrics {
    pub windows_opened_total: Counter,
    pub windows_committed_total: Counter,
    pub rows_forwarded_total: Counter,
    pub rows_committed_total: Counter,
    pub open_window_rows: Gauge,
    pub window_commit_time: DurationAgg,
}

/// Wires a record source and a bulk sink together for a single run.
///
/// The source producer and the batch accumulator run concurrently under one
/// cancellation token and one failure latch; whichever fails first latches
/// the terminal error and cancels the other. A `Pipeline` value represents
/// one run: the latch is terminal once set.
#[derive(Clone)]
pub struct Pipeline {
    size: NonZeroUsize,
    deadline: Option<Duration>,
    latch: FailureLatch,
    cancel: CancellationToken,
    metrics: Arc<LoadMetrics>,
}

impl Pipeline {
    pub fn new(size: NonZeroUsize) -> Self {
        Self {
            size,
            deadline: None,
            latch: FailureLatch::new(),
            cancel: CancellationToken::new(),
            metrics: Arc::new(LoadMetrics::default()),
        }
    }

    /// Bounds the whole run; when the deadline elapses a cancellation cause
    /// is latched and every activity is asked to stop.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn metrics(&self) -> Arc<LoadMetrics> {
        self.metrics.clone()
    }

    /// Latches a cancellation cause and cancels the run. Used by process
    /// wiring for ctrl-c style interrupts.
    pub fn interrupt(&self, reason: CancelReason) {
        self.latch.set(LoadError::Cancelled(reason));
        self.cancel.cancel();
    }

    /// Runs `source` through the accumulator into `sink` and reports the
    /// first error observed anywhere, or `Ok` once every forwarded record has
    /// been accepted by the sink.
    pub async fn run<R, S>(&self, source: R, sink: Arc<S>) -> Result<(), LoadError>
    where
        R: RecordSource,
        S: BulkSink,
    {
        let (tx, rx) = mpsc::channel(HANDOFF_SLOTS);

        let watchdog = self.deadline.map(|deadline| {
            let latch = self.latch.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(deadline) => {
                        latch.set(LoadError::Cancelled(CancelReason::DeadlineExceeded));
                        cancel.cancel();
                    }
                    _ = cancel.cancelled() => {}
                }
            })
        });

        let source_task = {
            let latch = self.latch.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                if let Err(cause) = source.produce(tx, cancel.clone()).await {
                    latch.set(LoadError::source(cause));
                    cancel.cancel();
                }
            })
        };

        let batcher = Batcher::new(
            sink,
            self.size,
            self.latch.clone(),
            self.cancel.clone(),
            self.metrics.clone(),
        );
        let result = batcher.run(rx).await;

        // Unblock a producer still waiting on I/O before joining it.
        self.cancel.cancel();
        if let Err(join_err) = source_task.await {
            self.latch.set(LoadError::source(anyhow::Error::new(join_err)));
        }
        if let Some(watchdog) = watchdog {
            let _ = watchdog.await;
        }

        match self.latch.get() {
            Some(err) => {
                tracing::error!(
                    target: "rowcast_proof",
                    event = "pipeline_failed",
                    error = %err,
                    "pipeline failed"
                );
                Err(err)
            }
            None => {
                result?;
                tracing::info!(
                    target: "rowcast_proof",
                    event = "pipeline_complete",
                    windows_committed = self.metrics.windows_committed_total.get(),
                    rows_committed = self.metrics.rows_committed_total.get(),
                    "pipeline complete"
                );
                Ok(())
            }
        }
    }
}
