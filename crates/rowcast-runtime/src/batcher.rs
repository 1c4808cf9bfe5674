use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rowcast_core::types::NameRecord;
use rowcast_observe::metrics::ScopedTimer;

use crate::cursor::{window_channel, RowFeed};
use crate::error::{CancelReason, FailureLatch, LoadError};
use crate::pipeline::LoadMetrics;
use crate::session::LoadSession;
use crate::sink::BulkSink;

/// Partitions the incoming record stream into windows of `size` rows in
/// arrival order and runs one bulk-write session per window.
///
/// Windows are strictly sequential: the next window's session is not spawned
/// until the previous window's outcome has been observed. Windows open lazily
/// on the first record, so an empty source (or one ending exactly on a window
/// boundary) issues no empty bulk-write call.
pub struct Batcher<S> {
    sink: Arc<S>,
    size: NonZeroUsize,
    latch: FailureLatch,
    cancel: CancellationToken,
    metrics: Arc<LoadMetrics>,
}

struct OpenWindow {
    feed: RowFeed,
    session: LoadSession,
    count: usize,
}

impl<S: BulkSink> Batcher<S> {
    pub fn new(
        sink: Arc<S>,
        size: NonZeroUsize,
        latch: FailureLatch,
        cancel: CancellationToken,
        metrics: Arc<LoadMetrics>,
    ) -> Self {
        Self {
            sink,
            size,
            latch,
            cancel,
            metrics,
        }
    }

    /// Consumes `records` until the channel closes, a failure latches, or the
    /// cancellation token fires.
    pub async fn run(self, mut records: mpsc::Receiver<NameRecord>) -> Result<(), LoadError> {
        let mut window: Option<OpenWindow> = None;
        let mut window_no: u64 = 0;

        loop {
            let maybe = tokio::select! {
                maybe = records.recv() => maybe,
                _ = self.cancel.cancelled() => {
                    return Err(self.cancelled(window.take()).await);
                }
            };
            let Some(record) = maybe else {
                break;
            };

            // A sink failure latched mid-window means its session may have
            // stopped reading the cursor; forwarding would block forever.
            // Checked before every forward, not only at window boundaries.
            if let Some(err) = self.latch.get() {
                return Err(self.abort_window(window.take(), err).await);
            }

            let mut w = match window.take() {
                Some(w) => w,
                None => self.open_window(window_no),
            };

            let forwarded = tokio::select! {
                res = w.feed.send(record) => res.is_ok(),
                _ = self.cancel.cancelled() => {
                    return Err(self.cancelled(Some(w)).await);
                }
            };
            if !forwarded {
                // The sink abandoned the cursor; its session resolves with
                // the real cause.
                return Err(self.abandoned(w).await);
            }

            w.count += 1;
            self.metrics.rows_forwarded_total.inc();
            self.metrics.open_window_rows.set(w.count as u64);

            if w.count == self.size.get() {
                self.commit_window(w, window_no).await?;
                window_no += 1;
            } else {
                window = Some(w);
            }
        }

        // Source exhausted; flush the partial final window, if any.
        if let Some(w) = window.take() {
            self.commit_window(w, window_no).await?;
        }

        Ok(())
    }

    fn open_window(&self, window_no: u64) -> OpenWindow {
        let (feed, cursor) = window_channel();
        let session = LoadSession::spawn(
            self.sink.clone(),
            cursor,
            window_no,
            self.latch.clone(),
            self.cancel.clone(),
        );
        self.metrics.windows_opened_total.inc();
        tracing::info!(
            target: "rowcast_proof",
            event = "window_opened",
            window = window_no,
            size = self.size.get() as u64,
            "opened window"
        );
        OpenWindow {
            feed,
            session,
            count: 0,
        }
    }

    async fn commit_window(&self, w: OpenWindow, window_no: u64) -> Result<(), LoadError> {
        let rows = self.close_window(w).await?;
        self.metrics.windows_committed_total.inc();
        self.metrics.rows_committed_total.inc_by(rows);
        self.metrics.open_window_rows.set(0);
        tracing::info!(
            target: "rowcast_proof",
            event = "window_committed",
            window = window_no,
            rows,
            "committed window"
        );
        Ok(())
    }

    /// Closes the delivery channel with no error and synchronously awaits the
    /// session's outcome. Cancellation observed while waiting is latched; the
    /// sink call is trusted to honor the token on its own I/O.
    async fn close_window(&self, w: OpenWindow) -> Result<u64, LoadError> {
        let OpenWindow {
            feed, mut session, ..
        } = w;
        drop(feed);

        let _timer = ScopedTimer::new(&self.metrics.window_commit_time);
        let mut cancelled = false;
        let outcome = loop {
            tokio::select! {
                outcome = session.outcome() => break outcome,
                _ = self.cancel.cancelled(), if !cancelled => {
                    self.latch
                        .set(LoadError::Cancelled(CancelReason::Shutdown));
                    cancelled = true;
                }
            }
        };

        match outcome {
            Ok(rows) => match self.latch.get() {
                // A failure latched elsewhere terminates the run even though
                // this window's rows were accepted.
                Some(err) => Err(err),
                None => Ok(rows),
            },
            Err(err) => Err(self.latch_or(err)),
        }
    }

    async fn cancelled(&self, window: Option<OpenWindow>) -> LoadError {
        let err = self.latch_or(LoadError::Cancelled(CancelReason::Shutdown));
        self.abort_window(window, err).await
    }

    /// Delivers `err` into the open window's error channel (unblocking a
    /// session stuck on an empty cursor), reaps the session, and returns the
    /// first-latched failure.
    async fn abort_window(&self, window: Option<OpenWindow>, err: LoadError) -> LoadError {
        if let Some(w) = window {
            let OpenWindow {
                feed, mut session, ..
            } = w;
            feed.fail(err.clone()).await;
            drop(feed);
            let _ = session.outcome().await;
        }
        self.latch_or(err)
    }

    async fn abandoned(&self, w: OpenWindow) -> LoadError {
        let OpenWindow {
            feed, mut session, ..
        } = w;
        drop(feed);
        match session.outcome().await {
            Err(err) => self.latch_or(err),
            Ok(rows) => self.latch_or(LoadError::sink(anyhow::anyhow!(
                "bulk write finished after {rows} rows while its window was still open"
            ))),
        }
    }

    fn latch_or(&self, err: LoadError) -> LoadError {
        self.latch.set(err.clone());
        self.latch.get().unwrap_or(err)
    }
}
