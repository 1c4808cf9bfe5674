use tokio::sync::mpsc;

use rowcast_core::types::NameRecord;

use crate::error::LoadError;

/// Single handoff slot per channel. The producer blocks until the sink's
/// executor has taken the previous row, which is what bounds how far the
/// source can run ahead of the sink.
const SLOT: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Exhausted,
    Failed,
}

/// Creates the two halves of one window's row handoff: the push side kept by
/// the batcher and the pull cursor handed to the sink's bulk-write call.
pub fn window_channel() -> (RowFeed, RowCursor) {
    let (record_tx, record_rx) = mpsc::channel(SLOT);
    let (error_tx, error_rx) = mpsc::channel(SLOT);
    (
        RowFeed {
            records: record_tx,
            errors: error_tx,
        },
        RowCursor {
            records: record_rx,
            errors: error_rx,
            state: State::Open,
            current: None,
            error: None,
        },
    )
}

/// Producer half of a window. Dropping it without [`fail`](Self::fail) closes
/// the window cleanly.
#[derive(Debug)]
pub struct RowFeed {
    records: mpsc::Sender<NameRecord>,
    errors: mpsc::Sender<LoadError>,
}

impl RowFeed {
    /// Hands one record to the consumer, blocking until the slot is free.
    /// Fails when the consumer dropped the cursor.
    pub async fn send(
        &self,
        record: NameRecord,
    ) -> Result<(), mpsc::error::SendError<NameRecord>> {
        self.records.send(record).await
    }

    /// Delivers a terminal error to the consumer. Best-effort: a consumer
    /// that already dropped the cursor no longer cares.
    pub async fn fail(&self, err: LoadError) {
        let _ = self.errors.send(err).await;
    }
}

/// Pull cursor a bulk-write call drives with `advance`/`current`/`last_error`.
///
/// States: open until either the feed closes (exhausted) or an error is
/// delivered (failed); both are terminal.
#[derive(Debug)]
pub struct RowCursor {
    records: mpsc::Receiver<NameRecord>,
    errors: mpsc::Receiver<LoadError>,
    state: State,
    current: Option<NameRecord>,
    error: Option<LoadError>,
}

impl RowCursor {
    /// Waits for the next row. Returns `false` once the window closed cleanly
    /// or failed; see [`last_error`](Self::last_error) to tell the two apart.
    ///
    /// Record delivery and error delivery are raced in a single `select`, with
    /// a delivered error taking priority over a queued row so a failing window
    /// aborts instead of draining.
    pub async fn advance(&mut self) -> bool {
        if self.state != State::Open {
            return false;
        }
        tokio::select! {
            biased;
            Some(err) = self.errors.recv() => {
                self.error = Some(err);
                self.state = State::Failed;
                false
            }
            record = self.records.recv() => match record {
                Some(record) => {
                    self.current = Some(record);
                    true
                }
                None => {
                    self.state = State::Exhausted;
                    false
                }
            }
        }
    }

    /// Row cached by the last successful [`advance`](Self::advance); `None`
    /// before the first one.
    pub fn current(&self) -> Option<&NameRecord> {
        self.current.as_ref()
    }

    /// Set exactly when the window failed rather than closing cleanly.
    pub fn last_error(&self) -> Option<&LoadError> {
        self.error.as_ref()
    }
}
