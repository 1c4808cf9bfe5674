use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rowcast_core::types::NameRecord;

use crate::cursor::RowCursor;
use crate::error::{FailureLatch, LoadError};
use crate::sink::BulkSink;

/// One window's bulk-write call, running on its own task.
///
/// Resolves exactly once via [`outcome`](Self::outcome) with either the row
/// count the sink accepted or the failure cause. A failure is latched before
/// the task resolves, so the batcher's pre-forward check observes it even
/// while the outcome is still unread.
#[derive(Debug)]
pub struct LoadSession {
    task: JoinHandle<Result<u64, LoadError>>,
}

impl LoadSession {
    pub fn spawn<S: BulkSink>(
        sink: Arc<S>,
        cursor: RowCursor,
        window: u64,
        latch: FailureLatch,
        cancel: CancellationToken,
    ) -> Self {
        let task = tokio::spawn(async move {
            match sink
                .copy_rows(cursor, NameRecord::RELATION, &NameRecord::COLUMNS, cancel)
                .await
            {
                Ok(rows) => Ok(rows),
                Err(cause) => {
                    let err = LoadError::sink(cause);
                    latch.set(err.clone());
                    tracing::warn!(
                        target: "rowcast_proof",
                        event = "window_failed",
                        window,
                        error = %err,
                        "bulk write failed"
                    );
                    Err(err)
                }
            }
        });
        Self { task }
    }

    /// Awaits the bulk-write call's terminal result. Must not be called again
    /// after it has returned.
    pub async fn outcome(&mut self) -> Result<u64, LoadError> {
        match (&mut self.task).await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(LoadError::sink(anyhow::Error::new(join_err))),
        }
    }
}
