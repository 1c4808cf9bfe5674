use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rowcast_core::types::NameRecord;
use rowcast_runtime::cursor::RowCursor;
use rowcast_runtime::error::LoadError;
use rowcast_runtime::pipeline::Pipeline;
use rowcast_runtime::sink::BulkSink;
use rowcast_runtime::source::RecordSource;

fn records(n: usize) -> Vec<NameRecord> {
    (0..n)
        .map(|i| NameRecord {
            nconst: format!("nm{i:07}"),
            primary_name: format!("Person {i}"),
            birth_year: "1970".to_string(),
            death_year: "\\N".to_string(),
            primary_professions: vec!["actor".to_string()],
            known_for_titles: vec![format!("tt{i:07}")],
        })
        .collect()
}

struct VecSource(Vec<NameRecord>);

#[async_trait]
impl RecordSource for VecSource {
    async fn produce(
        self,
        tx: mpsc::Sender<NameRecord>,
        cancel: CancellationToken,
    ) -> Result<()> {
        for record in self.0 {
            tokio::select! {
                res = tx.send(record) => {
                    if res.is_err() {
                        return Ok(());
                    }
                }
                _ = cancel.cancelled() => return Ok(()),
            }
        }
        Ok(())
    }
}

/// Sends `ok` records, then fails the way a broken transport would.
struct FailingSource {
    ok: Vec<NameRecord>,
}

#[async_trait]
impl RecordSource for FailingSource {
    async fn produce(
        self,
        tx: mpsc::Sender<NameRecord>,
        cancel: CancellationToken,
    ) -> Result<()> {
        for record in self.ok {
            tokio::select! {
                res = tx.send(record) => {
                    if res.is_err() {
                        return Ok(());
                    }
                }
                _ = cancel.cancelled() => return Ok(()),
            }
        }
        anyhow::bail!("tsv stream corrupted")
    }
}

/// Commits windows until `fail_call`, which consumes `consume_then_fail`
/// rows and then errors without draining the rest, the way a constraint
/// violation surfaces partway through a COPY.
struct FailingSink {
    fail_call: u64,
    consume_then_fail: usize,
    calls_started: AtomicU64,
    windows_committed: AtomicU64,
}

impl FailingSink {
    fn new(fail_call: u64, consume_then_fail: usize) -> Self {
        Self {
            fail_call,
            consume_then_fail,
            calls_started: AtomicU64::new(0),
            windows_committed: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl BulkSink for FailingSink {
    async fn copy_rows(
        &self,
        mut cursor: RowCursor,
        _relation: &str,
        _columns: &[&str],
        _cancel: CancellationToken,
    ) -> Result<u64> {
        let call = self.calls_started.fetch_add(1, Ordering::Relaxed);
        if call == self.fail_call {
            for _ in 0..self.consume_then_fail {
                if !cursor.advance().await {
                    break;
                }
            }
            anyhow::bail!("duplicate key value violates unique constraint \"names_pkey\"");
        }

        let mut rows = 0u64;
        while cursor.advance().await {
            rows += 1;
        }
        if let Some(err) = cursor.last_error() {
            return Err(anyhow::Error::new(err.clone()));
        }
        self.windows_committed.fetch_add(1, Ordering::Relaxed);
        Ok(rows)
    }
}

fn size(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mid_window_sink_failure_stops_before_the_next_window() {
    // Second call fails after 2 of its 3 rows; windows [r6..r8] and [r9]
    // must never start.
    let sink = Arc::new(FailingSink::new(1, 2));

    let err = Pipeline::new(size(3))
        .run(VecSource(records(10)), sink.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::Sink(_)), "got {err}");
    assert_eq!(sink.calls_started.load(Ordering::Relaxed), 2);
    assert_eq!(sink.windows_committed.load(Ordering::Relaxed), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failure_on_first_window_reports_without_hanging() {
    // The sink abandons the cursor immediately; the batcher must notice via
    // the latch or the closed channel instead of forwarding into the void.
    let sink = Arc::new(FailingSink::new(0, 0));

    let err = Pipeline::new(size(100))
        .run(VecSource(records(50)), sink.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::Sink(_)), "got {err}");
    assert_eq!(sink.calls_started.load(Ordering::Relaxed), 1);
    assert_eq!(sink.windows_committed.load(Ordering::Relaxed), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn source_failure_is_fatal_and_reported_first() {
    let sink = Arc::new(FailingSink::new(u64::MAX, 0));

    let err = Pipeline::new(size(4))
        .run(FailingSource { ok: records(6) }, sink.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::Source(_)), "got {err}");
    assert!(err.to_string().contains("tsv stream corrupted"));
    // Depending on when the close races the failure, the partial second
    // window may or may not have flushed; the reported error must not change.
    assert!(sink.windows_committed.load(Ordering::Relaxed) <= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sink_failure_on_final_partial_window_is_reported() {
    let sink = Arc::new(FailingSink::new(2, 1));

    let err = Pipeline::new(size(3))
        .run(VecSource(records(7)), sink.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::Sink(_)), "got {err}");
    assert_eq!(sink.windows_committed.load(Ordering::Relaxed), 2);
}
