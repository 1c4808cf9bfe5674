#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use rowcast_observe::metrics::{Counter, Gauge};
use rowcast_runtime::cursor::RowCursor;
use rowcast_runtime::error::CancelReason;
use rowcast_runtime::pipeline::{LoadMetrics, Pipeline};
use rowcast_runtime::sink::BulkSink;
use rowcast_runtime::source::FakeSource;

/// Proves windowing, backpressure, and cancellation without a database: a
/// synthetic source through the pipeline into an in-process counting sink.
#[derive(Debug, Parser)]
#[command(name = "rowcast-demo")]
struct Args {
    #[arg(long, env = "ROWCAST_AMOUNT", default_value_t = 10_000)]
    amount: u64,

    #[arg(long, env = "ROWCAST_SEED", default_value_t = 0)]
    seed: u64,

    /// Window size in records.
    #[arg(long, env = "ROWCAST_WINDOW_SIZE", default_value_t = 512)]
    size: usize,

    /// Artificially slow down the sink per row to prove backpressure.
    #[arg(long, env = "ROWCAST_SINK_SLEEP_US", default_value_t = 0)]
    sink_sleep_us: u64,

    /// Overall deadline in milliseconds (0 disables).
    #[arg(long, env = "ROWCAST_TIMEOUT_MS", default_value_t = 0)]
    timeout_ms: u64,

    /// Periodically emit a metrics snapshot (0 disables).
    #[arg(long, env = "ROWCAST_METRICS_SNAPSHOT_INTERVAL_MS", default_value_t = 1000)]
    metrics_snapshot_interval_ms: u64,
}

struct CountingSink {
    sleep: Duration,
    committed_windows_total: Counter,
    committed_rows_total: Counter,
    last_window_rows: Gauge,
}

impl CountingSink {
    fn new(sleep: Duration) -> Self {
        Self {
            sleep,
            committed_windows_total: Counter::default(),
            committed_rows_total: Counter::default(),
            last_window_rows: Gauge::default(),
        }
    }
}

#[async_trait]
impl BulkSink for CountingSink {
    async fn copy_rows(
        &self,
        mut cursor: RowCursor,
        _relation: &str,
        _columns: &[&str],
        cancel: CancellationToken,
    ) -> Result<u64> {
        let mut rows = 0u64;
        loop {
            let advanced = tokio::select! {
                advanced = cursor.advance() => advanced,
                _ = cancel.cancelled() => anyhow::bail!("bulk write cancelled"),
            };
            if !advanced {
                break;
            }
            if !self.sleep.is_zero() {
                tokio::time::sleep(self.sleep).await;
            }
            rows += 1;
        }
        if let Some(err) = cursor.last_error() {
            return Err(anyhow::Error::new(err.clone()));
        }
        self.committed_windows_total.inc();
        self.committed_rows_total.inc_by(rows);
        self.last_window_rows.set(rows);
        Ok(rows)
    }
}

fn emit_metrics_snapshot(metrics: &LoadMetrics, sink: &CountingSink) {
    let commit = metrics.window_commit_time.snapshot();
    tracing::info!(
        target: "rowcast_metrics",
        windows_opened_total = metrics.windows_opened_total.get(),
        windows_committed_total = metrics.windows_committed_total.get(),
        rows_forwarded_total = metrics.rows_forwarded_total.get(),
        rows_committed_total = metrics.rows_committed_total.get(),
        open_window_rows = metrics.open_window_rows.get(),
        window_commit_avg_ms = commit.avg_ms(),
        window_commit_max_ms = commit.max_ms(),
        sink_committed_windows_total = sink.committed_windows_total.get(),
        sink_committed_rows_total = sink.committed_rows_total.get(),
        sink_last_window_rows = sink.last_window_rows.get(),
        "metrics"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    rowcast_observe::logging::init_tracing();
    let args = Args::parse();

    let span = info_span!(
        "rowcast-demo",
        amount = args.amount,
        seed = args.seed,
        size = args.size,
        sink_sleep_us = args.sink_sleep_us,
        timeout_ms = args.timeout_ms,
    );

    async move {
        let size = NonZeroUsize::new(args.size).context("--size must be > 0")?;

        let mut pipeline = Pipeline::new(size);
        if args.timeout_ms > 0 {
            pipeline = pipeline.with_deadline(Duration::from_millis(args.timeout_ms));
        }
        let metrics = pipeline.metrics();

        let sink = Arc::new(CountingSink::new(Duration::from_micros(args.sink_sleep_us)));

        {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    pipeline.interrupt(CancelReason::Interrupted);
                }
            });
        }

        let metrics_task = if args.metrics_snapshot_interval_ms > 0 {
            let metrics = metrics.clone();
            let sink = sink.clone();
            let interval_ms = args.metrics_snapshot_interval_ms;
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
                loop {
                    ticker.tick().await;
                    emit_metrics_snapshot(&metrics, &sink);
                }
            }))
        } else {
            None
        };

        info!("starting windowed load (synthetic)");
        let start = Instant::now();
        let result = pipeline
            .run(FakeSource::new(args.amount, args.seed), sink.clone())
            .await;

        if let Some(task) = metrics_task {
            task.abort();
        }
        emit_metrics_snapshot(&metrics, &sink);

        result.map_err(anyhow::Error::new)?;

        let elapsed = start.elapsed();
        let rows = metrics.rows_committed_total.get();
        let throughput = if elapsed.as_secs_f64() > 0.0 {
            rows as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            rows_committed = rows,
            windows_committed = metrics.windows_committed_total.get(),
            rows_per_sec = throughput,
            "demo complete"
        );

        Ok(())
    }
    .instrument(span)
    .await
}
