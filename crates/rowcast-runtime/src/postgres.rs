use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolCopyExt, PgPoolOptions};
use tokio_util::sync::CancellationToken;

use rowcast_core::copy::encode_row;

use crate::cursor::RowCursor;
use crate::sink::BulkSink;

/// Builds a pool from `DATABASE_URL`.
///
/// A single connection is enough: windows are flushed strictly sequentially,
/// so one `COPY` runs at a time.
pub async fn pool_from_env() -> Result<PgPool> {
    let url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&url)
        .await
        .context("connecting to postgres")
}

/// Writes each window with `COPY <relation> (<columns>) FROM STDIN`, rows
/// encoded in COPY text format. The copy is aborted on a cursor error or
/// cancellation, so the transaction rolls back as one unit.
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BulkSink for PostgresSink {
    async fn copy_rows(
        &self,
        mut cursor: RowCursor,
        relation: &str,
        columns: &[&str],
        cancel: CancellationToken,
    ) -> Result<u64> {
        let statement = format!("COPY {relation} ({}) FROM STDIN", columns.join(", "));
        let mut copy = self
            .pool
            .copy_in_raw(&statement)
            .await
            .context("starting COPY")?;

        loop {
            let advanced = tokio::select! {
                advanced = cursor.advance() => advanced,
                _ = cancel.cancelled() => {
                    if let Err(err) = copy.abort("cancelled").await {
                        tracing::warn!(error = %err, "aborting COPY after cancellation");
                    }
                    anyhow::bail!("bulk write cancelled");
                }
            };
            if !advanced {
                break;
            }
            let Some(record) = cursor.current() else {
                break;
            };
            copy.send(encode_row(record).into_bytes())
                .await
                .context("sending COPY row")?;
        }

        if let Some(err) = cursor.last_error() {
            let cause = err.clone();
            if let Err(err) = copy.abort("upstream failure").await {
                tracing::warn!(error = %err, "aborting COPY after upstream failure");
            }
            return Err(anyhow::Error::new(cause));
        }

        let rows = copy.finish().await.context("finishing COPY")?;
        Ok(rows)
    }
}
