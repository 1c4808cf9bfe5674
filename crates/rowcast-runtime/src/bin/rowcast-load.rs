#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, info_span, Instrument};

use rowcast_runtime::error::CancelReason;
use rowcast_runtime::pipeline::Pipeline;
use rowcast_runtime::postgres::{pool_from_env, PostgresSink};
use rowcast_runtime::source::{FakeSource, FileSource, HttpSource};

const DEFAULT_FEED_URL: &str = "https://datasets.imdbws.com/name.basics.tsv.gz";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum SourceKind {
    Fake,
    File,
    Http,
}

/// Bulk-loads the `name.basics` dataset into Postgres in fixed-size windows.
///
/// Reads `DATABASE_URL` from the environment. Prints `Done` on clean
/// completion; exits non-zero with the first error otherwise.
#[derive(Debug, Parser)]
#[command(name = "rowcast-load")]
struct Args {
    #[arg(long, env = "ROWCAST_SOURCE", value_enum, default_value = "http")]
    source: SourceKind,

    /// Synthetic record count (fake source only).
    #[arg(long, env = "ROWCAST_AMOUNT", default_value_t = 1_000_000)]
    amount: u64,

    #[arg(long, env = "ROWCAST_SEED", default_value_t = 0)]
    seed: u64,

    /// Local dump path (file source only).
    #[arg(long, env = "ROWCAST_TSV_PATH", default_value = "name.basics.tsv")]
    path: PathBuf,

    /// Feed URL (http source only).
    #[arg(long, env = "ROWCAST_FEED_URL", default_value = DEFAULT_FEED_URL)]
    url: String,

    /// Window size in records per bulk write.
    #[arg(long, env = "ROWCAST_WINDOW_SIZE", default_value_t = 100_000)]
    size: usize,

    /// Overall deadline in minutes (0 disables).
    #[arg(long, env = "ROWCAST_TIMEOUT_MINUTES", default_value_t = 20)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    rowcast_observe::logging::init_tracing();
    let args = Args::parse();

    let span = info_span!(
        "rowcast-load",
        source = ?args.source,
        size = args.size,
        timeout_minutes = args.timeout,
    );

    async move {
        let size = NonZeroUsize::new(args.size).context("--size must be > 0")?;

        let pool = pool_from_env().await?;
        let sink = Arc::new(PostgresSink::new(pool));

        let mut pipeline = Pipeline::new(size);
        if args.timeout > 0 {
            pipeline = pipeline.with_deadline(Duration::from_secs(args.timeout * 60));
        }

        {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    pipeline.interrupt(CancelReason::Interrupted);
                }
            });
        }

        info!("starting windowed load");
        let result = match args.source {
            SourceKind::Fake => {
                pipeline
                    .run(FakeSource::new(args.amount, args.seed), sink)
                    .await
            }
            SourceKind::File => pipeline.run(FileSource::new(&args.path), sink).await,
            SourceKind::Http => pipeline.run(HttpSource::new(&args.url), sink).await,
        };

        result.map_err(anyhow::Error::new)?;
        println!("Done");
        Ok(())
    }
    .instrument(span)
    .await
}
