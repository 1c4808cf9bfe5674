use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `ROWCAST_LOG` first, then `RUST_LOG`, then a default.
///
/// Log field contract for the loader:
/// - Include `window` on any per-window event.
/// - Proof events (window lifecycle, pipeline outcome) go to `target: "rowcast_proof"`.
/// - Periodic counter snapshots go to `target: "rowcast_metrics"`.
pub fn init_tracing() {
    let filter = env_filter();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("ROWCAST_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
