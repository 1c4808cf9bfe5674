use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cursor::RowCursor;

/// Bulk-write interface for one window of records.
///
/// An implementation must drive `cursor.advance()` until it returns `false`,
/// write every row it saw as a single atomic unit into `relation`, and treat
/// a `cursor.last_error()` as its own failure cause. A slow implementation
/// exerts backpressure all the way to the source, since each row is handed
/// over through a single-slot channel.
#[async_trait]
pub trait BulkSink: Send + Sync + 'static {
    async fn copy_rows(
        &self,
        cursor: RowCursor,
        relation: &str,
        columns: &[&str],
        cancel: CancellationToken,
    ) -> Result<u64>;
}
