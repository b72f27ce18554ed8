use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::engine::Engine;

/// Background task that cancels stale pending bookings — a reservation whose
/// start date has passed without confirmation must not hold the dates.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let today = Utc::now().date_naive();
        let stale = engine.collect_stale_pending(today);
        for (booking_id, _tool_id) in stale {
            match engine.expire_pending(booking_id).await {
                Ok(_) => info!("expired stale pending booking {booking_id}"),
                Err(e) => {
                    // May already have been confirmed or cancelled — that's fine
                    tracing::debug!("reaper skip {booking_id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("WAL compacted"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}
