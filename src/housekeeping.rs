use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, error, info};

use crate::engine::Engine;

/// Rewrite the WAL once `threshold` appends have piled up since the last
/// compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        compact_once(&engine, threshold).await;
    }
}

/// Compact if `threshold` appends are pending; returns whether it did.
pub async fn compact_once(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    debug!(appends, threshold, "compaction threshold reached");
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            error!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Hourly: drop every day before today.
pub async fn run_purger(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(3600));
    loop {
        interval.tick().await;
        let today = chrono::Local::now().date_naive();
        purge_once(&engine, today).await;
    }
}

/// One purge pass; returns how many reservations were dropped.
pub async fn purge_once(engine: &Engine, today: NaiveDate) -> usize {
    match engine.purge_before(today).await {
        Ok(0) => 0,
        Ok(n) => {
            info!("purged {n} reservations before {today}");
            n
        }
        Err(e) => {
            error!("purge failed: {e}");
            0
        }
    }
}
