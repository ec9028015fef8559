//! Reservation expiry sweep.
//!
//! Releases RESERVED rows past their TTL in batches, each batch a single
//! local transaction that restores quantities and emits `InventoryReleased`,
//! so downstream consumers see expiry exactly like any other release.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::db::InventoryStore;

const SWEEP_BATCH: i64 = 100;

pub async fn run(
    store: InventoryStore,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!(interval_secs = interval.as_secs(), "Expiry sweep starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match store.release_expired(SWEEP_BATCH).await {
            Ok(0) => {}
            Ok(count) => info!(count, "Released expired reservations"),
            Err(e) => error!(error = %e, "Expiry sweep failed"),
        }
    }

    info!("Expiry sweep stopped");
    Ok(())
}
