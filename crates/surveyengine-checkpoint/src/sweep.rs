use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::InMemoryCheckpointStore;

/// Periodic TTL sweep, modeled on the lead crate's scheduler tick loop:
/// poll on an interval, select against a shutdown signal, log and
/// continue on error rather than taking the task down.
pub async fn run_ttl_sweep(store: Arc<InMemoryCheckpointStore>, period_secs: u64, mut shutdown: watch::Receiver<bool>) {
    info!("checkpoint ttl sweep started");
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(period_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let removed = store.sweep_expired();
                if removed > 0 {
                    warn!(removed, "ttl sweep evicted expired checkpoints");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("checkpoint ttl sweep shutting down");
                    break;
                }
            }
        }
    }
}
