use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::services::entitlement::EntitlementStore;

/// Reconciles with the purchase backend every `every`. A failed round is
/// logged by the store and the loop carries on with the last snapshot.
pub fn start_refresh_task(store: Arc<EntitlementStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // the first tick fires immediately; startup already talked to the backend
        ticker.tick().await;

        loop {
            ticker.tick().await;
            log::debug!("Running scheduled entitlement refresh");
            match store.refresh().await {
                Ok(()) => log::debug!("Scheduled refresh done (access: {})", store.has_access()),
                Err(e) if e.is_retryable() => log::info!("Scheduled refresh skipped: {}", e),
                Err(e) => log::error!("Scheduled refresh failed: {}", e),
            }
        }
    })
}
