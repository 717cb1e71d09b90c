use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{watch, Mutex, RwLock};

use crate::config::{is_valid_trial_length, EntitlementConfig};
use crate::error::EntitlementError;
use crate::models::common::SubscriptionPlan;
use crate::models::entitlement::{
    AccessDecision, EntitlementSnapshot, EntitlementView, StorePhase, StoreStatus,
};
use crate::models::product::{fallback_catalog, ProductDescriptor, PurchaseReceipt};
use crate::services::backend::PurchaseBackend;
use crate::services::storage::PersistedState;
use crate::utils::timeout::with_timeout;

pub const SNAPSHOT_KEY: &str = "canieat_subscription_status";

/// Owns the entitlement snapshot for one user session.
///
/// Reads are served from memory and never wait. `refresh`, `purchase`,
/// `restore` and the trial overrides queue behind one command lock, so the
/// persisted snapshot is only ever written by one operation at a time. A new
/// snapshot is published only after it has been written to storage.
pub struct EntitlementStore {
    state: Arc<dyn PersistedState>,
    backend: Arc<dyn PurchaseBackend>,
    settings: EntitlementConfig,
    snapshot: watch::Sender<EntitlementSnapshot>,
    status: watch::Sender<StoreStatus>,
    catalog: RwLock<Vec<ProductDescriptor>>,
    commands: Mutex<()>,
}

fn known_product_ids() -> Vec<String> {
    SubscriptionPlan::ALL
        .iter()
        .map(|plan| plan.product_id().to_string())
        .collect()
}

/// Picks the owned receipt granting the longest paid term still running at `now`.
/// A receipt without any dates counts as running with an unknown end.
fn best_receipt(owned: &[PurchaseReceipt], now: DateTime<Utc>) -> Option<(&PurchaseReceipt, Option<DateTime<Utc>>)> {
    owned
        .iter()
        .filter(|receipt| receipt.plan().is_some())
        .map(|receipt| (receipt, receipt.paid_until()))
        .filter(|(_, paid_until)| paid_until.map_or(true, |end| end > now))
        .max_by_key(|(_, paid_until)| *paid_until)
}

/// Paid access keeps the trial end date for history but ends the trial itself.
fn paid_snapshot(current: &EntitlementSnapshot, product_id: &str, expiration_date: Option<DateTime<Utc>>) -> EntitlementSnapshot {
    EntitlementSnapshot {
        active: true,
        product_id: Some(product_id.to_string()),
        expiration_date,
        trial_active: false,
        trial_end_date: current.trial_end_date,
    }
}

impl EntitlementStore {
    /// Loads the persisted snapshot and connects the backend. Always returns a
    /// ready store: storage and backend failures only degrade it.
    pub async fn initialize(
        state: Arc<dyn PersistedState>,
        backend: Arc<dyn PurchaseBackend>,
        settings: EntitlementConfig,
    ) -> Self {
        let snapshot = load_snapshot(state.as_ref(), &settings, Utc::now()).await;
        let (snapshot_tx, _) = watch::channel(snapshot);
        let (status_tx, _) = watch::channel(StoreStatus::default());

        let store = Self {
            state,
            backend,
            settings,
            snapshot: snapshot_tx,
            status: status_tx,
            catalog: RwLock::new(fallback_catalog()),
            commands: Mutex::new(()),
        };

        store.connect_backend().await;
        store.status.send_replace(StoreStatus {
            phase: StorePhase::Ready,
            last_error: None,
        });
        log::info!("Entitlement store ready");
        store
    }

    async fn connect_backend(&self) {
        let timeout = self.settings.backend_timeout();

        if let Err(e) = with_timeout(timeout, self.backend.connect()).await {
            log::warn!("Purchase backend not connected, continuing offline: {}", e);
            return;
        }

        match with_timeout(timeout, self.backend.list_products(&known_product_ids())).await {
            Ok(products) => self.replace_catalog(products).await,
            Err(e) => log::warn!("Product catalog unavailable, using fallback prices: {}", e),
        }
    }

    async fn replace_catalog(&self, products: Vec<ProductDescriptor>) {
        let known: Vec<ProductDescriptor> = products
            .into_iter()
            .filter(|p| SubscriptionPlan::from_product_id(&p.product_id).is_some())
            .collect();

        if known.is_empty() {
            log::warn!("Backend returned no known products, keeping current catalog");
            return;
        }

        log::debug!("Catalog updated with {} products", known.len());
        *self.catalog.write().await = known;
    }

    pub fn snapshot(&self) -> EntitlementSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EntitlementSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn status(&self) -> StoreStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<StoreStatus> {
        self.status.subscribe()
    }

    pub fn view(&self) -> EntitlementView {
        EntitlementView::new(self.snapshot(), &self.status(), Utc::now())
    }

    pub fn has_access(&self) -> bool {
        self.snapshot.borrow().has_access(Utc::now())
    }

    pub fn is_premium(&self) -> bool {
        self.snapshot.borrow().active
    }

    pub fn is_trial_active(&self) -> bool {
        self.snapshot.borrow().is_trial_running(Utc::now())
    }

    pub fn is_trial_expired(&self) -> bool {
        self.snapshot.borrow().is_trial_expired(Utc::now())
    }

    pub fn days_remaining(&self) -> i64 {
        self.snapshot.borrow().days_remaining(Utc::now())
    }

    pub fn access_decision(&self) -> AccessDecision {
        self.snapshot.borrow().access_decision(Utc::now())
    }

    pub async fn products(&self) -> Vec<ProductDescriptor> {
        self.catalog.read().await.clone()
    }

    /// Syncs with the backend's catalog and owned purchases.
    pub async fn refresh(&self) -> Result<(), EntitlementError> {
        let _guard = self.commands.lock().await;
        self.enter(StorePhase::Reconciling);
        let result = self.reconcile().await;
        self.finish("refresh", &result);
        result
    }

    async fn reconcile(&self) -> Result<(), EntitlementError> {
        let timeout = self.settings.backend_timeout();
        let products = with_timeout(timeout, self.backend.list_products(&known_product_ids())).await?;
        let owned = with_timeout(timeout, self.backend.list_owned_purchases()).await?;
        self.replace_catalog(products).await;

        let now = Utc::now();
        let current = self.snapshot();
        let next = match best_receipt(&owned, now) {
            Some((receipt, paid_until)) => paid_snapshot(&current, &receipt.product_id, paid_until),
            None if current.active && current.expiration_date.map_or(true, |end| end <= now) => {
                log::info!("Paid term for {:?} has lapsed", current.product_id);
                EntitlementSnapshot {
                    active: false,
                    product_id: None,
                    expiration_date: None,
                    ..current.clone()
                }
            }
            None => return Ok(()),
        };

        if next != current {
            self.commit(next).await?;
        }
        Ok(())
    }

    /// Buys `product_id`. Returns `true` once the new snapshot is persisted.
    pub async fn purchase(&self, product_id: &str) -> Result<bool, EntitlementError> {
        if product_id.is_empty() || !self.is_known_product(product_id).await {
            log::warn!("Rejected purchase of unknown product {:?}", product_id);
            return Err(EntitlementError::InvalidProduct(product_id.to_string()));
        }

        let _guard = self.commands.lock().await;
        self.enter(StorePhase::Purchasing);
        let result = self.complete_purchase(product_id).await;
        self.finish("purchase", &result);
        result.map(|_| true)
    }

    async fn is_known_product(&self, product_id: &str) -> bool {
        self.catalog
            .read()
            .await
            .iter()
            .any(|p| p.product_id == product_id)
    }

    async fn complete_purchase(&self, product_id: &str) -> Result<(), EntitlementError> {
        let receipt = with_timeout(self.settings.backend_timeout(), self.backend.purchase(product_id)).await?;
        if receipt.product_id != product_id {
            return Err(EntitlementError::MalformedBackendResponse(format!(
                "receipt for {} returned for purchase of {}",
                receipt.product_id, product_id
            )));
        }

        let plan = receipt
            .plan()
            .ok_or_else(|| EntitlementError::InvalidProduct(product_id.to_string()))?;
        let now = Utc::now();
        let expiration = match receipt.paid_until() {
            Some(end) if end <= now => {
                return Err(EntitlementError::MalformedBackendResponse(format!(
                    "receipt {} for {} already expired at {}",
                    receipt.transaction_id, product_id, end
                )));
            }
            Some(end) => end,
            None => now + Duration::days(plan.billing_period_days()),
        };

        self.commit(paid_snapshot(&self.snapshot(), product_id, Some(expiration))).await?;
        log::info!("Purchased {} until {}", product_id, expiration);
        Ok(())
    }

    /// Re-applies purchases the account already owns. `false` means nothing
    /// was found and the snapshot is untouched.
    pub async fn restore(&self) -> Result<bool, EntitlementError> {
        let _guard = self.commands.lock().await;
        self.enter(StorePhase::Restoring);
        let result = self.restore_owned().await;
        self.finish("restore", &result);
        result
    }

    async fn restore_owned(&self) -> Result<bool, EntitlementError> {
        let owned = with_timeout(self.settings.backend_timeout(), self.backend.list_owned_purchases()).await?;

        match best_receipt(&owned, Utc::now()) {
            Some((receipt, paid_until)) => {
                self.commit(paid_snapshot(&self.snapshot(), &receipt.product_id, paid_until)).await?;
                log::info!("Restored {}", receipt.product_id);
                Ok(true)
            }
            None => {
                log::info!("No purchases to restore ({} receipts checked)", owned.len());
                Ok(false)
            }
        }
    }

    /// Test-only: moves the trial end into the past. Never touches paid state.
    pub async fn force_expire_trial(&self) -> Result<(), EntitlementError> {
        let _guard = self.commands.lock().await;
        let next = EntitlementSnapshot {
            trial_active: true,
            trial_end_date: Some(Utc::now() - Duration::days(1)),
            ..self.snapshot()
        };
        self.commit(next).await?;
        log::info!("Trial force-expired");
        Ok(())
    }

    /// Test-only: starts a new trial window of `days`. Never touches paid state.
    pub async fn reset_trial(&self, days: i64) -> Result<(), EntitlementError> {
        if !is_valid_trial_length(days) {
            return Err(EntitlementError::InvalidTrialLength(days));
        }

        let _guard = self.commands.lock().await;
        let next = EntitlementSnapshot {
            trial_active: true,
            trial_end_date: Some(Utc::now() + Duration::days(days)),
            ..self.snapshot()
        };
        self.commit(next).await?;
        log::info!("Trial reset to {} days", days);
        Ok(())
    }

    /// Releases the backend session. Gives up after the backend timeout.
    pub async fn disconnect(&self) {
        let timeout = self.settings.backend_timeout();
        if tokio::time::timeout(timeout, self.backend.disconnect()).await.is_err() {
            log::warn!("Purchase backend disconnect timed out after {}ms", timeout.as_millis());
        }
    }

    async fn commit(&self, next: EntitlementSnapshot) -> Result<(), EntitlementError> {
        let raw = next
            .to_json()
            .map_err(|e| EntitlementError::PersistenceUnavailable(e.to_string()))?;
        self.state.set(SNAPSHOT_KEY, &raw).await?;
        self.snapshot.send_replace(next);
        Ok(())
    }

    fn enter(&self, phase: StorePhase) {
        self.status.send_modify(|status| status.phase = phase);
    }

    fn finish<T>(&self, operation: &str, result: &Result<T, EntitlementError>) {
        let last_error = match result {
            Ok(_) => None,
            Err(e) => {
                log::warn!("Entitlement {} failed: {}", operation, e);
                Some(e.user_message().to_string())
            }
        };
        self.status.send_replace(StoreStatus {
            phase: StorePhase::Ready,
            last_error,
        });
    }
}

async fn load_snapshot(
    state: &dyn PersistedState,
    settings: &EntitlementConfig,
    now: DateTime<Utc>,
) -> EntitlementSnapshot {
    let trial_days = settings.trial_length_days();
    match state.get(SNAPSHOT_KEY).await {
        Ok(Some(raw)) => match EntitlementSnapshot::from_json(&raw) {
            Ok(snapshot) => {
                log::info!("Loaded persisted entitlement (active: {})", snapshot.active);
                return snapshot;
            }
            Err(e) => {
                log::warn!("Discarding unreadable persisted entitlement: {}", e);
                if let Err(e) = state.remove(SNAPSHOT_KEY).await {
                    log::warn!("Could not remove unreadable entitlement: {}", e);
                }
            }
        },
        Ok(None) => log::info!("First launch, starting {}-day trial", trial_days),
        Err(e) => {
            // Storage may still hold a good snapshot we failed to read; don't overwrite it.
            log::warn!("Persisted state unavailable, using in-memory trial: {}", e);
            return EntitlementSnapshot::fresh_trial(now, trial_days);
        }
    }

    let fresh = EntitlementSnapshot::fresh_trial(now, trial_days);
    match fresh.to_json() {
        Ok(raw) => {
            if let Err(e) = state.set(SNAPSHOT_KEY, &raw).await {
                log::warn!("Could not persist new trial: {}", e);
            }
        }
        Err(e) => log::warn!("Could not encode new trial: {}", e),
    }
    fresh
}
