use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::BackendConfig;
use crate::error::EntitlementError;
use crate::models::product::{fallback_catalog, ProductDescriptor, PurchaseReceipt};

type HmacSha256 = Hmac<Sha256>;

/// Capability interface over the platform store. May be entirely unavailable
/// at runtime; callers bound every call with a timeout.
#[async_trait]
pub trait PurchaseBackend: Send + Sync {
    async fn connect(&self) -> Result<(), EntitlementError>;

    /// Idempotent, and a no-op when never connected.
    async fn disconnect(&self);

    async fn list_products(&self, product_ids: &[String]) -> Result<Vec<ProductDescriptor>, EntitlementError>;

    async fn purchase(&self, product_id: &str) -> Result<PurchaseReceipt, EntitlementError>;

    async fn list_owned_purchases(&self) -> Result<Vec<PurchaseReceipt>, EntitlementError>;
}

/// Development stand-in for the store. Every purchase succeeds and is
/// remembered so a later restore finds it.
pub struct MockPurchaseBackend {
    catalog: Vec<ProductDescriptor>,
    owned: RwLock<Vec<PurchaseReceipt>>,
    connected: AtomicBool,
}

impl MockPurchaseBackend {
    pub fn new() -> Self {
        Self::with_owned(Vec::new())
    }

    pub fn with_owned(owned: Vec<PurchaseReceipt>) -> Self {
        Self {
            catalog: fallback_catalog(),
            owned: RwLock::new(owned),
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Default for MockPurchaseBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PurchaseBackend for MockPurchaseBackend {
    async fn connect(&self) -> Result<(), EntitlementError> {
        self.connected.store(true, Ordering::SeqCst);
        log::info!("Mock purchase backend connected");
        Ok(())
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            log::info!("Mock purchase backend disconnected");
        }
    }

    async fn list_products(&self, product_ids: &[String]) -> Result<Vec<ProductDescriptor>, EntitlementError> {
        Ok(self.catalog
            .iter()
            .filter(|p| product_ids.contains(&p.product_id))
            .cloned()
            .collect())
    }

    async fn purchase(&self, product_id: &str) -> Result<PurchaseReceipt, EntitlementError> {
        if !self.catalog.iter().any(|p| p.product_id == product_id) {
            return Err(EntitlementError::InvalidProduct(product_id.to_string()));
        }

        log::info!("Mock backend: simulating successful purchase for {}", product_id);
        let receipt = PurchaseReceipt {
            product_id: product_id.to_string(),
            transaction_id: format!("MOCK_{}", Uuid::new_v4().simple()),
            transaction_date: Some(Utc::now()),
            expiration_date: None,
            signature: None,
        };
        self.owned.write().await.push(receipt.clone());
        Ok(receipt)
    }

    async fn list_owned_purchases(&self) -> Result<Vec<PurchaseReceipt>, EntitlementError> {
        Ok(self.owned.read().await.clone())
    }
}

#[derive(Debug, Clone)]
struct Session {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    session_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ProductsResponse {
    products: Vec<ProductDescriptor>,
}

#[derive(Debug, Deserialize)]
struct PurchasesResponse {
    purchases: Vec<PurchaseReceipt>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseRequestBody<'a> {
    product_id: &'a str,
    nonce: String,
}

/// Talks to the receipt-validation service that fronts the platform store.
#[derive(Clone)]
pub struct HttpPurchaseBackend {
    client: Client,
    config: BackendConfig,
    session: Arc<RwLock<Option<Session>>>,
}

fn unavailable(err: impl std::fmt::Display) -> EntitlementError {
    EntitlementError::BackendUnavailable(err.to_string())
}

fn malformed(err: impl std::fmt::Display) -> EntitlementError {
    EntitlementError::MalformedBackendResponse(err.to_string())
}

impl HttpPurchaseBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            session: Arc::new(RwLock::new(None)),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Returns a live session token, opening a new session when needed.
    async fn session_token(&self) -> Result<String, EntitlementError> {
        {
            let guard = self.session.read().await;
            if let Some(session) = &*guard {
                if session.expires_at > Utc::now() + Duration::minutes(1) {
                    return Ok(session.token.clone());
                }
            }
        }

        log::info!("Opening purchase backend session");

        let response = self.client
            .post(self.url("/v1/sessions"))
            .header("X-Api-Key", &self.config.api_key)
            .json(&json!({ "platform": std::env::consts::OS }))
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(unavailable(format!("session rejected ({}): {}", status, error_text)));
        }

        let body: SessionResponse = response.json().await.map_err(malformed)?;
        let expires_at = Utc::now() + Duration::seconds(body.expires_in.unwrap_or(3600));

        *self.session.write().await = Some(Session {
            token: body.session_token.clone(),
            expires_at,
        });

        Ok(body.session_token)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, EntitlementError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        Err(unavailable(format!("{}: {}", status, error_text)))
    }

    /// Rejects receipts whose signature does not match, when a secret is configured.
    fn verify_receipt(&self, receipt: &PurchaseReceipt) -> Result<(), EntitlementError> {
        let Some(secret) = &self.config.receipt_secret else {
            return Ok(());
        };
        let signature = receipt.signature.as_deref().unwrap_or_default();
        if validate_receipt_signature(secret, receipt, signature) {
            Ok(())
        } else {
            log::warn!("Receipt {} failed signature check", receipt.transaction_id);
            Err(malformed(format!("bad signature on receipt {}", receipt.transaction_id)))
        }
    }
}

fn receipt_mac(secret: &str, receipt: &PurchaseReceipt) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(format!("{}:{}", receipt.product_id, receipt.transaction_id).as_bytes());
    Some(mac)
}

/// Checks a hex HMAC-SHA256 over `"{product_id}:{transaction_id}"`.
pub fn validate_receipt_signature(secret: &str, receipt: &PurchaseReceipt, signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature) else {
        return false;
    };
    match receipt_mac(secret, receipt) {
        Some(mac) => mac.verify_slice(&provided).is_ok(),
        None => false,
    }
}

#[async_trait]
impl PurchaseBackend for HttpPurchaseBackend {
    async fn connect(&self) -> Result<(), EntitlementError> {
        self.session_token().await.map(|_| ())
    }

    async fn disconnect(&self) {
        let previous = self.session.write().await.take();
        let Some(session) = previous else {
            return;
        };

        let result = self.client
            .delete(self.url("/v1/sessions"))
            .bearer_auth(&session.token)
            .send()
            .await;
        if let Err(e) = result {
            log::debug!("Closing backend session failed: {}", e);
        }
        log::info!("Purchase backend session closed");
    }

    async fn list_products(&self, product_ids: &[String]) -> Result<Vec<ProductDescriptor>, EntitlementError> {
        let token = self.session_token().await?;

        let response = self.client
            .get(self.url("/v1/products"))
            .bearer_auth(token)
            .query(&[("ids", product_ids.join(","))])
            .send()
            .await
            .map_err(unavailable)?;

        let body: ProductsResponse = Self::check(response).await?.json().await.map_err(malformed)?;
        Ok(body.products)
    }

    async fn purchase(&self, product_id: &str) -> Result<PurchaseReceipt, EntitlementError> {
        let token = self.session_token().await?;

        log::info!("Requesting purchase of {}", product_id);

        let response = self.client
            .post(self.url("/v1/purchases"))
            .bearer_auth(token)
            .json(&PurchaseRequestBody {
                product_id,
                nonce: Uuid::new_v4().to_string(),
            })
            .send()
            .await
            .map_err(unavailable)?;

        let receipt: PurchaseReceipt = Self::check(response).await?.json().await.map_err(malformed)?;
        self.verify_receipt(&receipt)?;
        Ok(receipt)
    }

    async fn list_owned_purchases(&self) -> Result<Vec<PurchaseReceipt>, EntitlementError> {
        let token = self.session_token().await?;

        let response = self.client
            .get(self.url("/v1/purchases"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(unavailable)?;

        let body: PurchasesResponse = Self::check(response).await?.json().await.map_err(malformed)?;
        for receipt in &body.purchases {
            self.verify_receipt(receipt)?;
        }
        Ok(body.purchases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendMode;
    use crate::models::common::{ANNUAL_PRODUCT_ID, MONTHLY_PRODUCT_ID};

    fn create_test_config(receipt_secret: Option<&str>) -> BackendConfig {
        BackendConfig {
            mode: BackendMode::Http,
            // nothing listens on port 9
            base_url: "http://127.0.0.1:9/".to_string(),
            api_key: "test_key".to_string(),
            receipt_secret: receipt_secret.map(str::to_string),
        }
    }

    fn sign_receipt(secret: &str, receipt: &PurchaseReceipt) -> String {
        let mac = receipt_mac(secret, receipt).unwrap();
        hex::encode(mac.finalize().into_bytes())
    }

    fn receipt() -> PurchaseReceipt {
        PurchaseReceipt {
            product_id: MONTHLY_PRODUCT_ID.to_string(),
            transaction_id: "TXN_123".to_string(),
            transaction_date: None,
            expiration_date: None,
            signature: None,
        }
    }

    #[test]
    fn test_receipt_signature_validation() {
        let receipt = receipt();
        let signature = sign_receipt("test_secret", &receipt);

        assert!(validate_receipt_signature("test_secret", &receipt, &signature));
        assert!(!validate_receipt_signature("other_secret", &receipt, &signature));
        assert!(!validate_receipt_signature("test_secret", &receipt, "invalid_signature"));

        let tampered = PurchaseReceipt {
            product_id: ANNUAL_PRODUCT_ID.to_string(),
            ..receipt
        };
        assert!(!validate_receipt_signature("test_secret", &tampered, &signature));
    }

    #[test]
    fn test_verify_receipt_depends_on_secret() {
        let unsigned = HttpPurchaseBackend::new(create_test_config(None));
        assert!(unsigned.verify_receipt(&receipt()).is_ok());

        let signed = HttpPurchaseBackend::new(create_test_config(Some("test_secret")));
        assert!(matches!(
            signed.verify_receipt(&receipt()),
            Err(EntitlementError::MalformedBackendResponse(_))
        ));

        let mut good = receipt();
        good.signature = Some(sign_receipt("test_secret", &good));
        assert!(signed.verify_receipt(&good).is_ok());
    }

    #[test]
    fn test_url_joining() {
        let backend = HttpPurchaseBackend::new(create_test_config(None));
        assert_eq!(backend.url("/v1/products"), "http://127.0.0.1:9/v1/products");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_unavailable() {
        let backend = HttpPurchaseBackend::new(create_test_config(None));
        assert!(matches!(
            backend.connect().await,
            Err(EntitlementError::BackendUnavailable(_))
        ));
        // never connected, still fine
        backend.disconnect().await;
        backend.disconnect().await;
    }

    #[tokio::test]
    async fn test_mock_backend_remembers_purchases() {
        let backend = MockPurchaseBackend::new();
        backend.connect().await.unwrap();
        assert!(backend.is_connected());

        let ids = vec![ANNUAL_PRODUCT_ID.to_string()];
        let products = backend.list_products(&ids).await.unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].display_price, "$49.99");

        assert!(backend.list_owned_purchases().await.unwrap().is_empty());
        let receipt = backend.purchase(MONTHLY_PRODUCT_ID).await.unwrap();
        assert!(receipt.transaction_id.starts_with("MOCK_"));
        assert_eq!(backend.list_owned_purchases().await.unwrap(), vec![receipt]);

        assert!(matches!(
            backend.purchase("com.example.unknown").await,
            Err(EntitlementError::InvalidProduct(_))
        ));

        backend.disconnect().await;
        backend.disconnect().await;
        assert!(!backend.is_connected());
    }
}
