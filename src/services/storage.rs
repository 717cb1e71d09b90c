use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::{engine::local::{Db, File, Mem}, Surreal};

use crate::error::EntitlementError;

/// Durable string key-value storage for the entitlement snapshot.
#[async_trait]
pub trait PersistedState: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, EntitlementError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), EntitlementError>;
    async fn remove(&self, key: &str) -> Result<(), EntitlementError>;
}

/// Opens the storage named by `STORAGE_URL`.
pub async fn open(storage_url: &str) -> Result<Arc<dyn PersistedState>> {
    if storage_url.starts_with("memory://") {
        Ok(Arc::new(SurrealStateStore::in_memory().await?))
    } else if let Some(path) = storage_url.strip_prefix("file://") {
        let path = if path.is_empty() { "entitlement.db" } else { path };
        Ok(Arc::new(SurrealStateStore::on_disk(path).await?))
    } else {
        Err(anyhow!("Unsupported storage URL: {}", storage_url))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredValue {
    value: String,
}

#[derive(Clone)]
pub struct SurrealStateStore {
    db: Surreal<Db>,
}

impl SurrealStateStore {
    const TABLE: &'static str = "state";

    pub async fn in_memory() -> Result<Self> {
        let db = Surreal::new::<Mem>(()).await?;
        log::info!("In-memory state store ready");
        Self::with_db(db).await
    }

    pub async fn on_disk(path: &str) -> Result<Self> {
        let db = Surreal::new::<File>(path).await?;
        log::info!("State store opened at {}", path);
        Self::with_db(db).await
    }

    async fn with_db(db: Surreal<Db>) -> Result<Self> {
        db.use_ns("canieat").use_db("entitlement").await?;
        Ok(Self { db })
    }
}

fn persistence_error(err: impl std::fmt::Display) -> EntitlementError {
    EntitlementError::PersistenceUnavailable(err.to_string())
}

#[async_trait]
impl PersistedState for SurrealStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, EntitlementError> {
        let stored: Option<StoredValue> = self.db
            .select((Self::TABLE, key))
            .await
            .map_err(persistence_error)?;
        Ok(stored.map(|s| s.value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), EntitlementError> {
        let _: Option<StoredValue> = self.db
            .update((Self::TABLE, key))
            .content(StoredValue { value: value.to_string() })
            .await
            .map_err(persistence_error)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), EntitlementError> {
        let _: Option<StoredValue> = self.db
            .delete((Self::TABLE, key))
            .await
            .map_err(persistence_error)?;
        Ok(())
    }
}
