use serde::{Deserialize, Serialize};
use chrono::{DateTime, Duration, Utc};

use crate::models::common::SubscriptionPlan;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductDescriptor {
    pub product_id: String,
    pub display_price: String,
    pub currency: String,
    pub title: String,
    pub description: String,
}

impl ProductDescriptor {
    pub fn fallback(plan: SubscriptionPlan) -> Self {
        Self {
            product_id: plan.product_id().to_string(),
            display_price: format!("${}", plan.fallback_price()),
            currency: "USD".to_string(),
            title: plan.title().to_string(),
            description: plan.description().to_string(),
        }
    }
}

/// The static two-entry catalog shown when the backend never answers.
pub fn fallback_catalog() -> Vec<ProductDescriptor> {
    SubscriptionPlan::ALL
        .iter()
        .map(|plan| ProductDescriptor::fallback(*plan))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseReceipt {
    pub product_id: String,
    pub transaction_id: String,
    #[serde(default)]
    pub transaction_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl PurchaseReceipt {
    pub fn plan(&self) -> Option<SubscriptionPlan> {
        SubscriptionPlan::from_product_id(&self.product_id)
    }

    /// End of the paid term this receipt grants. An explicit expiration from the
    /// store wins; otherwise one billing period from the transaction date.
    pub fn paid_until(&self) -> Option<DateTime<Utc>> {
        if self.expiration_date.is_some() {
            return self.expiration_date;
        }
        let plan = self.plan()?;
        self.transaction_date
            .map(|date| date + Duration::days(plan.billing_period_days()))
    }
}
