use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
            error: None,
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            success: false,
            data: None,
            message: None,
            error: Some(error),
        }
    }
}

pub const MONTHLY_PRODUCT_ID: &str = "com.grsdev.canieat.subscription.monthly";
pub const ANNUAL_PRODUCT_ID: &str = "com.grsdev.canieat.subscription.annual";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubscriptionPlan {
    Monthly,
    Annual,
}

impl SubscriptionPlan {
    pub const ALL: [SubscriptionPlan; 2] = [SubscriptionPlan::Monthly, SubscriptionPlan::Annual];

    pub fn from_product_id(product_id: &str) -> Option<Self> {
        match product_id {
            MONTHLY_PRODUCT_ID => Some(SubscriptionPlan::Monthly),
            ANNUAL_PRODUCT_ID => Some(SubscriptionPlan::Annual),
            _ => None,
        }
    }

    pub fn product_id(&self) -> &'static str {
        match self {
            SubscriptionPlan::Monthly => MONTHLY_PRODUCT_ID,
            SubscriptionPlan::Annual => ANNUAL_PRODUCT_ID,
        }
    }

    /// Store price used when the purchase backend cannot be reached.
    pub fn fallback_price(&self) -> Decimal {
        match self {
            SubscriptionPlan::Monthly => Decimal::new(4_99, 2), // $4.99
            SubscriptionPlan::Annual => Decimal::new(49_99, 2), // $49.99
        }
    }

    pub fn billing_period_days(&self) -> i64 {
        match self {
            SubscriptionPlan::Monthly => 30,
            SubscriptionPlan::Annual => 365,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            SubscriptionPlan::Monthly => "CanIEat Premium Monthly",
            SubscriptionPlan::Annual => "CanIEat Premium Annual",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SubscriptionPlan::Monthly => "Monthly access to all premium features",
            SubscriptionPlan::Annual => "Annual access to all premium features - Best Value!",
        }
    }
}

impl std::fmt::Display for SubscriptionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionPlan::Monthly => write!(f, "monthly"),
            SubscriptionPlan::Annual => write!(f, "annual"),
        }
    }
}
