use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EntitlementError {
    #[error("persisted state unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("purchase backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("purchase backend did not respond within {0}ms")]
    BackendTimeout(u64),

    #[error("invalid product: {0:?}")]
    InvalidProduct(String),

    #[error("malformed backend response: {0}")]
    MalformedBackendResponse(String),

    #[error("trial length of {0} days is out of range")]
    InvalidTrialLength(i64),
}

impl EntitlementError {
    /// Backend and storage hiccups can be retried; bad input cannot.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EntitlementError::InvalidProduct(_) | EntitlementError::InvalidTrialLength(_)
        )
    }

    /// Message shown to the user. Never exposes backend details.
    pub fn user_message(&self) -> &'static str {
        match self {
            EntitlementError::InvalidProduct(_) => "Please choose a subscription plan.",
            EntitlementError::InvalidTrialLength(_) => {
                "Trial length must be between 1 and 365 days."
            }
            EntitlementError::PersistenceUnavailable(_) => {
                "Your subscription could not be saved. Please try again later."
            }
            EntitlementError::BackendUnavailable(_)
            | EntitlementError::BackendTimeout(_)
            | EntitlementError::MalformedBackendResponse(_) => {
                "The store is not reachable right now. Please try again later."
            }
        }
    }
}
