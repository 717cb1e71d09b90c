use std::future::Future;
use std::time::Duration;

use crate::error::EntitlementError;

/// Bounds a backend-facing call. Expiry drops the pending future and reports
/// `BackendTimeout`; the call never partially applies.
pub async fn with_timeout<T, F>(duration: Duration, operation: F) -> Result<T, EntitlementError>
where
    F: Future<Output = Result<T, EntitlementError>>,
{
    match tokio::time::timeout(duration, operation).await {
        Ok(result) => result,
        Err(_) => Err(EntitlementError::BackendTimeout(duration.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fast_operation_passes_through() {
        let result = with_timeout(Duration::from_millis(200), async { Ok::<_, EntitlementError>(42) }).await;
        assert_eq!(result, Ok(42));

        let result: Result<(), _> = with_timeout(Duration::from_millis(200), async {
            Err(EntitlementError::BackendUnavailable("offline".to_string()))
        })
        .await;
        assert_eq!(result, Err(EntitlementError::BackendUnavailable("offline".to_string())));
    }

    #[tokio::test]
    async fn test_slow_operation_times_out() {
        let result = with_timeout(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, EntitlementError>(())
        })
        .await;
        assert_eq!(result, Err(EntitlementError::BackendTimeout(20)));
    }
}
