use crate::error::{Result, WarrantyError};
use std::future::Future;
use std::time::Duration;

/// Runs `fut` under a deadline. Work already committed by `fut` before the
/// deadline fires is not rolled back.
pub async fn within<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, limit_ms = limit.as_millis() as u64, "deadline exceeded");
            Err(WarrantyError::DeadlineExceeded(format!(
                "{operation} did not finish within {}ms",
                limit.as_millis()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn passes_through_fast_results() {
        let value = within(Duration::from_secs(1), "fast", async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operations_fail_with_deadline_exceeded() {
        let err = within(Duration::from_millis(10), "slow", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    }
}
