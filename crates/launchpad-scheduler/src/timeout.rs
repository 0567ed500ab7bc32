//! Bounding collaborator calls.

use launchpad_core::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Run `fut`, failing with [`Error::Timeout`] if it takes longer than `after`.
pub async fn bounded<T>(
    operation: impl Into<String>,
    after: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.into(),
            after,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let err = bounded("slow call", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, Error>(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_passes_through_result() {
        let value = bounded("fast call", Duration::from_secs(1), async { Ok::<_, Error>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
