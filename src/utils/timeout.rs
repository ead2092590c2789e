//! Timeout constants and async timeout wrappers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Default bound for connect attempts and single socket writes
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between client heartbeats
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Silence after which the server evicts a session
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval of the server liveness sweep
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Interval at which dispatch loops drain their queues
pub const DISPATCH_INTERVAL: Duration = Duration::from_millis(10);

/// Run a future with a deadline, mapping expiry to `ProtocolError::Timeout`
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_maps_to_protocol_error() {
        let result: Result<()> = with_timeout_error(
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            },
            Duration::from_millis(10),
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn test_inner_result_passes_through() {
        let result = with_timeout_error(async { Ok(7) }, Duration::from_secs(1)).await;
        assert_eq!(result.ok(), Some(7));
    }
}
