//! Deadline wrapper for outbound driver calls.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProviderError, ProviderResult};

/// Run `call` with a deadline. Elapsed deadlines become
/// [`ProviderError::Transient`] so the caller retries on its next tick.
pub async fn with_deadline<T, F>(deadline: Duration, what: &str, call: F) -> ProviderResult<T>
where
    F: Future<Output = ProviderResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Transient(format!(
            "{what} timed out after {}ms",
            deadline.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_fast_calls() {
        let result = with_deadline(Duration::from_secs(1), "quota", async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_is_transient() {
        let result: ProviderResult<()> = with_deadline(Duration::from_millis(50), "dns", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Transient(msg)) if msg.contains("dns")));
    }
}
