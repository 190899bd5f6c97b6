//! Runs asynchronous operations under a deadline while keeping the caller's
//! own cancellation distinct from an elapsed timeout.

use super::error::CoreError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Deadline used when a call site does not pick its own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs `operation` with a deadline.
///
/// The operation receives a token linked to `cancel` that also fires when the
/// deadline elapses, so any work it spawned can stop too. The result is
/// `CoreError::Timeout` when the deadline fired first, and
/// `CoreError::Cancelled` when `cancel` fired first.
pub async fn run_with_timeout<T, F, Fut>(
    operation: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T, CoreError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let linked = cancel.child_token();
    let work = operation(linked.clone());
    tokio::pin!(work);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CoreError::Cancelled),
        result = &mut work => match result {
            // The operation noticed the linked token before the select did.
            Err(CoreError::Cancelled) if !cancel.is_cancelled() && linked.is_cancelled() => {
                Err(CoreError::Timeout(timeout))
            }
            other => other,
        },
        _ = tokio::time::sleep(timeout) => {
            linked.cancel();
            Err(CoreError::Timeout(timeout))
        }
    }
}

/// Like [`run_with_timeout`], but never fails: timeouts, cancellation and
/// errors all yield `default` instead.
pub async fn run_with_timeout_or<T, F, Fut>(
    operation: F,
    timeout: Duration,
    cancel: &CancellationToken,
    default: T,
) -> T
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    match run_with_timeout(operation, timeout, cancel).await {
        Ok(value) => value,
        Err(CoreError::Cancelled) => default,
        Err(e) => {
            tracing::warn!("Falling back to default value: {}", e);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn block_for(duration: Duration, token: CancellationToken) -> Result<u32, CoreError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(7),
            _ = token.cancelled() => Err(CoreError::Cancelled),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_deadline_is_a_timeout() {
        let cancel = CancellationToken::new();
        let result = run_with_timeout(
            |token| block_for(Duration::from_secs(5), token),
            Duration::from_secs(1),
            &cancel,
        )
        .await;

        match result {
            Err(CoreError::Timeout(elapsed)) => assert_eq!(elapsed, Duration::from_secs(1)),
            other => panic!("expected a timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancellation_is_not_a_timeout() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = run_with_timeout(
            |token| block_for(Duration::from_secs(5), token),
            Duration::from_secs(1),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(CoreError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_finishing_in_time_returns_its_value() {
        let cancel = CancellationToken::new();
        let result = run_with_timeout(
            |token| block_for(Duration::from_millis(10), token),
            DEFAULT_TIMEOUT,
            &cancel,
        )
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_linked_token_fires_on_timeout() {
        let cancel = CancellationToken::new();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let result = run_with_timeout(
            |token| async move {
                tx.send(token).ok();
                std::future::pending::<Result<(), CoreError>>().await
            },
            Duration::from_secs(1),
            &cancel,
        )
        .await;

        assert!(result.unwrap_err().is_timeout());
        assert!(rx.await.unwrap().is_cancelled());
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_failing_variant_returns_default() {
        let cancel = CancellationToken::new();
        let value = run_with_timeout_or(
            |token| block_for(Duration::from_secs(5), token),
            Duration::from_secs(1),
            &cancel,
            42,
        )
        .await;
        assert_eq!(value, 42);
    }
}
