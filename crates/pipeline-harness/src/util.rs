//! Timeout helpers.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Timeout, timeout};

use crate::error::{HarnessError, Result};

/// Extension trait for adding timeouts to futures.
pub trait TimeoutExt: Sized {
    /// Wrap this future with a timeout.
    fn with_timeout(self, duration: Duration) -> Timeout<Self>;

    /// Wrap this future with a timeout in milliseconds.
    fn with_timeout_ms(self, ms: u64) -> Timeout<Self> {
        self.with_timeout(Duration::from_millis(ms))
    }
}

impl<F: Future> TimeoutExt for F {
    fn with_timeout(self, duration: Duration) -> Timeout<Self> {
        timeout(duration, self)
    }
}

/// Await a fallible future, failing with [`HarnessError::Timeout`] naming
/// `waiting_for` if it does not finish within `duration`.
pub async fn bounded<T, F>(duration: Duration, waiting_for: impl Into<String>, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let waiting_for = waiting_for.into();
    future
        .with_timeout(duration)
        .await
        .map_err(|_| HarnessError::timeout(duration, waiting_for))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_timeout_elapses() {
        let result = std::future::pending::<()>().with_timeout_ms(10).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn bounded_passes_results_through() {
        let value = bounded(Duration::from_secs(1), "a ready value", async { Ok(5) })
            .await
            .unwrap();
        assert_eq!(value, 5);

        let err = bounded(Duration::from_secs(1), "a failure", async {
            Err::<(), _>(HarnessError::WatchClosed)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, HarnessError::WatchClosed));
    }

    #[tokio::test]
    async fn bounded_names_what_it_waited_for() {
        let err = bounded(
            Duration::from_millis(10),
            "the next rebuild",
            std::future::pending::<Result<()>>(),
        )
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("the next rebuild"));
    }
}
