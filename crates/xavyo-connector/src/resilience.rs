//! Resilience patterns for connector operations.
//!
//! Every remote call gets a timeout; timeouts and unreachability are retried
//! with exponential backoff, and once the attempts are exhausted the failure
//! surfaces as [`ConnectorError::Unreachable`].

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ConnectorError, ConnectorResult};
use crate::object::ConnObject;
use crate::operation::{AttributeDelta, Filter, PageRequest, SearchResult};
use crate::schema::ObjectSchema;
use crate::traits::Connector;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Retry executor with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor with the given configuration.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create a new retry executor with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Calculate delay for a given attempt (0-indexed).
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay.as_millis() as f64
            * self.config.backoff_multiplier.powi(attempt as i32);

        let delay_ms = base_delay.min(self.config.max_delay.as_millis() as f64);

        let final_delay = if self.config.jitter {
            // Add up to 25% jitter
            let jitter_factor = 1.0 + (rand_simple() * 0.25);
            delay_ms * jitter_factor
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Execute an operation with retries.
    ///
    /// Permanent errors are returned as-is. A transient error that survives
    /// every attempt is reclassified as [`ConnectorError::Unreachable`].
    pub async fn execute<F, Fut, T>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> ConnectorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ConnectorResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_permanent() => return Err(e),
                Err(e) if attempt >= self.config.max_retries => {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %e,
                        "Connector retries exhausted"
                    );
                    return Err(ConnectorError::unreachable_with_source(
                        format!("{operation_name} failed after {} attempts", attempt + 1),
                        e,
                    ));
                }
                Err(e) => {
                    let delay = self.calculate_delay(attempt);
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Retrying after transient error"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Simple pseudo-random number generator for jitter.
/// Not cryptographically secure, but sufficient for jitter.
fn rand_simple() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let state = RandomState::new();
    let mut hasher = state.build_hasher();
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64,
    );
    (hasher.finish() as f64) / (u64::MAX as f64)
}

/// Connector wrapper adding a per-call timeout and retry logic.
#[derive(Debug)]
pub struct ResilientConnector<C> {
    inner: C,
    timeout: Duration,
    retry_executor: RetryExecutor,
}

impl<C: Connector> ResilientConnector<C> {
    /// Create a new resilient connector wrapper.
    pub fn new(connector: C, timeout: Duration, retry_config: RetryConfig) -> Self {
        Self {
            inner: connector,
            timeout,
            retry_executor: RetryExecutor::new(retry_config),
        }
    }

    /// Get a reference to the inner connector.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Bound a single attempt by the configured timeout.
    async fn attempt<T, Fut>(&self, call: Fut) -> ConnectorResult<T>
    where
        Fut: std::future::Future<Output = ConnectorResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ConnectorError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl<C: Connector> Connector for ResilientConnector<C> {
    fn display_name(&self) -> &str {
        self.inner.display_name()
    }

    async fn search(
        &self,
        object_class: &str,
        filter: Option<&Filter>,
        page: &PageRequest,
    ) -> ConnectorResult<SearchResult> {
        self.retry_executor
            .execute("search", move || {
                self.attempt(self.inner.search(object_class, filter, page))
            })
            .await
    }

    async fn create(&self, object_class: &str, object: &ConnObject) -> ConnectorResult<String> {
        self.retry_executor
            .execute("create", move || self.attempt(self.inner.create(object_class, object)))
            .await
    }

    async fn update(
        &self,
        object_class: &str,
        key: &str,
        delta: &AttributeDelta,
    ) -> ConnectorResult<()> {
        self.retry_executor
            .execute("update", move || {
                self.attempt(self.inner.update(object_class, key, delta))
            })
            .await
    }

    async fn delete(&self, object_class: &str, key: &str) -> ConnectorResult<()> {
        self.retry_executor
            .execute("delete", move || self.attempt(self.inner.delete(object_class, key)))
            .await
    }

    async fn describe_schema(&self, object_class: &str) -> ConnectorResult<ObjectSchema> {
        self.retry_executor
            .execute("describe_schema", move || {
                self.attempt(self.inner.describe_schema(object_class))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_retry_executor_succeeds_first_try() {
        let executor = RetryExecutor::with_defaults();
        let call_count = AtomicUsize::new(0);

        let result = executor
            .execute("search", || {
                call_count.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ConnectorError>(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_executor_retries_on_transient_error() {
        let executor = RetryExecutor::new(fast_config(3));
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let result = executor
            .execute("search", move || {
                let count = call_count_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(ConnectorError::unreachable("temporarily unavailable"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_executor_fails_on_permanent_error() {
        let executor = RetryExecutor::with_defaults();
        let call_count = AtomicUsize::new(0);

        let result: ConnectorResult<i32> = executor
            .execute("create", || {
                call_count.fetch_add(1, Ordering::SeqCst);
                async { Err(ConnectorError::conflict("u1", "duplicate")) }
            })
            .await;

        assert!(matches!(result, Err(ConnectorError::RemoteConflict { .. })));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_timeouts_become_unreachable() {
        let executor = RetryExecutor::new(fast_config(2));
        let call_count = AtomicUsize::new(0);

        let result: ConnectorResult<()> = executor
            .execute("update", || {
                call_count.fetch_add(1, Ordering::SeqCst);
                async { Err(ConnectorError::Timeout { timeout_ms: 5 }) }
            })
            .await;

        assert!(matches!(result, Err(ConnectorError::Unreachable { .. })));
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_calculate_delay_exponential_backoff() {
        let executor = RetryExecutor::new(RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        });

        assert_eq!(executor.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(executor.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(executor.calculate_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_calculate_delay_respects_max() {
        let executor = RetryExecutor::new(RetryConfig {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter: false,
        });

        // 100 * 2^5 = 3200, should be capped at 500
        assert_eq!(executor.calculate_delay(5), Duration::from_millis(500));
    }

    struct Slow;

    #[async_trait]
    impl Connector for Slow {
        fn display_name(&self) -> &str {
            "slow"
        }

        async fn search(
            &self,
            _object_class: &str,
            _filter: Option<&Filter>,
            _page: &PageRequest,
        ) -> ConnectorResult<SearchResult> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(SearchResult::empty())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resilient_connector_times_out_then_gives_up() {
        let connector = ResilientConnector::new(Slow, Duration::from_millis(50), fast_config(1));

        let err = connector
            .search("account", None, &PageRequest::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectorError::Unreachable { .. }));
        assert_eq!(connector.display_name(), "slow");
    }
}
