use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use conductor_core::errors::ProviderError;
use conductor_core::provider::{ChatProvider, ChatRequest, ChunkStream, StreamOptions};

/// Retry and circuit breaker tuning for [`ReliableProvider`].
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum CircuitState {
    Closed,
    /// Tripped; requests are refused until the deadline passes.
    Open { until: Instant },
    /// One probe request is allowed through after cooldown.
    HalfOpen,
}

/// Retry and circuit-breaker wrapper around any [`ChatProvider`].
///
/// Retryable errors back off exponentially with jitter, `retry_after`
/// hints win over computed delays, and a streak of failures trips the
/// breaker until the cooldown passes. Only establishing the stream is
/// retried here; once a stream has been handed to the caller, an
/// interruption mid-stream belongs to the consumer.
pub struct ReliableProvider<P: ChatProvider> {
    inner: P,
    config: ReliableConfig,
    circuit: RwLock<CircuitState>,
    failure_streak: AtomicU32,
    retries: AtomicU64,
}

impl<P: ChatProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            circuit: RwLock::new(CircuitState::Closed),
            failure_streak: AtomicU32::new(0),
            retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    /// Gatekeeper for every attempt. An expired open breaker moves to
    /// half-open and lets this one request probe the provider.
    fn admit(&self) -> Result<(), ProviderError> {
        let mut circuit = self.circuit.write();
        match *circuit {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { until } => {
                if Instant::now() < until {
                    return Err(ProviderError::Overloaded);
                }
                *circuit = CircuitState::HalfOpen;
                Ok(())
            }
        }
    }

    fn note_success(&self) {
        self.failure_streak.store(0, Ordering::Relaxed);
        let mut circuit = self.circuit.write();
        if !matches!(*circuit, CircuitState::Closed) {
            info!("circuit breaker closed after successful request");
            *circuit = CircuitState::Closed;
        }
    }

    fn note_failure(&self) {
        let streak = self.failure_streak.fetch_add(1, Ordering::Relaxed) + 1;
        if streak < self.config.circuit_breaker_threshold {
            return;
        }
        let mut circuit = self.circuit.write();
        if !matches!(*circuit, CircuitState::Open { .. }) {
            warn!(
                streak,
                cooldown_secs = self.config.circuit_breaker_cooldown.as_secs(),
                "circuit breaker opened"
            );
            *circuit = CircuitState::Open {
                until: Instant::now() + self.config.circuit_breaker_cooldown,
            };
        }
    }

    /// Delay before retrying `attempt` (zero-based). A server-suggested
    /// delay is used verbatim; otherwise base * 2^attempt, capped, then
    /// scaled by a random factor in `1 ± jitter_factor`. Never below
    /// 100ms so a tight misconfiguration cannot hot-loop.
    fn backoff_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(hint) = suggested {
            return hint;
        }

        let doubled = self
            .config
            .base_delay
            .saturating_mul(1u32 << attempt.min(20));
        let capped = doubled.min(self.config.max_delay).as_millis() as f64;

        let scale = 1.0 + self.config.jitter_factor * (2.0 * jitter_unit() - 1.0);
        Duration::from_millis((capped * scale).max(100.0) as u64)
    }

    pub fn total_retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        match *self.circuit.read() {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Uniform-ish value in [0, 1). Runs the clock through a randomly seeded
/// SipHash instance, which is plenty for spreading retry storms.
fn jitter_unit() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::time::SystemTime;

    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(nanos);
    (hasher.finish() % 1_000) as f64 / 1_000.0
}

#[async_trait]
impl<P: ChatProvider> ChatProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn supports_tools(&self) -> bool {
        self.inner.supports_tools()
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        options: &StreamOptions,
    ) -> Result<ChunkStream, ProviderError> {
        self.admit()?;

        let mut attempt = 0;
        loop {
            match self.inner.stream(request, options).await {
                Ok(stream) => {
                    self.note_success();
                    return Ok(stream);
                }
                Err(error) => {
                    if !error.is_retryable() || attempt == self.config.max_retries {
                        self.note_failure();
                        return Err(error);
                    }

                    let delay = self.backoff_delay(attempt, error.suggested_delay());
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        kind = error.error_kind(),
                        %error,
                        "provider call failed, retrying"
                    );

                    tokio::time::sleep(delay).await;
                    self.admit()?;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProvider, MockResponse};

    fn server_error(body: &str) -> MockResponse {
        MockResponse::Error(ProviderError::ServerError {
            status: 500,
            body: body.into(),
        })
    }

    fn fast_config() -> ReliableConfig {
        ReliableConfig {
            base_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(9),
            ..Default::default()
        }
    }

    async fn call<P: ChatProvider>(
        provider: &ReliableProvider<P>,
    ) -> Result<ChunkStream, ProviderError> {
        provider
            .stream(&ChatRequest::default(), &StreamOptions::default())
            .await
    }

    #[tokio::test]
    async fn first_attempt_success_skips_retry_machinery() {
        let reliable =
            ReliableProvider::with_defaults(MockProvider::new(vec![MockResponse::stream_text(
                "hi",
            )]));

        assert!(call(&reliable).await.is_ok());
        assert_eq!(reliable.total_retries(), 0);
        assert_eq!(reliable.circuit_state_name(), "closed");
    }

    #[tokio::test]
    async fn retryable_errors_are_retried_until_success() {
        let mock = MockProvider::new(vec![
            server_error("first"),
            server_error("second"),
            MockResponse::stream_text("back online"),
        ]);
        let reliable = ReliableProvider::new(mock, fast_config());

        assert!(call(&reliable).await.is_ok());
        assert_eq!(reliable.total_retries(), 2);
    }

    #[tokio::test]
    async fn fatal_error_returns_immediately() {
        let mock = MockProvider::new(vec![
            MockResponse::Error(ProviderError::AuthenticationFailed("bad key".into())),
            MockResponse::stream_text("never reached"),
        ]);
        let reliable = ReliableProvider::with_defaults(mock);

        let err = call(&reliable).await.err().expect("expected error");
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert_eq!(reliable.total_retries(), 0);
    }

    #[tokio::test]
    async fn budget_exhaustion_surfaces_last_error() {
        let mock = MockProvider::new(vec![
            server_error("try 1"),
            server_error("try 2"),
            server_error("try 3"),
            server_error("final"),
        ]);
        let reliable = ReliableProvider::new(mock, fast_config());

        let err = call(&reliable).await.err().expect("expected error");
        assert!(matches!(err, ProviderError::ServerError { ref body, .. } if body == "final"));
        assert_eq!(reliable.total_retries(), 3);
    }

    #[tokio::test]
    async fn breaker_opens_and_refuses_without_calling_provider() {
        let mock = MockProvider::new(vec![
            server_error("1"),
            server_error("2"),
            server_error("3"),
            MockResponse::stream_text("never served"),
        ]);
        let config = ReliableConfig {
            max_retries: 0, // each call is a single attempt
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_secs(60),
            ..fast_config()
        };
        let reliable = ReliableProvider::new(mock, config);

        for _ in 0..3 {
            let _ = call(&reliable).await;
        }
        assert_eq!(reliable.circuit_state_name(), "open");

        let err = call(&reliable).await.err().expect("expected refusal");
        assert!(matches!(err, ProviderError::Overloaded));
    }

    #[tokio::test]
    async fn breaker_closes_again_after_cooldown_probe_succeeds() {
        let mock = MockProvider::new(vec![
            server_error("1"),
            server_error("2"),
            server_error("3"),
            MockResponse::stream_text("back online"),
        ]);
        let config = ReliableConfig {
            max_retries: 0,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_millis(40),
            ..fast_config()
        };
        let reliable = ReliableProvider::new(mock, config);

        for _ in 0..3 {
            let _ = call(&reliable).await;
        }
        assert_eq!(reliable.circuit_state_name(), "open");

        tokio::time::sleep(Duration::from_millis(55)).await;

        // Half-open probe goes through and its success closes the breaker.
        assert!(call(&reliable).await.is_ok());
        assert_eq!(reliable.circuit_state_name(), "closed");
    }

    #[test]
    fn server_hint_overrides_computed_backoff() {
        let reliable = ReliableProvider::with_defaults(MockProvider::new(vec![]));
        let delay = reliable.backoff_delay(0, Some(Duration::from_secs(5)));
        assert_eq!(delay, Duration::from_secs(5));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0, // deterministic
            ..Default::default()
        };
        let reliable = ReliableProvider::new(MockProvider::new(vec![]), config);

        assert_eq!(reliable.backoff_delay(0, None).as_millis(), 100);
        assert_eq!(reliable.backoff_delay(1, None).as_millis(), 200);
        assert_eq!(reliable.backoff_delay(2, None).as_millis(), 400);
    }

    #[test]
    fn backoff_is_capped_by_max_delay() {
        let config = ReliableConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.0,
            ..Default::default()
        };
        let reliable = ReliableProvider::new(MockProvider::new(vec![]), config);

        // 1s * 2^10 would be 1024s without the cap.
        assert_eq!(reliable.backoff_delay(10, None).as_millis(), 5000);
    }

    #[test]
    fn jittered_backoff_stays_inside_band() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            ..Default::default()
        };
        let reliable = ReliableProvider::new(MockProvider::new(vec![]), config);

        for _ in 0..64 {
            let ms = reliable.backoff_delay(0, None).as_millis();
            assert!((800..=1200).contains(&ms), "out of band: {ms}ms");
        }
    }

    #[test]
    fn wrapper_delegates_identity() {
        let reliable = ReliableProvider::with_defaults(MockProvider::new(vec![]));
        assert_eq!(reliable.name(), "mock");
        assert_eq!(reliable.model(), "mock-model");
        assert!(reliable.supports_tools());
    }
}
