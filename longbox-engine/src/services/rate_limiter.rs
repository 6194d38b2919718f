//! Per-source request throttling with exponential backoff
//!
//! Minimum spacing between requests is `60s / requests_per_minute`, multiplied
//! by `2^consecutive_errors` (capped at `2^5`). A success resets the
//! multiplier. Callers share one limiter per external source through
//! [`RateLimiterRegistry`], so two call sites cannot double-spend a
//! provider's budget.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Backoff exponent cap (multiplier 32)
pub const MAX_BACKOFF_EXPONENT: u32 = 5;

#[derive(Debug, Default)]
struct LimiterState {
    last_request: Option<Instant>,
    consecutive_errors: u32,
}

/// Rate limiter for one external source
#[derive(Debug)]
pub struct RateLimiter {
    source: String,
    min_interval: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(source: impl Into<String>, requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1);
        Self {
            source: source.into(),
            min_interval: Duration::from_millis(60_000 / rpm as u64),
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait if necessary to comply with the current delay
    ///
    /// Holding the lock across the sleep serialises concurrent callers.
    pub async fn wait(&self) {
        let mut state = self.state.lock().await;
        let delay = self.delay_for(state.consecutive_errors);

        if let Some(last_time) = state.last_request {
            let elapsed = last_time.elapsed();
            if elapsed < delay {
                let wait_time = delay - elapsed;
                tracing::debug!(
                    source = %self.source,
                    errors = state.consecutive_errors,
                    "Rate limiting: waiting {:?}",
                    wait_time
                );
                tokio::time::sleep(wait_time).await;
            }
        }

        state.last_request = Some(Instant::now());
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        if state.consecutive_errors > 0 {
            tracing::debug!(source = %self.source, "Backoff reset after success");
        }
        state.consecutive_errors = 0;
    }

    pub async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_errors = state.consecutive_errors.saturating_add(1);
        tracing::warn!(
            source = %self.source,
            consecutive_errors = state.consecutive_errors,
            next_delay_ms = self.delay_for(state.consecutive_errors).as_millis() as u64,
            "External request failed, backing off"
        );
    }

    pub async fn consecutive_errors(&self) -> u32 {
        self.state.lock().await.consecutive_errors
    }

    /// Spacing the next request will observe
    pub async fn current_delay(&self) -> Duration {
        let errors = self.state.lock().await.consecutive_errors;
        self.delay_for(errors)
    }

    fn delay_for(&self, consecutive_errors: u32) -> Duration {
        self.min_interval * (1u32 << consecutive_errors.min(MAX_BACKOFF_EXPONENT))
    }
}

/// One shared limiter per source name
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    limiters: StdMutex<HashMap<String, Arc<RateLimiter>>>,
    /// Requests per minute for sources without an explicit setting
    default_rpm: u32,
    overrides: HashMap<String, u32>,
}

impl RateLimiterRegistry {
    pub fn new(default_rpm: u32, overrides: HashMap<String, u32>) -> Self {
        Self {
            limiters: StdMutex::new(HashMap::new()),
            default_rpm: default_rpm.max(1),
            overrides,
        }
    }

    /// Limiter for `source`, created on first use
    pub fn limiter(&self, source: &str) -> Arc<RateLimiter> {
        let mut limiters = match self.limiters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        limiters
            .entry(source.to_string())
            .or_insert_with(|| {
                let rpm = self.overrides.get(source).copied().unwrap_or(self.default_rpm);
                Arc::new(RateLimiter::new(source, rpm))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_requests_per_minute() {
        assert_eq!(RateLimiter::new("comicvine", 60).min_interval(), Duration::from_secs(1));
        assert_eq!(RateLimiter::new("metron", 30).min_interval(), Duration::from_secs(2));
        // Zero is clamped to one request per minute
        assert_eq!(RateLimiter::new("gcd", 0).min_interval(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_backoff_doubles_and_caps() {
        let limiter = RateLimiter::new("comicvine", 60);
        assert_eq!(limiter.current_delay().await, Duration::from_secs(1));

        limiter.record_failure().await;
        assert_eq!(limiter.current_delay().await, Duration::from_secs(2));
        limiter.record_failure().await;
        assert_eq!(limiter.current_delay().await, Duration::from_secs(4));

        for _ in 0..10 {
            limiter.record_failure().await;
        }
        assert_eq!(limiter.current_delay().await, Duration::from_secs(32));

        limiter.record_success().await;
        assert_eq!(limiter.current_delay().await, Duration::from_secs(1));
        assert_eq!(limiter.consecutive_errors().await, 0);
    }

    #[tokio::test]
    async fn test_rate_limiter_timing() {
        let limiter = RateLimiter::new("test", 600); // 100ms spacing

        let start = Instant::now();
        limiter.wait().await;
        let first_elapsed = start.elapsed();
        limiter.wait().await;
        let second_elapsed = start.elapsed();

        assert!(first_elapsed < Duration::from_millis(50));
        assert!(second_elapsed >= Duration::from_millis(90));
    }

    #[test]
    fn test_registry_shares_limiters_per_source() {
        let mut overrides = HashMap::new();
        overrides.insert("comicvine".to_string(), 120);
        let registry = RateLimiterRegistry::new(30, overrides);

        let a = registry.limiter("comicvine");
        let b = registry.limiter("comicvine");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.min_interval(), Duration::from_millis(500));
        assert_eq!(registry.limiter("metron").min_interval(), Duration::from_secs(2));
    }
}
