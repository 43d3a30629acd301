//! Rate-limited executor
//!
//! Gates every analyzer invocation behind two admission checks: the number
//! of calls in flight must stay below `max_concurrent`, and call starts
//! within any sliding 60-second window must stay below
//! `requests_per_minute`. A slot is taken the moment both gates pass; its
//! start timestamp enters the window.
//!
//! Failures are classified for retry. Rate/overload errors back off from a
//! tripled base delay; fatal errors propagate immediately. The guarded
//! state is a plain mutex and no I/O ever happens while it is held.

use scout_common::config::RateLimitConfig;
use rand::Rng;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Sliding window length
const WINDOW: Duration = Duration::from_secs(60);

/// Poll interval while waiting on the concurrency gate
const CONCURRENCY_POLL: Duration = Duration::from_millis(100);

/// Safety margin added when sleeping until a window slot frees up
const WINDOW_EXIT_BUFFER: Duration = Duration::from_millis(50);

/// How an error should be treated by the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Provider pushed back (429/529, rate_limit/overloaded): retry with a
    /// tripled base delay
    RateLimit,
    /// Transient (aborted, timed out): retry with the normal base delay
    Transient,
    /// Not worth retrying: surface immediately
    Fatal,
}

/// Implemented by error types the executor can classify
pub trait RetryClassify {
    fn retry_class(&self) -> RetryClass;
}

/// Options for a single `execute` call
pub struct ExecuteOptions<'a, E> {
    /// Override the configured retry budget
    pub max_retries: Option<u32>,
    /// Invoked before each retry with the retry number and the error
    pub on_retry: Option<&'a (dyn Fn(u32, &E) + Send + Sync)>,
}

impl<E> Default for ExecuteOptions<'_, E> {
    fn default() -> Self {
        Self {
            max_retries: None,
            on_retry: None,
        }
    }
}

struct LimiterState {
    in_flight: usize,
    window: VecDeque<Instant>,
}

impl LimiterState {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.window.front() {
            if now.duration_since(*front) >= WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Concurrency + throughput gate around the external analyzer
#[derive(Clone)]
pub struct RateLimitedExecutor {
    state: Arc<Mutex<LimiterState>>,
    config: RateLimitConfig,
}

/// Releases the concurrency slot on drop; the window timestamp stays, that
/// is the point of a start-rate limit.
pub struct SlotGuard {
    state: Arc<Mutex<LimiterState>>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().expect("limiter lock poisoned");
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

enum Gate {
    Granted,
    ConcurrencyFull,
    WindowFullUntil(Instant),
}

impl RateLimitedExecutor {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(LimiterState {
                in_flight: 0,
                window: VecDeque::new(),
            })),
            config,
        }
    }

    /// Wait for a slot: both gates must pass
    pub async fn acquire(&self) -> SlotGuard {
        loop {
            let gate = {
                let mut state = self.state.lock().expect("limiter lock poisoned");
                let now = Instant::now();
                state.prune(now);

                if state.in_flight >= self.config.max_concurrent {
                    Gate::ConcurrencyFull
                } else if state.window.len() >= self.config.requests_per_minute {
                    // The earliest start leaves the window when it turns 60s old
                    let exit = *state.window.front().expect("window non-empty") + WINDOW;
                    Gate::WindowFullUntil(exit + WINDOW_EXIT_BUFFER)
                } else {
                    state.in_flight += 1;
                    state.window.push_back(now);
                    Gate::Granted
                }
            };

            match gate {
                Gate::Granted => {
                    return SlotGuard {
                        state: self.state.clone(),
                    }
                }
                Gate::ConcurrencyFull => tokio::time::sleep(CONCURRENCY_POLL).await,
                Gate::WindowFullUntil(when) => {
                    debug!("Request window full; sleeping until slot frees");
                    tokio::time::sleep_until(when).await;
                }
            }
        }
    }

    /// Run `op` behind the gates, retrying classified-retryable failures
    /// with capped jittered backoff. After the retry budget is exhausted the
    /// last error is surfaced.
    pub async fn execute<T, E, F, Fut>(
        &self,
        mut op: F,
        options: ExecuteOptions<'_, E>,
    ) -> Result<T, E>
    where
        E: RetryClassify + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_retries = options.max_retries.unwrap_or(self.config.max_retries);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let guard = self.acquire().await;
            let result = op().await;
            drop(guard);

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let class = error.retry_class();
            if class == RetryClass::Fatal || attempt > max_retries {
                return Err(error);
            }

            if let Some(on_retry) = options.on_retry {
                on_retry(attempt, &error);
            }

            let delay = backoff_delay(&self.config, attempt, class);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retryable failure: {}; backing off",
                error
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Current in-flight count (diagnostics)
    pub fn in_flight(&self) -> usize {
        self.state.lock().expect("limiter lock poisoned").in_flight
    }
}

/// delay = base · multiplier^(attempt-1) · (1 ± 0.2), clamped to 60 s.
/// Rate-limit failures start from a tripled base.
fn backoff_delay(config: &RateLimitConfig, attempt: u32, class: RetryClass) -> Duration {
    let base = match class {
        RetryClass::RateLimit => 3 * config.initial_delay_ms,
        _ => config.initial_delay_ms,
    };
    let exponent = attempt.saturating_sub(1);
    let raw = base as f64 * config.backoff_multiplier.powi(exponent as i32);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis(((raw * jitter) as u64).min(60_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct StubError(RetryClass);

    impl std::fmt::Display for StubError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "stub error")
        }
    }

    impl RetryClassify for StubError {
        fn retry_class(&self) -> RetryClass {
            self.0
        }
    }

    fn config(max_concurrent: usize, rpm: usize) -> RateLimitConfig {
        RateLimitConfig {
            max_concurrent,
            requests_per_minute: rpm,
            backoff_multiplier: 2.0,
            max_retries: 3,
            initial_delay_ms: 2000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_cap() {
        let executor = Arc::new(RateLimitedExecutor::new(config(3, 1000)));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let executor = executor.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let result: Result<(), StubError> = executor
                    .execute(
                        || {
                            let current = current.clone();
                            let peak = peak.clone();
                            async move {
                                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                                peak.fetch_max(now, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(10)).await;
                                current.fetch_sub(1, Ordering::SeqCst);
                                Ok(())
                            }
                        },
                        ExecuteOptions::default(),
                    )
                    .await;
                result.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_defers_starts_past_sixty_seconds() {
        let executor = RateLimitedExecutor::new(config(1, 2));

        let start = Instant::now();
        for _ in 0..2 {
            let guard = executor.acquire().await;
            drop(guard);
        }
        assert!(start.elapsed() < Duration::from_secs(1));

        // Third start must wait for the first window entry to expire
        let guard = executor.acquire().await;
        drop(guard);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(60), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(62));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_propagates_without_retry() {
        let executor = RateLimitedExecutor::new(config(1, 100));
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_in = calls.clone();
        let result: Result<(), StubError> = executor
            .execute(
                move || {
                    let calls = calls_in.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(StubError(RetryClass::Fatal))
                    }
                },
                ExecuteOptions::default(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_budget_then_surfaces_last_error() {
        let executor = RateLimitedExecutor::new(config(1, 100));
        let calls = Arc::new(AtomicUsize::new(0));
        let retries_seen = Arc::new(AtomicUsize::new(0));

        let calls_in = calls.clone();
        let retries = retries_seen.clone();
        let on_retry = move |_attempt: u32, _e: &StubError| {
            retries.fetch_add(1, Ordering::SeqCst);
        };
        let result: Result<(), StubError> = executor
            .execute(
                move || {
                    let calls = calls_in.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(StubError(RetryClass::Transient))
                    }
                },
                ExecuteOptions {
                    max_retries: Some(2),
                    on_retry: Some(&on_retry),
                },
            )
            .await;

        assert!(result.is_err());
        // 1 initial attempt + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failure() {
        let executor = RateLimitedExecutor::new(config(1, 100));
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_in = calls.clone();
        let result: Result<u32, StubError> = executor
            .execute(
                move || {
                    let calls = calls_in.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(StubError(RetryClass::Transient))
                        } else {
                            Ok(42)
                        }
                    }
                },
                ExecuteOptions::default(),
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_delay_ranges() {
        let config = config(1, 10);
        for _ in 0..50 {
            let first = backoff_delay(&config, 1, RetryClass::Transient).as_millis() as u64;
            assert!((1600..=2400).contains(&first), "first {first}");

            let rate_limited = backoff_delay(&config, 1, RetryClass::RateLimit).as_millis() as u64;
            assert!((4800..=7200).contains(&rate_limited), "rate {rate_limited}");

            // Deep attempts clamp at 60s
            let deep = backoff_delay(&config, 12, RetryClass::Transient);
            assert!(deep <= Duration::from_secs(60));
        }
    }
}
