//! Skyfare Query Queues
//! Copyright (c) 2026 Mamy Ratsimbazafy
//! Licensed and distributed under either of
//!   * MIT license (license terms at the root of the package or at http://opensource.org/licenses/MIT).
//!   * Apache v2 license (license terms at the root of the package or at http://www.apache.org/licenses/LICENSE-2.0).
//! at your option. This file may not be copied, modified, or distributed except according to those terms.

//! skyfare-internals/query-queues
//! Throttling primitives for external service calls: a semaphore-bounded
//! work queue with retry, a classified-retry backoff policy, and a token
//! bucket for requests-per-minute pacing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time;

/// Custom error for the work queue
#[derive(Debug, Error)]
pub enum QueryQueueError {
    #[error("max retries exceeded: {0}")]
    MaxRetriesExceeded(#[source] anyhow::Error),
    #[error("queue is closed")]
    QueueClosed,
}

/// Configuration for a work queue
#[derive(Clone, Debug)]
struct QueryQueueConfig {
    /// Maximum number of concurrent requests to the external service
    max_concurrent: u64,
    /// Initial delay for backoff in milliseconds
    initial_delay_ms: u64,
    /// Maximum delay for backoff in milliseconds
    max_delay_ms: u64,
    /// Maximum number of retries
    max_retries: u32,
    /// Jitter factor (0.0 to 1.0). 0.0 = no jitter, 1.0 = full jitter
    jitter_factor: f64,
    /// Whether to use exponential backoff
    exponential: bool,
}

impl Default for QueryQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            initial_delay_ms: 0,
            max_delay_ms: 30000,
            max_retries: 3,
            jitter_factor: 0.5,
            exponential: true,
        }
    }
}

impl QueryQueueConfig {
    /// Create a new config with the given max concurrent requests
    fn new(max_concurrent: u64) -> Self {
        Self {
            max_concurrent,
            ..Default::default()
        }
    }
}

/// An async semaphore for limiting concurrent operations
#[derive(Clone, Debug)]
struct AsyncSemaphore {
    inner: Arc<Semaphore>,
}

impl AsyncSemaphore {
    /// Create a new semaphore with the given number of permits
    fn new(permits: usize) -> Self {
        Self {
            inner: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Acquire a permit, waiting asynchronously if necessary
    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>, tokio::sync::AcquireError> {
        self.inner.acquire().await
    }
}

/// A simple work queue that limits concurrent requests to an external service
/// and uses exponential backoff with jitter for retries
///
/// # Example
///
/// ```ignore
/// let queue = QueryQueue::with_max_concurrent(4);
/// let result = queue.with_retry(|| async {
///     // Your HTTP request here
///     Ok(response)
/// }).await;
/// ```
#[derive(Clone, Debug)]
pub struct QueryQueue {
    semaphore: AsyncSemaphore,
    initial_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    max_retries: u32,
    exponential: bool,
}

impl QueryQueue {
    /// Create a new work queue with the given config
    fn new(config: &QueryQueueConfig) -> Self {
        Self {
            semaphore: AsyncSemaphore::new(config.max_concurrent as usize),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_factor: config.jitter_factor,
            max_retries: config.max_retries,
            exponential: config.exponential,
        }
    }

    /// Create a new work queue with the given max concurrent requests
    pub fn with_max_concurrent(max_concurrent: u64) -> Self {
        let config = QueryQueueConfig::new(max_concurrent);
        Self::new(&config)
    }

    /// Execute a function with rate limiting and retry
    ///
    /// The function `f` should return `Result<T, E>` where `E` implements `std::error::Error`.
    /// If the function returns `Err`, it will be retried with exponential backoff and jitter.
    pub async fn with_retry<T, F, Fut>(&self, mut f: F) -> Result<T, QueryQueueError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, anyhow::Error>> + Send,
    {
        // Acquire a permit
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| QueryQueueError::QueueClosed)?;

        // Execute with backoff
        let mut retry_count = 0;
        let mut delay = self.initial_delay;

        loop {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.max_retries {
                        return Err(QueryQueueError::MaxRetriesExceeded(e));
                    }

                    // Apply jitter to the delay
                    let jittered_delay = self.apply_jitter(delay);
                    time::sleep(jittered_delay).await;

                    // Increase delay for next retry if exponential is enabled
                    if self.exponential {
                        delay = std::cmp::min(delay * 2, self.max_delay);
                    }
                }
            }
        }
    }

    /// Apply jitter to the delay
    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor == 0.0 {
            return delay;
        }

        let jitter_ms = (delay.as_millis() as f64 * self.jitter_factor) as u64;
        let rand_jitter = rand::thread_rng().gen_range(0..=jitter_ms);

        Duration::from_millis(delay.as_millis() as u64 + rand_jitter)
    }
}

/// Classified-retry backoff policy.
///
/// Unlike [`QueryQueue::with_retry`], which retries every error, this policy
/// consults a caller-supplied classifier: errors it rejects surface
/// immediately. Between attempts k = 1..N it sleeps
/// `min(max_delay, base_delay * 2^(k-1))` plus, when jitter is enabled, a
/// uniform random extra in `[0, delay / 4]`.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    /// Deterministic variant for tests and latency-sensitive probes.
    pub fn without_jitter(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            jitter: false,
            ..Self::new(max_retries, base_delay, max_delay)
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Invoke `op` up to `max_retries + 1` times.
    ///
    /// `is_retryable` decides whether a failure is worth another attempt;
    /// a rejected error is returned as-is with no further sleeping. The
    /// final failure propagates the last observed error.
    pub async fn run<T, E, F, Fut, C>(&self, mut op: F, is_retryable: C) -> Result<T, E>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        C: Fn(&E) -> bool + Send,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries || !is_retryable(&e) {
                        return Err(e);
                    }
                    time::sleep(self.backoff_delay(attempt)).await;
                }
            }
        }
    }

    /// Delay before attempt `k + 1`, where `k` is 1-based.
    fn backoff_delay(&self, k: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(k.saturating_sub(1)));
        let delay = std::cmp::min(self.max_delay, exp);
        if !self.jitter {
            return delay;
        }
        let jitter_cap = delay.as_secs_f64() * 0.25;
        let jitter = rand::thread_rng().gen_range(0.0..=jitter_cap.max(f64::EPSILON));
        delay + Duration::from_secs_f64(jitter)
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: time::Instant,
}

/// Token bucket for requests-per-minute pacing.
///
/// `acquire` suspends until a token is available, so callers can simply
/// `bucket.acquire().await` before each outbound request. Clones share the
/// same bucket.
#[derive(Clone, Debug)]
pub struct TokenBucket {
    state: Arc<Mutex<BucketState>>,
    capacity: f64,
    refill_per_sec: f64,
}

impl TokenBucket {
    /// Bucket allowing `n` requests per minute, with burst capacity `n`.
    pub fn per_minute(n: u32) -> Self {
        let n = n.max(1);
        Self {
            state: Arc::new(Mutex::new(BucketState {
                tokens: n as f64,
                last_refill: time::Instant::now(),
            })),
            capacity: n as f64,
            refill_per_sec: n as f64 / 60.0,
        }
    }

    /// Take one token, sleeping until the refill makes one available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = time::Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                (1.0 - state.tokens) / self.refill_per_sec
            };
            time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }

    /// Tokens currently available (diagnostic).
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        let now = time::Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum FakeError {
        Transient,
        Fatal,
    }

    fn retryable(e: &FakeError) -> bool {
        matches!(e, FakeError::Transient)
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::without_jitter(
            3,
            Duration::from_secs(1),
            Duration::from_secs(30),
        );
        let result = policy
            .run(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n <= 2 {
                            Err(FakeError::Transient)
                        } else {
                            Ok(n)
                        }
                    }
                },
                retryable,
            )
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_timing_follows_exponential_schedule() {
        // Failures on calls 1 and 2, success on call 3: sleeps 1s then 2s.
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::without_jitter(
            3,
            Duration::from_secs(1),
            Duration::from_secs(10),
        );
        let start = time::Instant::now();
        let result = policy
            .run(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n <= 2 {
                            Err(FakeError::Transient)
                        } else {
                            Ok("ok")
                        }
                    }
                },
                retryable,
            )
            .await;
        let elapsed = start.elapsed();
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(3100), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_jitter_stays_within_quarter_of_delay() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(30));
        let start = time::Instant::now();
        let result = policy
            .run(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n <= 2 {
                            Err(FakeError::Transient)
                        } else {
                            Ok(())
                        }
                    }
                },
                retryable,
            )
            .await;
        assert!(result.is_ok());
        let elapsed = start.elapsed();
        // Sleep windows: [1.0, 1.25] then [2.0, 2.5].
        assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(3800), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_surfaces_immediately() {
        let calls = AtomicU32::new(0);
        let policy =
            RetryPolicy::without_jitter(3, Duration::from_secs(1), Duration::from_secs(30));
        let result: Result<(), FakeError> = policy
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Err(FakeError::Fatal) }
                },
                retryable,
            )
            .await;
        assert_eq!(result, Err(FakeError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy =
            RetryPolicy::without_jitter(2, Duration::from_millis(10), Duration::from_secs(1));
        let result: Result<(), FakeError> = policy
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Err(FakeError::Transient) }
                },
                retryable,
            )
            .await;
        assert_eq!(result, Err(FakeError::Transient));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn token_bucket_paces_after_burst() {
        let bucket = TokenBucket::per_minute(60); // 1 token/sec, burst 60
        for _ in 0..60 {
            bucket.acquire().await;
        }
        let start = time::Instant::now();
        bucket.acquire().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(900), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn token_bucket_burst_is_immediate() {
        let bucket = TokenBucket::per_minute(10);
        let start = std::time::Instant::now();
        for _ in 0..10 {
            bucket.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn query_queue_retries_then_succeeds() {
        let queue = QueryQueue::with_max_concurrent(2);
        let calls = AtomicU32::new(0);
        let result = queue
            .with_retry(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 2 {
                        Err(anyhow::anyhow!("transient"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
    }
}
