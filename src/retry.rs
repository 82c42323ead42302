//! Bounded retry execution with pluggable backoff.
//!
//! Wraps an arbitrary async operation in attempt/delay/retry logic. The
//! scheduler sleeps the calling task between attempts; callers that must
//! not block spawn it on its own task. There is no operation-level timeout
//! here — that stays with the caller.

use anyhow::{anyhow, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Messages containing any of these classify as transient network faults
/// even when the error type is generic. Many upstream libraries raise
/// plain errors for connection problems.
const NETWORK_KEYWORDS: [&str; 7] = [
    "connection",
    "timeout",
    "timed out",
    "dns",
    "socket",
    "temporary failure",
    "service unavailable",
];

/// HTTP status codes worth retrying.
const RETRYABLE_STATUS_CODES: [u32; 7] = [408, 425, 429, 500, 502, 503, 504];

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Fixed,
    Fibonacci,
}

impl std::str::FromStr for BackoffStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exponential" => Ok(BackoffStrategy::Exponential),
            "linear" => Ok(BackoffStrategy::Linear),
            "fixed" => Ok(BackoffStrategy::Fixed),
            "fibonacci" => Ok(BackoffStrategy::Fibonacci),
            other => Err(anyhow!("unknown backoff strategy: '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    pub jitter: bool,
    /// Uniform jitter applied as `delay * (1 ± factor)`.
    pub jitter_factor: f64,
    /// Substrings matched against the error chain; a match means retryable
    /// regardless of the built-in heuristics.
    pub retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: true,
            jitter_factor: 0.1,
            retryable_errors: Vec::new(),
        }
    }
}

impl From<&crate::config::RetryDefaults> for RetryConfig {
    fn from(defaults: &crate::config::RetryDefaults) -> Self {
        RetryConfig {
            max_attempts: defaults.max_attempts,
            base_delay: Duration::from_secs_f64(defaults.base_delay_secs),
            max_delay: Duration::from_secs_f64(defaults.max_delay_secs),
            strategy: defaults
                .strategy
                .parse()
                .unwrap_or(BackoffStrategy::Exponential),
            jitter: defaults.jitter,
            jitter_factor: defaults.jitter_factor,
            retryable_errors: Vec::new(),
        }
    }
}

/// One attempt's record in [`RetryOutcome::history`].
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub error: String,
    /// Delay slept after this attempt, `None` for the final one.
    pub delay_after: Option<Duration>,
}

/// Result of [`RetryScheduler::execute`]: the final value or last error,
/// plus per-attempt detail for diagnostics.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub attempts: u32,
    pub history: Vec<AttemptRecord>,
}

impl<T> RetryOutcome<T> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct RetryScheduler {
    config: RetryConfig,
}

impl RetryScheduler {
    pub fn new(config: RetryConfig) -> Self {
        RetryScheduler { config }
    }

    /// Run `operation` up to `max_attempts` times, sleeping the computed
    /// backoff between attempts. A non-retryable error aborts immediately
    /// without consuming the remaining attempts; on exhaustion the last
    /// error is returned, never swallowed.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut history = Vec::new();

        for attempt in 1..=self.config.max_attempts {
            match operation().await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        history,
                    };
                }
                Err(err) => {
                    let retryable = is_retryable(&self.config, &err);
                    let last = attempt == self.config.max_attempts;

                    if !retryable || last {
                        if !retryable {
                            debug!(attempt, error = %err, "non-retryable, aborting");
                        } else {
                            warn!(attempts = attempt, error = %err, "retries exhausted");
                        }
                        history.push(AttemptRecord {
                            attempt,
                            error: format!("{:#}", err),
                            delay_after: None,
                        });
                        return RetryOutcome {
                            result: Err(err),
                            attempts: attempt,
                            history,
                        };
                    }

                    let delay = self.delay_for_attempt(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
                    history.push(AttemptRecord {
                        attempt,
                        error: format!("{:#}", err),
                        delay_after: Some(delay),
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }

        // max_attempts >= 1 means the loop always returns above.
        unreachable!("retry loop exited without a result")
    }

    /// Backoff for the given 1-based attempt number: the strategy formula,
    /// clamped to `max_delay`, then jittered.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let clamped = compute_delay(&self.config, attempt);
        if !self.config.jitter || self.config.jitter_factor <= 0.0 {
            return clamped;
        }
        let factor = self.config.jitter_factor;
        let scale = 1.0 + rand::thread_rng().gen_range(-factor..=factor);
        Duration::from_secs_f64((clamped.as_secs_f64() * scale).max(0.0))
    }
}

/// Raw strategy delay for a 1-based attempt, clamped to `max_delay`,
/// before jitter.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let n = attempt.max(1);
    let base = config.base_delay.as_secs_f64();
    let raw = match config.strategy {
        BackoffStrategy::Exponential => base * 2f64.powi(n as i32 - 1),
        BackoffStrategy::Linear => base * n as f64,
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Fibonacci => base * fibonacci(n) as f64,
    };
    Duration::from_secs_f64(raw.min(config.max_delay.as_secs_f64()))
}

fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 2..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    if n <= 2 {
        1
    } else {
        b
    }
}

/// An error is retryable iff it matches a configured substring, carries a
/// retryable HTTP status code, or reads like a transient network fault.
pub fn is_retryable(config: &RetryConfig, err: &anyhow::Error) -> bool {
    let chain = format!("{:#}", err).to_lowercase();

    if config
        .retryable_errors
        .iter()
        .any(|pattern| chain.contains(&pattern.to_lowercase()))
    {
        return true;
    }

    if embedded_status_codes(&chain)
        .iter()
        .any(|code| RETRYABLE_STATUS_CODES.contains(code))
    {
        return true;
    }

    NETWORK_KEYWORDS.iter().any(|kw| chain.contains(kw))
}

/// Every standalone number in the message that looks like an HTTP status.
fn embedded_status_codes(message: &str) -> Vec<u32> {
    let mut codes = Vec::new();
    let mut current = 0u32;
    let mut digits = 0u32;
    for c in message.chars().chain(std::iter::once(' ')) {
        if let Some(d) = c.to_digit(10) {
            current = current.saturating_mul(10).saturating_add(d);
            digits += 1;
        } else {
            if digits == 3 && (100..=599).contains(&current) {
                codes.push(current);
            }
            current = 0;
            digits = 0;
        }
    }
    codes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(strategy: BackoffStrategy) -> RetryConfig {
        RetryConfig {
            strategy,
            jitter: false,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_exponential_monotonic_and_clamped() {
        let cfg = config(BackoffStrategy::Exponential);
        let d1 = compute_delay(&cfg, 1);
        let d2 = compute_delay(&cfg, 2);
        let d3 = compute_delay(&cfg, 3);
        assert!(d3 > d2 && d2 > d1);
        assert_eq!(d1, Duration::from_secs(1));
        assert_eq!(d2, Duration::from_secs(2));
        assert_eq!(d3, Duration::from_secs(4));
        assert!(compute_delay(&cfg, 30) <= cfg.max_delay);
    }

    #[test]
    fn test_linear_and_fixed() {
        let cfg = config(BackoffStrategy::Linear);
        assert_eq!(compute_delay(&cfg, 3), Duration::from_secs(3));

        let cfg = config(BackoffStrategy::Fixed);
        assert_eq!(compute_delay(&cfg, 1), Duration::from_secs(1));
        assert_eq!(compute_delay(&cfg, 7), Duration::from_secs(1));
    }

    #[test]
    fn test_fibonacci_sequence() {
        let cfg = config(BackoffStrategy::Fibonacci);
        let expected = [1u64, 1, 2, 3, 5, 8, 13];
        for (i, fib) in expected.iter().enumerate() {
            let attempt = i as u32 + 1;
            assert_eq!(
                compute_delay(&cfg, attempt),
                Duration::from_secs((*fib).min(60)),
                "attempt {}",
                attempt
            );
        }
    }

    #[test]
    fn test_jitter_bounds() {
        let cfg = RetryConfig {
            jitter: true,
            jitter_factor: 0.5,
            strategy: BackoffStrategy::Fixed,
            base_delay: Duration::from_secs(10),
            ..RetryConfig::default()
        };
        let scheduler = RetryScheduler::new(cfg);
        for _ in 0..50 {
            let d = scheduler.delay_for_attempt(1).as_secs_f64();
            assert!((5.0..=15.0).contains(&d), "jittered delay {} out of bounds", d);
        }
    }

    #[test]
    fn test_retryable_network_keywords() {
        let cfg = RetryConfig::default();
        assert!(is_retryable(&cfg, &anyhow!("Connection refused by peer")));
        assert!(is_retryable(&cfg, &anyhow!("operation timed out")));
        assert!(is_retryable(&cfg, &anyhow!("Temporary failure in name resolution")));
        assert!(!is_retryable(&cfg, &anyhow!("invalid frontmatter")));
    }

    #[test]
    fn test_retryable_status_codes() {
        let cfg = RetryConfig::default();
        assert!(is_retryable(&cfg, &anyhow!("server returned status 503")));
        assert!(is_retryable(&cfg, &anyhow!("HTTP 429 Too Many Requests")));
        assert!(!is_retryable(&cfg, &anyhow!("server returned status 404")));
        // A 3-digit number that is not a status code must not match.
        assert!(!is_retryable(&cfg, &anyhow!("expected 999 rows")));
    }

    #[test]
    fn test_configured_patterns_win() {
        let cfg = RetryConfig {
            retryable_errors: vec!["lock contention".to_string()],
            ..RetryConfig::default()
        };
        assert!(is_retryable(&cfg, &anyhow!("Lock Contention on registry")));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let scheduler = RetryScheduler::new(RetryConfig {
            jitter: false,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(100),
            ..RetryConfig::default()
        });
        let counter = AtomicU32::new(0);

        let outcome = scheduler
            .execute(|| async {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    anyhow::bail!("connection reset")
                }
                Ok(n)
            })
            .await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.history[0].delay_after, Some(Duration::from_millis(1)));
        assert_eq!(outcome.history[1].delay_after, Some(Duration::from_millis(2)));
    }

    #[tokio::test]
    async fn test_non_retryable_aborts_immediately() {
        let scheduler = RetryScheduler::new(RetryConfig {
            max_attempts: 5,
            jitter: false,
            ..RetryConfig::default()
        });
        let counter = AtomicU32::new(0);

        let outcome: RetryOutcome<()> = scheduler
            .execute(|| async {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("schema validation failed")
            })
            .await;

        assert!(!outcome.succeeded());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let scheduler = RetryScheduler::new(RetryConfig {
            max_attempts: 3,
            jitter: false,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(100),
            ..RetryConfig::default()
        });
        let counter = AtomicU32::new(0);

        let outcome: RetryOutcome<()> = scheduler
            .execute(|| async {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                anyhow::bail!("timeout on attempt {}", n)
            })
            .await;

        assert!(!outcome.succeeded());
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.result.unwrap_err().to_string().contains("attempt 3"));
        assert_eq!(outcome.history.len(), 3);
        assert!(outcome.history[2].delay_after.is_none());
    }
}
