//! Query circuit breaker protecting downstream persistence from cascading
//! failure. Three states: `closed`, `open`, `half-open`.
//!
//! The `open -> half-open` transition is performed lazily inside the
//! side-effect-free-looking query methods (`state()`, `can_execute()`), the
//! same choice the source implementation makes; see the kernel's design
//! notes for why this is kept rather than moved into `execute` alone.

use std::collections::VecDeque;
use std::future::Future;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sa_domain::config::CircuitBreakerConfig;
use sa_domain::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_streak: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

struct Inner {
    state: CircuitState,
    /// Failure timestamps within `failure_window_ms`, oldest first.
    failures: VecDeque<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    /// Consecutive successes while in `half_open`.
    success_streak: u32,
    total_calls: u64,
    rejected_calls: u64,
}

impl Inner {
    fn new() -> Self {
        Inner {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            last_failure: None,
            last_success: None,
            success_streak: 0,
            total_calls: 0,
            rejected_calls: 0,
        }
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            config,
            inner: RwLock::new(Inner::new()),
        }
    }

    /// Current state, performing the lazy `open -> half_open` transition if
    /// `reset_timeout_ms` has elapsed since the last recorded failure.
    pub fn state(&self) -> CircuitState {
        self.state_at(Utc::now())
    }

    fn state_at(&self, now: DateTime<Utc>) -> CircuitState {
        let mut inner = self.inner.write();
        if inner.state == CircuitState::Open {
            if let Some(last_failure) = inner.last_failure {
                let elapsed = (now - last_failure).num_milliseconds().max(0) as u64;
                if elapsed >= self.config.reset_timeout_ms {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_streak = 0;
                }
            }
        }
        inner.state
    }

    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Run `f`, recording the outcome and advancing the state machine.
    /// Rejects immediately with [`Error::CircuitOpen`] without running `f`
    /// when the circuit is (still) open.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let now = Utc::now();
        {
            let mut inner = self.inner.write();
            inner.total_calls += 1;
        }

        if self.state_at(now) == CircuitState::Open {
            let retry_after = self.retry_after_at(now);
            let mut inner = self.inner.write();
            inner.rejected_calls += 1;
            return Err(Error::circuit_open(retry_after));
        }

        let result = f().await;
        self.record_at(result.is_ok(), now);
        result
    }

    fn retry_after_at(&self, now: DateTime<Utc>) -> std::time::Duration {
        let inner = self.inner.read();
        let last_failure = inner.last_failure.unwrap_or(now);
        let elapsed = (now - last_failure).num_milliseconds().max(0) as u64;
        let remaining = self.config.reset_timeout_ms.saturating_sub(elapsed);
        std::time::Duration::from_millis(remaining)
    }

    fn record_at(&self, success: bool, now: DateTime<Utc>) {
        let mut inner = self.inner.write();
        if success {
            inner.last_success = Some(now);
            match inner.state {
                CircuitState::HalfOpen => {
                    inner.success_streak += 1;
                    if inner.success_streak >= self.config.success_threshold {
                        inner.state = CircuitState::Closed;
                        inner.failures.clear();
                        inner.success_streak = 0;
                    }
                }
                CircuitState::Closed => {
                    // A success in the closed state does not clear prior
                    // failures outside the window; `prune_window` handles
                    // window expiry on the next failure.
                }
                CircuitState::Open => {
                    // Shouldn't happen: `execute` rejects before calling `f`
                    // while open. Defensive no-op.
                }
            }
        } else {
            inner.last_failure = Some(now);
            match inner.state {
                CircuitState::HalfOpen => {
                    inner.state = CircuitState::Open;
                    inner.success_streak = 0;
                }
                CircuitState::Closed => {
                    inner.failures.push_back(now);
                    prune_window(&mut inner.failures, now, self.config.failure_window_ms);
                    if inner.failures.len() as u32 >= self.config.failure_threshold {
                        inner.state = CircuitState::Open;
                    }
                }
                CircuitState::Open => {}
            }
        }
    }

    /// Force `closed`, clearing failure history. Test-only hook.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.success_streak = 0;
    }

    /// Force `open` immediately, bypassing the failure-threshold count-up.
    /// Used at boot when a backing store is known unreachable up front
    /// (so `/health` reports `degraded` right away) as well as in tests.
    pub fn force_open(&self) {
        let mut inner = self.inner.write();
        inner.state = CircuitState::Open;
        inner.last_failure = Some(Utc::now());
    }

    pub fn stats(&self) -> CircuitStats {
        let now = Utc::now();
        let state = self.state_at(now);
        let inner = self.inner.read();
        CircuitStats {
            state,
            failure_count: inner.failures.len() as u32,
            success_streak: inner.success_streak,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            last_failure: inner.last_failure,
            last_success: inner.last_success,
        }
    }
}

fn prune_window(failures: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window_ms: u64) {
    while let Some(&oldest) = failures.front() {
        let age = (now - oldest).num_milliseconds().max(0) as u64;
        if age > window_ms {
            failures.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 5,
            reset_timeout_ms: 1_000,
            success_threshold: 2,
            failure_window_ms: 60_000,
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..5 {
            let _ = breaker
                .execute(|| async { Err::<(), _>(Error::Internal("boom".into())) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let result = breaker.execute(|| async { Ok::<_, Error>(()) }).await;
        assert!(matches!(result, Err(Error::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn half_open_after_reset_timeout_then_closes_on_successes() {
        let breaker = CircuitBreaker::new(config());
        let now = Utc::now();
        for i in 0..5 {
            breaker.record_at(false, now + chrono::Duration::milliseconds(i));
        }
        assert_eq!(breaker.state_at(now), CircuitState::Open);

        let later = now + chrono::Duration::milliseconds(1_001);
        assert_eq!(breaker.state_at(later), CircuitState::HalfOpen);

        breaker.record_at(true, later);
        assert_eq!(breaker.state_at(later), CircuitState::HalfOpen);
        breaker.record_at(true, later);
        assert_eq!(breaker.state_at(later), CircuitState::Closed);
    }

    #[tokio::test]
    async fn single_failure_in_half_open_reopens() {
        let breaker = CircuitBreaker::new(config());
        let now = Utc::now();
        for i in 0..5 {
            breaker.record_at(false, now + chrono::Duration::milliseconds(i));
        }
        let later = now + chrono::Duration::milliseconds(1_001);
        assert_eq!(breaker.state_at(later), CircuitState::HalfOpen);
        breaker.record_at(false, later);
        assert_eq!(breaker.state_at(later), CircuitState::Open);
    }

    #[test]
    fn force_open_and_reset_hooks() {
        let breaker = CircuitBreaker::new(config());
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn stats_track_rejected_and_total_calls() {
        let breaker = CircuitBreaker::new(config());
        breaker.force_open();
        let _ = breaker.execute(|| async { Ok::<_, Error>(()) }).await;
        let stats = breaker.stats();
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.rejected_calls, 1);
    }
}
