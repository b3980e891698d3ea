use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use strum::Display;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-dependency breaker sensitivity.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls before allowing a probe.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
    probe_started: Option<Instant>,
    total_successes: u64,
    total_failures: u64,
}

/// Point-in-time view of a breaker for stats and health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub total_successes: u64,
    pub total_failures: u64,
}

/// Failure tracker guarding one external dependency.
///
/// `closed --threshold failures--> open --cooldown--> half_open`, then the single
/// probe's outcome closes it again or re-opens it with a fresh cooldown.
/// All transitions happen under one lock, so concurrent callers cannot lose updates.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                opened_at: None,
                probe_started: None,
                total_successes: 0,
                total_failures: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a call may go through. `false` means skip the dependency entirely.
    ///
    /// A half-open probe that has not reported within one cooldown counts as
    /// failed and re-opens the breaker.
    pub fn allow(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => {
                let stale = inner
                    .probe_started
                    .map_or(true, |started| started.elapsed() >= self.config.cooldown);
                if stale {
                    tracing::warn!(dependency = %self.name, "Half-open probe never reported");
                    inner.total_failures += 1;
                    inner.failure_count += 1;
                    self.trip(&mut inner);
                }
                false
            }
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .map_or(true, |opened| opened.elapsed() >= self.config.cooldown);
                if cooled {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_started = Some(Instant::now());
                    tracing::info!(dependency = %self.name, "Circuit half-open, allowing probe");
                }
                cooled
            }
        }
    }

    /// Like [`CircuitBreaker::allow`], but the returned permit records a
    /// failure if it is dropped without an outcome (cancelled or unwound call).
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        self.allow().then(|| CallPermit {
            breaker: self,
            settled: false,
        })
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.total_successes += 1;
        match inner.state {
            BreakerState::Closed => inner.failure_count = 0,
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                inner.opened_at = None;
                inner.probe_started = None;
                tracing::info!(dependency = %self.name, "Circuit closed after successful probe");
            }
            // Late result from a call admitted before the breaker opened.
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.total_failures += 1;
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.trip(&mut inner);
                }
            }
            BreakerState::HalfOpen => {
                inner.failure_count += 1;
                self.trip(&mut inner);
            }
            BreakerState::Open => {}
        }
    }

    fn trip(&self, inner: &mut BreakerInner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probe_started = None;
        metrics::counter!("circuit_breaker_open_total", "dependency" => self.name.clone())
            .increment(1);
        tracing::warn!(
            dependency = %self.name,
            failure_count = inner.failure_count,
            cooldown_ms = self.config.cooldown.as_millis() as u64,
            "Circuit opened"
        );
    }

    /// Current state, without triggering the open -> half-open transition.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
        }
    }
}

/// One admitted call. Report its outcome with `success` or `failure`.
#[must_use = "dropping a permit records a failure"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(dependency = %self.breaker.name, "Call abandoned without an outcome");
            self.breaker.record_failure();
        }
    }
}
