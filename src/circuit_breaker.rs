// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Circuit Breaker Pattern
 * Stops hammering a failing I/O path until it recovers
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Three-state breaker guarding a single operation. State reads are
/// lock-free; transitions take a short critical section.
pub struct CircuitBreaker {
    state: AtomicU8,
    failures: AtomicU32,
    successes: AtomicU32,
    // Nanoseconds since `epoch`; negative means no failure yet.
    last_failure_ns: AtomicI64,
    epoch: Instant,

    threshold: u32,
    cooldown: Duration,
    half_open_successes: u32,
    transition: Mutex<()>,
}

impl CircuitBreaker {
    /// `threshold`: consecutive failures before opening. `cooldown`: time in
    /// the open state before a probe is allowed. `half_open_successes`:
    /// successes required to close again.
    pub fn new(threshold: u32, cooldown: Duration, half_open_successes: u32) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            failures: AtomicU32::new(0),
            successes: AtomicU32::new(0),
            last_failure_ns: AtomicI64::new(-1),
            epoch: Instant::now(),
            threshold: if threshold == 0 { 10 } else { threshold },
            cooldown: if cooldown.is_zero() { Duration::from_secs(30) } else { cooldown },
            half_open_successes: if half_open_successes == 0 { 3 } else { half_open_successes },
            transition: Mutex::new(()),
        }
    }

    /// Whether a call may proceed right now. An open breaker whose cooldown
    /// has elapsed transitions to half-open here.
    pub fn allow(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let last = self.last_failure_ns.load(Ordering::Acquire);
                if last < 0 {
                    return false;
                }
                let elapsed = self.epoch.elapsed().as_nanos() as i64 - last;
                if elapsed < self.cooldown.as_nanos() as i64 {
                    return false;
                }

                let _guard = self.transition.lock().expect("breaker lock poisoned");
                if self.state() == CircuitState::Open {
                    debug!("circuit breaker transitioning to half-open");
                    self.successes.store(0, Ordering::Release);
                    self.state.store(CircuitState::HalfOpen as u8, Ordering::Release);
                }
                true
            }
        }
    }

    /// Record the outcome of a call that was allowed through
    pub fn record(&self, success: bool) {
        let _guard = self.transition.lock().expect("breaker lock poisoned");
        let state = self.state();

        if success {
            match state {
                CircuitState::Closed => {
                    self.failures.store(0, Ordering::Release);
                }
                CircuitState::HalfOpen => {
                    let successes = self.successes.fetch_add(1, Ordering::AcqRel) + 1;
                    if successes >= self.half_open_successes {
                        debug!(successes, "circuit breaker closing");
                        self.failures.store(0, Ordering::Release);
                        self.successes.store(0, Ordering::Release);
                        self.state.store(CircuitState::Closed as u8, Ordering::Release);
                    }
                }
                CircuitState::Open => {}
            }
            return;
        }

        self.last_failure_ns
            .store(self.epoch.elapsed().as_nanos() as i64, Ordering::Release);

        match state {
            CircuitState::Closed => {
                let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.threshold {
                    warn!(failures, "circuit breaker opening");
                    self.failures.store(0, Ordering::Release);
                    self.state.store(CircuitState::Open as u8, Ordering::Release);
                }
            }
            CircuitState::HalfOpen => {
                warn!("circuit breaker reopening after half-open failure");
                self.successes.store(0, Ordering::Release);
                self.state.store(CircuitState::Open as u8, Ordering::Release);
            }
            CircuitState::Open => {}
        }
    }

    /// Run `op` under the breaker. Returns `None` when short-circuited.
    pub fn execute<T, E>(&self, op: impl FnOnce() -> Result<T, E>) -> Option<Result<T, E>> {
        if !self.allow() {
            return None;
        }
        let result = op();
        self.record(result.is_ok());
        Some(result)
    }

    /// Lock-free state read
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// Force the breaker back to closed
    pub fn reset(&self) {
        let _guard = self.transition.lock().expect("breaker lock poisoned");
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        self.failures.store(0, Ordering::Release);
        self.successes.store(0, Ordering::Release);
    }
}
