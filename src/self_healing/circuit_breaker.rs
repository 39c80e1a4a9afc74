//! Per-channel circuit breaker with sliding-window failure counting.
//!
//! Adapted from `utils/circuit_breaker_simple.rs`'s CLOSED/OPEN/HALF_OPEN
//! state machine: the teacher counts *consecutive* failures, but spec §4.6
//! requires a sliding 300s window count instead, so failures are recorded
//! as timestamps and the window is swept on each check rather than tracked
//! with a single counter.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::models::CircuitState;

pub struct ChannelCircuitBreaker {
    state: CircuitState,
    /// Timestamps of failures within the last `window`.
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    window: Duration,
    failure_threshold: u32,
    cooldown: Duration,
}

impl ChannelCircuitBreaker {
    pub fn new(failure_threshold: u32, window: Duration, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            window,
            failure_threshold,
            cooldown,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Call before attempting a restart; transitions OPEN → HALF_OPEN once
    /// the cooldown has elapsed, mirroring `should_allow_request`.
    pub fn allow_restart(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if let Some(opened_at) = self.opened_at {
                    if opened_at.elapsed() >= self.cooldown {
                        info!("circuit breaker transitioning Open -> HalfOpen");
                        self.state = CircuitState::HalfOpen;
                        true
                    } else {
                        false
                    }
                } else {
                    false
                }
            }
        }
    }

    fn sweep(&mut self, now: Instant) {
        while let Some(&front) = self.failures.front() {
            if now.duration_since(front) > self.window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state == CircuitState::HalfOpen {
            info!("circuit breaker transitioning HalfOpen -> Closed");
            self.state = CircuitState::Closed;
            self.failures.clear();
            self.opened_at = None;
        }
    }

    pub fn record_failure(&mut self) {
        let now = Instant::now();
        self.sweep(now);
        self.failures.push_back(now);

        match self.state {
            CircuitState::HalfOpen => {
                warn!("circuit breaker returning HalfOpen -> Open after failed trial restart");
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
            }
            CircuitState::Closed => {
                if self.failures.len() as u32 >= self.failure_threshold {
                    warn!(
                        failures = self.failures.len(),
                        window_secs = self.window.as_secs(),
                        "circuit breaker opening"
                    );
                    self.state = CircuitState::Open;
                    self.opened_at = Some(now);
                }
            }
            CircuitState::Open => {
                self.opened_at = Some(now);
            }
        }
    }
}
