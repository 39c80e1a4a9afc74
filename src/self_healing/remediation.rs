//! The bounded remediation loop (spec §4.6): the only place automated
//! fixes may execute, and the only tool it may call is
//! `restart_channel(channel_id)`, itself routed through
//! [`super::SelfHealingController::admit_restart`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

use super::SelfHealingController;
use crate::errors::ChannelError;

const DEFAULT_STEP_BUDGET: u32 = 5;
const DEFAULT_WALL_CLOCK_BUDGET: Duration = Duration::from_secs(60);
const DEFAULT_TARGET_COOLDOWN: Duration = Duration::from_secs(5 * 60);
const SUSPEND_AFTER_WORSENING_ATTEMPTS: u32 = 3;
const SUSPEND_DURATION: Duration = Duration::from_secs(60 * 60);

struct TargetHistory {
    last_attempt: Instant,
    consecutive_worsening: u32,
    suspended_until: Option<Instant>,
}

/// One invocation of the bounded remediation loop against a single target
/// channel. A fresh `RemediationRun` is created per invocation; history
/// (cooldowns, suspensions) lives in [`RemediationLoop`] across runs.
pub struct RemediationLoop {
    controller: Arc<SelfHealingController>,
    bounded_agent_enabled: bool,
    history: Mutex<HashMap<i64, TargetHistory>>,
}

pub enum RemediationOutcome {
    Restarted,
    Skipped(&'static str),
    Suspended,
}

impl RemediationLoop {
    pub fn new(controller: Arc<SelfHealingController>, bounded_agent_enabled: bool) -> Self {
        Self {
            controller,
            bounded_agent_enabled,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Attempt to remediate `channel_id` via `restart`, the only tool
    /// permitted. `ratio_worsened` reports whether the most recent
    /// observation shows the failure ratio continuing to climb — three
    /// such reports in a row suspends the target for an hour.
    pub async fn attempt<F, Fut>(
        &self,
        channel_id: i64,
        confidence: f64,
        confidence_threshold: f64,
        ratio_worsened: bool,
        mut restart: F,
    ) -> RemediationOutcome
    where
        F: FnMut(i64) -> Fut,
        Fut: std::future::Future<Output = Result<(), ChannelError>>,
    {
        if !self.bounded_agent_enabled {
            return RemediationOutcome::Skipped("bounded_agent_disabled");
        }
        if self.controller.in_containment() {
            return RemediationOutcome::Skipped("containment_mode");
        }
        if confidence < confidence_threshold {
            return RemediationOutcome::Skipped("confidence_below_threshold");
        }

        {
            let mut history = self.history.lock().await;
            let entry = history.entry(channel_id).or_insert_with(|| TargetHistory {
                last_attempt: Instant::now() - DEFAULT_TARGET_COOLDOWN,
                consecutive_worsening: 0,
                suspended_until: None,
            });

            if let Some(until) = entry.suspended_until {
                if Instant::now() < until {
                    return RemediationOutcome::Skipped("target_suspended");
                }
                entry.suspended_until = None;
                entry.consecutive_worsening = 0;
            }

            if entry.last_attempt.elapsed() < DEFAULT_TARGET_COOLDOWN {
                return RemediationOutcome::Skipped("per_target_cooldown");
            }

            entry.last_attempt = Instant::now();

            if ratio_worsened {
                entry.consecutive_worsening += 1;
                if entry.consecutive_worsening >= SUSPEND_AFTER_WORSENING_ATTEMPTS {
                    entry.suspended_until = Some(Instant::now() + SUSPEND_DURATION);
                    warn!(channel_id, "remediation target suspended for 1h after repeated worsening");
                    return RemediationOutcome::Suspended;
                }
            } else {
                entry.consecutive_worsening = 0;
            }
        }

        // Single-step, single-tool remediation: request_channel_restart is
        // itself gated by the circuit breaker and storm throttle, so the
        // step/wall-clock budgets below bound the *loop* calling in, not
        // the restart's own admission checks.
        let deadline = Instant::now() + DEFAULT_WALL_CLOCK_BUDGET;
        for step in 1..=DEFAULT_STEP_BUDGET {
            if Instant::now() >= deadline {
                return RemediationOutcome::Skipped("wall_clock_budget_exhausted");
            }
            match restart(channel_id).await {
                Ok(()) => {
                    info!(channel_id, step, "remediation restart admitted");
                    return RemediationOutcome::Restarted;
                }
                Err(ChannelError::RestartStormThrottled) | Err(ChannelError::CircuitOpen(_)) => {
                    return RemediationOutcome::Skipped("restart_not_admitted");
                }
                Err(_) => continue,
            }
        }
        RemediationOutcome::Skipped("step_budget_exhausted")
    }
}

/// Metadata self-resolution subsystem: runs on a 5-minute cadence when
/// `metadata_failure_ratio > 0.2`. Recursion-guarded via `running` so an
/// overrunning cycle can't overlap itself, and otherwise subject to the
/// same containment/cooldown invariants as the rest of remediation.
pub struct MetadataSelfResolution {
    running: Mutex<bool>,
}

impl MetadataSelfResolution {
    pub fn new() -> Self {
        Self {
            running: Mutex::new(false),
        }
    }

    pub async fn maybe_run<F, Fut>(&self, metadata_failure_ratio: f64, resolve: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        if metadata_failure_ratio <= 0.2 {
            return;
        }
        let mut running = self.running.lock().await;
        if *running {
            return;
        }
        *running = true;
        drop(running);

        resolve().await;

        *self.running.lock().await = false;
    }
}

impl Default for MetadataSelfResolution {
    fn default() -> Self {
        Self::new()
    }
}
