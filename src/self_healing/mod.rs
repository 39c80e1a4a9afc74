//! The Self-Healing Controller (spec §4.6): per-channel circuit breakers,
//! the global restart-storm throttle, containment mode, and the bounded
//! remediation loop. Every restart path funnels through
//! [`SelfHealingController::admit_restart`] — this module never spawns or
//! kills a process itself; it only decides whether the Channel Manager is
//! allowed to.

pub mod circuit_breaker;
pub mod remediation;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::SelfHealingConfig;
use crate::errors::ChannelError;
use crate::models::CircuitState;
use circuit_breaker::ChannelCircuitBreaker;

pub struct SelfHealingController {
    config: SelfHealingConfig,
    breakers: RwLock<HashMap<i64, ChannelCircuitBreaker>>,
    restart_timestamps: Mutex<VecDeque<Instant>>,
    last_restart_by_channel: RwLock<HashMap<i64, Instant>>,
    containment: AtomicBool,
    containment_entered_at: RwLock<Option<Instant>>,
    storm_active_since: RwLock<Option<Instant>>,
    pool_pressure_high_since: RwLock<Option<Instant>>,
}

impl SelfHealingController {
    pub fn new(config: SelfHealingConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            breakers: RwLock::new(HashMap::new()),
            restart_timestamps: Mutex::new(VecDeque::new()),
            last_restart_by_channel: RwLock::new(HashMap::new()),
            containment: AtomicBool::new(false),
            containment_entered_at: RwLock::new(None),
            storm_active_since: RwLock::new(None),
            pool_pressure_high_since: RwLock::new(None),
        })
    }

    pub fn in_containment(&self) -> bool {
        self.containment.load(Ordering::SeqCst)
    }

    pub async fn circuit_state(&self, channel_id: i64) -> CircuitState {
        let breakers = self.breakers.read().await;
        breakers
            .get(&channel_id)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// The only gate a restart request passes through. Returns `Ok(())`
    /// when the Channel Manager may proceed to stop/start the channel.
    pub async fn admit_restart(&self, channel_id: i64) -> Result<(), ChannelError> {
        if self.in_containment() {
            return Err(ChannelError::RestartStormThrottled);
        }

        {
            let last_restart = self.last_restart_by_channel.read().await;
            if let Some(last) = last_restart.get(&channel_id) {
                if last.elapsed() < self.config.per_channel_restart_cooldown {
                    return Err(ChannelError::CircuitOpen(channel_id));
                }
            }
        }

        {
            let mut breakers = self.breakers.write().await;
            let breaker = breakers.entry(channel_id).or_insert_with(|| {
                ChannelCircuitBreaker::new(
                    self.config.breaker_failure_threshold,
                    self.config.breaker_window,
                    self.config.breaker_cooldown,
                )
            });
            if !breaker.allow_restart() {
                return Err(ChannelError::CircuitOpen(channel_id));
            }
        }

        self.check_restart_storm().await?;

        self.last_restart_by_channel
            .write()
            .await
            .insert(channel_id, Instant::now());

        Ok(())
    }

    async fn check_restart_storm(&self) -> Result<(), ChannelError> {
        let mut timestamps = self.restart_timestamps.lock().await;
        let now = Instant::now();
        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) > self.config.restart_storm_window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() as u32 >= self.config.restart_storm_limit {
            let mut since = self.storm_active_since.write().await;
            let started = *since.get_or_insert(now);
            if now.duration_since(started) >= Duration::from_secs(120) {
                self.enter_containment("restart storm active >= 120s").await;
            }
            return Err(ChannelError::RestartStormThrottled);
        }

        *self.storm_active_since.write().await = None;
        timestamps.push_back(now);
        Ok(())
    }

    /// Call on a timer with the current pool pressure (`in_use / capacity`)
    /// so sustained pressure >= 0.9 for 60s can trip containment mode.
    pub async fn observe_pool_pressure(&self, pressure: f64) {
        let mut since = self.pool_pressure_high_since.write().await;
        if pressure >= 0.9 {
            let started = *since.get_or_insert_with(Instant::now);
            if started.elapsed() >= Duration::from_secs(60) {
                self.enter_containment("pool pressure >= 0.9 sustained 60s").await;
            }
        } else {
            *since = None;
        }
    }

    pub async fn enter_containment(&self, reason: &str) {
        if !self.containment.swap(true, Ordering::SeqCst) {
            warn!(reason, "entering containment mode");
            *self.containment_entered_at.write().await = Some(Instant::now());
        }
    }

    /// Manual admin override — the only way out of containment besides the
    /// triggering condition clearing on its own.
    pub async fn clear_containment(&self) {
        if self.containment.swap(false, Ordering::SeqCst) {
            info!("containment mode cleared");
            *self.containment_entered_at.write().await = None;
        }
    }

    pub async fn record_restart_outcome(&self, channel_id: i64, success: bool) {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers.entry(channel_id).or_insert_with(|| {
            ChannelCircuitBreaker::new(
                self.config.breaker_failure_threshold,
                self.config.breaker_window,
                self.config.breaker_cooldown,
            )
        });
        if success {
            breaker.record_success();
        } else {
            breaker.record_failure();
        }
    }
}
