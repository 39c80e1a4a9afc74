//! Bounded concurrent ffmpeg process pool with token-bucket admission.
//!
//! Generalizes `services/connection_limiter.rs`'s counting-semaphore +
//! RAII-release shape (there: per-proxy/per-channel connection caps; here:
//! total concurrent ffmpeg processes) into the spec's priority-aware
//! `acquire(priority)` with bounded retry and exponential backoff. The
//! acquire loop is written iteratively, never recursively, and is
//! cancel-safe (every await point is inside the caller's own
//! `tokio::select!`), per spec §4.4's explicit requirement.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use crate::errors::FfmpegError;
use crate::utils::jitter::generate_jitter_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AcquirePriority {
    Background,
    Normal,
    Interactive,
}

/// RAII guard releasing its pool slot on drop, mirroring the teacher's
/// `ConnectionHandle`.
pub struct PoolSlot {
    pool: Arc<ProcessPoolInner>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ProcessPoolInner {
    semaphore: Arc<Semaphore>,
    in_use: AtomicU32,
}

#[derive(Clone)]
pub struct ProcessPool {
    inner: Arc<ProcessPoolInner>,
    capacity: u32,
    timeout: Duration,
    max_attempts: u32,
    backoff_cap: Duration,
}

impl ProcessPool {
    pub fn new(capacity: u32, timeout: Duration, max_attempts: u32, backoff_cap: Duration) -> Self {
        Self {
            inner: Arc::new(ProcessPoolInner {
                semaphore: Arc::new(Semaphore::new(capacity as usize)),
                in_use: AtomicU32::new(0),
            }),
            capacity,
            timeout,
            max_attempts,
            backoff_cap,
        }
    }

    pub fn in_use(&self) -> u32 {
        self.inner.in_use.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Fraction of capacity currently in use, fed to
    /// [`crate::self_healing::SelfHealingController::observe_pool_pressure`].
    pub fn pressure(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.in_use() as f64 / self.capacity as f64
    }

    /// Acquire a slot, retrying `AcquireTimeout`/`CapacityExceeded` up to
    /// `max_attempts` times with backoff `min(2^attempt, backoff_cap)`.
    /// Cancellation-safe: callers race this future against their own
    /// cancellation token with `tokio::select!`.
    ///
    /// `tokio::sync::Semaphore` grants permits FIFO; a low-priority waiter
    /// parked ahead of a higher-priority one in that queue would otherwise
    /// block it until its own wait resolves. `Background` acquires race a
    /// single short-lived attempt against the semaphore instead of the full
    /// timeout/backoff cycle, so speculative work (prewarm) drops out of the
    /// queue quickly and never holds up an `Interactive` viewer request
    /// behind it.
    pub async fn acquire(&self, priority: AcquirePriority) -> Result<PoolSlot, FfmpegError> {
        let (timeout, max_attempts) = match priority {
            AcquirePriority::Background => (self.timeout.min(Duration::from_secs(2)), 1),
            AcquirePriority::Normal | AcquirePriority::Interactive => {
                (self.timeout, self.max_attempts)
            }
        };
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match tokio::time::timeout(timeout, self.inner.semaphore.clone().acquire_owned()).await {
                Ok(Ok(permit)) => {
                    self.inner.in_use.fetch_add(1, Ordering::SeqCst);
                    return Ok(PoolSlot {
                        pool: self.inner.clone(),
                        _permit: permit,
                    });
                }
                Ok(Err(_closed)) => {
                    return Err(FfmpegError::AcquireTimeout {
                        waited_secs: timeout.as_secs(),
                    });
                }
                Err(_elapsed) => {
                    if attempt >= max_attempts {
                        return Err(FfmpegError::AcquireTimeout {
                            waited_secs: timeout.as_secs() * attempt as u64,
                        });
                    }
                    let base_backoff = Duration::from_secs(2u64.saturating_pow(attempt))
                        .min(self.backoff_cap);
                    let backoff = base_backoff + Duration::from_millis(generate_jitter_ms(250));
                    warn!(attempt, backoff_ms = backoff.as_millis(), "pool acquire timed out, retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
