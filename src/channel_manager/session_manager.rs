//! Per-channel session bookkeeping: who's tuned in, for how long, how much
//! data they've been sent.
//!
//! Grounded on the teacher's `SessionTracker`/`SessionStats`
//! (`proxy/session_tracker.rs`): a `RwLock<HashMap<id, Stats>>` plus a
//! periodic stats-summary task. Bytes/session-id bookkeeping is kept; the
//! proxy-specific fields (`proxy_id`, `upstream_url`, `connection_attempts`)
//! are dropped since this domain has no upstream-proxy concept, and session
//! teardown is now driven by an RAII guard (mirroring
//! `services/connection_limiter.rs`'s `ConnectionHandle`) instead of an
//! explicit `end_session` call, so a dropped client connection always frees
//! its slot even on an unclean disconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;

use crate::models::Session;
use crate::utils::format_duration;

pub struct ChannelSessionManager {
    sessions: RwLock<HashMap<u64, Session>>,
    next_id: AtomicU64,
}

/// Releases its session entry on drop, so a client that vanishes mid-stream
/// (socket reset, no clean EOF) still gets reaped.
pub struct SessionGuard {
    manager: Arc<ChannelSessionManager>,
    pub id: u64,
}

impl SessionGuard {
    pub async fn record_bytes(&self, n: u64) {
        self.manager.record_bytes(self.id, n).await;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let manager = self.manager.clone();
        let id = self.id;
        tokio::spawn(async move {
            manager.end(id).await;
        });
    }
}

impl ChannelSessionManager {
    pub fn new() -> Arc<Self> {
        let manager = Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        });
        manager.clone().start_stats_reporter();
        manager
    }

    pub async fn register(self: &Arc<Self>, channel_id: i64, client_addr: String) -> SessionGuard {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Session {
            id,
            channel_id,
            started_at: Utc::now(),
            client_addr,
            bytes_sent: 0,
        };
        self.sessions.write().await.insert(id, session);
        SessionGuard {
            manager: self.clone(),
            id,
        }
    }

    pub async fn record_bytes(&self, id: u64, n: u64) {
        if let Some(session) = self.sessions.write().await.get_mut(&id) {
            session.bytes_sent += n;
        }
    }

    pub async fn end(&self, id: u64) -> Option<Session> {
        let session = self.sessions.write().await.remove(&id);
        if let Some(session) = &session {
            let duration_ms = (Utc::now() - session.started_at).num_milliseconds().max(0) as u64;
            info!(
                session_id = session.id,
                channel_id = session.channel_id,
                bytes_sent = session.bytes_sent,
                duration = %format_duration(duration_ms),
                "session ended"
            );
        }
        session
    }

    pub async fn sessions_for(&self, channel_id: i64) -> Vec<Session> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.channel_id == channel_id)
            .cloned()
            .collect()
    }

    pub async fn count_for(&self, channel_id: i64) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.channel_id == channel_id)
            .count()
    }

    fn start_stats_reporter(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let sessions = self.sessions.read().await;
                if sessions.is_empty() {
                    continue;
                }
                let total_bytes: u64 = sessions.values().map(|s| s.bytes_sent).sum();
                let mut per_channel: HashMap<i64, usize> = HashMap::new();
                for s in sessions.values() {
                    *per_channel.entry(s.channel_id).or_insert(0) += 1;
                }
                info!(
                    active_sessions = sessions.len(),
                    total_bytes_sent = total_bytes,
                    active_channels = per_channel.len(),
                    "session summary"
                );
            }
        });
    }
}
