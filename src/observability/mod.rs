//! Observability: a `prometheus`-backed metrics registry plus a structured
//! log-fanout ring buffer (spec §7), both process-wide singletons handed to
//! every component that needs to record a signal.
//!
//! The metrics half replaces the teacher's OpenTelemetry/OTLP meter
//! provider — this domain has no external collector to export to, and the
//! spec's `/metrics` surface is plain Prometheus text, so `prometheus`'s own
//! `TextEncoder` is a closer fit than bridging OTLP through it. The log
//! fanout half adapts `utils::log_capture::LogCaptureLayer`'s
//! `tracing_subscriber::Layer` shape: broadcasting to SSE subscribers is
//! replaced with appending to a bounded ring (`VecDeque`, capacity
//! `DEFAULT_LOG_RING_CAPACITY`) that the Self-Healing Controller and
//! `/metrics` derivations can read back.

use std::collections::VecDeque;
use std::sync::Arc;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use tokio::sync::RwLock;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// One entry in the log ring: just enough to drive self-healing's
/// pattern-history judgments and to show up in `/metrics` derivations,
/// without re-deriving a full tracing `Event` snapshot.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
    pub channel_id: Option<i64>,
    pub session_id: Option<u64>,
}

/// Bounded, in-process ring of recent log events, keyed loosely by
/// channel/session (spec §7: "every error event is published to an
/// in-process ring buffer... consumable by the Self-Healing Controller").
pub struct LogRing {
    capacity: usize,
    records: RwLock<VecDeque<LogRecord>>,
}

impl LogRing {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            records: RwLock::new(VecDeque::with_capacity(capacity)),
        })
    }

    async fn push(&self, record: LogRecord) {
        let mut records = self.records.write().await;
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub async fn recent(&self, limit: usize) -> Vec<LogRecord> {
        let records = self.records.read().await;
        records.iter().rev().take(limit).cloned().collect()
    }

    pub async fn for_channel(&self, channel_id: i64, limit: usize) -> Vec<LogRecord> {
        let records = self.records.read().await;
        records
            .iter()
            .rev()
            .filter(|r| r.channel_id == Some(channel_id))
            .take(limit)
            .cloned()
            .collect()
    }
}

/// A `tracing_subscriber::Layer` that appends every event to a [`LogRing`].
/// Install alongside the usual fmt/json layer in `main.rs`; this layer
/// never writes to stdout itself.
pub struct LogRingLayer {
    ring: Arc<LogRing>,
}

impl LogRingLayer {
    pub fn new(ring: Arc<LogRing>) -> Self {
        Self { ring }
    }
}

impl<S: Subscriber> Layer<S> for LogRingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let record = LogRecord {
            timestamp: chrono::Utc::now(),
            level: event.metadata().level().to_string(),
            target: event.metadata().target().to_string(),
            message: visitor
                .message
                .unwrap_or_else(|| event.metadata().name().to_string()),
            channel_id: visitor.channel_id,
            session_id: visitor.session_id,
        };

        let ring = self.ring.clone();
        tokio::spawn(async move { ring.push(record).await });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    channel_id: Option<i64>,
    session_id: Option<u64>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        if field.name() == "channel_id" {
            self.channel_id = Some(value);
        }
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        if field.name() == "session_id" {
            self.session_id = Some(value);
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        }
    }
}

/// The metrics named in spec §6, registered once at startup and handed out
/// by reference to every component that updates one.
pub struct Metrics {
    registry: Registry,
    pub pool_acquisition_latency_seconds: Histogram,
    pub ffmpeg_spawn_timeout_total: IntCounter,
    pub restart_rate_per_minute: IntCounter,
    pub health_timeouts_total: IntCounter,
    pub playout_rebuild_total: IntCounter,
    pub circuit_breaker_state: IntGaugeVec,
    pub metadata_failure_ratio: prometheus::Gauge,
    pub active_sessions: IntGauge,
    pub active_channels: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Arc<Self>> {
        let registry = Registry::new();

        let pool_acquisition_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "exstreamtv_pool_acquisition_latency_seconds",
            "Time spent waiting for a process pool slot",
        ))?;
        let ffmpeg_spawn_timeout_total = IntCounter::new(
            "exstreamtv_ffmpeg_spawn_timeout_total",
            "ffmpeg process spawns that exhausted the pool acquire budget",
        )?;
        let restart_rate_per_minute = IntCounter::new(
            "exstreamtv_restart_rate_per_minute",
            "Channel restarts admitted by the self-healing controller",
        )?;
        let health_timeouts_total = IntCounter::new(
            "exstreamtv_health_timeouts_total",
            "Per-process health sample deadlines that were missed",
        )?;
        let playout_rebuild_total = IntCounter::new(
            "exstreamtv_playout_rebuild_total",
            "Playout timelines rebuilt from anchor state",
        )?;
        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "exstreamtv_circuit_breaker_state",
                "Per-channel circuit breaker state (0=closed,1=half_open,2=open)",
            ),
            &["channel_id"],
        )?;
        let metadata_failure_ratio = prometheus::Gauge::new(
            "exstreamtv_metadata_failure_ratio",
            "Fraction of recent metadata lookups that failed",
        )?;
        let active_sessions = IntGauge::new(
            "exstreamtv_active_sessions",
            "Currently attached client sessions across all channels",
        )?;
        let active_channels = IntGauge::new(
            "exstreamtv_active_channels",
            "Channels with a running playout loop",
        )?;

        registry.register(Box::new(pool_acquisition_latency_seconds.clone()))?;
        registry.register(Box::new(ffmpeg_spawn_timeout_total.clone()))?;
        registry.register(Box::new(restart_rate_per_minute.clone()))?;
        registry.register(Box::new(health_timeouts_total.clone()))?;
        registry.register(Box::new(playout_rebuild_total.clone()))?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;
        registry.register(Box::new(metadata_failure_ratio.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(active_channels.clone()))?;

        Ok(Arc::new(Self {
            registry,
            pool_acquisition_latency_seconds,
            ffmpeg_spawn_timeout_total,
            restart_rate_per_minute,
            health_timeouts_total,
            playout_rebuild_total,
            circuit_breaker_state,
            metadata_failure_ratio,
            active_sessions,
            active_channels,
        }))
    }

    /// Render the registry as Prometheus text exposition format for
    /// `GET /metrics`.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        if encoder.encode(&families, &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }

    pub fn set_circuit_state(&self, channel_id: i64, state: crate::models::CircuitState) {
        let value = match state {
            crate::models::CircuitState::Closed => 0,
            crate::models::CircuitState::HalfOpen => 1,
            crate::models::CircuitState::Open => 2,
        };
        self.circuit_breaker_state
            .with_label_values(&[&channel_id.to_string()])
            .set(value);
    }
}
