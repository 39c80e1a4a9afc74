//! HDHomeRun / IPTV Frontend (spec §4.5, §6): thin `axum` handlers that
//! delegate to the Channel Manager, EPG Generator, and Config Store rather
//! than holding any logic themselves.
//!
//! Grounded on the teacher's `web/mod.rs` (thin handlers over an injected
//! service layer, `tower_http::cors`/`trace` layering) generalized from a
//! REST CRUD surface over sources/proxies/filters down to the handful of
//! endpoints a tuner emulator and IPTV client actually hit.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::catalog::SharedCatalog;
use crate::channel_manager::{next_chunk, ChannelManager, StreamHandle};
use crate::config::{Config, ConfigStore};
use crate::epg::EpgGenerator;
use crate::errors::ChannelError;
use crate::models::CircuitState;
use crate::observability::Metrics;
use crate::self_healing::SelfHealingController;

#[derive(Clone)]
pub struct AppState {
    pub catalog: SharedCatalog,
    pub channels: Arc<ChannelManager>,
    pub epg: Arc<EpgGenerator>,
    pub config: Arc<ConfigStore>,
    pub metrics: Arc<Metrics>,
    pub self_healing: Arc<SelfHealingController>,
}

pub struct WebServer {
    router: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(state: AppState, addr: SocketAddr) -> Self {
        Self { router: build_router(state), addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn serve(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, "web frontend listening");
        axum::serve(
            listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
        Ok(())
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/hdhomerun/discover.json", get(discover))
        .route("/hdhomerun/lineup.json", get(lineup))
        .route("/hdhomerun/lineup_status.json", get(lineup_status))
        .route("/hdhomerun/{tuner}/stream", get(tuner_stream))
        .route("/iptv/channel/{file}", get(iptv_channel))
        .route("/iptv/channels.m3u", get(channels_m3u))
        .route("/iptv/xmltv.xml", get(xmltv))
        .route(
            "/discover.json",
            get(|| async { Redirect::temporary("/hdhomerun/discover.json") }),
        )
        .route(
            "/lineup.json",
            get(|| async { Redirect::temporary("/hdhomerun/lineup.json") }),
        )
        .route(
            "/lineup_status.json",
            get(|| async { Redirect::temporary("/hdhomerun/lineup_status.json") }),
        )
        .route("/config", get(get_config).put(put_config))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn base_url(cfg: &Config) -> String {
    cfg.server
        .base_url
        .clone()
        .unwrap_or_else(|| format!("http://{}:{}", cfg.server.host, cfg.server.port))
}

async fn discover(State(state): State<AppState>) -> impl IntoResponse {
    let cfg = state.config.current().await;
    let base = base_url(&cfg);
    Json(json!({
        "FriendlyName": cfg.streaming.friendly_name,
        "ModelNumber": "HDTC-2US",
        "FirmwareName": "hdhomeruntc_atsc",
        "FirmwareVersion": env!("CARGO_PKG_VERSION"),
        "DeviceID": cfg.streaming.device_id,
        "DeviceAuth": "",
        "BaseURL": base,
        "LineupURL": format!("{base}/hdhomerun/lineup.json"),
        "TunerCount": cfg.streaming.tuner_count,
    }))
}

async fn lineup(State(state): State<AppState>) -> Response {
    let cfg = state.config.current().await;
    let base = base_url(&cfg);
    let channels = match state.catalog.list_channels().await {
        Ok(c) => c,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    let entries: Vec<_> = channels
        .into_iter()
        .filter(|c| c.enabled)
        .map(|c| {
            json!({
                "GuideNumber": c.number,
                "GuideName": c.name,
                "URL": format!("{base}/iptv/channel/{}.ts", c.number),
                "HD": 1,
            })
        })
        .collect();
    Json(entries).into_response()
}

async fn lineup_status() -> impl IntoResponse {
    Json(json!({
        "ScanInProgress": 0,
        "ScanPossible": 0,
        "Source": "Cable",
        "SourceList": ["Cable"],
    }))
}

#[derive(Deserialize)]
struct TunerStreamQuery {
    channel: Option<String>,
    url: Option<String>,
}

/// Channels are addressed as `auto:v{number}` (HDHomeRun tuner convention,
/// spec §6); fall back to a bare number for direct `url=` callers.
fn parse_channel_param(raw: &str) -> String {
    raw.strip_prefix("auto:v")
        .or_else(|| raw.strip_prefix("auto:"))
        .unwrap_or(raw)
        .to_string()
}

async fn tuner_stream(
    State(state): State<AppState>,
    Path(_tuner): Path<String>,
    Query(q): Query<TunerStreamQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let Some(raw) = q.channel.as_deref().or(q.url.as_deref()) else {
        return (StatusCode::BAD_REQUEST, "missing channel parameter").into_response();
    };
    let number = parse_channel_param(raw);
    stream_channel_by_number(&state, &number, addr.to_string()).await
}

async fn iptv_channel(
    State(state): State<AppState>,
    Path(file): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    if let Some(number) = file.strip_suffix(".m3u8") {
        return hls_playlist(&state, number).await;
    }
    let Some(number) = file.strip_suffix(".ts") else {
        return (StatusCode::NOT_FOUND, "unsupported file extension").into_response();
    };
    stream_channel_by_number(&state, number, addr.to_string()).await
}

async fn stream_channel_by_number(state: &AppState, number: &str, client_addr: String) -> Response {
    let channel = match state.catalog.get_channel_by_number(number).await {
        Ok(c) if c.enabled => c,
        Ok(_) => return (StatusCode::NOT_FOUND, "channel disabled").into_response(),
        Err(_) => return (StatusCode::NOT_FOUND, "channel not found").into_response(),
    };

    let already_running = state.channels.active_channels().await.contains(&channel.id);
    if !already_running {
        if state.self_healing.in_containment() {
            return retry_after_response(30);
        }
        if state.self_healing.circuit_state(channel.id).await == CircuitState::Open {
            return retry_after_response(30);
        }
    }

    match state.channels.get_stream(channel.id, client_addr).await {
        Ok(handle) => stream_response(handle),
        Err(ChannelError::CircuitOpen(_)) | Err(ChannelError::RestartStormThrottled) => {
            retry_after_response(30)
        }
        Err(e) => {
            tracing::warn!(channel_id = channel.id, error = %e, "tuner stream request failed");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

async fn hls_playlist(state: &AppState, number: &str) -> Response {
    match state.catalog.get_channel_by_number(number).await {
        Ok(channel) if channel.enabled => {
            let cfg = state.config.current().await;
            let base = base_url(&cfg);
            let body = format!(
                "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-STREAM-INF:BANDWIDTH=5000000\n{base}/iptv/channel/{}.ts\n",
                channel.number
            );
            ([(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")], body).into_response()
        }
        _ => (StatusCode::NOT_FOUND, "channel not found").into_response(),
    }
}

fn retry_after_response(secs: u64) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::RETRY_AFTER, secs.to_string())],
        "service is in containment, retry later",
    )
        .into_response()
}

fn stream_response(handle: StreamHandle) -> Response {
    let StreamHandle { rx, session } = handle;
    let body_stream = stream::unfold((rx, session), |(mut rx, session)| async move {
        match next_chunk(&mut rx, session.id).await {
            Ok(bytes) => {
                session.record_bytes(bytes.len() as u64).await;
                Some((Ok::<_, std::io::Error>(bytes), (rx, session)))
            }
            Err(_) => None,
        }
    });
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp2t")
        .header(header::TRANSFER_ENCODING, "chunked")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(body_stream))
        .expect("static headers are always valid")
}

async fn channels_m3u(State(state): State<AppState>) -> Response {
    let cfg = state.config.current().await;
    let base = base_url(&cfg);
    let channels = match state.catalog.list_channels().await {
        Ok(c) => c,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let mut body = String::from("#EXTM3U\n");
    for channel in channels.into_iter().filter(|c| c.enabled) {
        let logo = channel.logo_url.as_deref().unwrap_or("");
        let group = channel.group.as_deref().unwrap_or("");
        body.push_str(&format!(
            "#EXTINF:-1 tvg-id=\"exstream-{id}\" tvg-name=\"{name}\" tvg-logo=\"{logo}\" group-title=\"{group}\",{name}\n{base}/iptv/channel/{number}.ts\n",
            id = channel.id,
            name = channel.name,
            number = channel.number,
        ));
    }
    ([(header::CONTENT_TYPE, "audio/x-mpegurl")], body).into_response()
}

async fn xmltv(State(state): State<AppState>) -> Response {
    match state.epg.build(None).await {
        Ok(xml) => ([(header::CONTENT_TYPE, "application/xml")], xml).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "xmltv generation failed");
            retry_after_response(60)
        }
    }
}

async fn get_config(State(state): State<AppState>) -> Json<Config> {
    Json(state.config.current().await)
}

async fn put_config(State(state): State<AppState>, Json(new_config): Json<Config>) -> Response {
    match state.config.update(|cfg| *cfg = new_config.clone()).await {
        Ok(cfg) => Json(cfg).into_response(),
        Err(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response(),
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
