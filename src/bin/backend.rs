#![forbid(unsafe_code)]

//! Axum backend for the Supersonic music player.
//!
//! Three endpoints do the real work: `/audio` resolves a video ID into a
//! direct audio URL (with a short-lived cache in front of yt-dlp), `/stream`
//! proxies the resolved bytes through so the browser never talks to the CDN
//! directly, and `/related` ranks suggestion candidates fetched from the
//! YouTube Data API. Everything else the player needs lives client side.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use supersonic_backend::cache::ResolutionCache;
use supersonic_backend::config::{RuntimeOverrides, resolve_runtime_config};
use supersonic_backend::ranking::{Mood, RelatedTrack, rank_candidates};
use supersonic_backend::resolver::{self, AudioExtractor, ExtractError, ResolvedStream, YtDlpExtractor};
use supersonic_backend::security::ensure_not_root;
use supersonic_backend::youtube::{RelatedSource, YouTubeClient};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};

// Upstream audio hosts reject requests without a browser-like user agent.
const PROXY_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const DEFAULT_AUDIO_MIME: &str = "audio/webm";

// Candidates fetched per related-search; the ranker trims to ten afterwards.
const RELATED_SEARCH_SIZE: usize = 20;

const UPSTREAM_CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, Clone)]
struct BackendArgs {
    host: String,
    port: u16,
    yt_api_key: Option<String>,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut port_override: Option<u16> = None;
        let mut host_override: Option<String> = None;
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--port=") {
                port_override = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--host=") {
                host_override = Some(value.to_string());
                continue;
            }

            match arg.as_str() {
                "--port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--port requires a value"))?;
                    port_override = Some(parse_port_arg(&value)?);
                }
                "--host" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--host requires a value"))?;
                    host_override = Some(value);
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }

        let config = resolve_runtime_config(RuntimeOverrides {
            host: host_override,
            port: port_override,
            env_path: None,
        })?;

        Ok(Self {
            host: config.host,
            port: config.port,
            yt_api_key: config.yt_api_key,
        })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/SUPERSONIC_HOST")
}

/// Shared state injected into every Axum handler.
///
/// * `extractor` turns video IDs into stream formats (yt-dlp in production,
///   stubs in tests).
/// * `cache` keeps resolved URLs for five minutes and collapses concurrent
///   resolutions of the same ID into one extraction.
/// * `youtube` wraps the Data API for `/related`.
/// * `upstream` is the proxy client; it gets a connect timeout but no total
///   request timeout because audio streams stay open for minutes.
#[derive(Clone)]
struct AppState {
    extractor: Arc<dyn AudioExtractor>,
    cache: Arc<ResolutionCache>,
    youtube: Arc<dyn RelatedSource>,
    upstream: reqwest::Client,
}

impl AppState {
    fn new(extractor: Arc<dyn AudioExtractor>, youtube: Arc<dyn RelatedSource>) -> Result<Self> {
        let upstream = reqwest::Client::builder()
            .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
            .build()
            .context("building upstream proxy client")?;
        Ok(Self {
            extractor,
            cache: Arc::new(ResolutionCache::new()),
            youtube,
            upstream,
        })
    }

    /// Cache-backed resolution shared by `/audio` and `/stream`.
    async fn resolve_cached(&self, video_id: &str) -> Result<ResolvedStream, ApiError> {
        let extractor = self.extractor.clone();
        let id = video_id.to_string();
        self.cache
            .get_or_resolve(video_id, move || async move {
                resolver::resolve(extractor.as_ref(), &id).await
            })
            .await
            .map_err(ApiError::from)
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    /// 503 for credential-gated features that are switched off.
    fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<ExtractError> for ApiError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::NotFound | ExtractError::NoAudioStream => {
                ApiError::not_found(err.to_string())
            }
            ExtractError::Extraction(inner) => ApiError::internal(inner.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
struct AudioQuery {
    id: Option<String>,
}

#[derive(Deserialize)]
struct RelatedQuery {
    id: Option<String>,
    mode: Option<String>,
}

#[derive(Debug, Serialize)]
struct RelatedResponse {
    related: Vec<RelatedTrack>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = BackendArgs::parse()?;

    ensure_not_root("backend")?;

    let host = parse_host_arg(&args.host)?;
    if args.yt_api_key.is_none() {
        eprintln!("Warning: YT_KEY not set - /related endpoint is disabled");
    }

    let youtube = YouTubeClient::new(args.yt_api_key.clone())?;
    let state = AppState::new(Arc::new(YtDlpExtractor), Arc::new(youtube))?;
    let app = router(state);

    let addr = SocketAddr::new(host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    println!("Supersonic backend listening on http://{}", addr);
    println!("   Audio endpoint:   http://{}/audio?id=VIDEO_ID", addr);
    println!("   Stream endpoint:  http://{}/stream/VIDEO_ID", addr);
    println!("   Related endpoint: http://{}/related?id=VIDEO_ID&mode=chill", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    // We do not propagate this error up because it only affects graceful
    // shutdown; the process still terminates when Ctrl+C fires.
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {}", err);
    }
}

fn router(state: AppState) -> Router {
    // The player frontend is served from wherever, so every origin may call
    // these endpoints.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/audio", get(get_audio))
        .route("/stream/{id}", get(stream_audio))
        .route("/related", get(get_related))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

fn require_id(id: Option<&str>) -> ApiResult<&str> {
    id.map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("Video ID is required"))
}

async fn get_audio(
    State(state): State<AppState>,
    Query(query): Query<AudioQuery>,
) -> ApiResult<Json<ResolvedStream>> {
    let video_id = require_id(query.id.as_deref())?;
    println!("Fetching audio info for: {video_id}");
    let stream = state.resolve_cached(video_id).await?;
    Ok(Json(stream))
}

async fn stream_audio(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let video_id = require_id(Some(id.as_str()))?;
    println!("Streaming audio for: {video_id}");
    let resolved = state.resolve_cached(video_id).await?;
    relay_upstream(&state.upstream, &resolved, headers.get(header::RANGE)).await
}

/// Opens the resolved URL and relays status, range headers and body bytes to
/// the client. The body is streamed chunk by chunk; when the client hangs up
/// axum drops the stream and reqwest aborts the upstream connection with it.
async fn relay_upstream(
    client: &reqwest::Client,
    resolved: &ResolvedStream,
    range: Option<&HeaderValue>,
) -> ApiResult<Response> {
    // Forward the client's Range verbatim; upstream always gets an explicit
    // range request even for full-body fetches.
    let range_value = range
        .and_then(|value| value.to_str().ok())
        .unwrap_or("bytes=0-");

    let upstream = client
        .get(&resolved.audio_url)
        .header(header::USER_AGENT, PROXY_USER_AGENT)
        .header(header::RANGE, range_value)
        .send()
        .await
        .map_err(|err| ApiError::internal(format!("Proxy error: {err}")))?;

    let status = upstream.status();
    let content_length = upstream.headers().get(header::CONTENT_LENGTH).cloned();
    let content_range = upstream.headers().get(header::CONTENT_RANGE).cloned();

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;

    let response_headers = response.headers_mut();
    if let Some(value) = content_length {
        response_headers.insert(header::CONTENT_LENGTH, value);
    }
    if let Some(value) = content_range {
        response_headers.insert(header::CONTENT_RANGE, value);
    }
    let mime = resolved.mime_type.as_deref().unwrap_or(DEFAULT_AUDIO_MIME);
    if let Ok(value) = mime.parse() {
        response_headers.insert(header::CONTENT_TYPE, value);
    }
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    Ok(response)
}

async fn get_related(
    State(state): State<AppState>,
    Query(query): Query<RelatedQuery>,
) -> ApiResult<Json<RelatedResponse>> {
    let video_id = require_id(query.id.as_deref())?;
    let mood = Mood::parse(query.mode.as_deref().unwrap_or("default"));

    // Absence of the credential is a disabled feature, not an empty result.
    if !state.youtube.has_credential() {
        return Err(ApiError::unavailable(
            "Related videos feature not available - YT_KEY not configured",
        ));
    }

    let candidate_ids = state
        .youtube
        .search_related(video_id, RELATED_SEARCH_SIZE)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;

    if candidate_ids.is_empty() {
        return Ok(Json(RelatedResponse {
            related: Vec::new(),
        }));
    }

    let details = state
        .youtube
        .video_details(&candidate_ids)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;
    let seed_id = [video_id.to_string()];
    let seed = state
        .youtube
        .video_details(&seed_id)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;
    let seed_tags = seed
        .first()
        .map(|item| item.tags().to_vec())
        .unwrap_or_default();

    let related = rank_candidates(&seed_tags, mood, &details);
    Ok(Json(RelatedResponse { related }))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "Supersonic music backend running",
    })
}
