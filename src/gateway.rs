//! HTTP surface of the gateway
//!
//! Two admin routes manage the access lists; every other route is the
//! proxy fallback, which freezes the request, runs it through the
//! pipeline under a deadline and either replays it upstream or answers
//! 403 on the gateway's behalf. A pipeline failure answers 502: no
//! judgment means no forwarding.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{request::Parts, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::access::AccessControl;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::pipeline::{Gatekeeper, Verdict};
use crate::request::RequestContext;

/// Bodies past this size are rejected before judgment.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub gatekeeper: Arc<Gatekeeper>,
    pub access: Arc<AccessControl>,
    pub http: reqwest::Client,
    pub config: GatewayConfig,
}

/// Build the gateway router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/gateway/allowlist",
            post(add_allow).get(list_allow).delete(reset_allow),
        )
        .route(
            "/gateway/denylist",
            post(add_deny).get(list_deny).delete(reset_deny),
        )
        .fallback(proxy)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct IdList {
    ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    ids: Vec<String>,
}

async fn add_allow(State(state): State<AppState>, Json(payload): Json<IdList>) -> Response {
    info!(count = payload.ids.len(), "allow-list update");
    let ids = state.access.add_to_allow(payload.ids);
    Json(ListResponse { ids }).into_response()
}

async fn list_allow(State(state): State<AppState>) -> Response {
    let ids = state.access.list_allow();
    Json(ListResponse { ids }).into_response()
}

async fn add_deny(State(state): State<AppState>, Json(payload): Json<IdList>) -> Response {
    info!(count = payload.ids.len(), "deny-list update");
    let ids = state.access.add_to_deny(payload.ids);
    Json(ListResponse { ids }).into_response()
}

async fn list_deny(State(state): State<AppState>) -> Response {
    let ids = state.access.list_deny();
    Json(ListResponse { ids }).into_response()
}

async fn reset_allow(State(state): State<AppState>) -> Response {
    info!("allow-list reset");
    state.access.reset_allow();
    Json(ListResponse { ids: Vec::new() }).into_response()
}

async fn reset_deny(State(state): State<AppState>) -> Response {
    info!("deny-list reset");
    state.access.reset_deny();
    Json(ListResponse { ids: Vec::new() }).into_response()
}

async fn proxy(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({"detail": "request body too large"})),
            )
                .into_response();
        }
    };
    let ctx = context_from_parts(&parts, bytes.clone(), peer.ip().to_string());

    let decision = tokio::time::timeout(
        state.config.request_timeout,
        state.gatekeeper.decide(&ctx),
    )
    .await;
    match decision {
        Ok(Ok(Verdict::Allow)) => forward(&state, &parts, bytes).await,
        Ok(Ok(Verdict::Block)) => blocked(),
        Ok(Err(error)) => {
            error!(%error, client = %ctx.client, "pipeline failed, refusing to forward");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"detail": "security gateway unavailable"})),
            )
                .into_response()
        }
        Err(_) => {
            let error = GatewayError::DeadlineExceeded(state.config.request_timeout);
            warn!(%error, client = %ctx.client, "judgment deadline elapsed, failing safe");
            blocked()
        }
    }
}

fn blocked() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({"detail": "request blocked by security gateway"})),
    )
        .into_response()
}

/// Freeze the inbound request for judgment.
fn context_from_parts(parts: &Parts, body: Bytes, client: String) -> RequestContext {
    // Percent-decode before judgment so encoded payloads reach the
    // oracle as the upstream would see them.
    let query = parts
        .uri
        .query()
        .map(|raw| {
            url::form_urlencoded::parse(raw.as_bytes())
                .into_owned()
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect::<Vec<_>>();
    RequestContext::new(
        parts.method.as_str(),
        parts.uri.path(),
        query,
        headers,
        body,
        client,
    )
}

/// Replay an allowed request against the upstream and relay the answer.
/// Headers cross the boundary as strings, so the gateway never depends
/// on the two HTTP stacks agreeing on header types.
async fn forward(state: &AppState, parts: &Parts, body: Bytes) -> Response {
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!(
        "{}{}",
        state.config.upstream_url.trim_end_matches('/'),
        path_and_query
    );
    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);

    let mut upstream = state.http.request(method, &url);
    for (name, value) in parts.headers.iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let Ok(text) = value.to_str() {
            upstream = upstream.header(name.as_str(), text);
        }
    }
    let sent = upstream.body(body.to_vec()).send().await;

    let response = match sent {
        Ok(response) => response,
        Err(error) => {
            let error = GatewayError::Upstream(error);
            error!(%error, url, "upstream request failed");
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({"detail": "upstream unavailable"})),
            )
                .into_response();
        }
    };

    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let Ok(text) = value.to_str() {
            builder = builder.header(name.as_str(), text);
        }
    }
    match response.bytes().await {
        Ok(bytes) => builder
            .body(Body::from(bytes))
            .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response()),
        Err(error) => {
            let error = GatewayError::Upstream(error);
            error!(%error, url, "failed to read upstream body");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"detail": "upstream unavailable"})),
            )
                .into_response()
        }
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "host"
            | "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "content-length"
    )
}
