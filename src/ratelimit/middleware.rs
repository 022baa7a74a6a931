use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use super::governor::RateDecision;
use crate::state::AppState;

/// Gate every request through the governor, keyed by client address and the
/// matched route template so `/analyze/:id` is one window whatever the id.
pub async fn enforce(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_identity(req.headers(), peer);
    let route = route_key(&req);

    let decision = state.governor.admit(&client, &route);
    if !decision.allowed {
        warn!(%client, %route, limit = decision.limit, "rate limit exceeded");
        return rejection(&decision);
    }

    let mut res = next.run(req).await;
    apply_headers(res.headers_mut(), &decision);
    res
}

fn route_key(req: &Request) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string())
}

pub(crate) fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(first) = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real) = header("x-real-ip") {
        return real.to_string();
    }
    peer.map(|p| p.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_headers(headers: &mut HeaderMap, d: &RateDecision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(d.limit as u64));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(d.remaining as u64));
    headers.insert("x-ratelimit-reset", HeaderValue::from(d.reset_at));
}

fn rejection(d: &RateDecision) -> Response {
    let body = Json(json!({
        "error": {
            "code": "RATE_LIMIT_EXCEEDED",
            "message": "too many requests for this route, retry later",
            "retry_after": d.retry_after_secs,
        }
    }));
    let mut res = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    apply_headers(res.headers_mut(), d);
    res.headers_mut().insert(
        axum::http::header::RETRY_AFTER,
        HeaderValue::from(d.retry_after_secs),
    );
    res
}
