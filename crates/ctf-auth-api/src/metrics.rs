use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use subtle::ConstantTimeEq;

use crate::server::AppState;

const CLIENT_ID_PREFIX: &str = "oauth_client_";

/// Install the global Prometheus recorder.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Axum middleware that records HTTP request metrics.
///
/// Records:
/// - `ctf_auth_http_requests_total` counter with `method`, `path`, `status` labels
/// - `ctf_auth_http_request_duration_seconds` histogram with `method`, `path` labels
pub async fn http_metrics_middleware(
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());

    let start = Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed().as_secs_f64();

    let status = response.status().as_u16().to_string();

    counter!("ctf_auth_http_requests_total",
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status,
    )
    .increment(1);

    histogram!("ctf_auth_http_request_duration_seconds",
        "method" => method,
        "path" => path,
    )
    .record(duration);

    response
}

/// Collapse client identifiers so every client shares one label value.
/// Paths deeper than four segments become `/unknown`.
fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() > 5 {
        return "/unknown".to_string();
    }
    segments
        .iter()
        .map(|s| if looks_like_id(s) { ":client_id" } else { s })
        .collect::<Vec<_>>()
        .join("/")
}

fn looks_like_id(s: &str) -> bool {
    if let Some(rest) = s.strip_prefix(CLIENT_ID_PREFIX) {
        return !rest.is_empty();
    }
    s.len() >= 16 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Handler for the /metrics endpoint. Returns Prometheus text format.
pub async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    if let Some(ref token_config) = state.config.metrics.bearer_token {
        let expected = match token_config.resolve() {
            Ok(t) => t,
            Err(_) => {
                return (StatusCode::INTERNAL_SERVER_ERROR, "metrics token config error")
                    .into_response();
            }
        };

        let provided = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match provided {
            Some(token)
                if token.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() == 1 => {}
            _ => {
                return (StatusCode::UNAUTHORIZED, "invalid or missing bearer token")
                    .into_response();
            }
        }
    }

    match state.metrics_handle.as_ref() {
        Some(h) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            h.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics not enabled").into_response(),
    }
}
