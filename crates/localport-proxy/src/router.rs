//! Host-based request routing and the reverse proxy itself.
//!
//! Every request on either listener passes through [`dispatch_by_host`]:
//! admin hosts (`localhost`, `127.0.0.1`, empty) fall through to the admin
//! routes and dashboard, a Host matching a service is proxied upstream, and
//! anything else renders the dashboard with an error banner.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::HOST;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::dashboard;
use crate::state::{ServiceEntry, SharedState};

/// Headers that must not travel through a proxy hop.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Middleware deciding what a request's Host header means.
pub async fn dispatch_by_host(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let host = request_host(&request);

    if host.is_empty() || host == "localhost" || host == "127.0.0.1" {
        // Admin surface: API routes, dashboard fallback.
        return next.run(request).await;
    }

    match state.table.get(&host) {
        Some(entry) => forward(&state, entry, &host, request).await,
        None => dashboard::render(&state, Some(&format!("No service found for {host}"))),
    }
}

/// The request's Host with any trailing `:port` removed.
pub fn request_host(request: &Request) -> String {
    let raw = request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().host().map(str::to_string))
        .unwrap_or_default();

    match raw.rfind(':') {
        Some(idx) if !raw[idx + 1..].contains(']') => raw[..idx].to_string(),
        _ => raw,
    }
}

/// Relays one request to a service's upstream.
async fn forward(
    state: &SharedState,
    entry: Arc<ServiceEntry>,
    host: &str,
    request: Request,
) -> Response {
    let upstream = match entry.upstream() {
        Ok(upstream) => upstream,
        Err(e) => {
            error!(host, "failed to build upstream: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Invalid upstream target".to_string(),
            )
                .into_response();
        }
    };

    let (parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{path_and_query}", upstream.base);

    // The upstream sees its own host:port as Host (reqwest derives it from
    // the URL); the original Host travels in X-Forwarded-Host.
    let mut headers = HeaderMap::with_capacity(parts.headers.len() + 1);
    for (name, value) in &parts.headers {
        if name == HOST || HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    if let Ok(value) = HeaderValue::from_str(host) {
        headers.insert(HeaderName::from_static("x-forwarded-host"), value);
    }

    let result = upstream
        .client
        .request(parts.method, url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await;

    match result {
        Ok(upstream_response) => {
            let mut response = Response::builder().status(upstream_response.status());
            if let Some(headers) = response.headers_mut() {
                for (name, value) in upstream_response.headers() {
                    if HOP_BY_HOP.contains(&name.as_str()) {
                        continue;
                    }
                    headers.append(name.clone(), value.clone());
                }
            }
            response
                .body(Body::from_stream(upstream_response.bytes_stream()))
                .unwrap_or_else(|e| {
                    error!(host, "failed to assemble proxied response: {e}");
                    (StatusCode::INTERNAL_SERVER_ERROR, "proxy failure").into_response()
                })
        }
        Err(e) => {
            warn!(host, "proxy error: {e}");
            (
                StatusCode::BAD_GATEWAY,
                format!("Service {host} unavailable"),
            )
                .into_response()
        }
    }
}

/// Marks a request as having arrived over the daemon's TLS listener.
pub async fn add_forwarded_proto(mut request: Request) -> Request {
    request.headers_mut().insert(
        HeaderName::from_static("x-forwarded-proto"),
        HeaderValue::from_static("https"),
    );
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_host(host: &str) -> Request {
        Request::builder()
            .uri("/")
            .header(HOST, host)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn host_strips_trailing_port() {
        assert_eq!(request_host(&request_with_host("myapp.localhost:8080")), "myapp.localhost");
        assert_eq!(request_host(&request_with_host("myapp.localhost")), "myapp.localhost");
        assert_eq!(request_host(&request_with_host("127.0.0.1:80")), "127.0.0.1");
    }

    #[test]
    fn missing_host_is_empty() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(request_host(&request), "");
    }

    #[tokio::test]
    async fn forwarded_proto_is_injected() {
        let request = request_with_host("a.localhost");
        let request = add_forwarded_proto(request).await;
        assert_eq!(
            request.headers().get("x-forwarded-proto").unwrap(),
            "https"
        );
    }
}
