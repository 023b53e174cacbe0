//! Origin guard
//!
//! A whitelist echo: listed Origins are echoed back, absent or unlisted
//! Origins get the canonical production origin so browsers enforce the
//! rejection on their side. The middleware also short-circuits OPTIONS
//! preflights before any handler runs.

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization";
const PREFLIGHT_MAX_AGE: &str = "86400";

#[derive(Debug, Clone)]
pub struct OriginGuard {
    allowed: Vec<String>,
    canonical: String,
}

impl OriginGuard {
    pub fn new(environment: &str, canonical: String) -> Self {
        let mut allowed = vec![canonical.clone()];
        if environment != "production" {
            for origin in [
                "http://localhost:3000",
                "http://localhost:5173",
                "http://127.0.0.1:3000",
                "http://127.0.0.1:5173",
            ] {
                allowed.push(origin.to_string());
            }
        }
        tracing::info!(
            environment = environment,
            allowed_origins = allowed.len(),
            "Origin guard configured"
        );
        Self { allowed, canonical }
    }

    /// The Access-Control-Allow-Origin value for a request's Origin header
    pub fn allow_origin_for(&self, origin: Option<&str>) -> &str {
        origin
            .and_then(|o| self.allowed.iter().find(|a| a.as_str() == o))
            .map(|a| a.as_str())
            .unwrap_or(&self.canonical)
    }
}

fn apply_headers(response: &mut Response, allow_origin: &str) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(allow_origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
}

/// CORS middleware applied to every route
pub async fn cors_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let allow_origin = state
        .origin_guard
        .allow_origin_for(origin.as_deref())
        .to_string();

    if req.method() == Method::OPTIONS {
        let mut response = StatusCode::OK.into_response();
        apply_headers(&mut response, &allow_origin);
        response.headers_mut().insert(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(PREFLIGHT_MAX_AGE),
        );
        return response;
    }

    let mut response = next.run(req).await;
    apply_headers(&mut response, &allow_origin);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> OriginGuard {
        OriginGuard::new("production", "https://gaiya.app".to_string())
    }

    #[test]
    fn listed_origin_is_echoed() {
        let guard = OriginGuard::new("development", "https://gaiya.app".to_string());
        assert_eq!(
            guard.allow_origin_for(Some("http://localhost:3000")),
            "http://localhost:3000"
        );
    }

    #[test]
    fn unlisted_origin_gets_canonical() {
        assert_eq!(
            guard().allow_origin_for(Some("https://evil.example")),
            "https://gaiya.app"
        );
    }

    #[test]
    fn absent_origin_gets_canonical() {
        assert_eq!(guard().allow_origin_for(None), "https://gaiya.app");
    }

    #[test]
    fn production_excludes_localhost() {
        assert_eq!(
            guard().allow_origin_for(Some("http://localhost:3000")),
            "https://gaiya.app"
        );
    }
}
