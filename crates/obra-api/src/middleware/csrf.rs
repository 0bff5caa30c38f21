//! # CSRF Double-Submit Check
//!
//! `GET /v1/auth/csrf` sets a random token in the `csrf_token` cookie and
//! returns it in the body. When protection is enabled, every unsafe request
//! to an authenticated route must echo the cookie value in `X-CSRF-Token`.

use axum::extract::Request;
use axum::http::{header, HeaderMap, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand_core::{OsRng, RngCore};

use crate::auth::constant_time_token_eq;
use crate::error::AppError;

/// Name of the cookie carrying the token.
pub const CSRF_COOKIE: &str = "csrf_token";
/// Header the client echoes the token in.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// CSRF settings injected into request extensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsrfConfig {
    pub enabled: bool,
}

/// A fresh 256-bit token, hex encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// `Set-Cookie` value for a token.
pub fn cookie_header(token: &str) -> String {
    format!("{CSRF_COOKIE}={token}; Path=/; SameSite=Strict")
}

/// Read one cookie from the `Cookie` headers.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn is_unsafe(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Reject unsafe requests whose header token does not match the cookie.
pub async fn csrf_middleware(request: Request, next: Next) -> Response {
    let enabled = request
        .extensions()
        .get::<CsrfConfig>()
        .is_some_and(|c| c.enabled);

    if enabled && is_unsafe(request.method()) {
        let headers = request.headers();
        let cookie = cookie_value(headers, CSRF_COOKIE);
        let provided = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());
        let valid = match (cookie, provided) {
            (Some(cookie), Some(provided)) if !cookie.is_empty() => {
                constant_time_token_eq(provided, cookie)
            }
            _ => false,
        };
        if !valid {
            tracing::warn!(method = %request.method(), path = %request.uri().path(), "CSRF token mismatch");
            return AppError::Csrf("missing or invalid CSRF token".into()).into_response();
        }
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::middleware::from_fn;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    fn app(enabled: bool) -> Router {
        Router::new()
            .route("/write", post(|| async { "ok" }).get(|| async { "read" }))
            .layer(from_fn(csrf_middleware))
            .layer(axum::Extension(CsrfConfig { enabled }))
    }

    fn post_with(cookie: Option<&str>, header_token: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().method("POST").uri("/write");
        if let Some(c) = cookie {
            builder = builder.header(header::COOKIE, format!("theme=dark; {CSRF_COOKIE}={c}"));
        }
        if let Some(t) = header_token {
            builder = builder.header(CSRF_HEADER, t);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn matching_token_passes() {
        let response = app(true)
            .oneshot(post_with(Some("abc123"), Some("abc123")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn mismatch_or_missing_is_forbidden() {
        for (cookie, token) in [
            (Some("abc123"), Some("abc124")),
            (Some("abc123"), None),
            (None, Some("abc123")),
        ] {
            let response = app(true).oneshot(post_with(cookie, token)).await.unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }
    }

    #[tokio::test]
    async fn safe_methods_and_disabled_pass() {
        let get = axum::http::Request::builder()
            .uri("/write")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app(true).oneshot(get).await.unwrap().status(), StatusCode::OK);
        assert_eq!(
            app(false).oneshot(post_with(None, None)).await.unwrap().status(),
            StatusCode::OK
        );
    }

    #[test]
    fn tokens_are_random_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(cookie_header(&a).starts_with("csrf_token="));
    }
}
