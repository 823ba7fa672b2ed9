use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::{field, Instrument};

use sluice_auth::JwtValidator;
use sluice_core::Error;

use crate::app::errors;

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

/// Reject requests without a valid bearer token.
///
/// Every failure is `403`, whatever the cause.
pub async fn auth_middleware(State(state): State<AuthState>, req: Request, next: Next) -> Response {
    let token = match extract_bearer(req.headers()) {
        Ok(token) => token,
        Err(reason) => {
            tracing::debug!(reason, "rejecting request");
            return errors::json_error(StatusCode::FORBIDDEN, reason);
        }
    };

    match state.jwt.validate(token, Utc::now()) {
        Ok(claims) => {
            if let Some(sub) = claims.sub.as_deref() {
                tracing::Span::current().record("subject", sub);
            }
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!(error = %e, "rejecting token");
            errors::json_error(StatusCode::FORBIDDEN, "invalid token")
        }
    }
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, &'static str> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or("missing authorization header")?;

    let header = header.to_str().map_err(|_| "malformed authorization header")?;

    // Scheme names are case-insensitive (RFC 7235).
    let header = header.trim();
    let (scheme, token) = header.split_once(char::is_whitespace).unwrap_or((header, ""));
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err("authorization scheme must be Bearer");
    }

    let token = token.trim();
    if token.is_empty() {
        return Err("empty bearer token");
    }

    Ok(token)
}

/// One span per request, carrying method, path and final status.
pub async fn trace_requests(req: Request, next: Next) -> Response {
    let span = tracing::info_span!(
        "http_request",
        method = %req.method(),
        path = %req.uri().path(),
        status = field::Empty,
        subject = field::Empty,
    );

    async move {
        let started = Instant::now();
        let response = next.run(req).await;
        let status = response.status();
        tracing::Span::current().record("status", status.as_u16());
        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "request finished");
        response
    }
    .instrument(span)
    .await
}

/// Abort handlers that run past the configured deadline. The handler future
/// is dropped, which rolls back any open store transaction.
pub async fn enforce_timeout(State(limit): State<Duration>, req: Request, next: Next) -> Response {
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            errors::ApiError(Error::transient(format!("request exceeded {}ms deadline", limit.as_millis())))
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(extract_bearer(&headers("Bearer abc.def")), Ok("abc.def"));
    }

    #[test]
    fn bearer_scheme_ignores_case_and_padding() {
        assert_eq!(extract_bearer(&headers("bearer abc.def")), Ok("abc.def"));
        assert_eq!(extract_bearer(&headers("BEARER abc.def")), Ok("abc.def"));
        assert_eq!(extract_bearer(&headers("  Bearer    abc.def  ")), Ok("abc.def"));
        assert_eq!(extract_bearer(&headers("Bearer\tabc.def")), Ok("abc.def"));
    }

    #[test]
    fn rejects_other_schemes_and_blank_tokens() {
        assert!(extract_bearer(&HeaderMap::new()).is_err());
        assert!(extract_bearer(&headers("Basic dXNlcjpwYXNz")).is_err());
        assert!(extract_bearer(&headers("Bearer   ")).is_err());
        assert!(extract_bearer(&headers("Bearer")).is_err());
        assert!(extract_bearer(&headers("Bearerabc.def")).is_err());
    }
}
