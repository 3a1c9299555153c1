//! Request middleware: access log, OPTIONS short-circuit, token guard

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use crate::server::context::{ApiError, AppContext};

/// Paths that never require the token
const PUBLIC_API_PATHS: &[&str] = &["/health", "/api/health"];

pub async fn log_request(req: Request, next: Next) -> Response {
    info!("{} {}", req.method(), req.uri().path());
    next.run(req).await
}

/// Any OPTIONS request is answered immediately with an empty body
pub async fn short_circuit_options(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return (StatusCode::NO_CONTENT, Body::empty()).into_response();
    }
    next.run(req).await
}

/// Bearer header or `?token=`; the header wins when both are present
pub async fn require_token(
    State(ctx): State<AppContext>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let expected = match ctx.config.auth_token.as_deref() {
        Some(token) => token,
        None => return Ok(next.run(req).await),
    };

    let path = req.uri().path();
    if PUBLIC_API_PATHS.contains(&path) {
        return Ok(next.run(req).await);
    }

    let provided = extract_token(req.headers(), req.uri().query());
    if provided.as_deref() == Some(expected) {
        Ok(next.run(req).await)
    } else {
        warn!("Rejected request without valid token: {}", path);
        Err(ApiError::unauthorized())
    }
}

fn extract_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.to_string());
    bearer.or_else(|| {
        url::form_urlencoded::parse(query?.as_bytes())
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers, None), None);
        assert_eq!(
            extract_token(&headers, Some("ws=a&token=q%20t")),
            Some("q t".to_string())
        );

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer h"));
        assert_eq!(
            extract_token(&headers, Some("token=q")),
            Some("h".to_string())
        );

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(
            extract_token(&headers, Some("token=q")),
            Some("q".to_string())
        );
    }
}
