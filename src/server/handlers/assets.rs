use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::server::context::{ApiError, AppContext};
use crate::server::file_api::{self, FileApiError};

/// Fallback for everything outside the API: the editor front-end bundle
pub async fn serve_static(State(ctx): State<AppContext>, method: Method, uri: Uri) -> Response {
    let request_path = uri.path();
    if request_path.starts_with("/api/") {
        return ApiError::not_found().into_response();
    }
    if method != Method::GET && method != Method::HEAD {
        return (StatusCode::NOT_FOUND, "404").into_response();
    }

    match locate_asset(&ctx.config.public_dir, request_path).await {
        Ok(Some(path)) => match fs::read(&path).await {
            Ok(bytes) => {
                let mime = mime_guess::from_path(&path).first_or_octet_stream();
                ([(header::CONTENT_TYPE, mime.as_ref().to_string())], bytes).into_response()
            }
            Err(e) => {
                debug!("Failed to read asset {:?}: {}", path, e);
                (StatusCode::NOT_FOUND, "404").into_response()
            }
        },
        Ok(None) => (StatusCode::NOT_FOUND, "404").into_response(),
        Err(FileApiError::PathEscape) => (StatusCode::FORBIDDEN, "403").into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "404").into_response(),
    }
}

/// `/` is `index.html`, a directory is its `index.html`, and a missing path
/// is retried with a `.html` suffix.
async fn locate_asset(public_dir: &Path, request_path: &str) -> Result<Option<PathBuf>, FileApiError> {
    let relative = match request_path.trim_start_matches('/') {
        "" => "index.html",
        other => other,
    };
    let target = file_api::resolve_under(public_dir, relative)?;

    match fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => {
            let index = target.join("index.html");
            Ok(fs::metadata(&index).await.ok().map(|_| index))
        }
        Ok(_) => Ok(Some(target)),
        Err(_) => {
            let html = file_api::resolve_under(public_dir, &format!("{}.html", relative))?;
            Ok(fs::metadata(&html)
                .await
                .ok()
                .filter(|m| m.is_file())
                .map(|_| html))
        }
    }
}
