//! 共享上下文与错误类型
//!
//! 提供 handler 共享的服务状态（配置、工作空间存储、终端管理器）以及统一的
//! HTTP 错误类型，消除各 handler 中重复的样板错误处理代码。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::error;

use crate::config::ServerConfig;
use crate::server::file_api::FileApiError;
use crate::server::terminal_registry::{TerminalError, TerminalManager};
use crate::workspace::{SharedWorkspaceStore, StoreError};

/// Handler 上下文 — 收拢所有 handler 共享依赖
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub store: SharedWorkspaceStore,
    pub terminals: TerminalManager,
    pub started_at: Instant,
}

impl AppContext {
    pub fn new(config: ServerConfig, store: SharedWorkspaceStore, terminals: TerminalManager) -> Self {
        Self {
            config: Arc::new(config),
            store,
            terminals,
            started_at: Instant::now(),
        }
    }

    pub fn workspaces_root(&self) -> PathBuf {
        self.config.workspaces_root()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// 统一 HTTP 错误类型 — 响应体为 `{ "error": message }`
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found() -> Self {
        ApiError::NotFound("Not found".to_string())
    }

    pub fn unauthorized() -> Self {
        ApiError::Forbidden("Unauthorized".to_string())
    }

    pub fn missing(param: &str) -> Self {
        ApiError::BadRequest(format!("Missing parameter: {}", param))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("API error: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<FileApiError> for ApiError {
    fn from(e: FileApiError) -> Self {
        match e {
            FileApiError::PathEscape => ApiError::Forbidden(e.to_string()),
            FileApiError::NotFound(msg) => ApiError::NotFound(msg),
            FileApiError::Io(err) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<TerminalError> for ApiError {
    fn from(e: TerminalError) -> Self {
        match e {
            TerminalError::NotFound(_) => ApiError::NotFound("Closed".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

/// 从 tokio JoinError 转换
impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("Task failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(ApiError::not_found().status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::unauthorized().status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::unauthorized().to_string(), "Unauthorized");
        assert_eq!(ApiError::missing("ws").status(), StatusCode::BAD_REQUEST);

        let escape: ApiError = FileApiError::PathEscape.into();
        assert_eq!(escape.status(), StatusCode::FORBIDDEN);

        let closed: ApiError = TerminalError::NotFound("1".to_string()).into();
        assert_eq!(closed.status(), StatusCode::NOT_FOUND);
        assert_eq!(closed.to_string(), "Closed");

        let io: ApiError = FileApiError::Io(std::io::Error::other("disk")).into();
        assert_eq!(io.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
