// handlers module - HTTP route handlers
// Contains handlers for workspace, file, search, settings/plugin, terminal and static asset routes

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::server::context::{ApiError, AppContext};

pub mod assets;
pub mod file;
pub mod settings;
pub mod terminal;
pub mod workspace;

/// `GET /health`, `GET /api/health`
pub async fn health(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!({ "status": "ok", "uptime": ctx.uptime_secs() }))
}

/// Unknown `/api/*` route
pub async fn api_not_found() -> ApiError {
    ApiError::not_found()
}
