use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

use crate::server::context::{ApiError, AppContext};

#[derive(Debug, Default, Deserialize)]
pub struct CreateTerminalRequest {
    pub cwd: Option<String>,
}

/// `POST /api/terminals` — body `{ "cwd"?: string }`; anything unparsable means no cwd
pub async fn create_terminal(
    State(ctx): State<AppContext>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: CreateTerminalRequest = serde_json::from_slice(&body).unwrap_or_default();
    let cwd = request.cwd.filter(|c| !c.is_empty()).map(PathBuf::from);

    let id = ctx.terminals.create(cwd.as_deref()).await?;
    info!(term_id = %id, cwd = ?cwd, "Terminal created");
    Ok(Json(json!({ "id": id })))
}

/// `POST /api/terminals/:id/input` — raw body forwarded to the shell
pub async fn write_input(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    ctx.terminals.write(&id, &body).await?;
    Ok(StatusCode::OK)
}

/// `GET /api/terminals/:id/output` — drains buffered output
pub async fn read_output(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let output = ctx.terminals.read(&id).await?;
    Ok(Json(json!({ "output": output })))
}
