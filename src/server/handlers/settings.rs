use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io;
use tokio::fs;
use tracing::{info, warn};

use crate::server::context::{ApiError, AppContext};

/// `GET /api/settings` — stored blob, or `{}` when nothing was saved yet
pub async fn get_settings(State(ctx): State<AppContext>) -> Result<impl IntoResponse, ApiError> {
    let body = match fs::read(ctx.config.settings_path()).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => b"{}".to_vec(),
        Err(e) => return Err(e.into()),
    };
    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}

/// `POST /api/settings` — replaces the blob verbatim
pub async fn save_settings(
    State(ctx): State<AppContext>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let path = ctx.config.settings_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(&path, &body).await?;
    info!("Settings saved ({} bytes)", body.len());
    Ok(Json(json!({ "success": true })))
}

/// `GET /api/plugins` — names of `*.js` files in the plugins directory
pub async fn list_plugins(State(ctx): State<AppContext>) -> Json<Value> {
    let dir = ctx.config.plugins_dir();
    if let Err(e) = fs::create_dir_all(&dir).await {
        warn!("Failed to create plugins dir {:?}: {}", dir, e);
    }

    let mut plugins = Vec::new();
    if let Ok(mut entries) = fs::read_dir(&dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".js") {
                plugins.push(name);
            }
        }
    }
    plugins.sort();
    Json(json!({ "plugins": plugins }))
}

#[derive(Debug, Deserialize)]
pub struct PluginQuery {
    pub name: Option<String>,
}

/// `GET /api/plugin?name=<file>`
pub async fn get_plugin(
    State(ctx): State<AppContext>,
    Query(query): Query<PluginQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let name = match query.name.as_deref() {
        Some(name) if is_plugin_name(name) => name,
        _ => return Err(ApiError::Forbidden("Invalid plugin name".to_string())),
    };
    let script = fs::read(ctx.config.plugins_dir().join(name))
        .await
        .map_err(|_| ApiError::not_found())?;
    Ok((
        [(header::CONTENT_TYPE, "application/javascript")],
        String::from_utf8_lossy(&script).into_owned(),
    ))
}

fn is_plugin_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && name != ".."
}
