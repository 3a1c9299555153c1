use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

use crate::server::context::{ApiError, AppContext};
use crate::server::file_api::{self, FileStat, FsMutation};
use crate::server::search::{search_workspace, SearchMatch};

/// `?ws=<workspace>&path=<relative path>`
#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub ws: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub ws: Option<String>,
    pub q: Option<String>,
}

impl FileQuery {
    fn ws(&self) -> Result<&str, ApiError> {
        self.ws
            .as_deref()
            .filter(|ws| !ws.is_empty())
            .ok_or_else(|| ApiError::missing("ws"))
    }

    /// Resolve against the workspace; `path` may be omitted only if `optional`
    fn resolve(&self, ctx: &AppContext, optional: bool) -> Result<PathBuf, ApiError> {
        let ws = self.ws()?;
        let path = match self.path.as_deref() {
            Some(path) => path,
            None if optional => "",
            None => return Err(ApiError::missing("path")),
        };
        Ok(file_api::resolve_sandboxed_path(
            &ctx.workspaces_root(),
            ws,
            path,
        )?)
    }
}

/// `GET /api/stat`
pub async fn stat(
    State(ctx): State<AppContext>,
    Query(query): Query<FileQuery>,
) -> Result<Json<FileStat>, ApiError> {
    let path = query.resolve(&ctx, true)?;
    Ok(Json(file_api::stat(&path).await?))
}

/// `GET /api/readdir`
pub async fn readdir(
    State(ctx): State<AppContext>,
    Query(query): Query<FileQuery>,
) -> Result<Json<Value>, ApiError> {
    let path = query.resolve(&ctx, true)?;
    let files = file_api::read_dir_names(&path).await?;
    Ok(Json(json!({ "files": files })))
}

/// `GET /api/files` — recursive tree of the whole workspace
pub async fn tree(
    State(ctx): State<AppContext>,
    Query(query): Query<FileQuery>,
) -> Result<Json<Value>, ApiError> {
    let root = file_api::workspace_root(&ctx.workspaces_root(), query.ws()?)?;
    if !root.is_dir() {
        return Err(ApiError::NotFound("Workspace not found".to_string()));
    }
    let files = tokio::task::spawn_blocking(move || file_api::list_tree(&root)).await??;
    Ok(Json(json!({ "files": files })))
}

/// `GET /api/file` — raw text content
pub async fn read_file(
    State(ctx): State<AppContext>,
    Query(query): Query<FileQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let path = query.resolve(&ctx, false)?;
    let text = file_api::read_text(&path).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text))
}

/// `POST /api/file` — body written verbatim
pub async fn write_file(
    State(ctx): State<AppContext>,
    Query(query): Query<FileQuery>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let path = query.resolve(&ctx, false)?;
    file_api::write_bytes(&path, &body).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn mkdir(
    State(ctx): State<AppContext>,
    Query(query): Query<FileQuery>,
) -> Result<Json<Value>, ApiError> {
    mutate(&ctx, &query, FsMutation::Mkdir).await
}

pub async fn unlink(
    State(ctx): State<AppContext>,
    Query(query): Query<FileQuery>,
) -> Result<Json<Value>, ApiError> {
    mutate(&ctx, &query, FsMutation::Unlink).await
}

pub async fn rmdir(
    State(ctx): State<AppContext>,
    Query(query): Query<FileQuery>,
) -> Result<Json<Value>, ApiError> {
    mutate(&ctx, &query, FsMutation::Rmdir).await
}

async fn mutate(
    ctx: &AppContext,
    query: &FileQuery,
    op: FsMutation,
) -> Result<Json<Value>, ApiError> {
    let path = query.resolve(ctx, false)?;
    info!(op = op.name(), path = ?path, "Filesystem mutation");
    op.apply(&path).await?;
    Ok(Json(json!({})))
}

/// `GET /api/search`
pub async fn search(
    State(ctx): State<AppContext>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SearchMatch>>, ApiError> {
    let (ws, q) = match (query.ws, query.q) {
        (Some(ws), Some(q)) if !ws.is_empty() && !q.is_empty() => (ws, q),
        _ => return Ok(Json(Vec::new())),
    };
    let root = file_api::workspace_root(&ctx.workspaces_root(), &ws)?;
    let results = tokio::task::spawn_blocking(move || search_workspace(&root, &q)).await?;
    Ok(Json(results))
}
