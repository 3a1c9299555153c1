use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use tokio::fs;

use crate::server::context::{ApiError, AppContext};
use crate::workspace::WorkspaceView;

/// `GET /api/workspaces` — sandbox directory names plus the stored records
pub async fn list_workspaces(State(ctx): State<AppContext>) -> Result<Json<Value>, ApiError> {
    let root = ctx.workspaces_root();
    fs::create_dir_all(&root).await?;

    let mut names = Vec::new();
    let mut entries = fs::read_dir(&root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();

    let records = ctx.store.all()?;
    let views: Vec<WorkspaceView<'_>> = records.iter().map(WorkspaceView::from).collect();

    Ok(Json(json!({ "workspaces": names, "records": views })))
}
