use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::server::context::AppContext;
use crate::server::handlers::{self, assets, file, settings, terminal, workspace};
use crate::server::middleware;

/// Largest accepted request body (file saves, terminal input)
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Full HTTP surface: `/api/*`, health and the static front-end
pub fn build_router(ctx: AppContext) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/workspaces", get(workspace::list_workspaces))
        .route("/stat", get(file::stat))
        .route("/readdir", get(file::readdir))
        .route("/mkdir", post(file::mkdir))
        .route("/unlink", post(file::unlink))
        .route("/rmdir", post(file::rmdir))
        .route("/files", get(file::tree))
        .route("/file", get(file::read_file).post(file::write_file))
        .route("/search", get(file::search))
        .route(
            "/settings",
            get(settings::get_settings).post(settings::save_settings),
        )
        .route("/plugins", get(settings::list_plugins))
        .route("/plugin", get(settings::get_plugin))
        .route("/terminals", post(terminal::create_terminal))
        .route("/terminals/:id/input", post(terminal::write_input))
        .route("/terminals/:id/output", get(terminal::read_output))
        .fallback(handlers::api_not_found)
        .layer(from_fn_with_state(ctx.clone(), middleware::require_token));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .fallback(assets::serve_static)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(from_fn(middleware::short_circuit_options))
        .layer(build_cors())
        .layer(from_fn(middleware::log_request))
        .with_state(ctx)
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
