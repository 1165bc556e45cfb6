use axum::Router;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;

use crate::state::AppState;

pub mod dto;
pub mod events;
pub mod handler;
pub mod model;
pub mod repository;
pub mod service;
pub mod stream_handler;

pub fn router(state: &AppState) -> Router<AppState> {
    let upload_routes = Router::new()
        .route("/admin/upload/{id}", post(handler::upload_video))
        .layer(RequestBodyLimitLayer::new(state.config.max_upload_bytes));

    Router::new()
        .route("/tasks/{task_id}", get(handler::get_task_status))
        .route("/file/{id}/{filename}", get(stream_handler::stream_file))
        .merge(upload_routes)
}
