use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use super::model::{MediaKind, artifact_prefix, is_valid_job_id};
use crate::common::error::AppError;
use crate::common::response::{ApiError, ApiResponse};
use crate::metrics;
use crate::state::AppState;

fn is_safe_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.contains('/')
        && !filename.contains('\\')
        && !filename.contains("..")
}

fn playback_error(error_type: &str, err: AppError) -> Response {
    metrics::PLAYBACK_ERRORS_TOTAL
        .with_label_values(&[error_type])
        .inc();
    ApiError::from(err).into_response()
}

/// Serves a published playlist or segment, proxying `Range` requests to
/// object storage.
#[utoipa::path(
    get,
    path = "/file/{id}/{filename}",
    params(
        ("id" = String, Path, description = "Asset identifier"),
        ("filename" = String, Path, description = "Playlist or segment file name")
    ),
    responses(
        (status = 200, description = "File content"),
        (status = 206, description = "Partial content"),
        (status = 400, description = "Invalid id or file name", body = ApiResponse<String>),
        (status = 404, description = "File not found", body = ApiResponse<String>),
        (status = 416, description = "Range not satisfiable", body = ApiResponse<String>),
        (status = 503, description = "Storage unavailable", body = ApiResponse<String>)
    ),
    tag = "Streaming"
)]
pub async fn stream_file(
    State(state): State<AppState>,
    Path((id, filename)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if !is_valid_job_id(&id) || !is_safe_filename(&filename) {
        return playback_error(
            "invalid_path",
            AppError::Validation(format!("Invalid file path: {}/{}", id, filename)),
        );
    }

    let kind = MediaKind::from_filename(&filename);
    metrics::STREAMING_REQUESTS_TOTAL
        .with_label_values(&[kind.label()])
        .inc();

    let range = headers
        .get(header::RANGE)
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned);

    let key = format!("{}{}", artifact_prefix(&id), filename);
    let object = match state.storage.get_object(&key, range).await {
        Ok(object) => object,
        Err(e) => {
            let err = AppError::from(e);
            let error_type = match err {
                AppError::NotFound(_) => "not_found",
                AppError::RangeNotSatisfiable(_) => "invalid_range",
                _ => "storage",
            };
            return playback_error(error_type, err);
        }
    };

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, kind.content_type())
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*");

    if let Some(len) = object.content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }

    builder = match object.content_range.as_deref().map(HeaderValue::from_str) {
        Some(Ok(range)) => builder
            .header(header::CONTENT_RANGE, range)
            .status(StatusCode::PARTIAL_CONTENT),
        _ => builder
            .header(header::ACCEPT_RANGES, "bytes")
            .status(StatusCode::OK),
    };

    if let Some(etag) = object.e_tag.as_deref().and_then(|e| HeaderValue::from_str(e).ok()) {
        builder = builder.header(header::ETAG, etag);
    }

    builder
        .body(Body::from_stream(object.stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
