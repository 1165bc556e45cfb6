use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::TryStreamExt;
use http_body_util::LengthLimitError;
use uuid::Uuid;
use validator::Validate;

use super::dto::{SubmitResponse, TaskStatusResponse, UploadQuery, UploadRequest, validation_message};
use super::service::TranscodeService;
use crate::common::error::AppError;
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::infrastructure::storage::ByteStream;
use crate::state::AppState;

/// True when the body failed because the request body limit was hit.
fn exceeds_limit(err: &axum::Error) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}

#[utoipa::path(
    post,
    path = "/admin/upload/{id}",
    params(
        ("id" = String, Path, description = "Asset identifier, also the output prefix"),
        UploadQuery
    ),
    request_body(content = Vec<u8>, content_type = "application/octet-stream", description = "Raw video bytes"),
    responses(
        (status = 202, description = "Job accepted", body = SubmitResponse),
        (status = 400, description = "Invalid id, webhook URL or empty body", body = ApiResponse<String>),
        (status = 409, description = "A job for this id already exists", body = ApiResponse<String>),
        (status = 413, description = "Upload too large", body = ApiResponse<String>),
        (status = 503, description = "Storage or queue unavailable", body = ApiResponse<String>)
    ),
    tag = "Transcode"
)]
pub async fn upload_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UploadQuery>,
    body: Body,
) -> Response {
    let req = UploadRequest {
        id,
        webhook_url: query.webhook_url.filter(|url| !url.trim().is_empty()),
    };
    if let Err(errors) = req.validate() {
        return ApiError::from(AppError::Validation(validation_message(&errors))).into_response();
    }

    let limit_hit = Arc::new(AtomicBool::new(false));
    let flag = limit_hit.clone();
    let stream: ByteStream = Box::pin(body.into_data_stream().map_err(move |e| {
        if exceeds_limit(&e) {
            flag.store(true, Ordering::SeqCst);
        }
        std::io::Error::other(e)
    }));

    match TranscodeService::submit(&state, req, stream).await {
        Ok(res) => ApiSuccess(res, StatusCode::ACCEPTED).into_response(),
        Err(_) if limit_hit.load(Ordering::SeqCst) => {
            ApiError::from(AppError::PayloadTooLarge(state.config.max_upload_bytes)).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/tasks/{task_id}",
    params(
        ("task_id" = Uuid, Path, description = "Task id returned on submission")
    ),
    responses(
        (status = 200, description = "Current job status", body = TaskStatusResponse),
        (status = 400, description = "task_id is not a UUID", body = ApiResponse<String>),
        (status = 404, description = "Unknown task", body = ApiResponse<String>)
    ),
    tag = "Transcode"
)]
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Response {
    let Ok(task_id) = Uuid::parse_str(&task_id) else {
        return ApiError::from(AppError::Validation(format!("Invalid task id: {}", task_id)))
            .into_response();
    };

    match TranscodeService::status(&state, task_id).await {
        Ok(res) => ApiSuccess(res, StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
