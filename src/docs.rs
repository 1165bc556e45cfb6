use utoipa::OpenApi;

use crate::modules::transcode::dto::{
    SubmitResponse, TaskMeta, TaskResult, TaskStatus, TaskStatusResponse,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::transcode::handler::upload_video,
        crate::modules::transcode::handler::get_task_status,
        crate::modules::transcode::stream_handler::stream_file,
        crate::routes::health,
        crate::metrics::metrics_handler,
    ),
    components(
        schemas(SubmitResponse, TaskStatus, TaskStatusResponse, TaskResult, TaskMeta)
    ),
    tags(
        (name = "Transcode", description = "Submit videos and poll transcode jobs"),
        (name = "Streaming", description = "Published HLS playlists and segments"),
        (name = "Ops", description = "Health and metrics")
    )
)]
pub struct ApiDoc;
