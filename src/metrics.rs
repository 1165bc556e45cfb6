//! Prometheus metrics for the upload, transcode and playback paths.

use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::error;

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// Playback

/// Files served by kind (`playlist`, `segment`, `other`).
pub static STREAMING_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "videostream_streaming_requests_total",
            "Streaming file requests by media kind",
        ),
        &["type"],
    )
    .expect("valid metric definition")
});

pub static PLAYBACK_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "videostream_playback_errors_total",
            "Streaming requests that failed",
        ),
        &["error_type"],
    )
    .expect("valid metric definition")
});

// Jobs

pub static JOBS_SUBMITTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "videostream_jobs_submitted_total",
        "Transcode jobs accepted for processing",
    )
    .expect("valid metric definition")
});

/// Terminal transitions by outcome (`succeeded`, `failed`).
pub static JOBS_FINISHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "videostream_jobs_finished_total",
            "Transcode jobs that reached a terminal state",
        ),
        &["outcome"],
    )
    .expect("valid metric definition")
});

pub static JOBS_DEAD_LETTERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "videostream_jobs_dead_lettered_total",
        "Queue items moved to the dead-letter queue",
    )
    .expect("valid metric definition")
});

pub static TRANSCODE_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "videostream_transcode_duration_seconds",
            "Wall-clock time spent in ffmpeg per job",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0]),
    )
    .expect("valid metric definition")
});

pub static WEBHOOK_DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "videostream_webhook_deliveries_total",
            "Webhook delivery attempts by outcome",
        ),
        &["outcome"],
    )
    .expect("valid metric definition")
});

fn register_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(STREAMING_REQUESTS_TOTAL.clone()),
        Box::new(PLAYBACK_ERRORS_TOTAL.clone()),
        Box::new(JOBS_SUBMITTED_TOTAL.clone()),
        Box::new(JOBS_FINISHED_TOTAL.clone()),
        Box::new(JOBS_DEAD_LETTERED_TOTAL.clone()),
        Box::new(TRANSCODE_DURATION.clone()),
        Box::new(WEBHOOK_DELIVERIES_TOTAL.clone()),
    ];

    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            error!("Failed to register metric: {}", e);
        }
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Prometheus text exposition", body = String)
    ),
    tag = "Ops"
)]
pub async fn metrics_handler() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
