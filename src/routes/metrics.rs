use crate::server::SharedState;
use axum::{extract::State, http::StatusCode};
use prometheus::{Encoder, TextEncoder};

/// Text exposition of the prediction counters and histograms for scraping.
pub async fn metrics_handler(State(state): State<SharedState>) -> Result<String, StatusCode> {
    let metric_families = state.metrics.registry.gather();

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&metric_families, &mut buffer)
        .map_err(|e| {
            tracing::error!("failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    String::from_utf8(buffer).map_err(|e| {
        tracing::error!("metrics exposition is not valid UTF-8: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
