use crate::error::{LoadError, PredictError};
use crate::server::SharedState;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::instrument;

#[derive(Serialize)]
pub struct PredictResponse {
    status: &'static str,
    prediction: usize,
    confidence: f32,
    probs: Vec<Vec<f32>>,
}

#[derive(Debug, Error)]
pub enum PredictRequestError {
    #[error("no `file` field in multipart payload")]
    MissingFile,
    #[error("malformed multipart payload: {0}")]
    Multipart(String),
    #[error(transparent)]
    Predict(#[from] PredictError),
}

impl IntoResponse for PredictRequestError {
    fn into_response(self) -> Response {
        let status = match &self {
            PredictRequestError::MissingFile | PredictRequestError::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            PredictRequestError::Predict(PredictError::InvalidImage(_)) => StatusCode::BAD_REQUEST,
            PredictRequestError::Predict(PredictError::Load(
                LoadError::StoreUnavailable(_) | LoadError::FetchFailed { .. },
            )) => StatusCode::SERVICE_UNAVAILABLE,
            PredictRequestError::Predict(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[instrument(skip(state, multipart))]
pub async fn predict(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, PredictRequestError> {
    // held across the whole request; drop records count, latency, in-flight
    let _tracker = state.metrics.start_request();

    let image_data = read_file_field(&mut multipart).await?;
    state.metrics.record_payload_bytes(image_data.len() as u64);

    let model = state
        .model_cache
        .get_or_load()
        .await
        .map_err(PredictError::from)?;
    let result = model.predict(&image_data).map_err(|e| {
        tracing::error!("prediction failed: {}", e);
        e
    })?;

    Ok(Json(PredictResponse {
        status: "ok",
        prediction: result.prediction,
        confidence: result.confidence,
        probs: result.probs,
    }))
}

async fn read_file_field(multipart: &mut Multipart) -> Result<Bytes, PredictRequestError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PredictRequestError::Multipart(e.to_string()))?
    {
        if field.name() == Some("file") {
            return field
                .bytes()
                .await
                .map_err(|e| PredictRequestError::Multipart(e.to_string()));
        }
    }

    Err(PredictRequestError::MissingFile)
}
