use axum::{response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
}

/// Always available, independent of model-load state.
pub async fn healthcheck() -> impl IntoResponse {
    Json(Status {
        status: "ok".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    // the handler takes no state at all: a missing or failed model load
    // cannot affect it
    #[tokio::test]
    async fn health_is_ok_regardless_of_model_state() {
        let response = healthcheck().await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], br#"{"status":"ok"}"#);
    }
}
