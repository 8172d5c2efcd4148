use axum::{response::IntoResponse, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct Message {
    message: String,
}

pub async fn root() -> impl IntoResponse {
    Json(Message {
        message: format!(
            "{} v{} - plant disease inference service",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
    })
}
