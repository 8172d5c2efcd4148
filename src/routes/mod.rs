mod health;
mod metrics;
mod predict;
mod root;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health::healthcheck))
        .route("/", get(root::root))
        .route("/predict", post(predict::predict))
        .route("/metrics", get(metrics::metrics_handler))
}
