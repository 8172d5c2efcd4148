mod checkpoint;
mod error;
mod inference;
mod loader;
mod nn;
mod routes;
mod server;
mod store;
mod telemetry;

pub mod app;
pub mod config;

pub use app::start_app;
