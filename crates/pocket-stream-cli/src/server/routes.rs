use crate::server::handlers;
use crate::server::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

pub const HEALTH_PATH: &str = "/health";
pub const VOICES_PATH: &str = "/voices";
pub const GENERATE_PATH: &str = "/generate";
pub const STREAM_PATH: &str = "/stream";

/// Routes over a shared session; every request is traced.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(handlers::health_check))
        .route(VOICES_PATH, get(handlers::voices))
        .route(GENERATE_PATH, post(handlers::generate))
        .route(STREAM_PATH, post(handlers::generate_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
