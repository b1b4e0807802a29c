//! Status API
//!
//! Read-only HTTP view of the scheduler.

pub mod error;
pub mod health;
pub mod metrics;

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::scheduler::StatusBoard;

/// Create the status router
pub fn create_router(status: Arc<StatusBoard>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/metrics", get(metrics::list_metrics))
        .route("/api/metrics/{name}", get(metrics::get_metric))
        .with_state(status)
        .layer(TraceLayer::new_for_http())
}
