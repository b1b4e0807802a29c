//! Metric status endpoints

use axum::{
    Json,
    extract::{Path, State},
};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::scheduler::{MetricStatus, StatusBoard};

/// GET /api/metrics
/// Every scheduled metric, ordered by name
pub async fn list_metrics(State(status): State<Arc<StatusBoard>>) -> Json<Vec<MetricStatus>> {
    tracing::debug!("Listing metric status");
    Json(status.snapshot())
}

/// GET /api/metrics/{name}
pub async fn get_metric(
    State(status): State<Arc<StatusBoard>>,
    Path(name): Path<String>,
) -> ApiResult<Json<MetricStatus>> {
    status
        .get(&name)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Metric {} not found", name)))
}
