//! Health and tuner status endpoints

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::services::TunerStatus;
use crate::web::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub channels: usize,
    pub live_tuners: usize,
    pub max_tuners: usize,
    pub timestamp: DateTime<Utc>,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        channels: state.registry.len(),
        live_tuners: state.pool.live_count(),
        max_tuners: state.pool.max_tuners(),
        timestamp: Utc::now(),
    })
}

/// Snapshot of every tuner in the pool
pub async fn tuner_statuses(State(state): State<AppState>) -> Json<Vec<TunerStatus>> {
    Json(state.pool.statuses())
}
