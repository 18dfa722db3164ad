//! Report and History Routes

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use alerting::{HistoryEntry, Report};

use crate::{error::ApiError, AppState};

/// Response for the history endpoint
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// Most recent first
    pub data: Vec<HistoryEntry>,
    pub count: usize,
    pub pending: Vec<String>,
}

/// Delivered alerts, newest first, plus what is still queued
pub async fn get_history(State(state): State<Arc<AppState>>) -> Result<Json<HistoryResponse>, ApiError> {
    let aggregator = state.scheduler.aggregator();
    let mut data = aggregator.history().await?;
    data.reverse();
    Ok(Json(HistoryResponse {
        count: data.len(),
        data,
        pending: aggregator.pending().await,
    }))
}

/// The most recently saved report
pub async fn get_latest(State(state): State<Arc<AppState>>) -> Result<Json<Report>, ApiError> {
    state
        .scheduler
        .aggregator()
        .latest_report()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No reports yet".to_string()))
}

/// Ids of recent reports, newest first
pub async fn get_recent(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.scheduler.aggregator().recent_reports().await?))
}

/// A report by id
pub async fn get_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Report>, ApiError> {
    state
        .scheduler
        .aggregator()
        .report(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Report {id} not found")))
}
