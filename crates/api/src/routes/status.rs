//! Status Routes

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use alerting::KpiTotals;
use analyzer::{Summary, WindowEntry};
use scheduler::SourceView;
use storage::Sample;

use crate::{error::ApiError, AppState};

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: i64,
    pub version: String,
    pub uptime_seconds: u64,
    pub pending_alerts: usize,
    pub last_flush: Option<DateTime<Utc>>,
}

/// Health check handler
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let aggregator = state.scheduler.aggregator();
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now().timestamp(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        pending_alerts: aggregator.pending().await.len(),
        last_flush: aggregator.last_flush().await,
    })
}

/// Response for the status endpoint
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub sources: Vec<SourceView>,
    pub count: usize,
    /// Sources whose latest check was not ok
    pub unhealthy_count: usize,
    /// KPI sums per bucket from the latest cycle
    pub totals: KpiTotals,
}

/// Every source with its status and last known lag
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let sources = state.scheduler.sources().await;
    let unhealthy = sources
        .iter()
        .filter(|view| {
            !matches!(
                view.status.status,
                alerting::SourceStatus::Ok | alerting::SourceStatus::NeverChecked
            )
        })
        .count();

    Json(StatusResponse {
        count: sources.len(),
        unhealthy_count: unhealthy,
        sources,
        totals: state.scheduler.totals().await,
    })
}

/// Current inconsistency summaries
pub async fn get_analysis(State(state): State<Arc<AppState>>) -> Json<Vec<Summary>> {
    Json(state.scheduler.analysis().await)
}

#[derive(Debug, Serialize)]
pub struct WindowResponse {
    pub source: String,
    pub entries: Vec<WindowEntry>,
}

/// Analysis window of one source
pub async fn get_window(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<WindowResponse>, ApiError> {
    let known = state
        .scheduler
        .sources()
        .await
        .iter()
        .any(|view| view.source.name == name);
    if !known {
        return Err(ApiError::NotFound(format!("Source '{name}' not found")));
    }

    let entries = state.scheduler.window(&name).await;
    Ok(Json(WindowResponse { source: name, entries }))
}

/// Query parameters for the samples endpoint
#[derive(Debug, Deserialize)]
pub struct SampleQuery {
    /// Defaults to one day before `to`
    pub from: Option<DateTime<Utc>>,
    /// Defaults to now
    pub to: Option<DateTime<Utc>>,
    /// Only samples of this source
    pub source: Option<String>,
}

/// Response for the samples endpoint
#[derive(Debug, Serialize)]
pub struct SampleResponse {
    pub data: Vec<Sample>,
    pub count: usize,
}

/// Stored samples within a time range
pub async fn get_samples(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SampleQuery>,
) -> Result<Json<SampleResponse>, ApiError> {
    let to = params.to.unwrap_or_else(Utc::now);
    let from = params.from.unwrap_or(to - Duration::days(1));
    if from > to {
        return Err(ApiError::BadRequest("`from` must not be after `to`".to_string()));
    }

    let mut data = state
        .scheduler
        .samples()
        .query(from, to)
        .await
        .map_err(alerting::AlertError::from)?;
    if let Some(source) = &params.source {
        data.retain(|sample| &sample.source_name == source);
    }

    Ok(Json(SampleResponse {
        count: data.len(),
        data,
    }))
}
