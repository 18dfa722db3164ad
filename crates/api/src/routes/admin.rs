//! Administrative Routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use alerting::FlushOutcome;
use probe::Source;

use crate::{error::ApiError, AppState};

/// Register a source; it is probed from the next cycle on
pub async fn add_source(
    State(state): State<Arc<AppState>>,
    Json(source): Json<Source>,
) -> Result<(StatusCode, Json<Source>), ApiError> {
    state.scheduler.add_source(source.clone()).await?;
    info!(source = %source.name, chain = %source.chain, "Source added");
    Ok((StatusCode::CREATED, Json(source)))
}

/// Remove a source along with its alert state and analysis window
pub async fn remove_source(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Source>, ApiError> {
    let removed = state.scheduler.remove_source(&name).await?;
    info!(source = %name, "Source removed");
    Ok(Json(removed))
}

/// Request body for subscribing
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub id: String,
}

pub async fn add_subscriber(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubscribeRequest>,
) -> Result<StatusCode, ApiError> {
    let id = request.id.trim();
    if id.is_empty() {
        return Err(ApiError::BadRequest("Subscriber id must not be empty".to_string()));
    }

    let added = state.scheduler.aggregator().subscribers().add(id).await?;
    Ok(if added { StatusCode::CREATED } else { StatusCode::OK })
}

pub async fn remove_subscriber(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.scheduler.aggregator().subscribers().remove(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Subscriber {id} not found")))
    }
}

/// Deliver everything queued now, ignoring the flush interval
pub async fn flush(State(state): State<Arc<AppState>>) -> Result<Json<FlushOutcome>, ApiError> {
    let scheduler = &state.scheduler;
    let outcome = scheduler
        .aggregator()
        .flush(scheduler.sink().as_ref(), true)
        .await?;
    info!(?outcome, "Forced flush");
    Ok(Json(outcome))
}
