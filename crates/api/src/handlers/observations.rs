//! Handlers for the live observation feed and history paging.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use busline_core::observation::{Observation, ObservationCursor, ObservationInput};
use busline_core::prediction::clamp_limit;
use busline_engine::Ingested;
use serde::Serialize;

use crate::error::AppResult;
use crate::query::{ApiJson, ApiQuery, ObservationsQuery};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationPageResponse {
    pub observations: Vec<Observation>,
    pub count: usize,
    /// Pass back as `afterTime`/`afterId` to fetch the next page.
    pub next_cursor: Option<ObservationCursor>,
}

/// POST /observations
///
/// Record one arrival and resolve the predictions it settles.
pub async fn record_observation(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<ObservationInput>,
) -> AppResult<(StatusCode, Json<Ingested>)> {
    let ingested = state.engine.record_observation(&input).await?;
    Ok((StatusCode::CREATED, Json(ingested)))
}

/// GET /observations
pub async fn list_observations(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<ObservationsQuery>,
) -> AppResult<Json<ObservationPageResponse>> {
    let cursor = params.cursor()?;
    let page = state
        .engine
        .samples
        .query_page(&params.to_filter(), cursor, clamp_limit(params.limit))
        .await?;

    Ok(Json(ObservationPageResponse {
        count: page.observations.len(),
        observations: page.observations,
        next_cursor: page.next_cursor,
    }))
}
