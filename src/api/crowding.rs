//! `/crowding/*` — rider crowd report ingress and network overview.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use super::{AppState, Envelope};
use crate::crowd::{self, CrowdingSnapshot};
use crate::error::AppError;
use crate::model::{CrowdReport, CrowdReportRequest};

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    limit: Option<isize>,
}

#[utoipa::path(
    get,
    path = "/crowding/snapshot",
    responses((status = 200, description = "Network-wide crowding overview", body = CrowdingSnapshot)),
    tag = "crowding"
)]
pub async fn snapshot(State(state): State<AppState>) -> Result<Json<Envelope<CrowdingSnapshot>>, AppError> {
    Ok(Json(Envelope::new(crowd::snapshot(state.store.as_ref()).await?)))
}

#[utoipa::path(
    get,
    path = "/crowding/recent",
    params(("limit" = Option<isize>, Query, description = "1-100, default 20")),
    responses((status = 200, description = "Recent crowd reports", body = [CrowdReport])),
    tag = "crowding"
)]
pub async fn recent(
    State(state): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> Result<Json<Envelope<Vec<CrowdReport>>>, AppError> {
    let limit = q.limit.unwrap_or(20);
    if !(1..=100).contains(&limit) {
        return Err(AppError::BadRequest("limit must be between 1 and 100".to_string()));
    }
    Ok(Json(Envelope::new(crowd::recent(state.store.as_ref(), limit).await?)))
}

#[utoipa::path(
    post,
    path = "/crowding/report",
    request_body = CrowdReportRequest,
    responses((status = 200, description = "Stored crowd report", body = CrowdReport)),
    tag = "crowding"
)]
pub async fn submit_report(
    State(state): State<AppState>,
    Json(req): Json<CrowdReportRequest>,
) -> Result<Json<Envelope<CrowdReport>>, AppError> {
    Ok(Json(Envelope::new(crowd::submit(state.store.as_ref(), req).await?)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/crowding/snapshot", get(snapshot))
        .route("/crowding/recent", get(recent))
        .route("/crowding/report", post(submit_report))
}
