//! `/ops/*` — intervention engine controls, network health, and stats.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{AppState, Envelope};
use crate::crowd;
use crate::detectors::{bunching, ghost};
use crate::error::AppError;
use crate::interventions;
use crate::model::{HealthReport, Intervention, InterventionAction, InterventionStatus, InterventionType};
use crate::realtime::read_fleet;
use crate::stats::StatsSummary;

#[derive(Debug, Deserialize)]
pub struct InterventionsQuery {
    refresh: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<isize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InterventionsResponse {
    pub active: Vec<Intervention>,
    pub pending_count: usize,
    pub by_type: HashMap<String, usize>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InterventionActionRequest {
    pub action: InterventionAction,
}

fn type_key(kind: InterventionType) -> &'static str {
    match kind {
        InterventionType::Hold => "hold",
        InterventionType::Deploy => "deploy",
        InterventionType::Surge => "surge",
        InterventionType::Express => "express",
    }
}

/// Active interventions, optionally re-running the detectors and
/// regenerating the list first.
#[utoipa::path(
    get,
    path = "/ops/interventions",
    params(("refresh" = Option<bool>, Query, description = "Re-run detectors and regenerate before listing")),
    responses((status = 200, description = "Active interventions", body = InterventionsResponse)),
    tag = "ops"
)]
pub async fn list_interventions(
    State(state): State<AppState>,
    Query(q): Query<InterventionsQuery>,
) -> Result<Json<Envelope<InterventionsResponse>>, AppError> {
    if q.refresh.unwrap_or(false) {
        let vehicles = read_fleet(state.store.as_ref()).await?;
        let ghosts = ghost::detect(&vehicles, &state.catalog);
        let bunching_report = bunching::detect(&vehicles);
        let crowding = crowd::snapshot(state.store.as_ref()).await?;
        interventions::generate(
            state.store.as_ref(),
            &state.catalog,
            &bunching_report,
            &ghosts,
            &crowding,
            state.timezone,
        )
        .await?;
    }

    let active = interventions::active(state.store.as_ref()).await?;
    let pending_count = active.iter().filter(|i| i.status == InterventionStatus::Pending).count();
    let mut by_type: HashMap<String, usize> = HashMap::new();
    for i in &active {
        *by_type.entry(type_key(i.kind).to_string()).or_insert(0) += 1;
    }

    Ok(Json(Envelope::new(InterventionsResponse { active, pending_count, by_type })))
}

/// Approve or dismiss one active intervention.
#[utoipa::path(
    post,
    path = "/ops/interventions/{id}",
    params(("id" = String, Path, description = "Intervention id")),
    request_body = InterventionActionRequest,
    responses(
        (status = 200, description = "Updated intervention", body = Intervention),
        (status = 404, description = "No such intervention"),
    ),
    tag = "ops"
)]
pub async fn action_intervention(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<InterventionActionRequest>,
) -> Result<Json<Envelope<Intervention>>, AppError> {
    let updated = interventions::action(state.store.as_ref(), &state.action_lock, &id, req.action)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("intervention {id} not found")))?;
    Ok(Json(Envelope::new(updated)))
}

#[utoipa::path(
    get,
    path = "/ops/interventions/history",
    params(("limit" = Option<isize>, Query, description = "default 50, max 200")),
    responses((status = 200, description = "Past intervention actions", body = [Intervention])),
    tag = "ops"
)]
pub async fn interventions_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Envelope<Vec<Intervention>>>, AppError> {
    let limit = q.limit.unwrap_or(50);
    if !(1..=200).contains(&limit) {
        return Err(AppError::BadRequest("limit must be between 1 and 200".to_string()));
    }
    Ok(Json(Envelope::new(interventions::history(state.store.as_ref(), limit).await?)))
}

#[utoipa::path(
    get,
    path = "/ops/health",
    responses((status = 200, description = "Composite network health report", body = HealthReport)),
    tag = "ops"
)]
pub async fn network_health(State(state): State<AppState>) -> Result<Json<Envelope<HealthReport>>, AppError> {
    let vehicles = read_fleet(state.store.as_ref()).await?;
    let ghosts = ghost::detect(&vehicles, &state.catalog);
    let bunching_report = bunching::detect(&vehicles);
    let crowding = crowd::snapshot(state.store.as_ref()).await?;
    // A failed active-list read just means "assume nothing's pending" —
    // it shouldn't stop the health score from being served.
    let pending = interventions::active(state.store.as_ref())
        .await
        .map(|active| active.iter().filter(|i| i.status == InterventionStatus::Pending).count())
        .unwrap_or(0);

    let report = crate::health::get(
        state.store.as_ref(),
        &state.catalog,
        &vehicles,
        &ghosts,
        &bunching_report,
        &crowding,
        pending,
    )
    .await?;
    Ok(Json(Envelope::new(report)))
}

#[utoipa::path(
    get,
    path = "/ops/stats/summary",
    responses((status = 200, description = "Aggregated historical network stats", body = StatsSummary)),
    tag = "ops"
)]
pub async fn stats_summary(State(state): State<AppState>) -> Result<Json<Envelope<StatsSummary>>, AppError> {
    let summary = crate::stats::summary(std::path::Path::new(&state.config.stats_file))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(Envelope::new(summary)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ops/interventions", get(list_interventions))
        .route("/ops/interventions/{id}", post(action_intervention))
        .route("/ops/interventions/history", get(interventions_history))
        .route("/ops/health", get(network_health))
        .route("/ops/stats/summary", get(stats_summary))
}
