//! `/predictions/*` — read-only detector output over the current fleet.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use super::{AppState, Envelope};
use crate::detectors::bunching::{self, BunchingReport};
use crate::detectors::ghost::{self, GhostReport};
use crate::error::AppError;
use crate::realtime::read_fleet;

#[utoipa::path(
    get,
    path = "/predictions/ghosts",
    responses((status = 200, description = "Ghost bus and ghost route report", body = GhostReport)),
    tag = "predictions"
)]
pub async fn ghosts(State(state): State<AppState>) -> Result<Json<Envelope<GhostReport>>, AppError> {
    let vehicles = read_fleet(state.store.as_ref()).await?;
    Ok(Json(Envelope::new(ghost::detect(&vehicles, &state.catalog))))
}

#[utoipa::path(
    get,
    path = "/predictions/bunching",
    responses((status = 200, description = "Bunching alert report", body = BunchingReport)),
    tag = "predictions"
)]
pub async fn bunching_report(State(state): State<AppState>) -> Result<Json<Envelope<BunchingReport>>, AppError> {
    let vehicles = read_fleet(state.store.as_ref()).await?;
    Ok(Json(Envelope::new(bunching::detect(&vehicles))))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/predictions/ghosts", get(ghosts))
        .route("/predictions/bunching", get(bunching_report))
}
