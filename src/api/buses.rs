//! `/buses` — current fleet snapshot and single-vehicle lookup.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use super::{AppState, Envelope};
use crate::error::AppError;
use crate::model::VehicleRecord;
use crate::realtime::read_fleet;

/// Current fleet snapshot.
#[utoipa::path(
    get,
    path = "/buses",
    responses((status = 200, description = "Current fleet snapshot", body = [VehicleRecord])),
    tag = "buses"
)]
pub async fn list_buses(State(state): State<AppState>) -> Result<Json<Envelope<Vec<VehicleRecord>>>, AppError> {
    let vehicles = read_fleet(state.store.as_ref()).await?;
    Ok(Json(Envelope::new(vehicles)))
}

/// Single vehicle by id, or 404 if it isn't in the current snapshot.
#[utoipa::path(
    get,
    path = "/buses/{id}",
    params(("id" = String, Path, description = "Vehicle id")),
    responses(
        (status = 200, description = "The vehicle", body = VehicleRecord),
        (status = 404, description = "No such vehicle"),
    ),
    tag = "buses"
)]
pub async fn get_bus(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<VehicleRecord>>, AppError> {
    let vehicles = read_fleet(state.store.as_ref()).await?;
    let vehicle = vehicles
        .into_iter()
        .find(|v| v.vehicle_id == id)
        .ok_or_else(|| AppError::NotFound(format!("vehicle {id} not found")))?;
    Ok(Json(Envelope::new(vehicle)))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/buses", get(list_buses)).route("/buses/{id}", get(get_bus))
}
