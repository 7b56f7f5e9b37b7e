//! Ghost bus detection: vehicles gone silent, and routes with no live
//! vehicles at all.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::catalog::StaticCatalog;
use crate::model::VehicleRecord;

use super::parse_timestamp_or_now;

/// A vehicle with no update for this many seconds is a ghost.
pub const STALE_THRESHOLD_S: i64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GhostBus {
    pub vehicle_id: String,
    pub route_id: String,
    pub route_short_name: String,
    pub last_latitude: f64,
    pub last_longitude: f64,
    pub last_seen: String,
    pub stale_seconds: i64,
    /// Always `"signal-lost"` — the only ghost-bus type this engine emits.
    pub ghost_type: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GhostRoute {
    pub route_id: String,
    pub route_short_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GhostReport {
    pub signal_lost: Vec<GhostBus>,
    pub dead_routes: Vec<GhostRoute>,
    pub total_live_vehicles: usize,
    pub total_ghost_vehicles: usize,
    pub total_routes_with_buses: usize,
    pub total_routes_without_buses: usize,
    pub generated_at: String,
}

/// Two kinds of ghost: a vehicle whose last update is stale (`signal_lost`),
/// and a route in the static catalog with zero live vehicles right now
/// (`dead_routes`).
pub fn detect(vehicles: &[VehicleRecord], catalog: &StaticCatalog) -> GhostReport {
    let now = Utc::now();

    let mut ghost_buses = Vec::new();
    let mut live_route_ids: HashSet<&str> = HashSet::new();
    let mut live_count = 0usize;

    for v in vehicles {
        let ts = parse_timestamp_or_now(&v.timestamp, now);
        let age_s = (now - ts).num_seconds();

        if age_s > STALE_THRESHOLD_S {
            ghost_buses.push(GhostBus {
                vehicle_id: v.vehicle_id.clone(),
                route_id: v.route_id.clone(),
                route_short_name: v.route_short_name.clone(),
                last_latitude: v.latitude,
                last_longitude: v.longitude,
                last_seen: v.timestamp.clone(),
                stale_seconds: age_s,
                ghost_type: "signal-lost",
            });
        } else {
            live_count += 1;
            if !v.route_id.is_empty() {
                live_route_ids.insert(&v.route_id);
            }
        }
    }

    let mut ghost_route_ids: Vec<&String> =
        catalog.route_map.keys().filter(|rid| !live_route_ids.contains(rid.as_str())).collect();
    ghost_route_ids.sort();

    let ghost_routes: Vec<GhostRoute> = ghost_route_ids
        .iter()
        .map(|rid| GhostRoute { route_id: (*rid).clone(), route_short_name: catalog.get_route_name(rid) })
        .collect();

    GhostReport {
        total_ghost_vehicles: ghost_buses.len(),
        total_routes_with_buses: live_route_ids.len(),
        total_routes_without_buses: ghost_routes.len(),
        signal_lost: ghost_buses,
        dead_routes: ghost_routes,
        total_live_vehicles: live_count,
        generated_at: now.to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OccupancyStatus;

    fn vehicle(id: &str, route_id: &str, timestamp: &str) -> VehicleRecord {
        VehicleRecord {
            vehicle_id: id.to_string(),
            route_id: route_id.to_string(),
            route_short_name: route_id.to_string(),
            trip_id: None,
            latitude: 53.35,
            longitude: -6.26,
            bearing: None,
            speed_kmh: None,
            occupancy_status: OccupancyStatus::Unknown,
            delay_seconds: 0,
            timestamp: timestamp.to_string(),
        }
    }

    #[test]
    fn stale_vehicle_flagged_signal_lost() {
        let old_ts = (Utc::now() - chrono::Duration::seconds(200)).to_rfc3339();
        let vehicles = vec![vehicle("V1", "R1", &old_ts)];
        let catalog = StaticCatalog::default();
        let report = detect(&vehicles, &catalog);
        assert_eq!(report.total_ghost_vehicles, 1);
        assert_eq!(report.signal_lost[0].ghost_type, "signal-lost");
        assert_eq!(report.total_live_vehicles, 0);
    }

    #[test]
    fn fresh_vehicle_counts_as_live_and_clears_its_route() {
        let fresh_ts = Utc::now().to_rfc3339();
        let vehicles = vec![vehicle("V1", "R1", &fresh_ts)];
        let mut catalog = StaticCatalog::default();
        catalog.route_map.insert("R1".into(), "39A".into());
        catalog.route_map.insert("R2".into(), "140".into());

        let report = detect(&vehicles, &catalog);
        assert_eq!(report.total_live_vehicles, 1);
        assert_eq!(report.total_ghost_vehicles, 0);
        assert_eq!(report.dead_routes.len(), 1);
        assert_eq!(report.dead_routes[0].route_id, "R2");
    }

    #[test]
    fn unparseable_timestamp_treated_as_fresh() {
        let vehicles = vec![vehicle("V1", "R1", "not-a-timestamp")];
        let catalog = StaticCatalog::default();
        let report = detect(&vehicles, &catalog);
        assert_eq!(report.total_live_vehicles, 1);
    }
}
