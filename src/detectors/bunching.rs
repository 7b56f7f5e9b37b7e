//! Bunching detection: pairwise distance checks within each route's live
//! fleet, severity-scored and sorted worst-first.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::VehicleRecord;

use super::haversine_m;

/// Two buses within this distance (meters) on the same route = bunching.
pub const BUNCH_THRESHOLD_M: f64 = 400.0;
pub const SEVERE_THRESHOLD_M: f64 = 200.0;
pub const MODERATE_THRESHOLD_M: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Severe,
    Moderate,
    Mild,
}

impl Severity {
    fn from_distance(dist_m: f64) -> Self {
        if dist_m < SEVERE_THRESHOLD_M {
            Self::Severe
        } else if dist_m < MODERATE_THRESHOLD_M {
            Self::Moderate
        } else {
            Self::Mild
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Severe => 0,
            Self::Moderate => 1,
            Self::Mild => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Severe => "severe",
            Self::Moderate => "moderate",
            Self::Mild => "mild",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BunchingPair {
    pub vehicle_a: String,
    pub vehicle_b: String,
    pub route_id: String,
    pub route_short_name: String,
    pub distance_m: f64,
    pub severity: Severity,
    pub midpoint_lat: f64,
    pub midpoint_lon: f64,
    pub vehicle_a_lat: f64,
    pub vehicle_a_lon: f64,
    pub vehicle_b_lat: f64,
    pub vehicle_b_lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BunchingAlert {
    pub route_id: String,
    pub route_short_name: String,
    pub pair_count: usize,
    pub worst_distance_m: f64,
    pub severity: Severity,
    pub bunched_pairs: Vec<BunchingPair>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BunchingReport {
    pub alerts: Vec<BunchingAlert>,
    pub total_pairs: usize,
    pub routes_affected: usize,
    pub total_live_vehicles: usize,
    pub generated_at: String,
}

/// Groups vehicles by route, checks every pair, and keeps those closer
/// than `BUNCH_THRESHOLD_M`. Alerts sort severe-first, then by worst
/// distance within a severity tier.
pub fn detect(vehicles: &[VehicleRecord]) -> BunchingReport {
    let mut route_groups: HashMap<&str, Vec<&VehicleRecord>> = HashMap::new();
    for v in vehicles {
        if !v.route_id.is_empty() {
            route_groups.entry(&v.route_id).or_default().push(v);
        }
    }

    let mut alerts = Vec::new();
    let mut total_pairs = 0usize;

    for (route_id, buses) in &route_groups {
        if buses.len() < 2 {
            continue;
        }

        let mut pairs = Vec::new();
        for i in 0..buses.len() {
            for j in (i + 1)..buses.len() {
                let a = buses[i];
                let b = buses[j];
                let dist = haversine_m(a.latitude, a.longitude, b.latitude, b.longitude);
                if dist < BUNCH_THRESHOLD_M {
                    pairs.push(BunchingPair {
                        vehicle_a: a.vehicle_id.clone(),
                        vehicle_b: b.vehicle_id.clone(),
                        route_id: route_id.to_string(),
                        route_short_name: a.route_short_name.clone(),
                        distance_m: (dist * 10.0).round() / 10.0,
                        severity: Severity::from_distance(dist),
                        midpoint_lat: (a.latitude + b.latitude) / 2.0,
                        midpoint_lon: (a.longitude + b.longitude) / 2.0,
                        vehicle_a_lat: a.latitude,
                        vehicle_a_lon: a.longitude,
                        vehicle_b_lat: b.latitude,
                        vehicle_b_lon: b.longitude,
                    });
                }
            }
        }

        if let Some(worst) = pairs.iter().min_by(|p, q| p.distance_m.total_cmp(&q.distance_m)).cloned() {
            total_pairs += pairs.len();
            alerts.push(BunchingAlert {
                route_id: route_id.to_string(),
                route_short_name: pairs[0].route_short_name.clone(),
                pair_count: pairs.len(),
                worst_distance_m: worst.distance_m,
                severity: worst.severity,
                bunched_pairs: pairs,
            });
        }
    }

    alerts.sort_by(|a, b| {
        a.severity.rank().cmp(&b.severity.rank()).then(a.worst_distance_m.total_cmp(&b.worst_distance_m))
    });

    BunchingReport {
        routes_affected: alerts.len(),
        total_pairs,
        alerts,
        total_live_vehicles: vehicles.len(),
        generated_at: Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OccupancyStatus;

    fn vehicle(id: &str, route_id: &str, lat: f64, lon: f64) -> VehicleRecord {
        VehicleRecord {
            vehicle_id: id.to_string(),
            route_id: route_id.to_string(),
            route_short_name: "39A".to_string(),
            trip_id: None,
            latitude: lat,
            longitude: lon,
            bearing: None,
            speed_kmh: None,
            occupancy_status: OccupancyStatus::Unknown,
            delay_seconds: 0,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn two_close_buses_on_same_route_flagged_severe() {
        // ~0 m apart.
        let vehicles = vec![
            vehicle("V1", "R1", 53.3500, -6.2600),
            vehicle("V2", "R1", 53.3501, -6.2601),
        ];
        let report = detect(&vehicles);
        assert_eq!(report.total_pairs, 1);
        assert_eq!(report.alerts[0].severity, Severity::Severe);
    }

    #[test]
    fn buses_on_different_routes_never_pair() {
        let vehicles = vec![
            vehicle("V1", "R1", 53.3500, -6.2600),
            vehicle("V2", "R2", 53.3500, -6.2600),
        ];
        let report = detect(&vehicles);
        assert!(report.alerts.is_empty());
    }

    #[test]
    fn buses_far_apart_not_flagged() {
        let vehicles = vec![
            vehicle("V1", "R1", 53.30, -6.20),
            vehicle("V2", "R1", 53.40, -6.30),
        ];
        let report = detect(&vehicles);
        assert!(report.alerts.is_empty());
    }

    #[test]
    fn single_vehicle_on_route_cannot_bunch() {
        let vehicles = vec![vehicle("V1", "R1", 53.35, -6.26)];
        let report = detect(&vehicles);
        assert!(report.alerts.is_empty());
    }
}
