//! Health Scorer: a cached 0-100 composite built from four weighted
//! components (on-time, route coverage, headway regularity, passenger
//! comfort), plus a per-route breakdown.

use std::collections::HashMap;

use chrono::Utc;
use tracing::info;

use crate::catalog::StaticCatalog;
use crate::crowd::CrowdingSnapshot;
use crate::detectors::bunching::BunchingReport;
use crate::detectors::ghost::GhostReport;
use crate::model::{HealthComponent, HealthReport, RouteHealth, VehicleRecord};
use crate::store::{self, LiveStore, StoreError};

/// Fallback expected-route-count when the static catalog failed to load
/// any routes at all.
const FALLBACK_EXPECTED_ROUTES: usize = 116;
const ON_TIME_THRESHOLD_S: i64 = 300;

fn score_to_grade(score: i64) -> (&'static str, &'static str) {
    if score >= 90 {
        ("A", "excellent")
    } else if score >= 75 {
        ("B", "good")
    } else if score >= 60 {
        ("C", "fair")
    } else if score >= 40 {
        ("D", "poor")
    } else {
        ("F", "crisis")
    }
}

fn route_status(score: f64) -> &'static str {
    if score >= 75.0 {
        "healthy"
    } else if score >= 50.0 {
        "warning"
    } else {
        "critical"
    }
}

/// Reads the 30s-TTL cache first; only recomputes (and re-caches) on miss.
pub async fn get(
    store: &dyn LiveStore,
    catalog: &StaticCatalog,
    vehicles: &[VehicleRecord],
    ghosts: &GhostReport,
    bunching: &BunchingReport,
    crowding: &CrowdingSnapshot,
    interventions_pending: usize,
) -> Result<HealthReport, StoreError> {
    if let Some(cached) = store.get(store::HEALTH_LATEST_KEY).await? {
        if let Ok(report) = serde_json::from_str::<HealthReport>(&cached) {
            return Ok(report);
        }
    }

    let report = compute(catalog, vehicles, ghosts, bunching, crowding, interventions_pending);
    let payload = serde_json::to_string(&report)?;
    store.set_with_ttl(store::HEALTH_LATEST_KEY, &payload, store::HEALTH_CACHE_TTL_SECS).await?;

    info!(score = report.score, grade = %report.grade, vehicles = report.total_live_vehicles, routes = report.total_routes_active, "health.calculated");
    Ok(report)
}

fn compute(
    catalog: &StaticCatalog,
    vehicles: &[VehicleRecord],
    ghosts: &GhostReport,
    bunching: &BunchingReport,
    crowding: &CrowdingSnapshot,
    interventions_pending: usize,
) -> HealthReport {
    let total_vehicles = vehicles.len();

    let mut on_time_count = 0usize;
    for v in vehicles {
        if v.delay_seconds.abs() <= ON_TIME_THRESHOLD_S {
            on_time_count += 1;
        }
    }
    let on_time_score = if total_vehicles > 0 {
        (on_time_count as f64 / total_vehicles as f64 * 100.0).min(100.0)
    } else {
        50.0
    };
    let on_time_component = HealthComponent {
        name: "On-Time Performance".to_string(),
        score: round1(on_time_score),
        weight: 0.40,
        weighted: round1(on_time_score * 0.40),
        detail: format!("{on_time_count}/{total_vehicles} buses within 5 min of schedule"),
    };

    let total_expected_routes =
        if catalog.route_map.is_empty() { FALLBACK_EXPECTED_ROUTES } else { catalog.route_map.len() };
    let routes_with_buses = ghosts.total_routes_with_buses;
    let ghost_score = if total_expected_routes > 0 {
        ((routes_with_buses as f64 / total_expected_routes as f64) / 0.5 * 100.0).min(100.0)
    } else {
        50.0
    };
    let ghost_component = HealthComponent {
        name: "Route Coverage".to_string(),
        score: round1(ghost_score.min(100.0)),
        weight: 0.25,
        weighted: round1(ghost_score.min(100.0) * 0.25),
        detail: format!("{routes_with_buses}/{total_expected_routes} routes have live vehicles"),
    };

    let bunching_score = if total_vehicles > 0 {
        let rate = bunching.total_pairs as f64 / (total_vehicles as f64 / 10.0).max(1.0);
        (100.0 - rate * 25.0).max(0.0)
    } else {
        100.0
    };
    let bunching_component = HealthComponent {
        name: "Headway Regularity".to_string(),
        score: round1(bunching_score),
        weight: 0.20,
        weighted: round1(bunching_score * 0.20),
        detail: format!("{} bunching pairs across {} routes", bunching.total_pairs, bunching.routes_affected),
    };

    let full_reports: usize = crowding.route_summaries.iter().map(|s| *s.levels.get("full").unwrap_or(&0)).sum();
    let standing_reports: usize =
        crowding.route_summaries.iter().map(|s| *s.levels.get("standing").unwrap_or(&0)).sum();
    let total_reports = crowding.reports_last_hour;
    let crowding_score = if total_reports > 0 {
        let high_pct = (full_reports as f64 + standing_reports as f64 * 0.5) / total_reports as f64;
        (100.0 - high_pct * 100.0).max(0.0)
    } else {
        85.0
    };
    let crowding_component = HealthComponent {
        name: "Passenger Comfort".to_string(),
        score: round1(crowding_score),
        weight: 0.15,
        weighted: round1(crowding_score * 0.15),
        detail: format!("{full_reports} 'full' + {standing_reports} 'standing' out of {total_reports} reports"),
    };

    let components =
        vec![on_time_component, ghost_component, bunching_component, crowding_component];
    let raw_score: f64 = components.iter().map(|c| c.weighted).sum();
    let score = (raw_score.round() as i64).clamp(0, 100);
    let (grade, status) = score_to_grade(score);

    let mut route_vehicles: HashMap<&str, Vec<&VehicleRecord>> = HashMap::new();
    for v in vehicles {
        if !v.route_id.is_empty() {
            route_vehicles.entry(&v.route_id).or_default().push(v);
        }
    }

    let bunching_by_route: HashMap<&str, usize> =
        bunching.alerts.iter().map(|a| (a.route_id.as_str(), a.pair_count)).collect();
    let crowding_by_route: HashMap<&str, f64> =
        crowding.route_summaries.iter().map(|s| (s.route_id.as_str(), s.avg_score)).collect();

    let mut route_healths: Vec<RouteHealth> = route_vehicles
        .iter()
        .map(|(rid, rvehicles)| {
            let n = rvehicles.len();
            let on_time = rvehicles.iter().filter(|v| v.delay_seconds.abs() <= ON_TIME_THRESHOLD_S).count();
            let delayed = n - on_time;
            let route_bunch = *bunching_by_route.get(rid).unwrap_or(&0);
            let route_crowd = *crowding_by_route.get(rid).unwrap_or(&0.0);

            let r_score = if n > 0 {
                let r_on_time = (on_time as f64 / n as f64) * 50.0;
                let r_bunch = (30.0 - route_bunch as f64 * 15.0).max(0.0);
                let r_crowd = (20.0 - route_crowd * 5.0).max(0.0);
                r_on_time + r_bunch + r_crowd
            } else {
                0.0
            };

            let route_name = rvehicles
                .iter()
                .find_map(|v| {
                    if !v.route_short_name.is_empty() && v.route_short_name != *rid {
                        Some(v.route_short_name.clone())
                    } else {
                        None
                    }
                })
                .unwrap_or_else(|| catalog.get_route_name(rid));

            RouteHealth {
                route_id: rid.to_string(),
                route_name,
                live_vehicles: n,
                on_time_count: on_time,
                delayed_count: delayed,
                ghost_vehicles: 0,
                bunching_pairs: route_bunch,
                crowding_score: round2(route_crowd),
                health_score: round1(r_score),
                status: route_status(r_score).to_string(),
            }
        })
        .collect();

    route_healths.sort_by(|a, b| a.health_score.total_cmp(&b.health_score));
    let total_routes_active = route_vehicles.len();
    let top_routes: Vec<RouteHealth> = route_healths.into_iter().take(10).collect();

    HealthReport {
        score,
        grade: grade.to_string(),
        status: status.to_string(),
        components,
        top_routes,
        total_live_vehicles: total_vehicles,
        total_routes_active,
        interventions_pending,
        generated_at: Utc::now().to_rfc3339(),
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OccupancyStatus;
    use crate::store::MemoryStore;

    fn vehicle(id: &str, route_id: &str, delay: i64) -> VehicleRecord {
        VehicleRecord {
            vehicle_id: id.to_string(),
            route_id: route_id.to_string(),
            route_short_name: "39A".to_string(),
            trip_id: None,
            latitude: 53.35,
            longitude: -6.26,
            bearing: None,
            speed_kmh: None,
            occupancy_status: OccupancyStatus::Unknown,
            delay_seconds: delay,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    fn empty_reports() -> GhostReport {
        GhostReport {
            signal_lost: vec![],
            dead_routes: vec![],
            total_live_vehicles: 0,
            total_ghost_vehicles: 0,
            total_routes_with_buses: 0,
            total_routes_without_buses: 0,
            generated_at: Utc::now().to_rfc3339(),
        }
    }

    fn empty_bunching() -> BunchingReport {
        BunchingReport { alerts: vec![], total_pairs: 0, routes_affected: 0, total_live_vehicles: 0, generated_at: Utc::now().to_rfc3339() }
    }

    fn empty_crowding() -> CrowdingSnapshot {
        CrowdingSnapshot { total_reports: 0, reports_last_hour: 0, route_summaries: vec![], recent_reports: vec![], generated_at: Utc::now().to_rfc3339() }
    }

    #[test]
    fn no_vehicles_yields_neutral_score_defaults() {
        let catalog = StaticCatalog::default();
        let report = compute(&catalog, &[], &empty_reports(), &empty_bunching(), &empty_crowding(), 0);
        // on_time=50*0.4 + ghost=50*0.25 + bunch=100*0.2 + crowd=85*0.15 = 20+12.5+20+12.75=65.25 -> 65
        assert_eq!(report.score, 65);
        assert_eq!(report.grade, "C");
    }

    #[test]
    fn all_on_time_vehicles_score_high_on_time_component() {
        let catalog = StaticCatalog::default();
        let vehicles = vec![vehicle("V1", "R1", 0), vehicle("V2", "R1", 10)];
        let report = compute(&catalog, &vehicles, &empty_reports(), &empty_bunching(), &empty_crowding(), 0);
        assert_eq!(report.components[0].score, 100.0);
        assert_eq!(report.total_live_vehicles, 2);
        assert_eq!(report.total_routes_active, 1);
    }

    #[tokio::test]
    async fn cached_value_is_returned_without_recompute() {
        let store = MemoryStore::new();
        let catalog = StaticCatalog::default();
        let cached = HealthReport {
            score: 77,
            grade: "B".into(),
            status: "good".into(),
            components: vec![],
            top_routes: vec![],
            total_live_vehicles: 3,
            total_routes_active: 1,
            interventions_pending: 2,
            generated_at: Utc::now().to_rfc3339(),
        };
        store.set_with_ttl(store::HEALTH_LATEST_KEY, &serde_json::to_string(&cached).unwrap(), 30).await.unwrap();

        let report = get(&store, &catalog, &[], &empty_reports(), &empty_bunching(), &empty_crowding(), 0)
            .await
            .unwrap();
        assert_eq!(report.score, 77);
        assert_eq!(report.total_live_vehicles, 3);
    }
}
