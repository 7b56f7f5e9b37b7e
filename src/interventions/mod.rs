//! Intervention Engine: turns detector output into specific, actionable
//! recommendations a controller can approve or dismiss with one click.
//!
//! HOLD comes from bunching, DEPLOY from ghosts, SURGE from crowding.
//! EXPRESS exists as a type but nothing in this engine ever generates one
//! — cross-modal delay-recovery data isn't available yet.

use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::catalog::{StaticCatalog, DEFAULT_CENTRE, DEPOTS};
use crate::crowd::CrowdingSnapshot;
use crate::detectors::bunching::BunchingReport;
use crate::detectors::ghost::GhostReport;
use crate::detectors::haversine_m;
use crate::model::{Intervention, InterventionAction, InterventionPriority, InterventionStatus, InterventionTrigger, InterventionType};
use crate::store::{self, LiveStore, PipelineOp, StoreError};

const DEFAULT_HEADWAY_MIN: i64 = 10;
const AVG_BUS_CAPACITY: f64 = 75.0;

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

struct Depot {
    name: &'static str,
    distance_m: f64,
}

fn nearest_depot(lat: f64, lon: f64) -> Depot {
    let mut best = &DEPOTS[0];
    let mut best_dist = f64::INFINITY;
    for depot in DEPOTS {
        let d = haversine_m(lat, lon, depot.latitude, depot.longitude);
        if d < best_dist {
            best_dist = d;
            best = depot;
        }
    }
    Depot { name: best.name, distance_m: best_dist.round() }
}

struct NearestStop {
    name: String,
}

fn nearest_stop(catalog: &StaticCatalog, lat: f64, lon: f64) -> Option<NearestStop> {
    catalog
        .stop_map
        .values()
        .min_by(|(_, slat1, slon1), (_, slat2, slon2)| {
            haversine_m(lat, lon, *slat1, *slon1).total_cmp(&haversine_m(lat, lon, *slat2, *slon2))
        })
        .map(|(name, _, _)| NearestStop { name: name.clone() })
}

/// Load factor by local hour: 0.60 peak (7-9, 16-19), 0.40 midday, 0.25 off-peak.
fn load_factor_for_hour(hour: u32) -> f64 {
    if (7..=9).contains(&hour) || (16..=19).contains(&hour) {
        0.60
    } else if hour > 9 && hour < 16 {
        0.40
    } else {
        0.25
    }
}

fn estimate_passengers_on_route(vehicles_on_route: i64, tz: Tz) -> i64 {
    let hour = Utc::now().with_timezone(&tz).format("%H").to_string().parse::<u32>().unwrap_or(12);
    (vehicles_on_route as f64 * AVG_BUS_CAPACITY * load_factor_for_hour(hour)) as i64
}

fn generate_hold(bunching: &BunchingReport, catalog: &StaticCatalog, tz: Tz) -> Vec<Intervention> {
    let now = Utc::now();
    let mut out = Vec::new();

    for alert in &bunching.alerts {
        for pair in &alert.bunched_pairs {
            let hold_vehicle = &pair.vehicle_b;
            let stop_name = nearest_stop(catalog, pair.vehicle_b_lat, pair.vehicle_b_lon)
                .map(|s| s.name)
                .unwrap_or_else(|| "next stop".to_string());

            let gap_seconds = (pair.distance_m / 5.5).max(30.0) as i64;
            let target_gap_s = DEFAULT_HEADWAY_MIN * 60;
            let hold_time = (target_gap_s / 2 - gap_seconds).clamp(30, 180);

            let passengers = estimate_passengers_on_route(2, tz);

            let priority = match pair.severity.as_str() {
                "severe" => InterventionPriority::Critical,
                "moderate" => InterventionPriority::High,
                _ => InterventionPriority::Medium,
            };
            let confidence = if pair.severity.as_str() == "severe" { 0.78 } else { 0.65 };

            out.push(Intervention {
                id: new_id(),
                kind: InterventionType::Hold,
                priority,
                status: InterventionStatus::Pending,
                headline: format!("HOLD bus #{hold_vehicle} at {stop_name} for {hold_time}s"),
                description: format!(
                    "Buses #{} and #{} on Route {} are only {}m apart ({} bunching). Holding #{} for {} seconds will restore ~{}-min headway. Est. {} passengers get more even service.",
                    pair.vehicle_a, pair.vehicle_b, pair.route_short_name, pair.distance_m as i64,
                    pair.severity.as_str(), hold_vehicle, hold_time, DEFAULT_HEADWAY_MIN, passengers,
                ),
                route_id: pair.route_id.clone(),
                route_name: pair.route_short_name.clone(),
                trigger: InterventionTrigger::Bunching,
                vehicle_id: Some(hold_vehicle.clone()),
                target_stop: Some(stop_name),
                hold_seconds: Some(hold_time as u32),
                depot_name: None,
                passengers_affected: passengers,
                wait_time_impact_seconds: -hold_time,
                confidence,
                latitude: pair.midpoint_lat,
                longitude: pair.midpoint_lon,
                created_at: now.to_rfc3339(),
                expires_at: String::new(),
                actioned_at: None,
            });
        }
    }

    out
}

fn generate_deploy(ghosts: &GhostReport, catalog: &StaticCatalog) -> Vec<Intervention> {
    let now = Utc::now();
    let mut out = Vec::new();

    for ghost_route in ghosts.dead_routes.iter().take(10) {
        let (route_lat, route_lon) =
            catalog.stop_map.values().next().map(|(_, lat, lon)| (*lat, *lon)).unwrap_or(DEFAULT_CENTRE);

        let depot = nearest_depot(route_lat, route_lon);
        let deploy_time_min = ((depot.distance_m / 500.0) as i64).max(5);

        out.push(Intervention {
            id: new_id(),
            kind: InterventionType::Deploy,
            priority: InterventionPriority::High,
            status: InterventionStatus::Pending,
            headline: format!("DEPLOY standby from {} to cover Route {}", depot.name, ghost_route.route_short_name),
            description: format!(
                "Route {} has ZERO live vehicles — passengers are waiting with no bus in sight. Nearest depot: {} ({}m away, ~{} min deploy time). This route typically serves ~500 passengers/hour during this period.",
                ghost_route.route_short_name, depot.name, depot.distance_m as i64, deploy_time_min,
            ),
            route_id: ghost_route.route_id.clone(),
            route_name: ghost_route.route_short_name.clone(),
            trigger: InterventionTrigger::Ghost,
            vehicle_id: None,
            target_stop: None,
            hold_seconds: None,
            depot_name: Some(depot.name.to_string()),
            passengers_affected: 500,
            wait_time_impact_seconds: -deploy_time_min * 60,
            confidence: 0.82,
            latitude: route_lat,
            longitude: route_lon,
            created_at: now.to_rfc3339(),
            expires_at: String::new(),
            actioned_at: None,
        });
    }

    for ghost in ghosts.signal_lost.iter().take(5) {
        if ghost.stale_seconds <= 300 {
            continue;
        }
        let depot = nearest_depot(ghost.last_latitude, ghost.last_longitude);
        out.push(Intervention {
            id: new_id(),
            kind: InterventionType::Deploy,
            priority: InterventionPriority::Medium,
            status: InterventionStatus::Pending,
            headline: format!("DEPLOY backup for silent bus #{} on Route {}", ghost.vehicle_id, ghost.route_short_name),
            description: format!(
                "Bus #{} on Route {} has been silent for {} minutes. Last seen at ({:.4}, {:.4}). May be broken down or off-route. Deploy backup from {}.",
                ghost.vehicle_id, ghost.route_short_name, ghost.stale_seconds / 60,
                ghost.last_latitude, ghost.last_longitude, depot.name,
            ),
            route_id: ghost.route_id.clone(),
            route_name: ghost.route_short_name.clone(),
            trigger: InterventionTrigger::Ghost,
            vehicle_id: Some(ghost.vehicle_id.clone()),
            target_stop: None,
            hold_seconds: None,
            depot_name: Some(depot.name.to_string()),
            passengers_affected: 75,
            wait_time_impact_seconds: -300,
            confidence: 0.60,
            latitude: ghost.last_latitude,
            longitude: ghost.last_longitude,
            created_at: now.to_rfc3339(),
            expires_at: String::new(),
            actioned_at: None,
        });
    }

    out
}

fn generate_surge(crowding: &CrowdingSnapshot) -> Vec<Intervention> {
    let now = Utc::now();
    let mut out = Vec::new();

    for summary in &crowding.route_summaries {
        let full_count = *summary.levels.get("full").unwrap_or(&0) as i64;
        let standing_count = *summary.levels.get("standing").unwrap_or(&0) as i64;
        let total_high = full_count + standing_count;

        if full_count < 2 && total_high < 3 {
            continue;
        }

        let (route_lat, route_lon) = crowding
            .recent_reports
            .iter()
            .find(|r| r.route_id == summary.route_id)
            .map(|r| (r.latitude, r.longitude))
            .unwrap_or(DEFAULT_CENTRE);

        let depot = nearest_depot(route_lat, route_lon);
        let passengers = (total_high as f64 * 75.0 * 0.9) as i64;
        let priority = if full_count >= 3 { InterventionPriority::Critical } else { InterventionPriority::High };

        out.push(Intervention {
            id: new_id(),
            kind: InterventionType::Surge,
            priority,
            status: InterventionStatus::Pending,
            headline: format!("SURGE capacity on Route {} — {} 'FULL' reports", summary.route_short_name, full_count),
            description: format!(
                "Route {} has received {} 'FULL' and {} 'STANDING' reports in the last hour. Avg crowding score: {:.1}/3.0. Recommend deploying additional vehicle from {} depot or short-turning an underloaded bus from an adjacent route.",
                summary.route_short_name, full_count, standing_count, summary.avg_score, depot.name,
            ),
            route_id: summary.route_id.clone(),
            route_name: summary.route_short_name.clone(),
            trigger: InterventionTrigger::Crowding,
            vehicle_id: None,
            target_stop: None,
            hold_seconds: None,
            depot_name: Some(depot.name.to_string()),
            passengers_affected: passengers,
            wait_time_impact_seconds: -180,
            confidence: 0.72,
            latitude: route_lat,
            longitude: route_lon,
            created_at: now.to_rfc3339(),
            expires_at: String::new(),
            actioned_at: None,
        });
    }

    out
}

/// Run every generator, rank by priority, cap at
/// `INTERVENTIONS_HISTORY_CAP`-independent active cap of 20, and persist.
pub async fn generate(
    store: &dyn LiveStore,
    catalog: &StaticCatalog,
    bunching: &BunchingReport,
    ghosts: &GhostReport,
    crowding: &CrowdingSnapshot,
    tz: Tz,
) -> Result<Vec<Intervention>, StoreError> {
    let mut all = Vec::new();
    all.extend(generate_hold(bunching, catalog, tz));
    all.extend(generate_deploy(ghosts, catalog));
    all.extend(generate_surge(crowding));

    all.sort_by_key(|i| i.priority.rank());
    all.truncate(20);

    let now = Utc::now();
    let expires_at = (now + chrono::Duration::seconds(store::INTERVENTIONS_ACTIVE_TTL_SECS)).to_rfc3339();
    for i in &mut all {
        i.expires_at = expires_at.clone();
    }

    let mut ops = vec![PipelineOp::Delete { key: store::INTERVENTIONS_ACTIVE_KEY.to_string() }];
    for i in &all {
        ops.push(PipelineOp::ListPushLeft { key: store::INTERVENTIONS_ACTIVE_KEY.to_string(), value: serde_json::to_string(i)? });
    }
    ops.push(PipelineOp::Expire { key: store::INTERVENTIONS_ACTIVE_KEY.to_string(), ttl_secs: store::INTERVENTIONS_ACTIVE_TTL_SECS });
    store.pipeline(ops).await?;

    info!(
        total = all.len(),
        hold = all.iter().filter(|i| i.kind == InterventionType::Hold).count(),
        deploy = all.iter().filter(|i| i.kind == InterventionType::Deploy).count(),
        surge = all.iter().filter(|i| i.kind == InterventionType::Surge).count(),
        "interventions.generated"
    );

    Ok(all)
}

pub async fn active(store: &dyn LiveStore) -> Result<Vec<Intervention>, StoreError> {
    let raw = store.list_range(store::INTERVENTIONS_ACTIVE_KEY, 0, -1).await?;
    Ok(raw.iter().filter_map(|s| serde_json::from_str(s).ok()).collect())
}

pub async fn history(store: &dyn LiveStore, limit: isize) -> Result<Vec<Intervention>, StoreError> {
    let raw = store.list_range(store::INTERVENTIONS_HISTORY_KEY, 0, limit.max(0) - 1).await?;
    Ok(raw.iter().filter_map(|s| serde_json::from_str(s).ok()).collect())
}

/// Approve or dismiss an active intervention. Serialized through `lock`
/// since the read-modify-write across the active list and history list
/// isn't otherwise atomic against concurrent actions on the same id.
pub async fn action(
    store: &dyn LiveStore,
    lock: &Mutex<()>,
    intervention_id: &str,
    action: InterventionAction,
) -> Result<Option<Intervention>, StoreError> {
    let _guard = lock.lock().await;

    let raw = store.list_range(store::INTERVENTIONS_ACTIVE_KEY, 0, -1).await?;
    for (index, item) in raw.iter().enumerate() {
        let Ok(mut intv) = serde_json::from_str::<Intervention>(item) else { continue };
        if intv.id != intervention_id {
            continue;
        }

        intv.status = match action {
            InterventionAction::Approve => InterventionStatus::Approved,
            InterventionAction::Dismiss => InterventionStatus::Dismissed,
        };
        intv.actioned_at = Some(Utc::now().to_rfc3339());

        let payload = serde_json::to_string(&intv)?;
        store.list_set_index(store::INTERVENTIONS_ACTIVE_KEY, index as isize, &payload).await?;
        store
            .pipeline(vec![
                PipelineOp::ListPushLeft { key: store::INTERVENTIONS_HISTORY_KEY.to_string(), value: payload },
                PipelineOp::ListTrim { key: store::INTERVENTIONS_HISTORY_KEY.to_string(), len: store::INTERVENTIONS_HISTORY_CAP },
            ])
            .await?;

        info!(id = intervention_id, action = ?action, kind = ?intv.kind, route = %intv.route_name, "intervention.actioned");
        return Ok(Some(intv));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn load_factor_matches_peak_day_offpeak_buckets() {
        assert_eq!(load_factor_for_hour(8), 0.60);
        assert_eq!(load_factor_for_hour(18), 0.60);
        assert_eq!(load_factor_for_hour(12), 0.40);
        assert_eq!(load_factor_for_hour(2), 0.25);
    }

    #[test]
    fn nearest_depot_picks_closest() {
        let d = nearest_depot(53.3555, -6.2729);
        assert_eq!(d.name, "Broadstone");
        assert!(d.distance_m < 10.0);
    }

    #[tokio::test]
    async fn action_moves_intervention_to_history_and_marks_status() {
        let store = MemoryStore::new();
        let intv = Intervention {
            id: "abc12345".into(),
            kind: InterventionType::Hold,
            priority: InterventionPriority::High,
            status: InterventionStatus::Pending,
            headline: "test".into(),
            description: "test".into(),
            route_id: "R1".into(),
            route_name: "39A".into(),
            trigger: InterventionTrigger::Bunching,
            vehicle_id: Some("V1".into()),
            target_stop: None,
            hold_seconds: Some(60),
            depot_name: None,
            passengers_affected: 10,
            wait_time_impact_seconds: -60,
            confidence: 0.7,
            latitude: 53.35,
            longitude: -6.26,
            created_at: Utc::now().to_rfc3339(),
            expires_at: Utc::now().to_rfc3339(),
            actioned_at: None,
        };
        store
            .pipeline(vec![PipelineOp::ListPushLeft {
                key: store::INTERVENTIONS_ACTIVE_KEY.to_string(),
                value: serde_json::to_string(&intv).unwrap(),
            }])
            .await
            .unwrap();

        let lock = Mutex::new(());
        let result = action(&store, &lock, "abc12345", InterventionAction::Approve).await.unwrap().unwrap();
        assert_eq!(result.status, InterventionStatus::Approved);
        assert!(result.actioned_at.is_some());

        let hist = history(&store, 10).await.unwrap();
        assert_eq!(hist.len(), 1);
        assert_eq!(hist[0].id, "abc12345");
    }

    #[tokio::test]
    async fn action_on_unknown_id_returns_none() {
        let store = MemoryStore::new();
        let lock = Mutex::new(());
        assert!(action(&store, &lock, "missing", InterventionAction::Dismiss).await.unwrap().is_none());
    }
}
