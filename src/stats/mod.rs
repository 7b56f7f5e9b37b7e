//! Stats Snapshotter: every 5 minutes, appends one JSON line of network
//! metrics to `data/stats.jsonl`, building a history the `/ops/stats/summary`
//! endpoint aggregates over.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::catalog::StaticCatalog;
use crate::crowd::CrowdingSnapshot;
use crate::detectors::{bunching, ghost};
use crate::model::VehicleRecord;
use crate::store::LiveStore;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopDelayedRoute {
    pub route: String,
    pub avg_delay: i64,
    pub vehicles: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatsSnapshot {
    pub timestamp: String,
    pub hour: u32,
    pub weekday: String,
    pub total_vehicles: usize,
    pub active_routes: usize,
    pub on_time: usize,
    pub on_time_pct: f64,
    pub slight_delay: usize,
    pub moderate_delay: usize,
    pub severe_delay: usize,
    pub avg_delay_seconds: i64,
    pub ghost_signal_lost: usize,
    pub ghost_dead_routes: usize,
    pub ghost_rate_pct: f64,
    pub bunching_pairs: usize,
    pub bunching_routes: usize,
    pub bunching_severe: usize,
    pub crowd_reports: i64,
    pub crowd_full_routes: usize,
    pub top_delayed_routes: Vec<TopDelayedRoute>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PeakHour {
    pub hour: u32,
    pub avg_on_time_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RouteAppearance {
    pub route: String,
    pub appearances: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatsSummary {
    pub snapshots: usize,
    pub period_start: String,
    pub period_end: String,
    pub avg_vehicles_tracked: i64,
    pub avg_on_time_pct: f64,
    pub avg_delay_seconds: i64,
    pub avg_bunching_pairs_per_snapshot: f64,
    pub total_bunching_events_observed: i64,
    pub max_bunching_pairs_single_snapshot: usize,
    pub avg_ghost_rate_pct: f64,
    pub max_ghost_rate_pct: f64,
    pub total_ghost_events_observed: i64,
    pub worst_hours_for_on_time: Vec<PeakHour>,
    pub best_hours_for_on_time: Vec<PeakHour>,
    pub most_frequently_delayed_routes: Vec<RouteAppearance>,
}

fn build_snapshot(
    vehicles: &[VehicleRecord],
    catalog: &StaticCatalog,
    crowd_total_reports: i64,
    crowd_route_summaries: &[crate::crowd::RouteCrowdingSummary],
) -> Option<StatsSnapshot> {
    if vehicles.is_empty() {
        return None;
    }

    let total = vehicles.len();
    let on_time = vehicles.iter().filter(|v| v.delay_seconds.abs() <= 300).count();
    let slight_delay =
        vehicles.iter().filter(|v| v.delay_seconds.abs() > 300 && v.delay_seconds.abs() <= 600).count();
    let moderate_delay =
        vehicles.iter().filter(|v| v.delay_seconds.abs() > 600 && v.delay_seconds.abs() <= 900).count();
    let severe_delay = vehicles.iter().filter(|v| v.delay_seconds.abs() > 900).count();
    let on_time_pct = round1(on_time as f64 / total as f64 * 100.0);

    let mut active_routes = std::collections::HashSet::new();
    for v in vehicles {
        let name = if v.route_short_name.is_empty() { &v.route_id } else { &v.route_short_name };
        if !name.is_empty() {
            active_routes.insert(name.clone());
        }
    }

    let ghosts = ghost::detect(vehicles, catalog);
    let ghost_signal_lost = ghosts.total_ghost_vehicles;
    let ghost_dead_routes = ghosts.total_routes_without_buses;
    let ghost_rate_pct = round1(ghost_signal_lost as f64 / total as f64 * 100.0);

    let bunching = bunching::detect(vehicles);
    let bunching_severe =
        bunching.alerts.iter().filter(|a| a.severity == bunching::Severity::Severe).count();

    let crowd_full_routes =
        crowd_route_summaries.iter().filter(|s| s.latest_level == "full").count();

    let mut route_delays: HashMap<&str, Vec<i64>> = HashMap::new();
    for v in vehicles {
        let name = if v.route_short_name.is_empty() { &v.route_id } else { &v.route_short_name };
        if !name.is_empty() {
            route_delays.entry(name).or_default().push(v.delay_seconds);
        }
    }
    let mut top_delayed: Vec<TopDelayedRoute> = route_delays
        .iter()
        .filter(|(_, delays)| delays.len() >= 3)
        .map(|(route, delays)| TopDelayedRoute {
            route: route.to_string(),
            avg_delay: (delays.iter().sum::<i64>() as f64 / delays.len() as f64).round() as i64,
            vehicles: delays.len(),
        })
        .collect();
    top_delayed.sort_by(|a, b| b.avg_delay.cmp(&a.avg_delay));
    top_delayed.truncate(10);

    let avg_delay = vehicles.iter().map(|v| v.delay_seconds).sum::<i64>() as f64 / total as f64;

    let now = Utc::now();

    Some(StatsSnapshot {
        timestamp: now.to_rfc3339(),
        hour: now.hour(),
        weekday: now.weekday().to_string(),
        total_vehicles: total,
        active_routes: active_routes.len(),
        on_time,
        on_time_pct,
        slight_delay,
        moderate_delay,
        severe_delay,
        avg_delay_seconds: avg_delay.round() as i64,
        ghost_signal_lost,
        ghost_dead_routes,
        ghost_rate_pct,
        bunching_pairs: bunching.total_pairs,
        bunching_routes: bunching.routes_affected,
        bunching_severe,
        crowd_reports: crowd_total_reports,
        crowd_full_routes,
        top_delayed_routes: top_delayed,
    })
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

async fn append_snapshot(path: &Path, snapshot: &StatsSnapshot) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let mut line = serde_json::to_string(snapshot)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await
}

/// Runs until `cancel` fires, collecting and appending one snapshot every
/// `interval`. An empty fleet produces no snapshot (matches the "nothing to
/// report" behavior of the reference collector).
pub async fn run(
    path: PathBuf,
    catalog: Arc<StaticCatalog>,
    store: Arc<dyn LiveStore>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => {
                info!("stats.stopped");
                return;
            }
        }

        let vehicles = match crate::realtime::read_fleet(store.as_ref()).await {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "stats.read_fleet_failed");
                continue;
            }
        };
        let crowding = match crate::crowd::snapshot(store.as_ref()).await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "stats.crowd_snapshot_failed");
                CrowdingSnapshot {
                    total_reports: 0,
                    reports_last_hour: 0,
                    route_summaries: vec![],
                    recent_reports: vec![],
                    generated_at: Utc::now().to_rfc3339(),
                }
            }
        };

        let Some(snapshot) = build_snapshot(&vehicles, &catalog, crowding.total_reports, &crowding.route_summaries)
        else {
            continue;
        };

        if let Err(e) = append_snapshot(&path, &snapshot).await {
            error!(error = %e, "stats.append_failed");
            continue;
        }

        info!(
            vehicles = snapshot.total_vehicles,
            on_time_pct = snapshot.on_time_pct,
            bunching = snapshot.bunching_pairs,
            ghosts = snapshot.ghost_signal_lost,
            "stats.snapshot"
        );
    }
}

/// Reads every line in the JSONL file and aggregates into a summary.
pub async fn summary(path: &Path) -> Result<StatsSummary, std::io::Error> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(empty_summary());
        }
        Err(e) => return Err(e),
    };

    let snapshots: Vec<StatsSnapshot> =
        contents.lines().filter(|l| !l.trim().is_empty()).filter_map(|l| serde_json::from_str(l).ok()).collect();

    if snapshots.is_empty() {
        return Ok(empty_summary());
    }

    let n = snapshots.len();
    let period_start = snapshots.first().unwrap().timestamp.clone();
    let period_end = snapshots.last().unwrap().timestamp.clone();

    let avg_on_time = round1(snapshots.iter().map(|s| s.on_time_pct).sum::<f64>() / n as f64);
    let avg_vehicles = (snapshots.iter().map(|s| s.total_vehicles).sum::<usize>() as f64 / n as f64).round() as i64;
    let avg_bunching = round1(snapshots.iter().map(|s| s.bunching_pairs).sum::<usize>() as f64 / n as f64);
    let avg_ghost_rate = round1(snapshots.iter().map(|s| s.ghost_rate_pct).sum::<f64>() / n as f64);
    let total_bunching: i64 = snapshots.iter().map(|s| s.bunching_pairs as i64).sum();
    let total_ghost: i64 = snapshots.iter().map(|s| s.ghost_signal_lost as i64).sum();
    let max_bunching = snapshots.iter().map(|s| s.bunching_pairs).max().unwrap_or(0);
    let max_ghost_rate = snapshots.iter().map(|s| s.ghost_rate_pct).fold(0.0, f64::max);
    let avg_delay = (snapshots.iter().map(|s| s.avg_delay_seconds).sum::<i64>() as f64 / n as f64).round() as i64;

    let mut hour_data: HashMap<u32, Vec<f64>> = HashMap::new();
    for s in &snapshots {
        hour_data.entry(s.hour).or_default().push(s.on_time_pct);
    }
    let mut peak_hours: Vec<PeakHour> = hour_data
        .into_iter()
        .map(|(hour, values)| PeakHour { hour, avg_on_time_pct: round1(values.iter().sum::<f64>() / values.len() as f64) })
        .collect();
    peak_hours.sort_by(|a, b| a.avg_on_time_pct.total_cmp(&b.avg_on_time_pct));

    let worst_hours_for_on_time: Vec<PeakHour> = peak_hours.iter().take(3).cloned().collect();
    let best_hours_for_on_time: Vec<PeakHour> = peak_hours.iter().rev().take(3).cloned().collect();

    let mut route_counts: HashMap<String, usize> = HashMap::new();
    for s in &snapshots {
        for r in &s.top_delayed_routes {
            *route_counts.entry(r.route.clone()).or_insert(0) += 1;
        }
    }
    let mut worst_routes: Vec<RouteAppearance> =
        route_counts.into_iter().map(|(route, appearances)| RouteAppearance { route, appearances }).collect();
    worst_routes.sort_by(|a, b| b.appearances.cmp(&a.appearances));
    worst_routes.truncate(10);

    Ok(StatsSummary {
        snapshots: n,
        period_start,
        period_end,
        avg_vehicles_tracked: avg_vehicles,
        avg_on_time_pct: avg_on_time,
        avg_delay_seconds: avg_delay,
        avg_bunching_pairs_per_snapshot: avg_bunching,
        total_bunching_events_observed: total_bunching,
        max_bunching_pairs_single_snapshot: max_bunching,
        avg_ghost_rate_pct: avg_ghost_rate,
        max_ghost_rate_pct: max_ghost_rate,
        total_ghost_events_observed: total_ghost,
        worst_hours_for_on_time,
        best_hours_for_on_time,
        most_frequently_delayed_routes: worst_routes,
    })
}

fn empty_summary() -> StatsSummary {
    StatsSummary {
        snapshots: 0,
        period_start: String::new(),
        period_end: String::new(),
        avg_vehicles_tracked: 0,
        avg_on_time_pct: 0.0,
        avg_delay_seconds: 0,
        avg_bunching_pairs_per_snapshot: 0.0,
        total_bunching_events_observed: 0,
        max_bunching_pairs_single_snapshot: 0,
        avg_ghost_rate_pct: 0.0,
        max_ghost_rate_pct: 0.0,
        total_ghost_events_observed: 0,
        worst_hours_for_on_time: vec![],
        best_hours_for_on_time: vec![],
        most_frequently_delayed_routes: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OccupancyStatus;

    fn vehicle(id: &str, route_id: &str, delay: i64) -> VehicleRecord {
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
            delay_seconds: delay,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn empty_fleet_produces_no_snapshot() {
        let catalog = StaticCatalog::default();
        assert!(build_snapshot(&[], &catalog, 0, &[]).is_none());
    }

    #[test]
    fn snapshot_buckets_delays_correctly() {
        let catalog = StaticCatalog::default();
        let vehicles = vec![
            vehicle("V1", "R1", 0),
            vehicle("V2", "R1", 400),
            vehicle("V3", "R1", 700),
            vehicle("V4", "R1", 1000),
        ];
        let snap = build_snapshot(&vehicles, &catalog, 0, &[]).unwrap();
        assert_eq!(snap.on_time, 1);
        assert_eq!(snap.slight_delay, 1);
        assert_eq!(snap.moderate_delay, 1);
        assert_eq!(snap.severe_delay, 1);
    }

    #[test]
    fn snapshot_bucket_boundaries_do_not_overlap() {
        let catalog = StaticCatalog::default();
        let vehicles = vec![vehicle("V1", "R1", 300), vehicle("V2", "R1", 600), vehicle("V3", "R1", 900)];
        let snap = build_snapshot(&vehicles, &catalog, 0, &[]).unwrap();
        assert_eq!(snap.on_time, 1, "delay==300 must land in on_time, not slight_delay");
        assert_eq!(snap.slight_delay, 1, "delay==600 must land in slight_delay, not moderate_delay");
        assert_eq!(snap.moderate_delay, 1, "delay==900 must land in moderate_delay, not severe_delay");
        assert_eq!(snap.severe_delay, 0);
    }

    #[tokio::test]
    async fn summary_on_missing_file_is_empty_not_error() {
        let summary = summary(Path::new("/tmp/busiq-stats-does-not-exist.jsonl")).await.unwrap();
        assert_eq!(summary.snapshots, 0);
    }

    #[tokio::test]
    async fn append_then_summary_round_trips() {
        let dir = std::env::temp_dir().join(format!("busiq-stats-test-{}", std::process::id()));
        let path = dir.join("stats.jsonl");
        let catalog = StaticCatalog::default();
        let vehicles = vec![vehicle("V1", "R1", 0), vehicle("V2", "R1", 0), vehicle("V3", "R1", 0)];
        let snap = build_snapshot(&vehicles, &catalog, 5, &[]).unwrap();
        append_snapshot(&path, &snap).await.unwrap();

        let result = summary(&path).await.unwrap();
        assert_eq!(result.snapshots, 1);
        assert_eq!(result.avg_vehicles_tracked, 3);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
