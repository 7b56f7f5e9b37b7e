//! Realtime Poller: fetches VehiclePositions + TripUpdates on a fixed
//! interval, enriches against the static catalog, and writes an atomic
//! fleet snapshot into the live store.

pub mod feed;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalog::StaticCatalog;
use crate::model::FleetSnapshot;
use crate::store::{self, LiveStore, PipelineOp};

const INITIAL_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

pub struct PollerConfig {
    pub vehicle_positions_url: String,
    pub trip_updates_url: String,
    pub api_key: String,
}

/// Runs the poll loop until `cancel` fires. Each iteration is independent:
/// a failure only affects backoff, it never kills the task.
pub async fn run(
    config: PollerConfig,
    client: reqwest::Client,
    catalog: Arc<StaticCatalog>,
    store: Arc<dyn LiveStore>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if cancel.is_cancelled() {
            info!("poller.stopped");
            return;
        }

        match poll_once(&config, &client, &catalog, store.as_ref()).await {
            Ok(count) => {
                backoff = INITIAL_BACKOFF;
                info!(vehicles = count, "poller.cycle_ok");
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = cancel.cancelled() => return,
                }
            }
            Err(e) => {
                warn!(error = %e, backoff_secs = backoff.as_secs(), "poller.cycle_failed");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return,
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

async fn poll_once(
    config: &PollerConfig,
    client: &reqwest::Client,
    catalog: &StaticCatalog,
    store: &dyn LiveStore,
) -> Result<usize, feed::RealtimeError> {
    let (vp_feed, tu_feed) = tokio::join!(
        feed::fetch_required(client, &config.vehicle_positions_url, &config.api_key),
        feed::fetch_best_effort(client, &config.trip_updates_url, &config.api_key),
    );
    let vp_feed = vp_feed?;

    let delays = tu_feed.as_ref().map(feed::parse_trip_update_delays).unwrap_or_default();
    let vehicles = feed::parse_vehicle_positions(&vp_feed, catalog, &delays);

    let now = Utc::now().to_rfc3339();
    let snapshot = FleetSnapshot { vehicles: vehicles.clone(), timestamp: now.clone() };

    write_snapshot(store, &vehicles, &now).await.map_err(|e| {
        error!(error = %e, "poller.store_write_failed");
        feed::RealtimeError::Upstream(reqwest::StatusCode::INTERNAL_SERVER_ERROR)
    })?;

    if let Ok(payload) = serde_json::to_string(&snapshot) {
        if let Err(e) = store.publish(store::LIVE_CHANNEL, &payload).await {
            warn!(error = %e, "poller.publish_failed");
        }
    }

    Ok(vehicles.len())
}

fn vehicle_hash_fields(v: &crate::model::VehicleRecord) -> Vec<(String, String)> {
    vec![
        ("vehicle_id".to_string(), v.vehicle_id.clone()),
        ("route_id".to_string(), v.route_id.clone()),
        ("route_short_name".to_string(), v.route_short_name.clone()),
        ("trip_id".to_string(), v.trip_id.clone().unwrap_or_default()),
        ("latitude".to_string(), v.latitude.to_string()),
        ("longitude".to_string(), v.longitude.to_string()),
        ("bearing".to_string(), v.bearing.map(|b| b.to_string()).unwrap_or_default()),
        ("speed_kmh".to_string(), v.speed_kmh.map(|s| s.to_string()).unwrap_or_default()),
        ("occupancy_status".to_string(), v.occupancy_status.as_str().to_string()),
        ("delay_seconds".to_string(), v.delay_seconds.to_string()),
        ("timestamp".to_string(), v.timestamp.clone()),
    ]
}

fn vehicle_from_hash_fields(fields: Vec<(String, String)>) -> Option<crate::model::VehicleRecord> {
    let mut map: std::collections::HashMap<String, String> = fields.into_iter().collect();
    let vehicle_id = map.remove("vehicle_id")?;
    if vehicle_id.is_empty() {
        return None;
    }
    Some(crate::model::VehicleRecord {
        vehicle_id,
        route_id: map.remove("route_id").unwrap_or_default(),
        route_short_name: map.remove("route_short_name").unwrap_or_default(),
        trip_id: map.remove("trip_id").filter(|s| !s.is_empty()),
        latitude: map.remove("latitude").and_then(|s| s.parse().ok()).unwrap_or(0.0),
        longitude: map.remove("longitude").and_then(|s| s.parse().ok()).unwrap_or(0.0),
        bearing: map.remove("bearing").filter(|s| !s.is_empty()).and_then(|s| s.parse().ok()),
        speed_kmh: map.remove("speed_kmh").filter(|s| !s.is_empty()).and_then(|s| s.parse().ok()),
        occupancy_status: map
            .remove("occupancy_status")
            .map(|s| crate::model::OccupancyStatus::from_str_value(&s))
            .unwrap_or_default(),
        delay_seconds: map.remove("delay_seconds").and_then(|s| s.parse().ok()).unwrap_or(0),
        timestamp: map.remove("timestamp").unwrap_or_default(),
    })
}

async fn write_snapshot(
    store: &dyn LiveStore,
    vehicles: &[crate::model::VehicleRecord],
    now: &str,
) -> Result<(), crate::store::StoreError> {
    let mut ops = vec![PipelineOp::Delete { key: store::FLEET_KEY.to_string() }];

    let mut ids = Vec::with_capacity(vehicles.len());
    for v in vehicles {
        ops.push(PipelineOp::HashSet {
            key: store::vehicle_key(&v.vehicle_id),
            fields: vehicle_hash_fields(v),
        });
        ops.push(PipelineOp::Expire {
            key: store::vehicle_key(&v.vehicle_id),
            ttl_secs: store::VEHICLE_TTL_SECS,
        });
        ids.push(v.vehicle_id.clone());
    }
    if !ids.is_empty() {
        ops.push(PipelineOp::SetAdd { key: store::FLEET_KEY.to_string(), members: ids });
    }
    ops.push(PipelineOp::Set { key: store::FLEET_TS_KEY.to_string(), value: now.to_string() });

    store.pipeline(ops).await
}

/// Reads every vehicle currently in the fleet set. Used by the HTTP API
/// and WS fanout — both just want "what's live right now".
pub async fn read_fleet(store: &dyn LiveStore) -> Result<Vec<crate::model::VehicleRecord>, crate::store::StoreError> {
    let ids = store.set_members(store::FLEET_KEY).await?;
    let mut vehicles = Vec::with_capacity(ids.len());
    for id in ids {
        let hash = store.hash_get_all(&store::vehicle_key(&id)).await?;
        if let Some(v) = vehicle_from_hash_fields(hash) {
            vehicles.push(v);
        }
    }
    Ok(vehicles)
}

pub async fn read_fleet_timestamp(store: &dyn LiveStore) -> Result<Option<String>, crate::store::StoreError> {
    store.get(store::FLEET_TS_KEY).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OccupancyStatus, VehicleRecord};
    use crate::store::MemoryStore;

    fn sample_vehicle(id: &str) -> VehicleRecord {
        VehicleRecord {
            vehicle_id: id.to_string(),
            route_id: "R1".into(),
            route_short_name: "39A".into(),
            trip_id: Some("T1".into()),
            latitude: 53.35,
            longitude: -6.26,
            bearing: Some(90),
            speed_kmh: Some(20.0),
            occupancy_status: OccupancyStatus::ManySeatsAvailable,
            delay_seconds: 0,
            timestamp: "2026-07-27T12:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn write_snapshot_replaces_fleet_set_and_sets_timestamp() {
        let store = MemoryStore::new();
        write_snapshot(&store, &[sample_vehicle("V1")], "2026-07-27T12:00:00Z").await.unwrap();

        let members = store.set_members(crate::store::FLEET_KEY).await.unwrap();
        assert_eq!(members, vec!["V1".to_string()]);
        assert_eq!(
            store.get(crate::store::FLEET_TS_KEY).await.unwrap().as_deref(),
            Some("2026-07-27T12:00:00Z")
        );

        write_snapshot(&store, &[sample_vehicle("V2")], "2026-07-27T12:00:10Z").await.unwrap();
        let members = store.set_members(crate::store::FLEET_KEY).await.unwrap();
        assert_eq!(members, vec!["V2".to_string()]);
    }

    #[tokio::test]
    async fn empty_fleet_still_updates_timestamp() {
        let store = MemoryStore::new();
        write_snapshot(&store, &[], "2026-07-27T12:00:00Z").await.unwrap();
        assert!(store.set_members(crate::store::FLEET_KEY).await.unwrap().is_empty());
        assert!(store.get(crate::store::FLEET_TS_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn vehicle_hash_stores_one_field_per_struct_field() {
        let store = MemoryStore::new();
        write_snapshot(&store, &[sample_vehicle("V1")], "2026-07-27T12:00:00Z").await.unwrap();

        let hash = store.hash_get_all(&crate::store::vehicle_key("V1")).await.unwrap();
        let fields: std::collections::HashMap<_, _> = hash.into_iter().collect();
        assert_eq!(fields.get("route_id").map(String::as_str), Some("R1"));
        assert_eq!(fields.get("latitude").map(String::as_str), Some("53.35"));
        assert_eq!(fields.get("occupancy_status").map(String::as_str), Some("MANY_SEATS_AVAILABLE"));
        assert!(!fields.contains_key("record"));
    }

    #[tokio::test]
    async fn read_fleet_round_trips_written_vehicles() {
        let store = MemoryStore::new();
        write_snapshot(&store, &[sample_vehicle("V1")], "2026-07-27T12:00:00Z").await.unwrap();

        let vehicles = read_fleet(&store).await.unwrap();
        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0].vehicle_id, "V1");
        assert_eq!(read_fleet_timestamp(&store).await.unwrap().as_deref(), Some("2026-07-27T12:00:00Z"));
    }
}
