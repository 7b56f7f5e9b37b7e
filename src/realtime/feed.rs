//! Protobuf feed fetch + parse for VehiclePositions and TripUpdates.

use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use gtfs_realtime::FeedMessage;
use prost::Message;
use reqwest::StatusCode;
use thiserror::Error;

use crate::catalog::StaticCatalog;
use crate::model::{OccupancyStatus, VehicleRecord};

/// 50 MB — a compressed GTFS-RT feed this large would indicate something
/// is badly wrong upstream; refuse to buffer it in memory.
const MAX_FEED_BYTES: usize = 50 * 1024 * 1024;
const FETCH_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("rate limited")]
    RateLimited,
    #[error("upstream returned {0}")]
    Upstream(StatusCode),
    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("feed exceeded {MAX_FEED_BYTES} bytes")]
    TooLarge,
}

/// Fetch a GTFS-realtime protobuf feed. Required-feed semantics: 429
/// becomes `RateLimited` (caller backs off), any other non-2xx becomes
/// `Upstream`.
pub async fn fetch_required(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
) -> Result<FeedMessage, RealtimeError> {
    let resp = client
        .get(url)
        .header("x-api-key", api_key)
        .timeout(std::time::Duration::from_secs(FETCH_TIMEOUT_SECS))
        .send()
        .await?;

    if resp.status() == StatusCode::TOO_MANY_REQUESTS {
        return Err(RealtimeError::RateLimited);
    }
    if !resp.status().is_success() {
        return Err(RealtimeError::Upstream(resp.status()));
    }

    let bytes = resp.bytes().await?;
    if bytes.len() > MAX_FEED_BYTES {
        return Err(RealtimeError::TooLarge);
    }
    Ok(FeedMessage::decode(bytes)?)
}

/// Fetch the best-effort TripUpdates feed. Any failure yields `None` so the
/// caller can fall back to an empty delay map rather than aborting the poll.
pub async fn fetch_best_effort(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
) -> Option<FeedMessage> {
    match fetch_required(client, url, api_key).await {
        Ok(feed) => Some(feed),
        Err(e) => {
            tracing::warn!(error = %e, "realtime.trip_updates_unavailable");
            None
        }
    }
}

/// `trip_id -> max(|arrival.delay|, |departure.delay|)` across all stop time
/// updates, keeping only trips with a nonzero delay.
pub fn parse_trip_update_delays(feed: &FeedMessage) -> HashMap<String, i64> {
    let mut delays = HashMap::new();
    for entity in &feed.entity {
        let Some(tu) = &entity.trip_update else { continue };
        let Some(trip_id) = tu.trip.trip_id.clone() else { continue };
        if trip_id.is_empty() {
            continue;
        }
        let mut max_delay: i64 = 0;
        for stu in &tu.stop_time_update {
            if let Some(arrival) = &stu.arrival {
                if let Some(d) = arrival.delay {
                    max_delay = max_delay.max((d as i64).abs());
                }
            }
            if let Some(departure) = &stu.departure {
                if let Some(d) = departure.delay {
                    max_delay = max_delay.max((d as i64).abs());
                }
            }
        }
        if max_delay > 0 {
            delays.insert(trip_id, max_delay);
        }
    }
    delays
}

/// Parse VehiclePositions into enriched `VehicleRecord`s, resolving route
/// names against the static catalog and merging in TripUpdates delays.
pub fn parse_vehicle_positions(
    feed: &FeedMessage,
    catalog: &StaticCatalog,
    delays: &HashMap<String, i64>,
) -> Vec<VehicleRecord> {
    let mut vehicles = Vec::new();

    for entity in &feed.entity {
        let Some(vp) = &entity.vehicle else { continue };
        let Some(vehicle_id) = vp.vehicle.as_ref().and_then(|v| v.id.clone()) else { continue };
        if vehicle_id.is_empty() {
            continue;
        }

        let trip_id = vp.trip.as_ref().and_then(|t| t.trip_id.clone()).filter(|s| !s.is_empty());
        let route_id = vp
            .trip
            .as_ref()
            .and_then(|t| t.route_id.clone())
            .unwrap_or_default();

        let route_short_name = trip_id
            .as_deref()
            .and_then(|tid| catalog.get_route_name_by_trip(tid))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                if route_id.is_empty() {
                    String::new()
                } else {
                    catalog.get_route_name(&route_id)
                }
            });
        let route_short_name = if route_short_name.is_empty() { route_id.clone() } else { route_short_name };

        let (latitude, longitude, bearing, speed_kmh) = match &vp.position {
            Some(pos) => (
                round6(pos.latitude as f64),
                round6(pos.longitude as f64),
                pos.bearing.map(|b| b as i32),
                pos.speed.map(|s| (s as f64 * 3.6 * 10.0).round() / 10.0),
            ),
            None => (0.0, 0.0, None, None),
        };

        let occupancy_status = vp
            .occupancy_status
            .map(OccupancyStatus::from_wire_code)
            .unwrap_or_default();

        let delay_seconds = trip_id.as_deref().and_then(|t| delays.get(t)).copied().unwrap_or(0);

        let timestamp = vp
            .timestamp
            .and_then(|ts| Utc.timestamp_opt(ts as i64, 0).single())
            .unwrap_or_else(Utc::now)
            .to_rfc3339();

        vehicles.push(VehicleRecord {
            vehicle_id,
            route_id,
            route_short_name,
            trip_id,
            latitude,
            longitude,
            bearing,
            speed_kmh,
            occupancy_status,
            delay_seconds,
            timestamp,
        });
    }

    vehicles
}

fn round6(v: f64) -> f64 {
    (v * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use gtfs_realtime::{
        feed_entity::FeedEntity, trip_descriptor::TripDescriptor, trip_update::StopTimeEvent,
        trip_update::StopTimeUpdate, trip_update::TripUpdate, vehicle_descriptor::VehicleDescriptor,
        vehicle_position::VehiclePosition, FeedHeader,
    };

    fn feed_with_entities(entities: Vec<FeedEntity>) -> FeedMessage {
        FeedMessage {
            header: FeedHeader { gtfs_realtime_version: "2.0".into(), incrementality: None, timestamp: None },
            entity: entities,
        }
    }

    #[test]
    fn trip_update_delay_takes_max_absolute_across_stops() {
        let feed = feed_with_entities(vec![FeedEntity {
            id: "e1".into(),
            trip_update: Some(TripUpdate {
                trip: TripDescriptor { trip_id: Some("T1".into()), ..Default::default() },
                stop_time_update: vec![
                    StopTimeUpdate {
                        arrival: Some(StopTimeEvent { delay: Some(-30), ..Default::default() }),
                        ..Default::default()
                    },
                    StopTimeUpdate {
                        departure: Some(StopTimeEvent { delay: Some(90), ..Default::default() }),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
            ..Default::default()
        }]);

        let delays = parse_trip_update_delays(&feed);
        assert_eq!(delays.get("T1"), Some(&90));
    }

    #[test]
    fn zero_delay_trips_are_not_recorded() {
        let feed = feed_with_entities(vec![FeedEntity {
            id: "e1".into(),
            trip_update: Some(TripUpdate {
                trip: TripDescriptor { trip_id: Some("T1".into()), ..Default::default() },
                stop_time_update: vec![StopTimeUpdate {
                    arrival: Some(StopTimeEvent { delay: Some(0), ..Default::default() }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }]);
        assert!(parse_trip_update_delays(&feed).is_empty());
    }

    #[test]
    fn vehicle_without_nonempty_id_is_skipped() {
        let feed = feed_with_entities(vec![FeedEntity {
            id: "e1".into(),
            vehicle: Some(VehiclePosition {
                vehicle: Some(VehicleDescriptor { id: Some(String::new()), ..Default::default() }),
                ..Default::default()
            }),
            ..Default::default()
        }]);
        let catalog = StaticCatalog::default();
        let vehicles = parse_vehicle_positions(&feed, &catalog, &HashMap::new());
        assert!(vehicles.is_empty());
    }

    #[test]
    fn speed_converted_to_kmh_rounded_to_tenth() {
        let feed = feed_with_entities(vec![FeedEntity {
            id: "e1".into(),
            vehicle: Some(VehiclePosition {
                vehicle: Some(VehicleDescriptor { id: Some("V1".into()), ..Default::default() }),
                position: Some(gtfs_realtime::position::Position {
                    latitude: 53.35,
                    longitude: -6.26,
                    speed: Some(10.0),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);
        let catalog = StaticCatalog::default();
        let vehicles = parse_vehicle_positions(&feed, &catalog, &HashMap::new());
        assert_eq!(vehicles[0].speed_kmh, Some(36.0));
    }
}
