//! WS Fanout: streams live vehicle snapshots to `/ws/live` clients.
//!
//! Sends an initial snapshot, then prefers the store's pub/sub channel;
//! if the subscription never yields real pub/sub (or the receiver lags
//! badly enough to indicate the channel isn't being serviced), falls
//! back to polling `fleet:ts` every 5 seconds.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use serde_json::json;
use tracing::info;

use crate::model::VehicleRecord;
use crate::realtime::{read_fleet, read_fleet_timestamp};
use crate::store::{self, LiveStore};

const PUBSUB_RECV_TIMEOUT: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_secs(5);

async fn snapshot_message(vehicles: &[VehicleRecord], timestamp: &str) -> String {
    json!({
        "type": "snapshot",
        "vehicles": vehicles,
        "timestamp": timestamp,
        "count": vehicles.len(),
    })
    .to_string()
}

pub async fn handle(mut socket: WebSocket, store: Arc<dyn LiveStore>) {
    info!("ws.connected");

    if let Ok(vehicles) = read_fleet(store.as_ref()).await {
        let ts = read_fleet_timestamp(store.as_ref()).await.ok().flatten().unwrap_or_default();
        let msg = snapshot_message(&vehicles, &ts).await;
        if socket.send(Message::Text(msg.into())).await.is_err() {
            return;
        }
    }

    match store.subscribe(store::LIVE_CHANNEL).await {
        Some(rx) => stream_via_pubsub(&mut socket, rx).await,
        None => stream_via_polling(&mut socket, store.as_ref()).await,
    }
}

/// Forward raw published payloads verbatim — they're already the
/// correctly-shaped JSON the poller and crowd ingress produced.
async fn stream_via_pubsub(socket: &mut WebSocket, mut rx: tokio::sync::broadcast::Receiver<String>) {
    loop {
        tokio::select! {
            recv = tokio::time::timeout(PUBSUB_RECV_TIMEOUT, rx.recv()) => {
                match recv {
                    Ok(Ok(payload)) => {
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            info!("ws.disconnected");
                            return;
                        }
                    }
                    Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped))) => {
                        tracing::warn!(skipped, "ws.pubsub_lagged");
                    }
                    Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => {
                        info!("ws.pubsub_closed");
                        return;
                    }
                    Err(_) => {}
                }
            }
            incoming = socket.recv() => {
                if incoming.is_none() {
                    info!("ws.disconnected");
                    return;
                }
            }
        }
    }
}

async fn stream_via_polling(socket: &mut WebSocket, store: &dyn LiveStore) {
    let mut last_ts = String::new();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                let Ok(Some(ts)) = read_fleet_timestamp(store).await else { continue };
                if ts == last_ts {
                    continue;
                }
                let Ok(vehicles) = read_fleet(store).await else { continue };
                let msg = snapshot_message(&vehicles, &ts).await;
                if socket.send(Message::Text(msg.into())).await.is_err() {
                    info!("ws.disconnected");
                    return;
                }
                last_ts = ts;
            }
            incoming = socket.recv() => {
                if incoming.is_none() {
                    info!("ws.disconnected");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OccupancyStatus;

    #[tokio::test]
    async fn snapshot_message_includes_count_and_vehicles() {
        let vehicles = vec![VehicleRecord {
            vehicle_id: "V1".into(),
            route_id: "R1".into(),
            route_short_name: "39A".into(),
            trip_id: None,
            latitude: 53.35,
            longitude: -6.26,
            bearing: None,
            speed_kmh: None,
            occupancy_status: OccupancyStatus::Unknown,
            delay_seconds: 0,
            timestamp: "2026-07-27T12:00:00Z".into(),
        }];
        let msg = snapshot_message(&vehicles, "2026-07-27T12:00:00Z").await;
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["count"], 1);
        assert_eq!(parsed["type"], "snapshot");
    }
}
