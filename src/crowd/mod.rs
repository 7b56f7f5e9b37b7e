//! Crowd Report Ingress: accepts rider-submitted crowding reports, stores
//! them in capped lists (global + per-route) plus a per-vehicle latest
//! key, and publishes them onto the live channel for the WS fanout.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::model::{CrowdReport, CrowdReportRequest, CrowdingLevel};
use crate::store::{self, LiveStore, PipelineOp, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RouteCrowdingSummary {
    pub route_id: String,
    pub route_short_name: String,
    pub report_count: usize,
    pub latest_level: String,
    pub levels: HashMap<String, usize>,
    pub avg_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CrowdingSnapshot {
    pub total_reports: i64,
    pub reports_last_hour: usize,
    pub route_summaries: Vec<RouteCrowdingSummary>,
    pub recent_reports: Vec<CrowdReport>,
    pub generated_at: String,
}

/// Stores a new report into the global list (capped at
/// `CROWD_REPORTS_CAP`), the per-route list (capped at
/// `CROWD_ROUTE_REPORTS_CAP`), the per-vehicle latest key, and bumps the
/// lifetime counter — all in one pipeline — then publishes it.
pub async fn submit(store: &dyn LiveStore, req: CrowdReportRequest) -> Result<CrowdReport, StoreError> {
    let now = Utc::now();
    let report = CrowdReport {
        id: format!("{}:{}", req.vehicle_id, now.timestamp_millis()),
        vehicle_id: req.vehicle_id,
        route_id: req.route_id,
        route_short_name: req.route_short_name,
        crowding_level: req.crowding_level,
        latitude: req.latitude,
        longitude: req.longitude,
        reported_at: now.to_rfc3339(),
    };

    let payload = serde_json::to_string(&report)?;
    let route_key = store::crowd_route_key(&report.route_id);
    let vehicle_key = store::crowd_vehicle_key(&report.vehicle_id);

    store
        .pipeline(vec![
            PipelineOp::ListPushLeft { key: store::CROWD_REPORTS_KEY.to_string(), value: payload.clone() },
            PipelineOp::ListTrim { key: store::CROWD_REPORTS_KEY.to_string(), len: store::CROWD_REPORTS_CAP },
            PipelineOp::Expire { key: store::CROWD_REPORTS_KEY.to_string(), ttl_secs: store::CROWD_TTL_SECS },
            PipelineOp::ListPushLeft { key: route_key.clone(), value: payload.clone() },
            PipelineOp::ListTrim { key: route_key.clone(), len: store::CROWD_ROUTE_REPORTS_CAP },
            PipelineOp::Expire { key: route_key, ttl_secs: store::CROWD_TTL_SECS },
            PipelineOp::Set { key: vehicle_key.clone(), value: payload },
            PipelineOp::Expire { key: vehicle_key, ttl_secs: store::CROWD_TTL_SECS },
            PipelineOp::Incr { key: store::CROWD_TOTAL_COUNT_KEY.to_string() },
        ])
        .await?;

    let pulse = json!({ "type": "crowd_report", "report": &report });
    if let Ok(msg) = serde_json::to_string(&pulse) {
        let _ = store.publish(store::LIVE_CHANNEL, &msg).await;
    }

    Ok(report)
}

pub async fn recent(store: &dyn LiveStore, limit: isize) -> Result<Vec<CrowdReport>, StoreError> {
    let raw = store.list_range(store::CROWD_REPORTS_KEY, 0, limit.max(0) - 1).await?;
    Ok(raw.iter().filter_map(|s| serde_json::from_str(s).ok()).collect())
}

pub async fn vehicle_latest(store: &dyn LiveStore, vehicle_id: &str) -> Result<Option<CrowdReport>, StoreError> {
    match store.get(&store::crowd_vehicle_key(vehicle_id)).await? {
        Some(raw) => Ok(serde_json::from_str(&raw).ok()),
        None => Ok(None),
    }
}

/// Network-wide crowding overview, aggregated from the most recent 50
/// reports.
pub async fn snapshot(store: &dyn LiveStore) -> Result<CrowdingSnapshot, StoreError> {
    let total_reports = store
        .get(store::CROWD_TOTAL_COUNT_KEY)
        .await?
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0);

    let recent_reports = recent(store, 50).await?;

    let mut by_route: HashMap<String, RouteCrowdingSummary> = HashMap::new();
    for r in &recent_reports {
        let entry = by_route.entry(r.route_id.clone()).or_insert_with(|| RouteCrowdingSummary {
            route_id: r.route_id.clone(),
            route_short_name: r.route_short_name.clone(),
            report_count: 0,
            latest_level: r.crowding_level.as_str().to_string(),
            levels: [CrowdingLevel::Empty, CrowdingLevel::Seats, CrowdingLevel::Standing, CrowdingLevel::Full]
                .iter()
                .map(|l| (l.as_str().to_string(), 0))
                .collect(),
            avg_score: 0.0,
        });
        *entry.levels.entry(r.crowding_level.as_str().to_string()).or_insert(0) += 1;
    }

    let mut summaries: Vec<RouteCrowdingSummary> = by_route
        .into_values()
        .map(|mut s| {
            s.report_count = s.levels.values().sum();
            let score_sum: f64 = s
                .levels
                .iter()
                .map(|(level, count)| {
                    crate::model::CrowdingLevel::from_str_value(level).map(|l| l.score()).unwrap_or(0.0)
                        * (*count as f64)
                })
                .sum();
            s.avg_score = if s.report_count > 0 {
                (score_sum / s.report_count as f64 * 100.0).round() / 100.0
            } else {
                0.0
            };
            s
        })
        .collect();
    summaries.sort_by(|a, b| b.report_count.cmp(&a.report_count));

    Ok(CrowdingSnapshot {
        total_reports,
        reports_last_hour: recent_reports.len(),
        route_summaries: summaries,
        recent_reports: recent_reports.into_iter().take(20).collect(),
        generated_at: Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CrowdingLevel;
    use crate::store::MemoryStore;

    fn req(vehicle_id: &str, route_id: &str, level: CrowdingLevel) -> CrowdReportRequest {
        CrowdReportRequest {
            vehicle_id: vehicle_id.to_string(),
            route_id: route_id.to_string(),
            route_short_name: "39A".to_string(),
            crowding_level: level,
            latitude: 53.35,
            longitude: -6.26,
        }
    }

    #[tokio::test]
    async fn submit_is_visible_in_recent_and_vehicle_latest() {
        let store = MemoryStore::new();
        let report = submit(&store, req("V1", "R1", CrowdingLevel::Full)).await.unwrap();

        let recent = recent(&store, 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, report.id);

        let latest = vehicle_latest(&store, "V1").await.unwrap().unwrap();
        assert_eq!(latest.crowding_level, CrowdingLevel::Full);
    }

    #[tokio::test]
    async fn snapshot_aggregates_by_route_with_avg_score() {
        let store = MemoryStore::new();
        submit(&store, req("V1", "R1", CrowdingLevel::Full)).await.unwrap();
        submit(&store, req("V2", "R1", CrowdingLevel::Empty)).await.unwrap();

        let snap = snapshot(&store).await.unwrap();
        assert_eq!(snap.total_reports, 2);
        assert_eq!(snap.route_summaries.len(), 1);
        assert_eq!(snap.route_summaries[0].report_count, 2);
        assert_eq!(snap.route_summaries[0].avg_score, 1.5);
        assert_eq!(snap.route_summaries[0].levels.get("seats"), Some(&0));
        assert_eq!(snap.route_summaries[0].levels.get("standing"), Some(&0));
        assert_eq!(snap.route_summaries[0].levels.get("full"), Some(&1));
        assert_eq!(snap.route_summaries[0].levels.get("empty"), Some(&1));
    }
}
