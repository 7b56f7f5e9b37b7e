//! Abstract live state store: KV + TTL + pub/sub, with a Redis-backed
//! implementation and an in-memory fallback sharing the same trait.

mod memory_store;
mod redis_store;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use thiserror::Error;

pub const VEHICLE_TTL_SECS: i64 = 120;
pub const CROWD_TTL_SECS: i64 = 3600;
pub const INTERVENTIONS_ACTIVE_TTL_SECS: i64 = 1800;
pub const HEALTH_CACHE_TTL_SECS: i64 = 30;
pub const CROWD_REPORTS_CAP: isize = 500;
pub const CROWD_ROUTE_REPORTS_CAP: isize = 100;
pub const INTERVENTIONS_HISTORY_CAP: isize = 200;

pub const FLEET_KEY: &str = "fleet";
pub const FLEET_TS_KEY: &str = "fleet:ts";
pub const LIVE_CHANNEL: &str = "live";
pub const CROWD_REPORTS_KEY: &str = "crowd:reports";
pub const CROWD_TOTAL_COUNT_KEY: &str = "crowd:total_count";
pub const INTERVENTIONS_ACTIVE_KEY: &str = "interventions:active";
pub const INTERVENTIONS_HISTORY_KEY: &str = "interventions:history";
pub const HEALTH_LATEST_KEY: &str = "health:latest";

pub fn vehicle_key(vehicle_id: &str) -> String {
    format!("vehicle:{vehicle_id}")
}

pub fn crowd_route_key(route_id: &str) -> String {
    format!("crowd:route:{route_id}")
}

pub fn crowd_vehicle_key(vehicle_id: &str) -> String {
    format!("crowd:vehicle:{vehicle_id}")
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// One write/read operation queued into a `pipeline()` batch.
///
/// Mirrors the small fixed vocabulary of operations the poller and crowd
/// ingress actually need — not a general command builder.
#[derive(Debug, Clone)]
pub enum PipelineOp {
    HashSet { key: String, fields: Vec<(String, String)> },
    Expire { key: String, ttl_secs: i64 },
    Delete { key: String },
    SetAdd { key: String, members: Vec<String> },
    Set { key: String, value: String },
    ListPushLeft { key: String, value: String },
    ListTrim { key: String, len: isize },
    Incr { key: String },
}

/// Shared key/value interface backing the live fleet/crowd/intervention state.
///
/// Implementors must make pipelined writes visible atomically to readers
/// (a reader seeing a member added to a set must also see its companion
/// hash), and must treat `publish` as best-effort/at-most-once fanout.
#[async_trait]
pub trait LiveStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: i64) -> Result<(), StoreError>;
    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>, StoreError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError>;
    async fn list_set_index(&self, key: &str, index: isize, value: &str) -> Result<(), StoreError>;
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Execute a batch of writes; implementors should apply them in order
    /// with a single round trip where the backing store allows it.
    async fn pipeline(&self, ops: Vec<PipelineOp>) -> Result<(), StoreError>;

    /// Best-effort publish. A no-op fallback is acceptable when the store
    /// has no real pub/sub backing (callers must then poll for change).
    async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError>;

    /// Subscribe to a channel, returning a receiver of published messages.
    /// Returns `None` when the store cannot provide real pub/sub (forces
    /// callers onto the polling fallback).
    async fn subscribe(&self, channel: &str) -> Option<tokio::sync::broadcast::Receiver<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_pipeline_is_visible_atomically() {
        let store = MemoryStore::new();
        store
            .pipeline(vec![
                PipelineOp::HashSet {
                    key: vehicle_key("V1"),
                    fields: vec![("route_id".into(), "R1".into())],
                },
                PipelineOp::Delete { key: FLEET_KEY.into() },
                PipelineOp::SetAdd { key: FLEET_KEY.into(), members: vec!["V1".into()] },
            ])
            .await
            .unwrap();

        let members = store.set_members(FLEET_KEY).await.unwrap();
        assert_eq!(members, vec!["V1".to_string()]);
        let hash = store.hash_get_all(&vehicle_key("V1")).await.unwrap();
        assert!(hash.contains(&("route_id".to_string(), "R1".to_string())));
    }
}
