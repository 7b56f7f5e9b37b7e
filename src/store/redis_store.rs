//! Redis-backed `LiveStore`, using a multiplexed async connection for
//! ordinary commands and a dedicated pubsub connection per subscription.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tracing::warn;

use super::{LiveStore, PipelineOp, StoreError};

pub struct RedisStore {
    manager: ConnectionManager,
    client: redis::Client,
}

impl RedisStore {
    /// Connect and PING to confirm reachability. Callers should fall back
    /// to `MemoryStore` on error rather than treat this as fatal.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let mut manager = ConnectionManager::new(client.clone()).await?;
        let _: String = redis::cmd("PING").query_async(&mut manager).await?;
        Ok(Self { manager, client })
    }
}

#[async_trait]
impl LiveStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: i64) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        if ttl_secs > 0 {
            let _: () = conn.set_ex(key, value, ttl_secs as u64).await?;
        } else {
            let _: () = conn.set(key, value).await?;
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        let mut conn = self.manager.clone();
        let map: std::collections::HashMap<String, String> = conn.hgetall(key).await?;
        Ok(map.into_iter().collect())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.manager.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.manager.clone();
        Ok(conn.lrange(key, start as isize, stop as isize).await?)
    }

    async fn list_set_index(&self, key: &str, index: isize, value: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: () = conn.lset(key, index as isize, value).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.manager.clone();
        Ok(conn.incr(key, 1).await?)
    }

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                PipelineOp::HashSet { key, fields } => {
                    pipe.hset_multiple(key, &fields).ignore();
                }
                PipelineOp::Expire { key, ttl_secs } => {
                    pipe.expire(key, ttl_secs).ignore();
                }
                PipelineOp::Delete { key } => {
                    pipe.del(key).ignore();
                }
                PipelineOp::SetAdd { key, members } => {
                    pipe.sadd(key, members).ignore();
                }
                PipelineOp::Set { key, value } => {
                    pipe.set(key, value).ignore();
                }
                PipelineOp::ListPushLeft { key, value } => {
                    pipe.lpush(key, value).ignore();
                }
                PipelineOp::ListTrim { key, len } => {
                    pipe.ltrim(key, 0, len.saturating_sub(1) as isize).ignore();
                }
                PipelineOp::Incr { key } => {
                    pipe.incr(key, 1).ignore();
                }
            }
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: () = conn.publish(channel, message).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Option<broadcast::Receiver<String>> {
        let (tx, rx) = broadcast::channel(256);
        let client = self.client.clone();
        let channel = channel.to_string();
        tokio::spawn(async move {
            let mut pubsub = match client.get_async_pubsub().await {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "redis.pubsub_connect_failed");
                    return;
                }
            };
            if let Err(e) = pubsub.subscribe(&channel).await {
                warn!(error = %e, "redis.pubsub_subscribe_failed");
                return;
            }
            let mut stream = pubsub.on_message();
            use futures::StreamExt;
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                if tx.send(payload).is_err() {
                    break;
                }
            }
        });
        Some(rx)
    }
}
