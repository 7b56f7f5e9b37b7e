//! HTTP surface: one `axum::Router<AppState>` per resource area, merged
//! and bound to shared state in `router()`.

pub mod buses;
pub mod crowding;
pub mod liveness;
pub mod ops;
pub mod predictions;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use chrono::Utc;
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::catalog::StaticCatalog;
use crate::config::Config;
use crate::store::LiveStore;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<StaticCatalog>,
    pub store: Arc<dyn LiveStore>,
    pub config: Arc<Config>,
    pub timezone: Tz,
    /// Serializes the intervention action read-modify-write (§5).
    pub action_lock: Arc<Mutex<()>>,
}

/// The `{data, meta}` response envelope every handler wraps its payload in.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub data: T,
    pub meta: EnvelopeMeta,
}

#[derive(Debug, Serialize)]
pub struct EnvelopeMeta {
    pub timestamp: String,
    pub version: &'static str,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(data: T) -> Self {
        Self { data, meta: EnvelopeMeta { timestamp: Utc::now().to_rfc3339(), version: "1.0" } }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(buses::router())
        .merge(predictions::router())
        .merge(crowding::router())
        .merge(ops::router())
        .merge(ws::router())
        .merge(liveness::router())
        .with_state(state)
}
