//! `/ws/live` — upgrades to the live vehicle fanout socket.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use super::AppState;

pub async fn ws_live(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| crate::ws::handle(socket, state.store.clone()))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws/live", get(ws_live))
}
