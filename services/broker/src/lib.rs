//! TurboStream broker: the axum binary wiring every core component (C1–C7)
//! into one process — the downstream session WebSocket endpoint, the
//! lazily-spawned per-feed connector/dispatcher pairs, and a small HTTP
//! admin surface. Structured the way the teacher structures `server`
//! (`services/server/src/lib.rs`): a `build_router(state)` free function
//! the binary's `main.rs` calls after constructing `AppState`.

pub mod config;
pub mod feeds;
pub mod http;
pub mod providers;
pub mod state;
pub mod ws_session;

pub use state::AppState;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/v1/session", get(ws_session::upgrade))
        .route("/healthz", get(http::health::healthz))
        .route("/readyz", get(http::health::readyz))
        .route("/api/v1/metrics", get(http::admin::get_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
