//! HTTP router module
//!
//! REST control plane for the bot registry and executor, runtime
//! introspection, and the WebSocket update feed.

mod handlers;
mod websocket;

pub use handlers::ApiError;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Configuration;
use crate::executor::AdaptiveExecutor;
use crate::registry::BotRegistry;
use crate::supervisor::{BotSupervisor, IncidentLog};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<BotRegistry>,

    pub executor: Arc<AdaptiveExecutor>,

    pub supervisor: Arc<BotSupervisor>,

    pub incidents: Arc<IncidentLog>,

    pub config: Arc<Configuration>,
}

/// Build the HTTP router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Bot collection
        .route("/bots", get(handlers::bots::list_bots).post(handlers::bots::create_bot))
        // Individual bots
        .route(
            "/bots/:bot_id",
            get(handlers::bots::get_bot)
                .put(handlers::bots::update_bot)
                .delete(handlers::bots::delete_bot),
        )
        .route("/bots/:bot_id/start", post(handlers::bots::start_bot))
        .route("/bots/:bot_id/stop", post(handlers::bots::stop_bot))
        // System and self-awareness
        .route("/system/stats", get(handlers::system::system_stats))
        .route("/self/runtime", get(handlers::system::runtime_state))
        .route("/self/incidents", get(handlers::system::recent_incidents))
        // WebSocket updates
        .route("/ws/updates", get(websocket::ws_handler))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
