//! System statistics and self-awareness handlers

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::registry::{BotStatus, RegistryStats};

use super::super::AppState;

/// Registry-wide aggregate counts
pub async fn system_stats(State(state): State<AppState>) -> Json<RegistryStats> {
    Json(state.registry.get_registry_stats())
}

/// Runtime snapshot: what the executor and supervisor are actually doing
pub async fn runtime_state(State(state): State<AppState>) -> Json<Value> {
    let bots = state.registry.get_all_bots();
    let running: Vec<&str> = bots
        .iter()
        .filter(|b| b.status == BotStatus::Running)
        .map(|b| b.id.as_str())
        .collect();

    Json(json!({
        "bots_total": bots.len(),
        "bots_running": running,
        "executor": {
            "running_processes": state.executor.running_process_ids(),
            "running_containers": state.executor.running_container_names(),
        },
        "supervisor": {
            "enabled": state.supervisor.is_running(),
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct IncidentsQuery {
    pub limit: Option<usize>,
}

/// Last N supervisor incidents
pub async fn recent_incidents(
    State(state): State<AppState>,
    Query(query): Query<IncidentsQuery>,
) -> Json<Vec<Value>> {
    Json(state.incidents.tail(query.limit.unwrap_or(200)))
}
