//! Bot management handlers: CRUD plus start/stop

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::executor::ExecutorError;
use crate::registry::{BotRecord, BotStatus};

use super::super::AppState;
use super::ApiError;

/// Maximum bot id length
const MAX_ID_LEN: usize = 64;

/// Ids are alphanumeric plus `-` and `_`, at most 64 chars.
fn validate_bot_id(id: &str) -> Result<(), ApiError> {
    if id.is_empty() {
        return Err(ApiError::bad_request("Bot id must not be empty"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(ApiError::bad_request(format!(
            "Bot id must be at most {MAX_ID_LEN} characters"
        )));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ApiError::bad_request(
            "Bot id may only contain alphanumerics, '-' and '_'",
        ));
    }
    Ok(())
}

/// Coerce an external JSON body into a BotRecord.
fn record_from_body(body: Value) -> Result<BotRecord, ApiError> {
    serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid bot record: {e}")))
}

/// List all bots with aggregate stats
pub async fn list_bots(State(state): State<AppState>) -> Json<Value> {
    let bots = state.registry.get_all_bots();
    let stats = state.registry.get_registry_stats();

    Json(json!({
        "bots": bots,
        "total": stats.total_bots,
        "stats": stats,
    }))
}

/// Register a new bot. Timestamps and the initial status are stamped
/// server-side.
pub async fn create_bot(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<BotRecord>), ApiError> {
    let mut record = record_from_body(body)?;
    validate_bot_id(&record.id)?;

    let now = Utc::now();
    record.created_at.get_or_insert(now);
    record.updated_at = Some(now);

    let stored = state.registry.register_bot(record)?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// Get a single bot
pub async fn get_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<BotRecord>, ApiError> {
    state
        .registry
        .get_bot_by_id(&bot_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Bot '{bot_id}' not found")))
}

/// Whole-record update; the JSON id must match the URL id.
pub async fn update_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<BotRecord>, ApiError> {
    let mut record = record_from_body(body)?;
    if record.id != bot_id {
        return Err(ApiError::bad_request(format!(
            "Mismatch: URL bot_id='{}' must match JSON id='{}'",
            bot_id, record.id
        )));
    }

    record.updated_at = Some(Utc::now());
    let stored = state.registry.update_bot(record)?;
    Ok(Json(stored))
}

/// Unregister a bot
pub async fn delete_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.registry.unregister_bot(&bot_id)? {
        return Err(ApiError::not_found(format!(
            "Bot '{bot_id}' not found or already deleted"
        )));
    }
    Ok(Json(json!({"status": "deleted", "bot_id": bot_id})))
}

/// Start a bot via the executor
pub async fn start_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let bot = state
        .registry
        .get_bot_by_id(&bot_id)
        .ok_or_else(|| ApiError::not_found(format!("Bot '{bot_id}' not found")))?;

    if matches!(bot.status, BotStatus::Running | BotStatus::Deploying) {
        return Ok(Json(json!({
            "status": "already_running",
            "bot_id": bot_id,
            "message": format!("Bot is already {}", bot.status),
        })));
    }

    match state.executor.run_bot(&bot).await {
        Ok(_) => Ok(Json(json!({"status": "ok", "bot_id": bot_id}))),
        Err(e @ (ExecutorError::BlueprintMissing(_) | ExecutorError::BlueprintUnset)) => {
            Err(ApiError::bad_request(e.to_string()))
        }
        Err(e) => Err(ApiError::internal(e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct StopQuery {
    pub reason: Option<String>,
}

/// Stop a bot via the executor
pub async fn stop_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
    Query(query): Query<StopQuery>,
) -> Result<Json<Value>, ApiError> {
    if state.registry.get_bot_by_id(&bot_id).is_none() {
        return Err(ApiError::not_found(format!("Bot '{bot_id}' not found")));
    }

    let reason = query.reason.as_deref().unwrap_or("Stopped via API");
    if state.executor.stop_bot(&bot_id, reason).await {
        Ok(Json(json!({"status": "ok", "bot_id": bot_id})))
    } else {
        Ok(Json(json!({
            "status": "not_running",
            "bot_id": bot_id,
            "message": "Bot is not currently running",
        })))
    }
}
