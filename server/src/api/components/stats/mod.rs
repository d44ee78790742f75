use crate::libs::api_response::ApiResponse;
use crate::libs::shared_state::SharedState;
use crate::libs::snapshot_store::{StoredRecord, Stream};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use chrono::Local;
use serde_json::{json, Value};

pub fn routes(state: SharedState) -> Router {
    Router::new()
        .route("/gpustat", get(gpustat))
        .route("/all_gpustat", get(all_gpustat))
        .with_state(state.clone())
}

/// The latest sample of this host, `{}` before the first one.
async fn gpustat(State(state): State<SharedState>) -> eyre::Result<ApiResponse, ApiResponse> {
    if state.app_config.exclude_self {
        return Ok(ApiResponse::ok(json!({"error": "Excluded self!"})));
    }
    let latest = state
        .store
        .latest(Stream::Local)
        .map_err(|e| ApiResponse::internal(&e.to_string()))?;

    match latest {
        Some(record) => Ok(ApiResponse::ok(payload(&record)?)),
        None => Ok(ApiResponse::ok(json!({}))),
    }
}

async fn all_gpustat(State(state): State<SharedState>) -> eyre::Result<ApiResponse, ApiResponse> {
    let record = state
        .store
        .latest(Stream::Fleet)
        .map_err(|e| ApiResponse::internal(&e.to_string()))?
        .ok_or(ApiResponse::not_found("No data available"))?;

    let now = record.created_at.with_timezone(&Local);
    Ok(ApiResponse::ok(json!({
        "gpustats": payload(&record)?,
        "now": now.format("%Y-%m-%d %H:%M:%S").to_string(),
    })))
}

fn payload(record: &StoredRecord) -> eyre::Result<Value, ApiResponse> {
    record
        .decode::<Value>()
        .map_err(|e| ApiResponse::internal(&e.to_string()))
}
