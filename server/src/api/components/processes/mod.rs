use crate::api::components::processes::models::FindProcessQuery;
use crate::libs::api_response::ApiResponse;
use crate::libs::shared_state::SharedState;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::Router;
use serde_json::json;

pub mod models;

pub fn routes(state: SharedState) -> Router {
    Router::new()
        .route("/find_process", get(find_process))
        .with_state(state.clone())
}

/// Who released memory on a GPU most recently, see `ReleaseDetector`.
async fn find_process(
    State(state): State<SharedState>,
    query: Result<Query<FindProcessQuery>, QueryRejection>,
) -> eyre::Result<ApiResponse, ApiResponse> {
    let Query(query) = query.map_err(|e| ApiResponse::bad_request(e.body_text()))?;

    // the scan reads the fleet history page by page, keep it off the async workers
    let scan_state = state.clone();
    let found = tokio::task::spawn_blocking(move || {
        scan_state
            .detector
            .find(scan_state.store.as_ref(), &query.hostname, query.gpuid)
    })
    .await
    .map_err(|e| ApiResponse::internal(&e.to_string()))?
    .map_err(|e| ApiResponse::internal(&e.to_string()))?;

    let Some(event) = found else {
        return Ok(ApiResponse::ok(json!({"code": 1, "msg": "not found"})));
    };
    log::debug!(
        "release between rows {} and {} (diff {} -> {})",
        event.row,
        event.last_row,
        event.diff_now,
        event.diff_prev
    );
    Ok(ApiResponse::ok(json!({
        "code": 0,
        "data": { "processes": event.processes },
        "row": event.row,
        "last_row": event.last_row,
    })))
}
