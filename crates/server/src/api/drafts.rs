//! Cart endpoints: every caller has at most one live cart draft.

use axum::{
    extract::{Path, State},
    Json,
};
use freightdesk_core::domain::transport_service::TransportServiceId;
use serde_json::{json, Value};
use tracing::info;

use super::auth::AuthUser;
use super::{ApiError, AppState};

pub async fn get_draft(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let Some(draft_id) = state.requests.find_draft(user.0.id).await? else {
        return Ok(Json(json!({
            "status": "ok",
            "draft_id": null,
            "count": 0,
            "logistic_request": null,
        })));
    };

    let request = state.requests.find_by_id(draft_id).await?;
    let count = request.as_ref().map_or(0, |request| request.quantity_sum());
    Ok(Json(json!({
        "status": "ok",
        "draft_id": draft_id,
        "count": count,
        "logistic_request": request,
    })))
}

pub async fn add_service(
    State(state): State<AppState>,
    user: AuthUser,
    Path(service_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    // An unknown service must not leave an empty cart behind.
    state
        .services
        .find_by_id(TransportServiceId(service_id))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("transport service {service_id} not found")))?;

    let draft_id = state.requests.ensure_draft(user.0.id).await?;
    state.requests.add_service_to_draft(draft_id, TransportServiceId(service_id)).await?;
    let count = state.requests.draft_quantity_sum(draft_id).await?;

    info!(
        event_name = "api.draft.service_added",
        request_id = draft_id.0,
        creator_id = user.0.id.0,
        service_id,
        count,
        "transport service added to draft"
    );
    Ok(Json(json!({ "status": "ok", "draft_id": draft_id, "count": count })))
}

pub async fn remove_service(
    State(state): State<AppState>,
    user: AuthUser,
    Path(service_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let draft_id = state
        .requests
        .find_draft(user.0.id)
        .await?
        .ok_or_else(|| ApiError::not_found("draft logistic request not found"))?;
    state.requests.remove_service_from_draft(draft_id, TransportServiceId(service_id)).await?;
    let count = state.requests.draft_quantity_sum(draft_id).await?;
    Ok(Json(json!({ "status": "ok", "draft_id": draft_id, "count": count })))
}

pub async fn clear_draft(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Value>, ApiError> {
    state.requests.clear_draft(user.0.id).await?;
    Ok(Json(json!({ "status": "ok", "count": 0 })))
}
