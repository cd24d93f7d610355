use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use freightdesk_core::auth::Action;
use freightdesk_core::domain::logistic_request::{
    CargoSpec, DraftEdit, LineItemInput, LineItemUpdate, LogisticRequest, LogisticRequestId,
    RequestFilter, RequestStatus, Resolution, Route, Submission,
};
use freightdesk_core::domain::transport_service::TransportServiceId;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::auth::AuthUser;
use super::{parse_day_bound, require, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    #[serde(default)]
    pub services: Vec<LineItemInput>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RequestListQuery {
    pub status: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

/// Route and cargo supplied when a draft is submitted for moderation.
#[derive(Debug, Deserialize)]
pub struct FormBody {
    pub from_city: String,
    pub to_city: String,
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub weight: f64,
}

impl From<FormBody> for Submission {
    fn from(value: FormBody) -> Self {
        Self {
            route: Route::new(value.from_city.trim(), value.to_city.trim()),
            cargo: CargoSpec {
                length: value.length,
                width: value.width,
                height: value.height,
                weight: value.weight,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CompleteBody {
    pub status: String,
}

/// Loads a live request the caller may act on as its creator.
async fn load_owned(
    state: &AppState,
    id: LogisticRequestId,
    user: &AuthUser,
) -> Result<LogisticRequest, ApiError> {
    let request = state
        .requests
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("logistic request {id} not found")))?;
    if !request.is_owned_by(user.0.id) {
        return Err(ApiError::forbidden("only the creator can change this request"));
    }
    Ok(request)
}

pub async fn quote(
    State(state): State<AppState>,
    Json(body): Json<LineItemInput>,
) -> Result<Json<Value>, ApiError> {
    let service = state
        .services
        .find_by_id(body.service_id)
        .await?
        .ok_or_else(|| ApiError::not_found("transport service not found"))?;

    let quote = state.calculator.calculate(Some(&service), &body.route(), &body.cargo());
    if !quote.is_valid {
        return Err(ApiError::bad_request(quote.error_message.unwrap_or_default()));
    }

    Ok(Json(json!({
        "status": "ok",
        "delivery_days": quote.delivery_days,
        "total_cost": quote.total_cost,
        "distance": quote.distance_km,
        "volume": quote.volume_m3,
    })))
}

pub async fn create_request(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request_id = state.requests.create_request(&body.services, user.0.id).await?;
    info!(
        event_name = "api.request.created",
        request_id = request_id.0,
        creator_id = user.0.id.0,
        item_count = body.services.len(),
        "logistic request created"
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "request_id": request_id,
            "creator_id": user.0.id,
        })),
    ))
}

pub async fn list_requests(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<RequestListQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(RequestStatus::from_str)
        .transpose()?;

    let sees_all = freightdesk_core::authorize(user.role(), Action::ViewAllRequests);
    let filter = RequestFilter {
        status,
        formed_from: parse_day_bound("date_from", query.date_from.as_deref(), false)?,
        formed_to: parse_day_bound("date_to", query.date_to.as_deref(), true)?,
        creator_id: (!sees_all).then_some(user.0.id),
    };

    let requests = state.requests.list(&filter).await?;
    Ok(Json(json!({ "status": "ok", "logistic_requests": requests })))
}

pub async fn get_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let id = LogisticRequestId(id);
    let request = state
        .requests
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("logistic request {id} not found")))?;

    let moderator = freightdesk_core::authorize(user.role(), Action::ViewAllRequests);
    if !moderator && !request.is_owned_by(user.0.id) {
        return Err(ApiError::forbidden("this request belongs to another user"));
    }
    Ok(Json(json!({ "status": "ok", "logistic_request": request })))
}

pub async fn delete_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state.requests.delete_request(LogisticRequestId(id), user.0.id).await?;
    info!(
        event_name = "api.request.deleted",
        request_id = id,
        creator_id = user.0.id.0,
        "logistic request deleted"
    );
    Ok(Json(json!({ "status": "ok", "message": "logistic request deleted successfully" })))
}

pub async fn update_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(edit): Json<DraftEdit>,
) -> Result<Json<Value>, ApiError> {
    let request = state.requests.update_draft(LogisticRequestId(id), user.0.id, &edit).await?;
    Ok(Json(json!({ "status": "ok", "logistic_request": request })))
}

pub async fn form_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<FormBody>,
) -> Result<Json<Value>, ApiError> {
    let submission = Submission::from(body);
    let request =
        state.requests.form_request(LogisticRequestId(id), user.0.id, &submission).await?;
    info!(
        event_name = "api.request.formed",
        request_id = id,
        creator_id = user.0.id.0,
        total_cost = %request.total_cost,
        total_days = request.total_days,
        "logistic request formed"
    );
    Ok(Json(json!({ "status": "ok", "logistic_request": request })))
}

pub async fn complete_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<CompleteBody>,
) -> Result<Json<Value>, ApiError> {
    require(user.role(), Action::ModerateRequests)?;
    let resolution = Resolution::from_str(&body.status)?;
    let request =
        state.requests.complete_request(LogisticRequestId(id), user.0.id, resolution).await?;
    info!(
        event_name = "api.request.resolved",
        request_id = id,
        moderator_id = user.0.id.0,
        status = %request.status,
        "logistic request resolved"
    );
    Ok(Json(json!({ "status": "success", "logistic_request": request })))
}

pub async fn update_line_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, service_id)): Path<(i64, i64)>,
    Json(update): Json<LineItemUpdate>,
) -> Result<Json<Value>, ApiError> {
    let request = load_owned(&state, LogisticRequestId(id), &user).await?;
    state.requests.update_line_item(request.id, TransportServiceId(service_id), &update).await?;
    Ok(Json(json!({ "status": "ok", "message": "logistic request service updated" })))
}

pub async fn remove_line_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, service_id)): Path<(i64, i64)>,
) -> Result<Json<Value>, ApiError> {
    let request = load_owned(&state, LogisticRequestId(id), &user).await?;
    state.requests.remove_service_from_draft(request.id, TransportServiceId(service_id)).await?;
    Ok(Json(json!({ "status": "ok", "message": "transport service removed from logistic request" })))
}
