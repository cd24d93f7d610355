use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use freightdesk_core::auth::Action;
use freightdesk_core::domain::transport_service::{
    ServiceFilter, TransportServiceDraft, TransportServiceId,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::auth::AuthUser;
use super::{parse_day_bound, require, ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct CatalogQuery {
    pub search: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

fn parse_price(field: &str, value: Option<&str>) -> Result<Option<Decimal>, ApiError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            Decimal::from_str(value)
                .map_err(|_| ApiError::bad_request(format!("{field} must be a decimal number")))
        })
        .transpose()
}

impl CatalogQuery {
    fn into_filter(self) -> Result<ServiceFilter, ApiError> {
        Ok(ServiceFilter {
            min_price: parse_price("min_price", self.min_price.as_deref())?,
            max_price: parse_price("max_price", self.max_price.as_deref())?,
            created_from: parse_day_bound("date_from", self.date_from.as_deref(), false)?,
            created_to: parse_day_bound("date_to", self.date_to.as_deref(), true)?,
            search: self.search,
        })
    }
}

pub async fn list_services(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<Value>, ApiError> {
    let filter = query.into_filter()?;
    let services = state.services.search(&filter).await?;
    Ok(Json(json!({ "status": "ok", "transport_services": services })))
}

pub async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let service = state
        .services
        .find_by_id(TransportServiceId(id))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("transport service {id} not found")))?;
    Ok(Json(json!({ "status": "ok", "service": service })))
}

pub async fn create_service(
    State(state): State<AppState>,
    user: AuthUser,
    Json(draft): Json<TransportServiceDraft>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require(user.role(), Action::ManageCatalog)?;
    let service = state.services.create(&draft).await?;
    info!(
        event_name = "api.catalog.service_created",
        service_id = service.id.0,
        moderator_id = user.0.id.0,
        "transport service created"
    );
    Ok((StatusCode::CREATED, Json(json!({ "status": "ok", "service": service }))))
}

pub async fn update_service(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(draft): Json<TransportServiceDraft>,
) -> Result<Json<Value>, ApiError> {
    require(user.role(), Action::ManageCatalog)?;
    let service = state.services.update(TransportServiceId(id), &draft).await?;
    info!(
        event_name = "api.catalog.service_updated",
        service_id = id,
        moderator_id = user.0.id.0,
        "transport service updated"
    );
    Ok(Json(json!({ "status": "ok", "service": service })))
}

pub async fn delete_service(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    require(user.role(), Action::ManageCatalog)?;
    state.services.soft_delete(TransportServiceId(id)).await?;
    info!(
        event_name = "api.catalog.service_deleted",
        service_id = id,
        moderator_id = user.0.id.0,
        "transport service deleted"
    );
    Ok(Json(json!({ "status": "ok" })))
}
