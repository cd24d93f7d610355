//! JSON API: shared state, router assembly and the error-to-response mapping.

pub mod auth;
pub mod catalog;
pub mod drafts;
pub mod requests;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use freightdesk_core::auth::{Action, AuthError, Role};
use freightdesk_core::config::AppConfig;
use freightdesk_core::{
    ApplicationError, DeliveryCalculator, DomainError, InterfaceError, QuotingSettings,
    TokenService,
};
use freightdesk_db::repositories::{
    LogisticRequestRepository, RepositoryError, SqlLogisticRequestRepository,
    SqlTransportServiceRepository, SqlUserRepository, TransportServiceRepository, UserRepository,
};
use freightdesk_db::DbPool;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use uuid::Uuid;

use crate::health;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub services: Arc<dyn TransportServiceRepository>,
    pub users: Arc<dyn UserRepository>,
    pub requests: Arc<dyn LogisticRequestRepository>,
    pub calculator: DeliveryCalculator,
    pub tokens: Arc<TokenService>,
}

impl AppState {
    pub fn new(db_pool: DbPool, config: &AppConfig) -> Self {
        let calculator =
            DeliveryCalculator::with_settings(QuotingSettings::from(&config.quoting));
        Self {
            services: Arc::new(SqlTransportServiceRepository::new(db_pool.clone())),
            users: Arc::new(SqlUserRepository::new(db_pool.clone())),
            requests: Arc::new(SqlLogisticRequestRepository::new(
                db_pool.clone(),
                calculator.clone(),
            )),
            calculator,
            tokens: Arc::new(TokenService::from_config(&config.auth)),
            db_pool,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/users/register", post(auth::register))
        .route("/api/users/login", post(auth::login))
        .route("/api/users/refresh", post(auth::refresh))
        .route("/api/users/logout", post(auth::logout))
        .route("/api/users/profile", get(auth::profile).put(auth::update_profile))
        .route("/api/transport-services", get(catalog::list_services).post(catalog::create_service))
        .route(
            "/api/transport-services/{id}",
            get(catalog::get_service).put(catalog::update_service).delete(catalog::delete_service),
        )
        .route("/api/logistic-requests/quote", post(requests::quote))
        .route(
            "/api/logistic-requests",
            get(requests::list_requests).post(requests::create_request),
        )
        .route("/api/logistic-requests/draft", get(drafts::get_draft).delete(drafts::clear_draft))
        .route(
            "/api/logistic-requests/draft/services/{service_id}",
            post(drafts::add_service).delete(drafts::remove_service),
        )
        .route(
            "/api/logistic-requests/{id}",
            get(requests::get_request).delete(requests::delete_request),
        )
        .route("/api/logistic-requests/{id}/update", put(requests::update_request))
        .route("/api/logistic-requests/{id}/form", put(requests::form_request))
        .route("/api/logistic-requests/{id}/complete", put(requests::complete_request))
        .route(
            "/api/logistic-requests/{id}/services/{service_id}",
            put(requests::update_line_item).delete(requests::remove_line_item),
        )
        .with_state(state.clone());

    api.merge(health::router(state.db_pool)).layer(TraceLayer::new_for_http())
}

/// Error returned by every handler; renders as `{"status":"fail","message":...}`.
#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl ApiError {
    fn correlation_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: Self::correlation_id(),
        })
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self(InterfaceError::Unauthorized {
            message: message.into(),
            correlation_id: Self::correlation_id(),
        })
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self(InterfaceError::Forbidden {
            message: message.into(),
            correlation_id: Self::correlation_id(),
        })
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self(InterfaceError::NotFound {
            message: message.into(),
            correlation_id: Self::correlation_id(),
        })
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self(InterfaceError::Internal {
            message: message.into(),
            correlation_id: Self::correlation_id(),
        })
    }

    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ApplicationError> for ApiError {
    fn from(value: ApplicationError) -> Self {
        Self(value.into_interface(Self::correlation_id()))
    }
}

impl From<RepositoryError> for ApiError {
    fn from(value: RepositoryError) -> Self {
        Self::from(ApplicationError::from(value))
    }
}

impl From<DomainError> for ApiError {
    fn from(value: DomainError) -> Self {
        Self::from(ApplicationError::from(value))
    }
}

impl From<AuthError> for ApiError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::SigningKey(message) | AuthError::PasswordHash(message) => {
                Self::internal(message)
            }
            other => Self::unauthorized(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(
                event_name = "api.request.failed",
                correlation_id = self.0.correlation_id(),
                error = %self.0,
                "request failed"
            );
        } else if status != StatusCode::NOT_FOUND {
            warn!(
                event_name = "api.request.rejected",
                correlation_id = self.0.correlation_id(),
                status = status.as_u16(),
                error = %self.0,
                "request rejected"
            );
        }

        let body = json!({
            "status": "fail",
            "message": self.0.user_message(),
            "correlation_id": self.0.correlation_id(),
        });
        (status, Json(body)).into_response()
    }
}

/// Parses a `YYYY-MM-DD` query value into the first or last instant of that UTC day.
pub(crate) fn parse_day_bound(
    field: &str,
    value: Option<&str>,
    end_of_day: bool,
) -> Result<Option<DateTime<Utc>>, ApiError> {
    let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    let day = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request(format!("{field} must be a date in YYYY-MM-DD format")))?;
    let time = if end_of_day {
        NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    };
    Ok(time.map(|time| day.and_time(time).and_utc()))
}

pub(crate) fn require(role: Role, action: Action) -> Result<(), ApiError> {
    if freightdesk_core::authorize(role, action) {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!("role {role} is not allowed to perform this action")))
    }
}
