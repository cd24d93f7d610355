use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use uuid::Uuid;

use freightdesk_core::domain::logistic_request::{
    DraftEdit, LineItemInput, LineItemUpdate, LogisticRequest, LogisticRequestId, RequestFilter,
    Resolution, Submission,
};
use freightdesk_core::domain::transport_service::{
    ServiceFilter, TransportService, TransportServiceDraft, TransportServiceId,
};
use freightdesk_core::domain::user::{NewUser, ProfileUpdate, User, UserId};
use freightdesk_core::{ApplicationError, DomainError};

pub mod logistic_request;
pub mod transport_service;
pub mod user;

pub use logistic_request::SqlLogisticRequestRepository;
pub use transport_service::SqlTransportServiceRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Precondition(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }
}

impl From<DomainError> for RepositoryError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvariantViolation(message) => Self::Validation(message),
            DomainError::NotFound { entity, id } => Self::NotFound { entity, id },
            transition @ DomainError::InvalidRequestTransition { .. } => {
                Self::Precondition(transition.to_string())
            }
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound { entity, id } => {
                ApplicationError::Domain(DomainError::NotFound { entity, id })
            }
            RepositoryError::Validation(message) => {
                ApplicationError::Domain(DomainError::InvariantViolation(message))
            }
            RepositoryError::Precondition(message) | RepositoryError::Conflict(message) => {
                ApplicationError::Conflict(message)
            }
            RepositoryError::Forbidden(message) => ApplicationError::Forbidden(message),
            RepositoryError::Database(error) => ApplicationError::Persistence(error.to_string()),
            RepositoryError::Decode(message) => ApplicationError::Persistence(message),
        }
    }
}

#[async_trait]
pub trait TransportServiceRepository: Send + Sync {
    /// Live (not soft-deleted) service by id.
    async fn find_by_id(
        &self,
        id: TransportServiceId,
    ) -> Result<Option<TransportService>, RepositoryError>;

    async fn search(&self, filter: &ServiceFilter)
        -> Result<Vec<TransportService>, RepositoryError>;

    async fn create(
        &self,
        draft: &TransportServiceDraft,
    ) -> Result<TransportService, RepositoryError>;

    async fn update(
        &self,
        id: TransportServiceId,
        draft: &TransportServiceDraft,
    ) -> Result<TransportService, RepositoryError>;

    async fn soft_delete(&self, id: TransportServiceId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<User, RepositoryError>;
    async fn find_by_login(&self, login: &str) -> Result<Option<User>, RepositoryError>;
    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<User>, RepositoryError>;
    async fn update_profile(
        &self,
        id: UserId,
        update: &ProfileUpdate,
    ) -> Result<User, RepositoryError>;
}

#[async_trait]
pub trait LogisticRequestRepository: Send + Sync {
    /// Quotes every item and persists the request with its line items and
    /// totals in one transaction. Any failing item rolls the whole call back.
    async fn create_request(
        &self,
        items: &[LineItemInput],
        creator_id: UserId,
    ) -> Result<LogisticRequestId, RepositoryError>;

    async fn ensure_draft(&self, creator_id: UserId) -> Result<LogisticRequestId, RepositoryError>;

    async fn find_draft(
        &self,
        creator_id: UserId,
    ) -> Result<Option<LogisticRequestId>, RepositoryError>;

    async fn add_service_to_draft(
        &self,
        request_id: LogisticRequestId,
        service_id: TransportServiceId,
    ) -> Result<(), RepositoryError>;

    async fn remove_service_from_draft(
        &self,
        request_id: LogisticRequestId,
        service_id: TransportServiceId,
    ) -> Result<(), RepositoryError>;

    async fn update_line_item(
        &self,
        request_id: LogisticRequestId,
        service_id: TransportServiceId,
        update: &LineItemUpdate,
    ) -> Result<(), RepositoryError>;

    async fn clear_draft(&self, creator_id: UserId) -> Result<(), RepositoryError>;

    async fn draft_quantity_sum(&self, request_id: LogisticRequestId)
        -> Result<u32, RepositoryError>;

    async fn form_request(
        &self,
        request_id: LogisticRequestId,
        creator_id: UserId,
        submission: &Submission,
    ) -> Result<LogisticRequest, RepositoryError>;

    async fn complete_request(
        &self,
        request_id: LogisticRequestId,
        moderator_id: UserId,
        resolution: Resolution,
    ) -> Result<LogisticRequest, RepositoryError>;

    async fn update_draft(
        &self,
        request_id: LogisticRequestId,
        creator_id: UserId,
        edit: &DraftEdit,
    ) -> Result<LogisticRequest, RepositoryError>;

    async fn delete_request(
        &self,
        request_id: LogisticRequestId,
        creator_id: UserId,
    ) -> Result<(), RepositoryError>;

    async fn find_by_id(
        &self,
        id: LogisticRequestId,
    ) -> Result<Option<LogisticRequest>, RepositoryError>;

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<LogisticRequest>, RepositoryError>;
}

/// Fixed-width UTC timestamps so lexical comparison in SQL matches time order.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{value}`: {error}")))
}

pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn decode_error(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}
