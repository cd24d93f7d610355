use thiserror::Error;

use crate::domain::logistic_request::RequestStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid request transition from {from} to {to}")]
    InvalidRequestTransition { from: RequestStatus, to: RequestStatus },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    /// Message safe to return to API clients. Validation and lookup failures
    /// keep their detail; infrastructure failures are redacted.
    pub fn user_message(&self) -> String {
        match self {
            Self::BadRequest { message, .. }
            | Self::Unauthorized { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. } => message.clone(),
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly.".to_owned()
            }
            Self::Internal { .. } => "An unexpected internal error occurred.".to_owned(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Unauthorized { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::InvariantViolation(message)) => {
                Self::BadRequest { message, correlation_id }
            }
            ApplicationError::Domain(error @ DomainError::NotFound { .. }) => {
                Self::NotFound { message: error.to_string(), correlation_id }
            }
            ApplicationError::Domain(error @ DomainError::InvalidRequestTransition { .. }) => {
                Self::Conflict { message: error.to_string(), correlation_id }
            }
            ApplicationError::Unauthorized(message) => Self::Unauthorized { message, correlation_id },
            ApplicationError::Forbidden(message) => Self::Forbidden { message, correlation_id },
            ApplicationError::Conflict(message) => Self::Conflict { message, correlation_id },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::logistic_request::RequestStatus;
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn invariant_violation_maps_to_bad_request_with_detail() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "weight must be greater than 0".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(interface.user_message(), "weight must be greater than 0");
    }

    #[test]
    fn missing_entity_maps_to_not_found() {
        let interface = ApplicationError::from(DomainError::NotFound {
            entity: "transport service",
            id: "42".to_owned(),
        })
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::NotFound { .. }));
        assert_eq!(interface.user_message(), "transport service 42 not found");
    }

    #[test]
    fn stale_transition_maps_to_conflict() {
        let interface = ApplicationError::from(DomainError::InvalidRequestTransition {
            from: RequestStatus::Completed,
            to: RequestStatus::Formed,
        })
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(interface.correlation_id(), "req-3");
    }

    #[test]
    fn persistence_error_is_redacted() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("jwt secret missing".to_owned()).into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
