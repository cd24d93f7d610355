pub mod auth;
pub mod config;
pub mod domain;
pub mod errors;
pub mod quoting;

pub use chrono;
pub use rust_decimal;

pub use auth::{authorize, Action, AuthError, Claims, Role, TokenKind, TokenPair, TokenService};
pub use domain::logistic_request::{
    CargoSpec, DraftEdit, LineItemInput, LineItemUpdate, LogisticRequest, LogisticRequestId,
    RequestFilter, RequestLineItem, RequestStatus, Resolution, Route, Submission,
};
pub use domain::transport_service::{
    RateCard, ServiceFilter, TransportService, TransportServiceDraft, TransportServiceId,
};
pub use domain::user::{NewUser, ProfileUpdate, User, UserId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use quoting::aggregate::RequestTotals;
pub use quoting::calculator::{DeliveryCalculator, DeliveryQuote, QuotingSettings};
pub use quoting::distance::DistanceTable;
