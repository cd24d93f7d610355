pub mod logistic_request;
pub mod transport_service;
pub mod user;
