//! API middleware

mod auth;
mod cors;
mod logging;

pub use auth::{
    authorize, parse_basic, query_param, BasicCredentials, HEADER_SHROUD_AUTHENTICATE,
    HEADER_SHROUD_AUTHORIZATION,
};
pub use cors::cors_layer;
pub use logging::RequestLogging;
