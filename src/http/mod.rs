//! # HTTP Module
//!
//! The REST surface over [`RestService`](crate::rest::RestService): request
//! credential extraction, routes and the server.

mod request;
mod routes;
mod server;

pub use request::{
    RequestInfo, APPLICATION_ID_HEADER, CLIENT_KEY_HEADER, CLIENT_VERSION_HEADER,
    INSTALLATION_ID_HEADER, MASTER_KEY_HEADER, SESSION_TOKEN_HEADER,
};
pub use routes::{api_routes, HealthResponse};
pub use server::HttpServer;
