//! # HTTP Server
//!
//! Binds the object API router to the configured address with CORS and
//! request tracing layers.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::routes::api_routes;
use crate::config::ServerConfig;
use crate::rest::RestService;

/// HTTP server for the object API
pub struct HttpServer {
    config: ServerConfig,
    router: Router,
}

impl HttpServer {
    /// Create a server for `rest` using the listener settings from its config
    pub fn new(rest: RestService) -> Self {
        let config = rest.config().server.clone();
        Self::with_config(config, rest)
    }

    /// Create a server with explicit listener settings
    pub fn with_config(config: ServerConfig, rest: RestService) -> Self {
        let router = Self::build_router(&config, rest);
        Self { config, router }
    }

    fn build_router(config: &ServerConfig, rest: RestService) -> Router {
        let cors = if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        api_routes(rest)
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Start serving until the listener fails
    pub async fn start(self) -> Result<(), std::io::Error> {
        let addr: SocketAddr = self.config.socket_addr().parse().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid socket address {}: {}", self.config.socket_addr(), e),
            )
        })?;

        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "object API listening");
        axum::serve(listener, self.router).await?;
        Ok(())
    }
}
