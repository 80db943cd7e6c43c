//! Civic Governance HTTP API

mod error;
pub mod identity;
mod response;
mod routes;
mod state;

pub use error::{ApiError, ApiResult};
pub use identity::{CORRELATION_HEADER, IDENTITY_HEADER};
pub use state::ApiState;

use axum::http::{header::CONTENT_TYPE, HeaderName, Method};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Full application router with state, CORS and request tracing applied
pub fn app(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static(IDENTITY_HEADER),
            HeaderName::from_static(CORRELATION_HEADER),
        ]);

    routes::create_routes()
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_server(
    addr: SocketAddr,
    state: ApiState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "api_listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
