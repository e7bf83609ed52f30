//! calbridge HTTP server.
//!
//! Routes:
//! - `GET /healthz`, `GET /openapi.json`: open
//! - `GET /auth`, `GET /auth/callback`: OAuth front door
//! - `/api/calendar/events[/{eventId}]`: calendar operations behind the API key gate

// The OpenAPI document is one large `json!` literal.
#![recursion_limit = "256"]

pub mod auth_gate;
pub mod config;
pub mod error;
pub mod oauth;
pub mod routes;
pub mod state;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::routing::get;
use axum::{Router, middleware};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult, ServerError, ServerResult};
pub use state::{AppState, SharedState};

/// Builds the full router.
pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route(
            "/calendar/events",
            get(routes::list_events).post(routes::create_event),
        )
        .route(
            "/calendar/events/{event_id}",
            axum::routing::patch(routes::update_event).delete(routes::delete_event),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_gate::require_api_key,
        ));

    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/openapi.json", get(routes::openapi))
        .route("/auth", get(oauth::start_authorization))
        .route("/auth/callback", get(oauth::complete_authorization))
        .nest("/api", api)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Opens the store, wires the state and serves until Ctrl-C or SIGTERM.
pub async fn serve(config: ServerConfig) -> ServerResult<()> {
    let store = calbridge_store::open(&config.store, config.store_timeout)?;
    if let Err(e) = store.ensure_schema().await {
        // The first request will report the store as unavailable.
        warn!(backend = store.backend(), error = %e, "could not prepare token store");
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(&config, store)?);
    if state.api_key.is_none() {
        warn!("ACTIONS_API_KEY is not set, every API request will be rejected");
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, version = env!("CARGO_PKG_VERSION"), "calbridge listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("calbridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
