//! # Canopy HTTP API Module
//!
//! This module implements the HTTP bulk API server using axum.
//!
//! ## Endpoints
//!
//! Every route except `/health` takes `?repository=R` (default: "default").
//!
//! - `GET /health` - Health check
//! - `POST /bulk/listPartitions` - Partition root IDs
//! - `POST /bulk/createPartitions` - Register new partitions from a chunk
//! - `POST /bulk/deletePartitions` - Delete partitions by root ID
//! - `POST /bulk/store` - Insert or replace nodes
//! - `POST /bulk/retrieve` - Subtrees by root ID (`&depthLimit=N`)
//! - `POST /bulk/ids` - Allocate fresh IDs (`&count=N`)
//! - `GET /inspection/nodesByClassifier`, `GET /inspection/nodesByLanguage` (`&limit=N`)
//! - `GET /inspection/partitions`, `GET /inspection/metrics`
//! - `GET /admin/repositories`, `POST /admin/createRepository`,
//!   `POST /admin/deleteRepository`, `GET /admin/checkConsistency`, `GET /admin/export`
//!
//! ## Security Configuration
//!
//! - `CANOPY_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `CANOPY_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//! - `CANOPY_API_KEY`: If set, requires Bearer token authentication
//!
//! All three may also come from the `[security]` section of the config file,
//! and reach the router through `ApiSettings`.

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::ApiKey;
pub use handlers::status_for;
pub use middleware::create_rate_limiter;
pub use types::{
    BulkResponse, ChunkJson, ClassifierCountJson, ContainmentJson, CreateRepositoryRequest,
    ExportJson, HealthResponse, LanguageCountJson, LanguageJson, MetaPointerJson, NodeJson,
    PropertyJson, ReferenceJson, ReferenceTargetJson, RepositoryJson, RetrieveRequest,
    VersionJson,
};

use crate::config::ApiSettings;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use canopy_core::{CanopyError, RepositoryServer};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
///
/// The engine synchronizes internally (one lock per repository), so the
/// state only needs shared ownership.
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<RepositoryServer>,
}

impl AppState {
    #[must_use]
    pub fn new(server: RepositoryServer) -> Self {
        Self {
            server: Arc::new(server),
        }
    }

    /// Run an engine call on the blocking pool.
    pub async fn run<T, F>(&self, call: F) -> Result<T, CanopyError>
    where
        F: FnOnce(&RepositoryServer) -> Result<T, CanopyError> + Send + 'static,
        T: Send + 'static,
    {
        let server = Arc::clone(&self.server);
        tokio::task::spawn_blocking(move || call(&server))
            .await
            .map_err(|e| CanopyError::IoError(format!("Engine task failed: {}", e)))?
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build the CORS layer.
///
/// - "*": allows all origins (development only)
/// - `None`: localhost only
/// - otherwise: the comma-separated list of origins
fn build_cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins {
        Some("*") => {
            tracing::warn!("CORS: Allowing ALL origins. This is insecure for production!");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!("CORS: No valid origins configured, defaulting to localhost only");
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            }
        }
        None => {
            tracing::info!("CORS: No origins configured, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

/// Build a restrictive CORS layer that only allows localhost origins.
fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Body limit
/// 4. Rate Limiting - if enabled
/// 5. Authentication - if an API key is configured
pub fn create_router(state: AppState, settings: &ApiSettings) -> Router {
    let cors = build_cors_layer(settings.cors_origins.as_deref());

    let rate_limiter = if settings.rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", settings.rate_limit);
        Some(create_rate_limiter(settings.rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let api_key = settings.api_key.as_deref().map(|k| Arc::new(ApiKey::new(k)));
    if api_key.is_some() {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED - all endpoints are publicly accessible! \
             Set CANOPY_API_KEY or [security] api_key to enable authentication."
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/bulk/listPartitions", post(handlers::list_partitions_handler))
        .route("/bulk/createPartitions", post(handlers::create_partitions_handler))
        .route("/bulk/deletePartitions", post(handlers::delete_partitions_handler))
        .route("/bulk/store", post(handlers::store_handler))
        .route("/bulk/retrieve", post(handlers::retrieve_handler))
        .route("/bulk/ids", post(handlers::ids_handler))
        .route(
            "/inspection/nodesByClassifier",
            get(handlers::nodes_by_classifier_handler),
        )
        .route(
            "/inspection/nodesByLanguage",
            get(handlers::nodes_by_language_handler),
        )
        .route("/inspection/partitions", get(handlers::partitions_handler))
        .route("/inspection/metrics", get(handlers::metrics_handler))
        .route("/admin/repositories", get(handlers::repositories_handler))
        .route("/admin/createRepository", post(handlers::create_repository_handler))
        .route("/admin/deleteRepository", post(handlers::delete_repository_handler))
        .route("/admin/checkConsistency", get(handlers::check_consistency_handler))
        .route("/admin/export", get(handlers::export_handler));

    if let Some(key) = api_key {
        router = router.layer(axum_middleware::from_fn_with_state(
            key,
            auth::api_key_auth_middleware,
        ));
    }

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(settings.body_limit_bytes)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server and serve until Ctrl+C.
pub async fn run_server(
    addr: &str,
    server: RepositoryServer,
    settings: &ApiSettings,
) -> Result<(), CanopyError> {
    let router = create_router(AppState::new(server), settings);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| CanopyError::IoError(format!("Bind failed: {}", e)))?;

    tracing::info!("Canopy HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| CanopyError::IoError(format!("Server error: {}", e)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
