//! # Grant Enumeration HTTP Server
//!
//! Serves the two inverse access queries over HTTP.
//!
//! ## Endpoints
//!
//! - `GET /api/user-access?user=alice` - Everything a user can do, per domain
//! - `GET /api/resource-access?resource_type=property&action=read[&resource_id=p-1]` -
//!   Everyone who can act on a resource, per domain
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics
//!
//! ## Configuration
//!
//! Environment variables:
//! - `POLICY_FILE` - Tuple file, `.json` or Casbin-style CSV (required)
//! - `RESOURCE_CATALOG` - `type:action` pairs to probe, comma separated
//!   (default: every concrete pair named by the policy rules)
//! - `PORT` - HTTP server port (default: 8080)
//! - `MAX_CONCURRENCY` - Oracle probes in flight per request (default: CPU count)
//! - `ENUMERATION_TIMEOUT_MS` - Per-request enumeration deadline (default: 30000)
//! - `RUST_LOG` - Log level (default: info)

use accessmap_grants::{
    store::load_path, AccessByDomain, AccessList, EnumeratorConfig, GrantEnumerator, GrantError,
    InMemoryTupleStore, RbacOracle, ResourceCatalog,
};
use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    serve, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Server configuration, read from the environment
#[derive(Debug, Clone)]
struct ServerConfig {
    policy_file: PathBuf,
    resource_catalog: Option<String>,
    port: u16,
    max_concurrency: usize,
    enumeration_timeout: Duration,
}

impl ServerConfig {
    fn from_env() -> anyhow::Result<Self> {
        let policy_file = std::env::var("POLICY_FILE")
            .map(PathBuf::from)
            .context("POLICY_FILE must point at a tuple file")?;

        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080);

        let max_concurrency: usize = std::env::var("MAX_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| EnumeratorConfig::default().max_concurrency);

        let timeout_ms: u64 = std::env::var("ENUMERATION_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30_000);

        Ok(Self {
            policy_file,
            resource_catalog: std::env::var("RESOURCE_CATALOG").ok(),
            port,
            max_concurrency,
            enumeration_timeout: Duration::from_millis(timeout_ms),
        })
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    enumerator: Arc<GrantEnumerator>,
    enumeration_timeout: Duration,
    start_time: std::time::Instant,
}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

/// Application error type
#[derive(Debug)]
struct AppError(GrantError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match &self.0 {
            GrantError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            GrantError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            GrantError::OracleUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "oracle_unavailable")
            }
            GrantError::Cancelled => (StatusCode::GATEWAY_TIMEOUT, "enumeration_timeout"),
            GrantError::InvalidPolicy(_) | GrantError::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: self.0.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<GrantError> for AppError {
    fn from(err: GrantError) -> Self {
        AppError(err)
    }
}

#[derive(Debug, Deserialize)]
struct UserAccessParams {
    user: String,
}

#[derive(Debug, Deserialize)]
struct ResourceAccessParams {
    resource_type: String,
    action: String,
    resource_id: Option<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
    version: String,
}

/// Metrics response (Prometheus format)
struct MetricsResponse {
    metrics: String,
}

impl IntoResponse for MetricsResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            self.metrics,
        )
            .into_response()
    }
}

/// Cancels a request's token once its deadline passes; disarmed on drop
struct Deadline(JoinHandle<()>);

impl Deadline {
    fn arm(token: CancellationToken, timeout: Duration) -> Self {
        Deadline(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            token.cancel();
        }))
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// GET /api/user-access - What a user can do
async fn user_access(
    State(state): State<AppState>,
    Query(params): Query<UserAccessParams>,
) -> Result<Json<AccessList>, AppError> {
    info!("User access query: user={}", params.user);

    let cancel = CancellationToken::new();
    let _deadline = Deadline::arm(cancel.clone(), state.enumeration_timeout);

    let access = state
        .enumerator
        .enumerate_by_subject_with_cancel(&params.user, &cancel)
        .await?;

    Ok(Json(access))
}

/// GET /api/resource-access - Who can act on a resource
async fn resource_access(
    State(state): State<AppState>,
    Query(params): Query<ResourceAccessParams>,
) -> Result<Json<AccessByDomain>, AppError> {
    info!(
        "Resource access query: resource_type={}, action={}, resource_id={:?}",
        params.resource_type, params.action, params.resource_id
    );

    let cancel = CancellationToken::new();
    let _deadline = Deadline::arm(cancel.clone(), state.enumeration_timeout);

    let view = state
        .enumerator
        .enumerate_by_resource_with_cancel(
            &params.resource_type,
            &params.action,
            params.resource_id.as_deref(),
            &cancel,
        )
        .await?;

    Ok(Json(view))
}

/// GET / - Service banner
async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "AccessMap grant enumeration: user and resource access queries"
    }))
}

/// GET /health - Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed().as_secs();

    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: uptime,
        version: accessmap_grants::VERSION.to_string(),
    })
}

/// GET /metrics - Prometheus metrics endpoint
async fn metrics(State(state): State<AppState>) -> MetricsResponse {
    let uptime = state.start_time.elapsed().as_secs();

    let mut metrics = format!(
        "# HELP grants_uptime_seconds Server uptime in seconds\n\
         # TYPE grants_uptime_seconds gauge\n\
         grants_uptime_seconds {}\n\n",
        uptime
    );
    if let Some(engine_metrics) = state.enumerator.export_metrics().await {
        metrics.push_str(&engine_metrics);
    }

    MetricsResponse { metrics }
}

/// Create the HTTP router with all endpoints
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http()
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/", get(root))
        .route("/api/user-access", get(user_access))
        .route("/api/resource-access", get(resource_access))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(ServiceBuilder::new().layer(trace).layer(cors))
        .with_state(state)
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}

/// Main server entrypoint
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting AccessMap Grant Server v{}", accessmap_grants::VERSION);

    let config = ServerConfig::from_env()?;

    info!("Configuration:");
    info!("  Port: {}", config.port);
    info!("  Policy file: {}", config.policy_file.display());
    info!("  Max concurrency: {}", config.max_concurrency);
    info!("  Enumeration timeout: {:?}", config.enumeration_timeout);

    let snapshot = load_path(&config.policy_file)
        .with_context(|| format!("failed to load {}", config.policy_file.display()))?;

    let catalog = match &config.resource_catalog {
        Some(list) => ResourceCatalog::parse(list).context("invalid RESOURCE_CATALOG")?,
        None => {
            let catalog = ResourceCatalog::from_policies(&snapshot);
            warn!(
                "RESOURCE_CATALOG not set, probing {} (type, action) pairs named by the policy rules",
                catalog.len()
            );
            catalog
        }
    };

    let oracle = Arc::new(RbacOracle::from_snapshot(&snapshot));
    let store = Arc::new(InMemoryTupleStore::from_snapshot(snapshot));

    let enumerator = GrantEnumerator::with_config(
        store,
        oracle,
        catalog,
        EnumeratorConfig {
            max_concurrency: config.max_concurrency,
            enable_metrics: true,
        },
    );

    let state = AppState {
        enumerator: Arc::new(enumerator),
        enumeration_timeout: config.enumeration_timeout,
        start_time: std::time::Instant::now(),
    };

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Server shut down gracefully");
    Ok(())
}
