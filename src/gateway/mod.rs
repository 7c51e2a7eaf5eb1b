//! Axum-based HTTP gateway in front of the credential store.
//!
//! - `GET  /api/test`: liveness probe (auth required)
//! - `POST /api/keys`: upsert exchange credentials (auth required)
//! - `GET  /metrics`: Prometheus counters (auth required, optional)
//!
//! Middleware: CORS restricted to configured origins, request body limit,
//! whole-request timeout, and a panic catcher that answers with a generic
//! JSON 500. Errors produced by the middleware itself are rewritten to the
//! same `{"error": ...}` shape as handler errors.

pub mod auth;
pub mod error;
pub mod validate;

pub use error::ApiError;

use crate::config::{Config, GatewayConfig};
use crate::credentials::{CredentialStore, SqliteCredentialStore, StoreError};
use crate::observability::{
    self, Observer, ObserverEvent, ObserverMetric, PrometheusObserver, StorageOp,
};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CredentialStore>,
    pub observer: Arc<dyn Observer>,
    /// SHA-256 hash of the bearer token (hex-encoded), never plaintext.
    pub auth_token_hash: Arc<str>,
    /// Bound applied to every storage call made by a handler.
    pub storage_timeout: Duration,
    pub metrics: Option<Arc<PrometheusObserver>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        observer: Arc<dyn Observer>,
        auth_token: &str,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            observer,
            auth_token_hash: Arc::from(auth::hash_token(auth_token)),
            storage_timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<PrometheusObserver>>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Open the store, prepare the schema, and serve until Ctrl-C.
///
/// Fails before binding if no auth token is configured or the database
/// cannot be opened, initialised, or reached.
pub async fn run_gateway(config: &Config) -> Result<()> {
    let gateway = &config.gateway;
    let auth_token = config.require_auth_token()?;

    let (observer, metrics) = observability::create_observer(gateway.metrics_enabled)
        .context("Failed to register Prometheus metrics")?;

    let store = SqliteCredentialStore::open(&config.database, observer.clone())
        .with_context(|| {
            format!(
                "Failed to open database: {}",
                config.database.resolved_path().display()
            )
        })?;
    store
        .ensure_schema()
        .await
        .context("Failed to initialise database schema")?;
    store
        .check_connectivity()
        .await
        .context("Database connectivity check failed")?;
    tracing::info!(path = %store.db_path().display(), "Credential database ready");

    let state = AppState::new(
        Arc::new(store),
        observer,
        auth_token,
        Duration::from_secs(gateway.storage_timeout_secs),
    )
    .with_metrics(metrics);
    let app = build_router(state, gateway)?;

    if is_public_bind(&gateway.host) {
        tracing::warn!(
            host = %gateway.host,
            "Gateway is bound to a non-loopback address; make sure TLS terminates in front of it"
        );
    }

    let addr: SocketAddr = format!("{}:{}", gateway.host, gateway.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", gateway.host, gateway.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

/// Build the router with middleware.
pub fn build_router(state: AppState, config: &GatewayConfig) -> Result<Router> {
    let cors = cors_layer(&config.allowed_origins)?;

    Ok(Router::new()
        .route(
            "/api/test",
            get(handle_test).fallback(handle_method_not_allowed),
        )
        .route(
            "/api/keys",
            post(handle_keys).fallback(handle_method_not_allowed),
        )
        .route(
            "/metrics",
            get(handle_metrics).fallback(handle_method_not_allowed),
        )
        .fallback(handle_not_found)
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(middleware::map_response(json_error_bodies))
        .layer(cors)
        .layer(CatchPanicLayer::custom(handle_panic)))
}

/// The body-limit and timeout layers answer on their own with plain-text or
/// empty bodies; give those the same `{"error": ...}` shape as handlers.
async fn json_error_bodies(response: Response) -> Response {
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    if is_json {
        return response;
    }
    match response.status() {
        StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge.into_response(),
        StatusCode::REQUEST_TIMEOUT => ApiError::RequestTimeout.into_response(),
        _ => response,
    }
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    if origins.iter().any(|o| o == "*") {
        return Ok(cors.allow_origin(Any));
    }

    let origins = origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o).with_context(|| format!("Invalid CORS origin: {o}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(cors.allow_origin(AllowOrigin::list(origins)))
}

fn is_public_bind(host: &str) -> bool {
    !matches!(host, "127.0.0.1" | "localhost" | "::1")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// Reject the request unless it carries the configured bearer token.
fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    auth::check_bearer(headers, &state.auth_token_hash).map_err(|rejection| {
        state.observer.record_event(&ObserverEvent::AuthRejected {
            reason: rejection.reason,
            token_hint: rejection.token_hint,
        });
        ApiError::Unauthorized
    })
}

/// Run a storage future under the configured timeout and record its latency.
async fn run_storage<T, F>(state: &AppState, operation: StorageOp, fut: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    let started = Instant::now();
    let result = tokio::time::timeout(state.storage_timeout, fut).await;
    state.observer.record_metric(&ObserverMetric::StorageLatency {
        operation,
        duration: started.elapsed(),
    });

    match result {
        Ok(inner) => inner.map_err(ApiError::Storage),
        Err(_) => {
            state
                .observer
                .record_event(&ObserverEvent::StorageTimedOut { operation });
            Err(ApiError::Storage(StoreError::Timeout(state.storage_timeout)))
        }
    }
}

/// GET /api/test: API and database liveness.
async fn handle_test(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;

    let result = run_storage(
        &state,
        StorageOp::Connectivity,
        state.store.check_connectivity(),
    )
    .await;
    state
        .observer
        .record_event(&ObserverEvent::ConnectivityChecked {
            healthy: result.is_ok(),
        });
    result?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "message": "API and database are working",
    })))
}

/// POST /api/keys: validate and upsert one exchange's credentials.
async fn handle_keys(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;

    let submission = validate::validate_submission(&body).map_err(|e| {
        state.observer.record_event(&ObserverEvent::ValidationRejected {
            detail: e.to_string(),
        });
        e
    })?;

    let outcome = run_storage(&state, StorageOp::Upsert, state.store.upsert(&submission)).await?;
    state.observer.record_event(&ObserverEvent::CredentialsSaved {
        exchange: submission.exchange.clone(),
        created: outcome.is_created(),
    });

    Ok(Json(serde_json::json!({ "status": "success" })))
}

/// GET /metrics: Prometheus text exposition.
async fn handle_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    require_auth(&state, &headers)?;

    let metrics = state.metrics.as_ref().ok_or(ApiError::NotFound)?;
    let text = metrics.encode().map_err(|e| {
        tracing::error!("Failed to encode metrics: {e}");
        ApiError::Internal
    })?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    )
        .into_response())
}

async fn handle_not_found() -> ApiError {
    ApiError::NotFound
}

async fn handle_method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

fn handle_panic(_payload: Box<dyn std::any::Any + Send + 'static>) -> Response {
    tracing::error!("Request handler panicked");
    ApiError::Internal.into_response()
}
