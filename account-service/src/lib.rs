pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;

use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use service_core::auth::JwtService;
use service_core::axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    idempotency_middleware, metrics_middleware, panic_response, request_id_middleware,
    security_headers_middleware, IdempotencyStore, IDEMPOTENCY_KEY_HEADER, REQUEST_ID_HEADER,
};
use service_core::service::{Handler, RoutingTable};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::AccountConfig;
use crate::services::{AccountLifecycle, Notifier};

/// Upper bound on handling one request, store calls included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub config: AccountConfig,
    pub jwt: JwtService,
    pub users: Arc<dyn Handler>,
    pub notifier: Arc<dyn Notifier>,
    pub lifecycle: Arc<AccountLifecycle>,
    pub metrics: Option<PrometheusHandle>,
    pub idempotency: IdempotencyStore,
}

impl AppState {
    pub fn new(
        config: AccountConfig,
        jwt: JwtService,
        users: Arc<dyn Handler>,
        notifier: Arc<dyn Notifier>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let lifecycle = Arc::new(AccountLifecycle::new(
            Arc::clone(&users),
            Arc::clone(&notifier),
            config.audience.clone(),
        ));

        Self {
            config,
            jwt,
            users,
            notifier,
            lifecycle,
            metrics,
            idempotency: IdempotencyStore::default(),
        }
    }
}

/// Mounts the declared services under the API prefix next to the
/// operational endpoints, then applies the global middleware stack.
pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let services = RoutingTable::new(state.config.common.api_prefix.clone())
        .service(handlers::users::service(Arc::clone(&state.users))?)?
        .service(handlers::authentication::service(Arc::clone(&state.users))?)?
        .into_router(state.clone(), state.jwt.clone())?;

    let operational = Router::new()
        .route("/ping", get(ping))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .with_state(state.clone());

    let cors = cors_layer(&state.config)?;

    let app = services
        .merge(operational)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(from_fn_with_state(
            state.idempotency.clone(),
            idempotency_middleware,
        ))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors);

    Ok(app)
}

fn cors_layer(config: &AccountConfig) -> Result<CorsLayer, AppError> {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(IDEMPOTENCY_KEY_HEADER),
        ]);

    if config.is_production() {
        let origin = config.audience.parse::<HeaderValue>().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "Invalid CORS origin '{}': {}",
                config.audience,
                e
            ))
        })?;
        Ok(layer.allow_origin(origin))
    } else {
        Ok(layer.allow_origin(Any))
    }
}

async fn ping() -> &'static str {
    "Pong!"
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.users.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": state.config.service_name,
                "version": state.config.service_version,
            })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Store health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": state.config.service_name,
                    "error": e.to_string(),
                })),
            )
        }
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            String::from("metrics exporter not installed"),
        ),
    }
}
