//! Local JSON API driving the acquisition engine
//!
//! The dashboard front-end reads channel snapshots from here and sends range
//! edits, selections, auto-refresh toggles and writes back.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::error::{Error, RangeError};
use crate::modbus::{
    writer::WriteStatus, Coils, DataDomain, DiscreteInputs, Domain, HoldingRegisters,
    PollingScheduler, WriteCommandExecutor, WriteRequest,
};

/// API state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    pub registers: Arc<PollingScheduler<HoldingRegisters>>,
    pub coils: Arc<PollingScheduler<Coils>>,
    pub discrete_inputs: Arc<PollingScheduler<DiscreteInputs>>,
    pub writer: Arc<WriteCommandExecutor>,
    pub metrics: Option<PrometheusHandle>,
}

/// Run `$body` with `$scheduler` bound to the scheduler of `$domain`
macro_rules! with_scheduler {
    ($state:expr, $domain:expr, $scheduler:ident => $body:expr) => {
        match $domain {
            Domain::Registers => {
                let $scheduler = &$state.registers;
                $body
            }
            Domain::Coils => {
                let $scheduler = &$state.coils;
                $body
            }
            Domain::DiscreteInputs => {
                let $scheduler = &$state.discrete_inputs;
                $body
            }
        }
    };
}

/// Create the API router
pub fn create_router(state: ApiState, static_dir: Option<&str>) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .route("/api/write", get(write_status).post(submit_write))
        .route("/api/:domain", get(get_channel))
        .route("/api/:domain/range", put(update_range))
        .route("/api/:domain/refresh", post(refresh))
        .route("/api/:domain/select", post(select))
        .route("/api/:domain/auto-refresh", post(auto_refresh))
        .with_state(Arc::new(state))
        .layer(CorsLayer::permissive());

    match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    }
}

/// Error body returned by every failing endpoint
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// Maps engine errors to HTTP responses
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl From<RangeError> for ApiError {
    fn from(err: RangeError) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Connectivity(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Server { .. } | Error::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
        };

        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn render_metrics(State(state): State<Arc<ApiState>>) -> Result<String, StatusCode> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(StatusCode::NOT_FOUND)
}

async fn snapshot_of<D: DataDomain>(scheduler: &PollingScheduler<D>) -> Response {
    Json(scheduler.channel().snapshot().await).into_response()
}

async fn get_channel(
    State(state): State<Arc<ApiState>>,
    Path(domain): Path<Domain>,
) -> Response {
    with_scheduler!(state, domain, scheduler => snapshot_of(scheduler).await)
}

/// Range edit; either field may be omitted
#[derive(Debug, Deserialize)]
pub struct RangeUpdate {
    pub start: Option<i64>,
    pub count: Option<i64>,
}

async fn apply_range<D: DataDomain>(
    scheduler: &PollingScheduler<D>,
    update: RangeUpdate,
) -> Result<Response, ApiError> {
    let channel = scheduler.channel();
    if let Some(count) = update.count {
        channel.set_count(count).await?;
    }
    if let Some(start) = update.start {
        channel.set_start(start).await?;
    }
    Ok(snapshot_of(scheduler).await)
}

async fn update_range(
    State(state): State<Arc<ApiState>>,
    Path(domain): Path<Domain>,
    Json(update): Json<RangeUpdate>,
) -> Result<Response, ApiError> {
    with_scheduler!(state, domain, scheduler => apply_range(scheduler, update).await)
}

async fn refresh_channel<D: DataDomain>(
    scheduler: &PollingScheduler<D>,
) -> Result<Response, ApiError> {
    scheduler.channel().fetch_current().await?;
    Ok(snapshot_of(scheduler).await)
}

async fn refresh(
    State(state): State<Arc<ApiState>>,
    Path(domain): Path<Domain>,
) -> Result<Response, ApiError> {
    with_scheduler!(state, domain, scheduler => refresh_channel(scheduler).await)
}

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    pub address: u16,
}

async fn select(
    State(state): State<Arc<ApiState>>,
    Path(domain): Path<Domain>,
    Json(request): Json<SelectRequest>,
) -> Response {
    with_scheduler!(state, domain, scheduler => {
        Json(scheduler.channel().select(request.address).await).into_response()
    })
}

/// Explicit state, or a toggle when `enabled` is omitted
#[derive(Debug, Default, Deserialize)]
pub struct AutoRefreshRequest {
    pub enabled: Option<bool>,
}

#[derive(Serialize)]
struct AutoRefreshResponse {
    domain: Domain,
    auto_refresh_enabled: bool,
    interval_ms: u64,
}

async fn set_auto_refresh<D: DataDomain>(
    scheduler: &PollingScheduler<D>,
    enabled: Option<bool>,
) -> AutoRefreshResponse {
    let auto_refresh_enabled = match enabled {
        Some(true) => {
            scheduler.start().await;
            true
        }
        Some(false) => {
            scheduler.stop().await;
            false
        }
        None => scheduler.toggle().await,
    };

    AutoRefreshResponse {
        domain: D::DOMAIN,
        auto_refresh_enabled,
        interval_ms: scheduler.period().as_millis() as u64,
    }
}

async fn auto_refresh(
    State(state): State<Arc<ApiState>>,
    Path(domain): Path<Domain>,
    Json(request): Json<AutoRefreshRequest>,
) -> Json<AutoRefreshResponse> {
    Json(with_scheduler!(state, domain, scheduler => {
        set_auto_refresh(scheduler, request.enabled).await
    }))
}

async fn submit_write(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<WriteRequest>,
) -> Result<Response, ApiError> {
    let confirmation = state.writer.submit(request).await?;
    Ok(Json(confirmation).into_response())
}

/// Current write feedback plus the limit the form should enforce
#[derive(Serialize)]
struct WriteStatusResponse {
    max_address: u16,
    #[serde(flatten)]
    status: WriteStatus,
}

async fn write_status(State(state): State<Arc<ApiState>>) -> Json<WriteStatusResponse> {
    Json(WriteStatusResponse {
        max_address: state.writer.max_address(),
        status: state.writer.status().await,
    })
}
