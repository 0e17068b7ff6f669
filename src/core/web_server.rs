//! Public HTTP API.
//!
//! - `POST /api/verifications`              start an attempt
//! - `GET  /api/verifications/{id}`         poll its status
//! - `POST /api/verifications/{id}/redeem`  submit the code
//! - `POST /api/telegram-webhook`           Telegram update delivery
//! - `GET  /health`, `GET /metrics`
//!
//! Runs on WEB_PORT (default 3000).

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::time::Instant;

use crate::core::config;
use crate::core::error::AppResult;
use crate::core::logging::short_id;
use crate::core::metrics;
use crate::core::validation::{compose_phone_number, deep_link_payload, validate_code_format, ValidationError};
use crate::telegram::handlers::{handle_update, HandlerDeps};
use crate::verification::error::VerifyError;
use crate::verification::lifecycle::AttemptManager;
use crate::verification::model::{AttemptId, AttemptStatus};
use crate::verification::redemption::{RedeemOutcome, RedemptionGateway};

/// Header Telegram uses to echo the webhook `secret_token`.
pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Shared state for the web server.
#[derive(Clone)]
pub struct WebState {
    pub manager: AttemptManager,
    pub gateway: RedemptionGateway,
    pub handlers: HandlerDeps,
    pub webhook_secret: Option<String>,
    pub bot_username: Option<String>,
    pub started_at: Instant,
}

impl WebState {
    pub fn new(manager: AttemptManager, gateway: RedemptionGateway, handlers: HandlerDeps) -> Self {
        Self {
            manager,
            gateway,
            handlers,
            webhook_secret: config::WEBHOOK_SECRET.clone(),
            bot_username: config::BOT_USERNAME.clone(),
            started_at: Instant::now(),
        }
    }
}

/// Builds the application router (also used directly by the HTTP tests).
pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/api/verifications", post(start_handler))
        .route("/api/verifications/{id}", get(status_handler))
        .route("/api/verifications/{id}/redeem", post(redeem_handler))
        .route("/api/telegram-webhook", post(webhook_handler).get(webhook_probe_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(config::web::MAX_BODY_BYTES))
        .with_state(state)
}

/// Start the public web server.
pub async fn start_web_server(port: u16, state: WebState) -> AppResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(state);

    log::info!("Starting web server on http://{}", addr);
    log::info!("  POST /api/verifications              - Start verification");
    log::info!("  GET  /api/verifications/{{id}}         - Poll status");
    log::info!("  POST /api/verifications/{{id}}/redeem  - Redeem code");
    log::info!("  POST /api/telegram-webhook           - Telegram updates");
    log::info!("  GET  /health, /metrics");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// JSON error body: `{"error": "...", "field": "...", "message": "..."}`.
struct ApiError(VerifyError);

impl From<VerifyError> for ApiError {
    fn from(err: VerifyError) -> Self {
        ApiError(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            VerifyError::InvalidInput { field, message } => (
                StatusCode::BAD_REQUEST,
                json!({"error": "invalidInput", "field": field, "message": message}),
            ),
            VerifyError::NotFound => (
                StatusCode::NOT_FOUND,
                json!({"error": "notFound", "message": "Verification session not found. Please start over."}),
            ),
            VerifyError::UpstreamUnavailable(detail) => {
                log::error!("Request failed on infrastructure: {}", detail);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({"error": "unavailable", "message": "Please try again in a moment."}),
                )
            }
            other => {
                log::warn!("Request rejected: {}", other);
                (
                    StatusCode::CONFLICT,
                    json!({"error": "conflict", "message": "This verification could not be completed."}),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

fn body_error(rejection: JsonRejection) -> ApiError {
    ApiError(VerifyError::InvalidInput {
        field: "body",
        message: rejection.body_text(),
    })
}

// ---------------------------------------------------------------------------
// Verification endpoints
// ---------------------------------------------------------------------------

/// Either a full number or the web form's split country code + local part.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    client_id: String,
    phone_number: Option<String>,
    country_code: Option<String>,
    local_phone_number: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    pending_id: String,
    start_payload: String,
    deep_link: Option<String>,
    expires_at: DateTime<Utc>,
}

impl StartRequest {
    fn phone(&self) -> Result<String, ValidationError> {
        match (&self.phone_number, &self.country_code, &self.local_phone_number) {
            (Some(full), _, _) => Ok(full.trim().to_string()),
            (None, country, local) => compose_phone_number(
                country.as_deref().unwrap_or_default(),
                local.as_deref().unwrap_or_default(),
            ),
        }
    }
}

/// POST /api/verifications
async fn start_handler(
    State(state): State<WebState>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(body_error)?;
    let phone = request.phone()?;
    let attempt = state.manager.start_attempt(&request.client_id, &phone).await?;

    let start_payload = deep_link_payload(attempt.id.as_str());
    let deep_link = state
        .bot_username
        .as_deref()
        .map(|name| format!("https://t.me/{}?start={}", name, start_payload));

    let body = StartResponse {
        pending_id: attempt.id.to_string(),
        start_payload,
        deep_link,
        expires_at: attempt.expires_at,
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    pending_id: String,
    status: AttemptStatus,
    guesses_remaining: i64,
    expires_at: DateTime<Utc>,
}

/// GET /api/verifications/{id}
async fn status_handler(State(state): State<WebState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let attempt = state.manager.refresh(&AttemptId::from(id)).await?;
    let body = StatusResponse {
        pending_id: attempt.id.to_string(),
        status: attempt.status,
        guesses_remaining: attempt.guesses_remaining,
        expires_at: attempt.expires_at,
    };
    Ok(Json(body).into_response())
}

#[derive(Debug, Deserialize)]
struct RedeemRequest {
    code: String,
}

/// POST /api/verifications/{id}/redeem
async fn redeem_handler(
    State(state): State<WebState>,
    Path(id): Path<String>,
    payload: Result<Json<RedeemRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(body_error)?;
    let code = request.code.trim();
    validate_code_format(code)?;

    let outcome = state.gateway.redeem(&AttemptId::from(id), code).await?;
    let status = match outcome {
        RedeemOutcome::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)).into_response())
}

// ---------------------------------------------------------------------------
// Telegram webhook
// ---------------------------------------------------------------------------

/// POST /api/telegram-webhook
///
/// Acknowledges every authenticated delivery with 200, whatever happened
/// while processing it: Telegram retries anything else and every handler is
/// idempotent anyway.
async fn webhook_handler(State(state): State<WebState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(expected) = state.webhook_secret.as_deref() {
        let provided = headers
            .get(SECRET_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());
        if provided != Some(expected) {
            log::warn!("Rejected webhook delivery with missing or wrong secret token");
            return (StatusCode::UNAUTHORIZED, Json(json!({"status": "unauthorized"}))).into_response();
        }
    }

    let update = match serde_json::from_slice::<teloxide::types::Update>(&body) {
        Ok(update) => update,
        Err(e) => {
            metrics::CHANNEL_EVENTS_TOTAL.with_label_values(&["unparseable"]).inc();
            log::warn!("Unparseable webhook body ({} bytes): {}", body.len(), e);
            return ack();
        }
    };

    let timeout = config::web::webhook_processing_timeout();
    match tokio::time::timeout(timeout, handle_update(&state.handlers, &update)).await {
        Ok(Ok(Some(outcome))) => log::debug!("Update {} -> {:?}", update.id.0, outcome),
        Ok(Ok(None)) => {}
        Ok(Err(e)) => log::error!("Update {} failed: {}", update.id.0, e),
        Err(_) => log::error!("Update {} not processed within {:?}", update.id.0, timeout),
    }
    ack()
}

fn ack() -> Response {
    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}

/// GET /api/telegram-webhook
async fn webhook_probe_handler() -> impl IntoResponse {
    Json(json!({"status": "ok", "message": "Telegram webhook endpoint is live. Updates are accepted via POST."}))
}

// ---------------------------------------------------------------------------
// Health & metrics
// ---------------------------------------------------------------------------

/// GET /health
async fn health_handler(State(state): State<WebState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "service": "televerify",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /metrics
async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok(text) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            log::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to encode metrics: {}", e)).into_response()
        }
    }
}
