//! Gateway handlers
//!
//! Thin JSON shims over the relay service. The chat glue posts
//! platform updates here as already-translated events; every response
//! uses the unified envelope so callers can branch on `code` without
//! parsing messages.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};

use super::state::AppState;
use crate::error::RelayError;
use crate::events::{ChatEvent, PreCheckoutRequest, SettlementNotice};

/// Unified API response wrapper
///
/// All API responses follow this structure:
/// - code: 0 = success, non-zero = error code (HTTP-aligned)
/// - msg: "ok", or the taxonomy code plus the error message
/// - data: actual data (success) or absent (error)
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Create success response
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ApiResponse::<Value> {
            code: i32::from(self.http_status()),
            msg: format!("{}: {}", self.code(), self),
            data: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Health check response data
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Server timestamp in milliseconds
    pub timestamp_ms: u64,
}

/// GET /health
///
/// Pings the durable store; the response never exposes internals.
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    match state.relay.health().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(HealthResponse { timestamp_ms })),
        ),
        Err(e) => {
            tracing::error!("[HEALTH] store ping failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse {
                    code: 503,
                    msg: "unavailable".to_string(),
                    data: None,
                }),
            )
        }
    }
}

/// POST /event/chat
///
/// Dispatch one translated chat event. The data field carries whatever
/// the handler answered (minted codes, start parameters, ids).
pub async fn chat_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<ChatEvent>,
) -> Result<Json<ApiResponse<Value>>, RelayError> {
    let data = state.relay.dispatch(event).await?;
    Ok(Json(ApiResponse::success(data)))
}

/// POST /event/pre-checkout
///
/// The rail holds the debit until this answers. A non-zero envelope
/// must reach the rail as a rejection, or the payer gets charged for a
/// payment the relay will refuse to settle.
pub async fn pre_checkout(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PreCheckoutRequest>,
) -> Result<Json<ApiResponse<Value>>, RelayError> {
    state.relay.pre_checkout(request).await?;
    Ok(Json(ApiResponse::success(json!({ "ok": true }))))
}

/// POST /event/settlement
pub async fn settlement(
    State(state): State<Arc<AppState>>,
    Json(notice): Json<SettlementNotice>,
) -> Result<Json<ApiResponse<Value>>, RelayError> {
    let balance = state.relay.settle(notice).await?;
    Ok(Json(ApiResponse::success(json!({ "balance": balance }))))
}
