use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::JsonRejection,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use orbitshield_common::{RiskScoreRequest, RiskScoreResponse, TokenResponse};

use crate::model::{CatalogError, JsonCatalog, NewObject, TrackedObject};
use crate::module::risk::{RiskFeatures, RiskScorer};
use crate::module::{SubscriberRegistry, TokenAuthority, TokenRejection};

pub const CLOSE_TOKEN_MISSING: u16 = 4000;
pub const CLOSE_TOKEN_UNKNOWN: u16 = 4001;
pub const CLOSE_TOKEN_EXPIRED: u16 = 4002;

/// Shared handles for request handlers
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenAuthority>,
    pub registry: Arc<SubscriberRegistry>,
    pub catalog: Arc<JsonCatalog>,
    pub scorer: Arc<RiskScorer>,
    pub allowed_origin: Option<String>,
    pub subscriber_queue: usize,
}

/// Why a stream connection was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("token missing")]
    MissingToken,

    #[error("{0}")]
    Token(#[from] TokenRejection),

    #[error("origin not allowed")]
    OriginMismatch,
}

impl AuthFailure {
    pub fn close_code(&self) -> u16 {
        match self {
            AuthFailure::MissingToken => CLOSE_TOKEN_MISSING,
            AuthFailure::Token(TokenRejection::NotFound) => CLOSE_TOKEN_UNKNOWN,
            AuthFailure::Token(TokenRejection::Expired) => CLOSE_TOKEN_EXPIRED,
            AuthFailure::OriginMismatch => close_code::POLICY,
        }
    }
}

/// Check the declared origin, then redeem the token. The origin is checked
/// first so a cross-origin attempt does not burn the token.
pub async fn authorize(
    tokens: &TokenAuthority,
    allowed_origin: Option<&str>,
    token: Option<&str>,
    origin: Option<&str>,
) -> Result<(), AuthFailure> {
    if let Some(allowed) = allowed_origin {
        if origin != Some(allowed) {
            return Err(AuthFailure::OriginMismatch);
        }
    }

    let token = token
        .filter(|t| !t.is_empty())
        .ok_or(AuthFailure::MissingToken)?;
    tokens.redeem(token).await?;
    Ok(())
}

/// HTTP error body `{ "error": ... }`
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("invalid request body: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Catalog(CatalogError::DuplicateName(_)) => StatusCode::CONFLICT,
            ApiError::Catalog(CatalogError::InvalidElements(_)) => StatusCode::BAD_REQUEST,
            ApiError::Catalog(CatalogError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Catalog(CatalogError::Io(_) | CatalogError::Corrupt(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = match state.allowed_origin.as_deref() {
        Some(origin) => match HeaderValue::from_str(origin) {
            Ok(value) => CorsLayer::new()
                .allow_origin(value)
                .allow_methods(Any)
                .allow_headers(Any),
            Err(_) => {
                warn!("Allowed origin '{}' is not a valid header value", origin);
                CorsLayer::new()
            }
        },
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route("/health", get(health))
        .route("/auth/token", post(issue_token))
        .route("/ws/positions", get(stream_positions))
        .route("/objects", get(list_objects).post(add_object))
        .route("/risk/score", post(score_risk))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "subscribers": state.registry.len().await,
        "scoring": state.scorer.mode(),
    }))
}

async fn issue_token(State(state): State<AppState>) -> Json<TokenResponse> {
    let token = state.tokens.issue().await;
    Json(TokenResponse {
        token: token.value,
        expiry: token.expires_at.timestamp_millis(),
    })
}

async fn list_objects(State(state): State<AppState>) -> Json<Vec<TrackedObject>> {
    Json(state.catalog.list().await)
}

async fn add_object(
    State(state): State<AppState>,
    body: Result<Json<NewObject>, JsonRejection>,
) -> Result<(StatusCode, Json<TrackedObject>), ApiError> {
    let Json(obj) = body?;
    let record = state.catalog.add_object(obj).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn score_risk(
    State(state): State<AppState>,
    body: Result<Json<RiskScoreRequest>, JsonRejection>,
) -> Result<Json<RiskScoreResponse>, ApiError> {
    let Json(req) = body?;
    let assessment = state.scorer.score(&RiskFeatures {
        distance_km: req.distance,
        relative_speed_km_s: req.speed,
        size_satellite: req.size_sat,
        size_debris: req.size_deb,
        history_factor: req.history,
        noise_factor: req.tle_noise,
    });
    Ok(Json(RiskScoreResponse {
        risk_score: assessment.score,
        risk_class: assessment.class,
    }))
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    token: Option<String>,
}

async fn stream_positions(
    ws: WebSocketUpgrade,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // redeemed only once the handshake has completed
    ws.on_upgrade(move |socket| async move {
        let decision = authorize(
            &state.tokens,
            state.allowed_origin.as_deref(),
            params.token.as_deref(),
            origin.as_deref(),
        )
        .await;
        match decision {
            Ok(()) => serve_subscriber(socket, state).await,
            Err(failure) => reject(socket, failure).await,
        }
    })
}

async fn reject(mut socket: WebSocket, failure: AuthFailure) {
    info!("Rejecting stream connection: {}", failure);
    let frame = CloseFrame {
        code: failure.close_code(),
        reason: failure.to_string().into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!("Failed to send close frame: {}", e);
    }
}

/// Pump queued frames to the socket until either side goes away
async fn serve_subscriber(socket: WebSocket, state: AppState) {
    let (id, mut frames) = state.registry.subscribe(state.subscriber_queue).await;
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sender.send(Message::Text(frame.to_string().into())).await {
                        debug!(subscriber = %id, "Send failed: {}", e);
                        break;
                    }
                }
                // dropped by the registry
                None => break,
            },
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(subscriber = %id, "Receive failed: {}", e);
                    break;
                }
            },
        }
    }

    state.registry.unregister(id).await;
}
