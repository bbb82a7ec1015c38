use crate::error::StoreError;
use crate::push as push_service;
use crate::state;
use crate::types::push::{PushSubscription, SubscriptionDescriptor, SubscriptionId, SubscriptionKeys};

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::error;

#[derive(Serialize)]
pub(crate) struct PublicKeyResponse {
    #[serde(rename = "publicKey")]
    pub(crate) public_key: String,
}

#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub(crate) async fn push_public_key(
    State(state): State<state::AppState>,
) -> Json<PublicKeyResponse> {
    Json(PublicKeyResponse {
        public_key: state.public_key.to_string(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegisterSubscriptionRequest {
    pub(crate) user_id: String,
    pub(crate) endpoint: String,
    pub(crate) keys: SubscriptionKeys,
}

pub(crate) async fn register_subscription(
    State(state): State<state::AppState>,
    Json(request): Json<RegisterSubscriptionRequest>,
) -> Result<(StatusCode, Json<PushSubscription>), ApiError> {
    let descriptor = SubscriptionDescriptor {
        endpoint: request.endpoint,
        keys: request.keys,
    };
    match state.store.create(&request.user_id, descriptor) {
        Ok(subscription) => Ok((StatusCode::CREATED, Json(subscription))),
        Err(StoreError::InvalidSubscription(reason)) => {
            Err(api_error(StatusCode::BAD_REQUEST, reason))
        }
        Err(err) => {
            error!(error = %err, "failed to store push subscription");
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to store subscription.",
            ))
        }
    }
}

pub(crate) async fn delete_subscription(
    State(state): State<state::AppState>,
    Path(id): Path<SubscriptionId>,
) -> Result<StatusCode, ApiError> {
    match state.store.delete(&id) {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(api_error(StatusCode::NOT_FOUND, "Unknown subscription.")),
        Err(err) => {
            error!(subscription = %id, error = %err, "failed to delete push subscription");
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to delete subscription.",
            ))
        }
    }
}

pub(crate) async fn start_session(
    State(state): State<state::AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<push_service::SessionInfo>, ApiError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "user id is required."));
    }
    Ok(Json(state.sessions.start(user_id)))
}

pub(crate) async fn stop_session(
    State(state): State<state::AppState>,
    Path(user_id): Path<String>,
) -> StatusCode {
    if state.sessions.stop(user_id.trim()) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionsDebugResponse {
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) server_time: OffsetDateTime,
    pub(crate) sessions: Vec<SessionEntry>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionEntry {
    pub(crate) user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) started_at: OffsetDateTime,
    pub(crate) running: bool,
}

pub(crate) async fn sessions_debug(
    State(state): State<state::AppState>,
) -> Json<SessionsDebugResponse> {
    let sessions = state
        .sessions
        .snapshot()
        .into_iter()
        .map(|session| SessionEntry {
            user_id: session.user_id,
            started_at: session.started_at,
            running: session.running,
        })
        .collect();
    Json(SessionsDebugResponse {
        server_time: OffsetDateTime::now_utc(),
        sessions,
    })
}
