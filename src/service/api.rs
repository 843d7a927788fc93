//! Command API
//!
//! JSON over HTTP for clients. Every route maps onto one orchestrator
//! operation; session events stream over server-sent events.

use crate::error::DebateError;
use crate::service::app::ServiceHandle;
use crate::types::{SessionId, Vote};
use axum::extract::{MatchedPath, Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

/// Orchestrator error carried to the HTTP boundary
#[derive(Debug)]
pub struct ApiError(pub DebateError);

impl From<DebateError> for ApiError {
    fn from(error: DebateError) -> Self {
        ApiError(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            DebateError::InvalidTransition { .. } | DebateError::RaceLost { .. } => {
                StatusCode::CONFLICT
            }
            DebateError::NotParticipant { .. } => StatusCode::FORBIDDEN,
            DebateError::SessionNotFound { .. }
            | DebateError::InviteNotFound { .. }
            | DebateError::ParticipantNotFound { .. } => StatusCode::NOT_FOUND,
            DebateError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            DebateError::StorageFailure { .. } => StatusCode::SERVICE_UNAVAILABLE,
            DebateError::OracleFailure { .. } => StatusCode::BAD_GATEWAY,
            DebateError::ConfigurationError { .. }
            | DebateError::AmqpConnectionFailed { .. }
            | DebateError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match &self.0 {
            DebateError::InvalidTransition { .. } => "invalid_transition",
            DebateError::NotParticipant { .. } => "not_participant",
            DebateError::RaceLost { .. } => "race_lost",
            DebateError::OracleFailure { .. } => "oracle_failure",
            DebateError::StorageFailure { .. } => "storage_failure",
            DebateError::SessionNotFound { .. } => "session_not_found",
            DebateError::InviteNotFound { .. } => "invite_not_found",
            DebateError::ParticipantNotFound { .. } => "participant_not_found",
            DebateError::InvalidRequest { .. } => "invalid_request",
            DebateError::ConfigurationError { .. } => "configuration_error",
            DebateError::AmqpConnectionFailed { .. } => "amqp_connection_failed",
            DebateError::InternalError { .. } => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected: {}", self.0);
        }

        let body = json!({
            "error": self.code(),
            "message": self.0.to_string(),
            "retriable": self.0.is_retriable(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub user_id: String,
    #[serde(default)]
    pub is_video: bool,
    pub topic: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AiSessionRequest {
    pub user_id: String,
    pub topic: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub user_id: String,
    pub vote: Vote,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub author_id: String,
    pub text: String,
}

/// Build the command API router over `handle`
pub fn router(handle: ServiceHandle) -> Router {
    Router::new()
        .route("/match", post(request_match))
        .route("/invites", post(create_invite))
        .route("/invites/{code}/redeem", post(redeem_invite))
        .route("/ai-sessions", post(start_ai_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/cancel", post(cancel_waiting))
        .route("/sessions/{id}/fallback/accept", post(accept_fallback))
        .route("/sessions/{id}/end", post(end_session))
        .route("/sessions/{id}/votes", post(submit_vote))
        .route("/sessions/{id}/resolve", post(resolve_ai_session))
        .route("/sessions/{id}/messages", post(append_message))
        .route("/sessions/{id}/media-token", post(issue_media_token))
        .route("/sessions/{id}/events", get(session_events))
        .route("/participants/{user_id}", get(get_participant))
        .route_layer(middleware::from_fn_with_state(
            handle.clone(),
            track_requests,
        ))
        .with_state(handle)
}

/// Count requests per matched route and status class
async fn track_requests(
    State(handle): State<ServiceHandle>,
    request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    handle
        .metrics()
        .record_api_request(&route, response.status().as_u16());
    response
}

async fn request_match(
    State(handle): State<ServiceHandle>,
    Json(request): Json<SessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let result = handle
        .manager()
        .request_match(&request.user_id, request.is_video, request.topic)
        .await?;
    Ok(Json(result))
}

async fn create_invite(
    State(handle): State<ServiceHandle>,
    Json(request): Json<SessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = handle
        .manager()
        .create_invite(&request.user_id, request.is_video, request.topic)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn redeem_invite(
    State(handle): State<ServiceHandle>,
    Path(code): Path<String>,
    Json(request): Json<UserRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = handle
        .manager()
        .redeem_invite(&code, &request.user_id)
        .await?;
    Ok(Json(session))
}

async fn start_ai_session(
    State(handle): State<ServiceHandle>,
    Json(request): Json<AiSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = handle
        .manager()
        .start_ai_session(&request.user_id, request.topic)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn get_session(
    State(handle): State<ServiceHandle>,
    Path(id): Path<SessionId>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(handle.manager().get_session(id)?))
}

async fn cancel_waiting(
    State(handle): State<ServiceHandle>,
    Path(id): Path<SessionId>,
    Json(request): Json<UserRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = handle
        .manager()
        .cancel_waiting(id, &request.user_id)
        .await?;
    Ok(Json(session))
}

async fn accept_fallback(
    State(handle): State<ServiceHandle>,
    Path(id): Path<SessionId>,
    Json(request): Json<UserRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = handle
        .manager()
        .accept_ai_fallback(id, &request.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn end_session(
    State(handle): State<ServiceHandle>,
    Path(id): Path<SessionId>,
    Json(request): Json<UserRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = handle.manager().end_session(id, &request.user_id).await?;
    Ok(Json(outcome))
}

async fn submit_vote(
    State(handle): State<ServiceHandle>,
    Path(id): Path<SessionId>,
    Json(request): Json<VoteRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = handle
        .manager()
        .submit_vote(id, &request.user_id, request.vote)
        .await?;
    Ok(Json(outcome))
}

async fn resolve_ai_session(
    State(handle): State<ServiceHandle>,
    Path(id): Path<SessionId>,
    Json(request): Json<UserRequest>,
) -> ApiResult<impl IntoResponse> {
    let resolution = handle
        .manager()
        .resolve_ai_session(id, &request.user_id)
        .await?;
    Ok(Json(resolution))
}

async fn append_message(
    State(handle): State<ServiceHandle>,
    Path(id): Path<SessionId>,
    Json(request): Json<MessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = handle
        .manager()
        .append_message(id, &request.author_id, &request.text)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn issue_media_token(
    State(handle): State<ServiceHandle>,
    Path(id): Path<SessionId>,
    Json(request): Json<UserRequest>,
) -> ApiResult<impl IntoResponse> {
    let credential = handle.manager().issue_media_token(id, &request.user_id)?;
    Ok(Json(credential))
}

async fn get_participant(
    State(handle): State<ServiceHandle>,
    Path(user_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(handle.manager().get_participant(&user_id)?))
}

/// Current session snapshot followed by its live events
async fn session_events(
    State(handle): State<ServiceHandle>,
    Path(id): Path<SessionId>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Subscribe before reading so no change between the two is missed
    let receiver = handle.feed().subscribe_session(id).into_receiver();
    let session = handle.manager().get_session(id)?;

    let snapshot = Event::default()
        .event("snapshot")
        .json_data(&session)
        .map_err(|e| DebateError::InternalError {
            message: format!("Failed to encode session {}: {}", id, e),
        })?;

    let updates = BroadcastStream::new(receiver).filter_map(move |item| match item {
        Ok(event) if event.session_id == id => Event::default()
            .event(event.kind.routing_key())
            .json_data(&event)
            .ok()
            .map(Ok),
        Ok(_) => None,
        Err(lagged) => {
            debug!("Event stream for session {} skipped: {}", id, lagged);
            None
        }
    });

    let stream = tokio_stream::once(Ok::<Event, Infallible>(snapshot)).chain(updates);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
