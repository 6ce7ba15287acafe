//! HTTP 入口（axum）
//!
//! 每个请求独立运行；客户端断开时 handler future 被丢弃，未提交的轮次随之丢弃。
//! 进程关闭时进行中的消息经 shutdown token 取消。

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::core::{AssistantReply, OrchestratorError, Runtime, StoreError};
use crate::reminders::Reminder;
use crate::session::Session;

pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub shutdown: CancellationToken,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct PreferenceRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, serde::Serialize)]
pub struct ResetResponse {
    pub existed: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/chat", post(api_chat))
        .route("/api/sessions/:id", get(api_session_get))
        .route("/api/sessions/:id/preferences", put(api_session_preference))
        .route("/api/sessions/:id/reset", post(api_session_reset))
        .route("/api/reminders/:id", get(api_reminder_get))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(state)
}

fn orchestrator_status(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::CapabilityUnavailable(_) | OrchestratorError::Cancelled => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        OrchestratorError::ToolLoopExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        OrchestratorError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn store_failure(err: StoreError) -> (StatusCode, String) {
    match err {
        StoreError::SessionNotFound(_) | StoreError::ReminderNotFound(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        other => {
            tracing::error!(error = %other, "storage failure");
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

async fn api_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> ApiResult<AssistantReply> {
    let session_id = req.session_id.trim();
    let message = req.message.trim();
    if session_id.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "sessionId is required".to_string()));
    }
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".to_string()));
    }

    state
        .runtime
        .orchestrator
        .handle_with_cancel(session_id, message, state.shutdown.child_token())
        .await
        .map(Json)
        .map_err(|e| (orchestrator_status(&e), e.to_string()))
}

async fn api_session_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Session> {
    match state.runtime.sessions.load(&id).await.map_err(store_failure)? {
        Some(session) => Ok(Json(session)),
        None => Err((StatusCode::NOT_FOUND, format!("session not found: {id}"))),
    }
}

/// 会话不存在时先以默认偏好创建
async fn api_session_preference(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<PreferenceRequest>,
) -> ApiResult<Session> {
    let key = req.key.trim().to_lowercase();
    if key.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "key is required".to_string()));
    }
    let sessions = &state.runtime.sessions;
    sessions
        .create(&id, state.runtime.config.session.default_preferences.clone())
        .await
        .map_err(store_failure)?;
    sessions
        .set_preference(&id, &key, req.value.trim())
        .await
        .map_err(store_failure)?;
    match sessions.load(&id).await.map_err(store_failure)? {
        Some(session) => Ok(Json(session)),
        None => Err((StatusCode::NOT_FOUND, format!("session not found: {id}"))),
    }
}

async fn api_session_reset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<ResetResponse> {
    let existed = state
        .runtime
        .sessions
        .reset(&id)
        .await
        .map_err(store_failure)?;
    tracing::info!(session_id = %id, existed, "session reset");
    Ok(Json(ResetResponse { existed }))
}

async fn api_reminder_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Reminder> {
    match state.runtime.reminders.get(&id).await.map_err(store_failure)? {
        Some(reminder) => Ok(Json(reminder)),
        None => Err((StatusCode::NOT_FOUND, format!("reminder not found: {id}"))),
    }
}
