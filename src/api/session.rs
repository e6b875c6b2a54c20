//! Voice session endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ApiError, ApiState};
use crate::Error;
use crate::session::{SessionStatus, StartRequest};

/// Build session router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/persona", put(select_persona))
        .route("/answer", delete(clear_answer))
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub session_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SelectPersonaRequest {
    pub id: String,
}

async fn status(State(state): State<Arc<ApiState>>) -> Json<SessionStatus> {
    Json(state.session.status())
}

/// Start the voice loop; returns once subsystem setup succeeded or failed
async fn start(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<StartRequest>,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    let session = Arc::clone(&state.session);
    let session_id = tokio::task::spawn_blocking(move || session.start(request))
        .await
        .map_err(|e| Error::Worker(format!("start task failed: {e}")))??;

    Ok((StatusCode::ACCEPTED, Json(StartResponse { session_id })))
}

async fn stop(State(state): State<Arc<ApiState>>) -> Result<StatusCode, ApiError> {
    state.session.stop()?;
    Ok(StatusCode::ACCEPTED)
}

async fn select_persona(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SelectPersonaRequest>,
) -> Result<Json<SessionStatus>, ApiError> {
    state.session.select_persona(&request.id)?;
    Ok(Json(state.session.status()))
}

async fn clear_answer(State(state): State<Arc<ApiState>>) -> StatusCode {
    state.session.clear_answer();
    StatusCode::NO_CONTENT
}
