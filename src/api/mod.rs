//! HTTP control surface
//!
//! Thin axum layer over [`SessionManager`]: start and stop the voice loop,
//! switch persona and read the latest answer.

pub mod health;
pub mod personas;
pub mod session;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Error;
use crate::session::SessionManager;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub session: Arc<SessionManager>,
}

impl ApiState {
    #[must_use]
    pub const fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }
}

/// Build the router with all routes
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/personas", personas::router(state.clone()))
        .nest("/api/session", session::router(state))
        .merge(health::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Run the API server until the task is dropped
///
/// # Errors
///
/// Returns error if server fails to bind or run
pub async fn serve(state: Arc<ApiState>, port: u16) -> crate::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind API server: {e}")))?;

    tracing::info!(port, "API server listening");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| Error::Config(format!("API server error: {e}")))?;

    Ok(())
}

/// Error returned by API handlers
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            Error::AlreadyRunning => (StatusCode::CONFLICT, "already_running"),
            Error::NotRunning => (StatusCode::CONFLICT, "not_running"),
            Error::PersonaNotFound(_) => (StatusCode::NOT_FOUND, "persona_not_found"),
            Error::InvalidInput(_) | Error::Recipe(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::Setup(_) | Error::Config(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "setup_failed")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "API request failed");
        }
        let message = self.0.to_string();

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody { code, message },
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (Error::AlreadyRunning, StatusCode::CONFLICT),
            (Error::NotRunning, StatusCode::CONFLICT),
            (Error::PersonaNotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (Error::Setup("mic".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::Llm("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError(error).status_and_code().0, expected);
        }
    }
}
