//! HTTP endpoints.
//!
//! `GET /captcha.png` issues a challenge for the caller's session,
//! `POST /contact` checks it and forwards the message.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Form, Json,
};
use std::sync::Arc;

use crate::contact::{ContactForm, MESSAGE_SENT};
use crate::session::Session;
use crate::state::AppState;
use crate::types::{ContactResponse, HealthResponse};

/// Render a fresh CAPTCHA for the caller's session.
///
/// GET /captcha.png
///
/// Each call replaces the session's previous answer. Failures return a bare
/// 500 so the page shows a broken image.
pub async fn captcha_image(
    State(state): State<Arc<AppState>>,
    Extension(Session(session)): Extension<Session>,
) -> Response {
    match state.issue_challenge(&session).await {
        Ok(png) => (
            [
                (header::CONTENT_TYPE, "image/png"),
                (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
            ],
            png,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("CAPTCHA generation failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "CAPTCHA unavailable").into_response()
        }
    }
}

/// Accept a contact form submission.
///
/// POST /contact
pub async fn submit_contact(
    State(state): State<Arc<AppState>>,
    Extension(Session(session)): Extension<Session>,
    Form(form): Form<ContactForm>,
) -> Response {
    match state.submit_contact(&session, form).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ContactResponse {
                ok: true,
                message: MESSAGE_SENT.to_string(),
            }),
        )
            .into_response(),
        Err(rejection) => (
            rejection.status(),
            Json(ContactResponse {
                ok: false,
                message: rejection.message().to_string(),
            }),
        )
            .into_response(),
    }
}

/// GET /healthz
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        captcha: state.captcha_ready(),
    })
}
