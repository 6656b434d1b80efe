use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::{abuse, api, session, state::AppState};

/// Directory served for everything that is not an API route
pub const STATIC_DIR: &str = "static";

/// Assemble the application router.
pub fn build_router(
    state: Arc<AppState>,
    session_config: Arc<session::SessionConfig>,
    abuse_config: Arc<abuse::AbuseConfig>,
) -> Router {
    // Routes that hand out or consume challenges get anti-abuse protection
    let guarded_routes = Router::new()
        .route("/captcha.png", get(api::captcha_image))
        .route("/contact", post(api::submit_contact))
        .layer(middleware::from_fn_with_state(
            abuse_config,
            abuse::abuse_middleware,
        ));

    Router::new()
        .merge(guarded_routes)
        .route("/healthz", get(api::health))
        .fallback_service(ServeDir::new(STATIC_DIR))
        .layer(middleware::from_fn_with_state(
            session_config,
            session::session_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
