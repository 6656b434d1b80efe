use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use weop_contact::{
    abuse::AbuseConfig,
    app,
    captcha::CaptchaConfig,
    contact::{ContactConfig, LogSink},
    session::SessionConfig,
    state::{AppState, MemoryChallengeStore},
    sweeper,
};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weop_contact=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting contact service...");

    let captcha_config = CaptchaConfig::from_env();
    let session_config = Arc::new(SessionConfig::from_env());
    let abuse_config = Arc::new(AbuseConfig::from_env());
    let contact_config = ContactConfig::from_env();

    let store = Arc::new(MemoryChallengeStore::with_max_sessions(
        session_config.idle_timeout,
        session_config.max_sessions,
    ));
    let sink = Arc::new(LogSink::new(contact_config.recipient.clone()));
    let state = Arc::new(AppState::new(
        &captcha_config,
        store,
        contact_config,
        sink,
    ));

    // Spawn background task that forgets idle sessions
    sweeper::spawn_session_sweeper(state.clone(), abuse_config.clone(), SWEEP_INTERVAL);

    let app = app::build_router(state, session_config, abuse_config);

    let addr = std::env::var("BIND_ADDR")
        .ok()
        .and_then(|v| match v.parse::<SocketAddr>() {
            Ok(addr) => Some(addr),
            Err(e) => {
                tracing::warn!("Ignoring invalid BIND_ADDR {:?}: {}", v, e);
                None
            }
        })
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.parse().unwrap());
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    // Peer addresses key the rate limiter for clients without a session cookie
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
