//! Cookie-delivered visitor sessions
//!
//! Every request gets a session id: the one in the `weop_session` cookie if it
//! is a valid ULID, otherwise a fresh one that is set on the response. The id
//! reaches handlers as an [`Session`] request extension.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request, Response},
    middleware::Next,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::state::DEFAULT_MAX_SESSIONS;
use crate::types::SessionId;

pub const SESSION_COOKIE: &str = "weop_session";

/// Session of the current request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session(pub SessionId);

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a session may sit unused before its challenge is forgotten
    pub idle_timeout: Duration,
    /// Add the `Secure` attribute to the session cookie
    pub secure_cookie: bool,
    /// Most sessions holding a challenge at once
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            secure_cookie: false,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl SessionConfig {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        let idle_secs = std::env::var("SESSION_IDLE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30 * 60);

        let secure_cookie = std::env::var("SESSION_COOKIE_SECURE")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let max_sessions = std::env::var("SESSION_MAX_ACTIVE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_MAX_SESSIONS);

        tracing::info!(idle_secs, secure_cookie, max_sessions, "Session config loaded");

        Self {
            idle_timeout: Duration::from_secs(idle_secs),
            secure_cookie,
            max_sessions,
        }
    }

    /// `Set-Cookie` value for a session id
    pub fn cookie_for(&self, session: &str) -> String {
        let mut cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, session);
        if self.secure_cookie {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Extract a valid session id from the request cookies
pub fn session_from_headers(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .filter(|(name, _)| *name == SESSION_COOKIE)
        .find_map(|(_, value)| ulid::Ulid::from_string(value.trim()).ok())
        .map(|id| id.to_string())
}

/// Short stable tag for a session id, safe to put in logs
pub fn fingerprint(session: &str) -> String {
    let digest = Sha256::digest(session.as_bytes());
    hex::encode(&digest[..6])
}

/// Middleware that attaches a [`Session`] to every request
pub async fn session_middleware(
    State(config): State<Arc<SessionConfig>>,
    mut request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let (session, is_new) = match session_from_headers(request.headers()) {
        Some(id) => (id, false),
        None => (ulid::Ulid::new().to_string(), true),
    };

    if is_new {
        tracing::debug!(session = %fingerprint(&session), "Starting new visitor session");
    }

    request.extensions_mut().insert(Session(session.clone()));
    let mut response = next.run(request).await;

    if is_new {
        match HeaderValue::from_str(&config.cookie_for(&session)) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::warn!("Failed to build session cookie: {}", e),
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_cookie(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[test]
    fn test_session_from_cookie() {
        let id = ulid::Ulid::new().to_string();
        let headers = headers_with_cookie(&format!("theme=dark; {}={}; lang=en", SESSION_COOKIE, id));
        assert_eq!(session_from_headers(&headers), Some(id));
    }

    #[test]
    fn test_invalid_session_cookie_is_ignored() {
        let headers = headers_with_cookie(&format!("{}=../../etc/passwd", SESSION_COOKIE));
        assert_eq!(session_from_headers(&headers), None);

        let headers = headers_with_cookie("other=01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert_eq!(session_from_headers(&headers), None);

        assert_eq!(session_from_headers(&HeaderMap::new()), None);
    }

    #[test]
    fn test_cookie_attributes() {
        let config = SessionConfig::default();
        let cookie = config.cookie_for("01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert_eq!(
            cookie,
            "weop_session=01ARZ3NDEKTSV4RRFFQ69G5FAV; Path=/; HttpOnly; SameSite=Lax"
        );

        let secure = SessionConfig {
            secure_cookie: true,
            ..SessionConfig::default()
        };
        assert!(secure.cookie_for("x").ends_with("; Secure"));
    }

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let a = fingerprint("01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert_eq!(a, fingerprint("01ARZ3NDEKTSV4RRFFQ69G5FAV"));
        assert_ne!(a, fingerprint("01ARZ3NDEKTSV4RRFFQ69G5FAW"));
        assert_eq!(a.len(), 12);
        assert!(!a.contains("01ARZ"));
    }

    #[test]
    #[serial_test::serial]
    fn test_config_from_env() {
        std::env::set_var("SESSION_IDLE_SECS", "90");
        std::env::set_var("SESSION_COOKIE_SECURE", "true");
        std::env::set_var("SESSION_MAX_ACTIVE", "500");
        let config = SessionConfig::from_env();
        assert_eq!(config.idle_timeout, Duration::from_secs(90));
        assert!(config.secure_cookie);
        assert_eq!(config.max_sessions, 500);

        std::env::set_var("SESSION_IDLE_SECS", "soon");
        std::env::remove_var("SESSION_COOKIE_SECURE");
        std::env::set_var("SESSION_MAX_ACTIVE", "0");
        let config = SessionConfig::from_env();
        assert_eq!(config.idle_timeout, Duration::from_secs(1800));
        assert!(!config.secure_cookie);
        assert_eq!(config.max_sessions, DEFAULT_MAX_SESSIONS);
        std::env::remove_var("SESSION_IDLE_SECS");
        std::env::remove_var("SESSION_MAX_ACTIVE");
    }
}
