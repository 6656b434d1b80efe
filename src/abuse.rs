//! Anti-abuse middleware for the CAPTCHA and contact endpoints
//!
//! The CAPTCHA keeps humans-with-browsers in; this keeps the cheap noise out:
//! - Blocks curl/wget/bot user agents
//! - Rate limiting per visitor session (stops image and submit flooding),
//!   falling back to the peer's network for clients that never keep the cookie

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Request, Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use ipnet::IpNet;
use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

use crate::session::{fingerprint, session_from_headers};

/// Rate limiter state
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Map of session key to (request count, window start)
    requests: Arc<RwLock<HashMap<String, (u32, Instant)>>>,
    /// Maximum requests per window
    max_requests: u32,
    /// Time window duration
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(30, Duration::from_secs(60)) // 30 requests per minute
    }
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    /// Check if a request should be allowed
    /// Returns true if allowed, false if rate limited
    pub async fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.write().await;

        match requests.get_mut(key) {
            Some((count, window_start)) => {
                // Check if we're in a new window
                if now.duration_since(*window_start) >= self.window {
                    *count = 1;
                    *window_start = now;
                    true
                } else if *count >= self.max_requests {
                    false
                } else {
                    *count += 1;
                    true
                }
            }
            None => {
                requests.insert(key.to_string(), (1, now));
                true
            }
        }
    }

    /// Drop windows that ended long ago, returning how many were removed
    pub async fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut requests = self.requests.write().await;
        let before = requests.len();
        requests.retain(|_, (_, window_start)| now.duration_since(*window_start) < self.window * 2);
        before - requests.len()
    }

    /// Seconds a limited client should wait, for `Retry-After`
    pub fn retry_after_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }
}

/// Anti-abuse configuration
#[derive(Debug, Clone)]
pub struct AbuseConfig {
    /// Whether to block suspicious user agents
    pub block_user_agents: bool,
    /// Rate limiter (None = disabled)
    pub rate_limiter: Option<RateLimiter>,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            block_user_agents: true,
            rate_limiter: Some(RateLimiter::default()),
        }
    }
}

impl AbuseConfig {
    /// No filtering at all
    pub fn disabled() -> Self {
        Self {
            block_user_agents: false,
            rate_limiter: None,
        }
    }

    /// Load config from environment variables
    pub fn from_env() -> Self {
        let block_user_agents = std::env::var("ABUSE_BLOCK_USER_AGENTS")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(true);

        let rate_limit_enabled = std::env::var("ABUSE_RATE_LIMIT")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(true);

        let rate_limiter = if rate_limit_enabled {
            let max_requests = std::env::var("ABUSE_RATE_LIMIT_MAX")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30);

            let window_secs = std::env::var("ABUSE_RATE_LIMIT_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);

            Some(RateLimiter::new(
                max_requests,
                Duration::from_secs(window_secs),
            ))
        } else {
            None
        };

        tracing::info!(
            block_user_agents,
            rate_limit_enabled,
            "Anti-abuse config loaded"
        );

        Self {
            block_user_agents,
            rate_limiter,
        }
    }
}

/// Check if a user agent looks like a bot/curl
fn is_blocked_user_agent(user_agent: &str) -> bool {
    let ua_lower = user_agent.to_lowercase();
    // Block common CLI tools
    if ua_lower.contains("curl")
        || ua_lower.contains("wget")
        || ua_lower.contains("httpie")
        || ua_lower.contains("python-requests")
        || ua_lower.contains("python-urllib")
        || ua_lower.contains("libwww-perl")
        || ua_lower.contains("go-http-client")
        || ua_lower.contains("java/")
    {
        return true;
    }

    // "bot" as a word ending, "spider" or "crawler" anywhere
    ua_lower.ends_with("bot")
        || ua_lower.contains("bot/")
        || ua_lower.contains("bot ")
        || ua_lower.contains("spider")
        || ua_lower.contains("crawler")
}

/// Prefix length peers are grouped by. IPv6 clients usually own a whole /64.
const IPV4_PEER_PREFIX: u8 = 32;
const IPV6_PEER_PREFIX: u8 = 64;

/// Network a peer address is rate limited as
fn peer_network(ip: IpAddr) -> IpNet {
    let prefix = match ip {
        IpAddr::V4(_) => IPV4_PEER_PREFIX,
        IpAddr::V6(_) => IPV6_PEER_PREFIX,
    };
    IpNet::new(ip, prefix)
        .map(|net| net.trunc())
        .unwrap_or_else(|_| IpNet::from(ip))
}

/// Rate limit key for a request
/// The session cookie if the client sent one, otherwise the peer's network.
/// Returns None only when neither is known.
fn get_rate_limit_key(request: &Request<Body>) -> Option<String> {
    if let Some(session) = session_from_headers(request.headers()) {
        return Some(format!("session:{}", session));
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| format!("peer:{}", peer_network(addr.ip())))
}

/// Build a 403 Forbidden response
fn forbidden() -> Response<Body> {
    (
        StatusCode::FORBIDDEN,
        [(header::CONTENT_TYPE, "text/plain")],
        "Access denied",
    )
        .into_response()
}

/// Build a 429 Too Many Requests response
fn rate_limited(retry_after_secs: u64) -> Response<Body> {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            (header::CONTENT_TYPE, "text/plain".to_string()),
            (header::RETRY_AFTER, retry_after_secs.to_string()),
        ],
        "Rate limit exceeded. Please slow down.",
    )
        .into_response()
}

/// Middleware for anti-abuse protection on the CAPTCHA and contact routes
pub async fn abuse_middleware(
    State(config): State<Arc<AbuseConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if config.block_user_agents {
        match request
            .headers()
            .get(header::USER_AGENT)
            .map(|ua| ua.to_str().unwrap_or(""))
        {
            Some(ua) if is_blocked_user_agent(ua) => {
                tracing::warn!(user_agent = ua, path = %request.uri().path(), "Blocked suspicious user agent");
                return forbidden();
            }
            Some(_) => {}
            None => {
                // No user agent at all is suspicious
                tracing::warn!(path = %request.uri().path(), "Blocked request with no User-Agent");
                return forbidden();
            }
        }
    }

    if let Some(ref rate_limiter) = config.rate_limiter {
        if let Some(key) = get_rate_limit_key(&request) {
            if !rate_limiter.check(&key).await {
                let client = match key.strip_prefix("session:") {
                    Some(session) => fingerprint(session),
                    None => key.clone(),
                };
                tracing::warn!(client = %client, path = %request.uri().path(), "Rate limited");
                return rate_limited(rate_limiter.retry_after_secs());
            }
        }
    }

    next.run(request).await
}
