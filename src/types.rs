use serde::{Deserialize, Serialize};

/// Opaque visitor session id (a ULID delivered by cookie)
pub type SessionId = String;

/// JSON body returned by `POST /contact`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactResponse {
    pub ok: bool,
    pub message: String,
}

/// JSON body returned by `GET /healthz`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Whether the CAPTCHA font loaded and images can be served
    pub captcha: bool,
}
