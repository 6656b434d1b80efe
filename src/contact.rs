//! Contact form: input cleanup, validation rules and message delivery

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const NOT_HUMAN: &str = "Human verification failed.";
pub const MISSING_CONTACT: &str = "Please supply all information.";
pub const EMAIL_INVALID: &str = "Email Address Invalid.";
pub const MESSAGE_TOO_LONG: &str = "Message is too long.";
pub const MESSAGE_UNSENT: &str = "Message was not sent. Try Again.";
pub const MESSAGE_SENT: &str = "Thanks! Your message has been sent.";

/// Raw form fields as posted by the browser
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactForm {
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_email: String,
    #[serde(default)]
    pub sender_message: String,
    /// Text the visitor read off the CAPTCHA image
    #[serde(default)]
    pub captcha: String,
}

/// A validated message ready for delivery
#[derive(Debug, Clone, Serialize)]
pub struct ContactMessage {
    pub name: String,
    pub email: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Why a submission was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactRejection {
    MissingContact,
    NotHuman,
    EmailInvalid,
    MessageTooLong,
    Unsent,
}

impl ContactRejection {
    /// Visitor-facing text; never includes the expected CAPTCHA answer
    pub fn message(self) -> &'static str {
        match self {
            ContactRejection::MissingContact => MISSING_CONTACT,
            ContactRejection::NotHuman => NOT_HUMAN,
            ContactRejection::EmailInvalid => EMAIL_INVALID,
            ContactRejection::MessageTooLong => MESSAGE_TOO_LONG,
            ContactRejection::Unsent => MESSAGE_UNSENT,
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ContactRejection::Unsent => StatusCode::BAD_GATEWAY,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

/// Contact form configuration
#[derive(Debug, Clone)]
pub struct ContactConfig {
    /// Address messages are delivered to
    pub recipient: String,
    pub max_message_chars: usize,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            recipient: "admin@localhost".to_string(),
            max_message_chars: 5000,
        }
    }
}

impl ContactConfig {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let recipient = std::env::var("CONTACT_RECIPIENT")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.recipient);

        let max_message_chars = std::env::var("CONTACT_MAX_MESSAGE_CHARS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_message_chars);

        tracing::info!(recipient, max_message_chars, "Contact config loaded");

        Self {
            recipient,
            max_message_chars,
        }
    }
}

/// Errors that can occur while handing a message off
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Delivery backend unavailable: {0}")]
    Unavailable(String),
}

/// Destination for accepted contact messages
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, message: &ContactMessage) -> Result<(), DeliveryError>;

    /// Name of this sink, for logs
    fn name(&self) -> &str;
}

/// Sink that records deliveries in the log
pub struct LogSink {
    recipient: String,
}

impl LogSink {
    pub fn new(recipient: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
        }
    }
}

#[async_trait]
impl MessageSink for LogSink {
    async fn deliver(&self, message: &ContactMessage) -> Result<(), DeliveryError> {
        tracing::info!(
            to = %self.recipient,
            from = %message.email,
            name = %message.name,
            chars = message.body.chars().count(),
            received_at = %message.received_at.to_rfc3339(),
            "Contact message received"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Remove HTML tags; an unterminated tag swallows the rest of the input
pub fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Single-line field: tags, control characters and backticks removed, trimmed
pub fn sanitize_line(input: &str) -> String {
    strip_tags(input)
        .chars()
        .filter(|c| !c.is_control() && *c != '`')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Multi-line field: like [`sanitize_line`] but newlines survive
pub fn sanitize_text(input: &str) -> String {
    strip_tags(input)
        .chars()
        .filter(|c| *c == '\n' || (!c.is_control() && *c != '`'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Loose `local@domain.tld` shape check
pub fn is_valid_email(email: &str) -> bool {
    const FORBIDDEN: &[char] = &['<', '>', '(', ')', '[', ']', '\\', ',', ';', ':', '"', '@'];

    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };

    let local_ok = !local.is_empty()
        && !local.starts_with('.')
        && !local.ends_with('.')
        && !local.contains("..")
        && !local.chars().any(|c| c.is_whitespace() || FORBIDDEN.contains(&c));
    if !local_ok {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    let labels_ok = labels.iter().all(|label| {
        !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    let tld = labels[labels.len() - 1];
    labels_ok && tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic())
}
