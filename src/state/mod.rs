mod challenge;
mod contact;

pub use challenge::{
    verify, verify_outcome, ChallengeStore, MemoryChallengeStore, VerifyOutcome,
    DEFAULT_MAX_SESSIONS,
};

use crate::captcha::{CaptchaConfig, CaptchaGenerator};
use crate::contact::{ContactConfig, MessageSink};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// `None` when the font could not be loaded; image requests then fail
    pub captcha: Option<Arc<CaptchaGenerator>>,
    /// Where the font was expected, for error reporting
    pub font_path: String,
    pub challenges: Arc<dyn ChallengeStore>,
    pub contact_config: ContactConfig,
    /// Where accepted contact messages go
    pub sink: Arc<dyn MessageSink>,
}

impl AppState {
    /// Build state, loading the CAPTCHA font named by `captcha_config`.
    ///
    /// A missing or broken font is logged but not fatal: the rest of the site
    /// keeps working and every image request reports the problem.
    pub fn new(
        captcha_config: &CaptchaConfig,
        challenges: Arc<dyn ChallengeStore>,
        contact_config: ContactConfig,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        let captcha = match CaptchaGenerator::from_path(&captcha_config.font_path) {
            Ok(generator) => {
                tracing::info!(font = generator.font_source(), "CAPTCHA generator ready");
                Some(Arc::new(generator))
            }
            Err(e) => {
                tracing::error!("{}. CAPTCHA images will not be served.", e);
                None
            }
        };

        Self {
            captcha,
            font_path: captcha_config.font_path.display().to_string(),
            challenges,
            contact_config,
            sink,
        }
    }

    /// Build state around an already loaded generator
    pub fn with_generator(
        generator: CaptchaGenerator,
        challenges: Arc<dyn ChallengeStore>,
        contact_config: ContactConfig,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            font_path: generator.font_source().to_string(),
            captcha: Some(Arc::new(generator)),
            challenges,
            contact_config,
            sink,
        }
    }

    /// Whether images can be served
    pub fn captcha_ready(&self) -> bool {
        self.captcha.is_some()
    }
}
