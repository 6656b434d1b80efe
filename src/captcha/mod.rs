//! CAPTCHA challenge generation
//!
//! Renders a short random string of capital letters into a noisy 200x50 PNG:
//! - background filled with the lightest shade of a random palette
//! - ten thick rectangle outlines in darker shades, bleeding off the edges
//! - each letter tilted, jittered and drawn in gray or white

mod canvas;
mod glyph;

pub use canvas::{Canvas, Color};
pub use glyph::{GlyphFont, PlacedGlyph, Placement};

use rand::Rng;
use std::fmt;
use std::path::{Path, PathBuf};

pub const WIDTH: u32 = 200;
pub const HEIGHT: u32 = 50;

/// Letters in every challenge.
pub const ANSWER_LENGTH: usize = 6;
const ANSWER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub const PALETTE_SIZE: usize = 5;
/// Per-channel darkening between neighbouring palette shades.
pub const PALETTE_STEP: u8 = 20;
const NOISE_RECTANGLES: usize = 10;

/// Horizontal band the letters are spread across.
const TEXT_LEFT: f32 = 15.0;
const TEXT_WIDTH: f32 = 170.0;
/// 24pt at 96dpi.
const GLYPH_PX: f32 = 32.0;
const MAX_TILT_DEG: i32 = 15;

pub const TEXT_TONES: [Color; 2] = [
    Color::from_rgba(200, 200, 200, 255),
    Color::from_rgba(255, 255, 255, 255),
];

const DEFAULT_FONT_PATH: &str = "assets/fonts/captcha.ttf";

/// Errors that can occur while rendering a challenge
#[derive(Debug, thiserror::Error)]
pub enum CaptchaError {
    #[error("CAPTCHA font unavailable at {path}: {reason}")]
    FontUnavailable { path: String, reason: String },

    #[error("Could not allocate the CAPTCHA canvas")]
    RenderingResourceExhausted,

    #[error("PNG encoding failed: {0}")]
    Encode(String),

    #[error("CAPTCHA rendering task failed: {0}")]
    RenderTask(String),
}

/// Generator configuration
#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    /// TrueType/OpenType font used for the letters
    pub font_path: PathBuf,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            font_path: PathBuf::from(DEFAULT_FONT_PATH),
        }
    }
}

impl CaptchaConfig {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        let font_path = std::env::var("CAPTCHA_FONT_PATH")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FONT_PATH));

        tracing::info!(font_path = %font_path.display(), "CAPTCHA config loaded");

        Self { font_path }
    }
}

/// A freshly rendered challenge.
pub struct Challenge {
    /// Expected answer, uppercase
    pub answer: String,
    /// PNG-encoded image showing `answer`
    pub png: Vec<u8>,
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Challenge")
            .field("answer", &"<redacted>")
            .field("png_bytes", &self.png.len())
            .finish()
    }
}

pub struct CaptchaGenerator {
    font: GlyphFont,
}

impl CaptchaGenerator {
    /// Load the font from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CaptchaError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| CaptchaError::FontUnavailable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_font_bytes(data, path.display().to_string())
    }

    pub fn from_font_bytes(data: Vec<u8>, source: impl Into<String>) -> Result<Self, CaptchaError> {
        Ok(Self {
            font: GlyphFont::from_bytes(data, source)?,
        })
    }

    pub fn font_source(&self) -> &str {
        self.font.source()
    }

    /// Render a new challenge using the thread-local RNG.
    pub fn generate(&self) -> Result<Challenge, CaptchaError> {
        self.generate_with_rng(&mut rand::rng())
    }

    /// Render a new challenge from the given random source.
    pub fn generate_with_rng<R: Rng>(&self, rng: &mut R) -> Result<Challenge, CaptchaError> {
        let mut canvas = Canvas::new(WIDTH, HEIGHT)?;

        let palette = random_palette(rng);
        canvas.fill(palette[0]);

        for _ in 0..NOISE_RECTANGLES {
            let thickness = rng.random_range(2..=10);
            let color = palette[rng.random_range(1..PALETTE_SIZE)];
            canvas.stroke_rect(
                rng.random_range(-10..=190),
                rng.random_range(-10..=10),
                rng.random_range(-10..=190),
                rng.random_range(40..=60),
                thickness,
                color,
            );
        }

        let answer = random_answer(rng);

        let spacing = TEXT_WIDTH / ANSWER_LENGTH as f32;
        for (i, ch) in answer.chars().enumerate() {
            let placement = Placement {
                origin_x: TEXT_LEFT + i as f32 * spacing,
                baseline_y: rng.random_range(25..=45i32) as f32,
                angle_deg: rng.random_range(-MAX_TILT_DEG..=MAX_TILT_DEG) as f32,
                px_size: GLYPH_PX,
            };
            let tone = TEXT_TONES[rng.random_range(0..TEXT_TONES.len())];
            if let Some(glyph) = self.font.glyph(ch, placement)? {
                canvas.fill_path(&glyph.path, glyph.transform, tone);
            }
        }

        let png = canvas.encode_png()?;
        Ok(Challenge { answer, png })
    }
}

/// Five shades stepping down from a random mid-brightness base.
pub fn random_palette<R: Rng>(rng: &mut R) -> [Color; PALETTE_SIZE] {
    let base: [u8; 3] = [
        rng.random_range(100..=200),
        rng.random_range(100..=200),
        rng.random_range(100..=200),
    ];
    std::array::from_fn(|i| {
        let [r, g, b] = base.map(|c| c - PALETTE_STEP * i as u8);
        Color::from_rgba(r, g, b, 255)
    })
}

/// Random uppercase answer of [`ANSWER_LENGTH`] letters.
pub fn random_answer<R: Rng>(rng: &mut R) -> String {
    (0..ANSWER_LENGTH)
        .map(|_| ANSWER_ALPHABET[rng.random_range(0..ANSWER_ALPHABET.len())] as char)
        .collect()
}
