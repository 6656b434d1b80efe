//! Glyph outlines from a TrueType/OpenType face.
//!
//! Outlines stay in font units; [`PlacedGlyph::transform`] maps them onto the
//! canvas (scale, flip y, tilt, move to the pen position).

use tiny_skia::{Path, PathBuilder, Transform};

use super::CaptchaError;

/// Where and how a glyph lands on the canvas.
#[derive(Debug, Clone, Copy)]
pub struct Placement {
    /// Pen position on the baseline, in canvas pixels.
    pub origin_x: f32,
    pub baseline_y: f32,
    /// Counter-clockwise tilt in degrees, around the pen position.
    pub angle_deg: f32,
    /// Em size in pixels.
    pub px_size: f32,
}

impl Placement {
    fn transform(&self, units_per_em: f32) -> Transform {
        let scale = self.px_size / units_per_em;
        // Canvas y grows downwards, so a counter-clockwise tilt is a negative angle.
        Transform::from_rotate_at(-self.angle_deg, self.origin_x, self.baseline_y)
            .pre_translate(self.origin_x, self.baseline_y)
            .pre_scale(scale, -scale)
    }
}

/// Outline of one letter plus where it goes.
#[derive(Debug, Clone)]
pub struct PlacedGlyph {
    /// Outline in font units
    pub path: Path,
    pub transform: Transform,
}

/// A parsed font face that can draw every letter a challenge may contain.
pub struct GlyphFont {
    data: Vec<u8>,
    source: String,
}

impl GlyphFont {
    /// Validate and keep raw font bytes.
    ///
    /// `source` names where the bytes came from and is only used in errors.
    pub fn from_bytes(data: Vec<u8>, source: impl Into<String>) -> Result<Self, CaptchaError> {
        let source = source.into();
        {
            let face = ttf_parser::Face::parse(&data, 0).map_err(|e| {
                CaptchaError::FontUnavailable {
                    path: source.clone(),
                    reason: format!("failed to parse font: {:?}", e),
                }
            })?;

            if let Some(missing) = ('A'..='Z').find(|c| face.glyph_index(*c).is_none()) {
                return Err(CaptchaError::FontUnavailable {
                    path: source,
                    reason: format!("font has no glyph for {:?}", missing),
                });
            }
        }

        Ok(Self { data, source })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn face(&self) -> Result<ttf_parser::Face<'_>, CaptchaError> {
        ttf_parser::Face::parse(&self.data, 0).map_err(|e| CaptchaError::FontUnavailable {
            path: self.source.clone(),
            reason: format!("failed to parse font: {:?}", e),
        })
    }

    /// Outline of `ch` placed on the canvas.
    ///
    /// Glyphs without contours (e.g. a space) yield `None`.
    pub fn glyph(&self, ch: char, placement: Placement) -> Result<Option<PlacedGlyph>, CaptchaError> {
        let face = self.face()?;
        let glyph_id = face
            .glyph_index(ch)
            .ok_or_else(|| CaptchaError::FontUnavailable {
                path: self.source.clone(),
                reason: format!("font has no glyph for {:?}", ch),
            })?;

        let mut converter = PathConverter(PathBuilder::new());
        if face.outline_glyph(glyph_id, &mut converter).is_none() {
            return Ok(None);
        }

        Ok(converter.0.finish().map(|path| PlacedGlyph {
            path,
            transform: placement.transform(face.units_per_em() as f32),
        }))
    }
}

/// Forwards outline commands into a path, unchanged.
struct PathConverter(PathBuilder);

impl ttf_parser::OutlineBuilder for PathConverter {
    fn move_to(&mut self, x: f32, y: f32) {
        self.0.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.0.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.0.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.0.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.0.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiny_skia::Rect;

    const FONT_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/assets/fonts/captcha.ttf");
    const DIGITS_ONLY_FONT: &str =
        concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/digits-only.ttf");

    fn font() -> GlyphFont {
        let data = std::fs::read(FONT_PATH).unwrap();
        GlyphFont::from_bytes(data, FONT_PATH).unwrap()
    }

    fn upright(px_size: f32) -> Placement {
        Placement {
            origin_x: 10.0,
            baseline_y: 40.0,
            angle_deg: 0.0,
            px_size,
        }
    }

    /// Bounding box of a placed letter on the canvas
    fn bounds(ch: char, placement: Placement) -> Rect {
        let glyph = font().glyph(ch, placement).unwrap().unwrap();
        glyph.path.transform(glyph.transform).unwrap().bounds()
    }

    #[test]
    fn test_letter_sits_on_baseline() {
        let b = bounds('H', upright(32.0));

        // Capitals sit on the baseline and rise up towards the top of the canvas.
        assert!((b.bottom() - 40.0).abs() < 1.0, "bottom at {}", b.bottom());
        assert!(b.top() < 25.0 && b.top() > 5.0, "top at {}", b.top());
        assert!(b.left() >= 10.0 && b.right() < 40.0);
    }

    #[test]
    fn test_rotation_tilts_the_glyph() {
        let upright_bounds = bounds('I', upright(32.0));
        let tilted_bounds = bounds(
            'I',
            Placement {
                angle_deg: 15.0,
                ..upright(32.0)
            },
        );

        // A counter-clockwise tilt leans the top of a vertical stroke to the left.
        assert!(tilted_bounds.left() < upright_bounds.left() - 2.0);
        // ...and makes it a little wider than the upright stroke.
        assert!(tilted_bounds.width() > upright_bounds.width());
    }

    #[test]
    fn test_space_has_no_outline() {
        assert!(font().glyph(' ', upright(32.0)).unwrap().is_none());
    }

    #[test]
    fn test_garbage_bytes_are_rejected() {
        let result = GlyphFont::from_bytes(b"definitely not a font".to_vec(), "junk.ttf");
        match result {
            Err(CaptchaError::FontUnavailable { path, .. }) => assert_eq!(path, "junk.ttf"),
            other => panic!("expected FontUnavailable, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_font_without_capitals_is_rejected() {
        let data = std::fs::read(DIGITS_ONLY_FONT).unwrap();
        // Parses fine, but cannot draw an answer.
        assert!(ttf_parser::Face::parse(&data, 0).is_ok());

        match GlyphFont::from_bytes(data, DIGITS_ONLY_FONT) {
            Err(CaptchaError::FontUnavailable { path, reason }) => {
                assert_eq!(path, DIGITS_ONLY_FONT);
                assert_eq!(reason, "font has no glyph for 'A'");
            }
            other => panic!("expected FontUnavailable, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_source_is_kept() {
        assert_eq!(font().source(), FONT_PATH);
    }
}
