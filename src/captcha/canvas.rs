//! Drawing surface backed by a [`tiny_skia::Pixmap`].

use tiny_skia::{FillRule, Paint, Path, PathBuilder, Pixmap, Rect, Stroke, Transform};

use super::CaptchaError;

pub type Color = tiny_skia::ColorU8;

pub struct Canvas {
    pixmap: Pixmap,
}

fn paint(color: Color, anti_alias: bool) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color.red(), color.green(), color.blue(), color.alpha());
    paint.anti_alias = anti_alias;
    paint
}

impl Canvas {
    /// Allocate a transparent canvas.
    pub fn new(width: u32, height: u32) -> Result<Self, CaptchaError> {
        let pixmap = Pixmap::new(width, height).ok_or(CaptchaError::RenderingResourceExhausted)?;
        Ok(Self { pixmap })
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        self.pixmap.pixel(x, y).map(|p| p.demultiply())
    }

    pub fn fill(&mut self, color: Color) {
        self.pixmap.fill(tiny_skia::Color::from_rgba8(
            color.red(),
            color.green(),
            color.blue(),
            color.alpha(),
        ));
    }

    /// Outline the rectangle spanned by two corners with a `thickness` wide pen.
    ///
    /// Corners may be given in any order and may lie off the canvas.
    pub fn stroke_rect(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, thickness: u32, color: Color) {
        let Some(rect) = Rect::from_ltrb(
            x1.min(x2) as f32,
            y1.min(y2) as f32,
            x1.max(x2) as f32,
            y1.max(y2) as f32,
        ) else {
            return;
        };

        let stroke = Stroke {
            width: thickness.max(1) as f32,
            ..Stroke::default()
        };
        self.pixmap.stroke_path(
            &PathBuilder::from_rect(rect),
            &paint(color, false),
            &stroke,
            Transform::identity(),
            None,
        );
    }

    /// Fill an outline with non-zero winding and anti-aliased edges.
    pub fn fill_path(&mut self, path: &Path, transform: Transform, color: Color) {
        self.pixmap
            .fill_path(path, &paint(color, true), FillRule::Winding, transform, None);
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, CaptchaError> {
        self.pixmap
            .encode_png()
            .map_err(|e| CaptchaError::Encode(e.to_string()))
    }
}
