//! Glyph runs drawn through the instancing engine with the text program.
//!
//! Rasterising a font is somebody else's job: anything implementing
//! [`GlyphSource`] hands over a texture and per-character regions.

use std::collections::HashMap;
use std::rc::Rc;

use glam::{Vec2, Vec4};
use log::trace;

use crate::error::{ImrError, ImrResult};
use crate::gpu::GpuBackend;
use crate::instancing::InstanceArgs;
use crate::program::TEXT_PROGRAM;
use crate::texture::Texture;
use crate::ImrContext;

/// Where a character lives in the font texture and how it advances the pen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    /// Pixel position of the glyph in the font texture, top-left origin.
    pub region_position: Vec2,
    pub region_size: Vec2,
    pub bearing: Vec2,
    pub advance: f32,
}

pub trait GlyphSource {
    fn texture(&self) -> Texture;
    fn glyph(&self, c: char) -> Option<Glyph>;
    fn line_height(&self) -> f32;
}

/// A baked font: one texture plus a character table.
#[derive(Debug, Clone)]
pub struct GlyphMap {
    texture: Texture,
    glyphs: HashMap<char, Glyph>,
    line_height: f32,
}

impl GlyphMap {
    pub fn new(texture: Texture, line_height: f32) -> Self {
        Self {
            texture,
            glyphs: HashMap::new(),
            line_height,
        }
    }

    pub fn insert(&mut self, c: char, glyph: Glyph) {
        self.glyphs.insert(c, glyph);
    }

    /// Monospace table for a grid-baked font: `chars` laid out row-major in
    /// cells of `cell` pixels, starting at the top-left of the texture.
    pub fn monospace(texture: Texture, chars: &str, cell: Vec2) -> Self {
        let columns = (texture.width() as f32 / cell.x).floor().max(1.0) as usize;
        let mut map = Self::new(texture, cell.y);
        for (i, c) in chars.chars().enumerate() {
            let column = (i % columns) as f32;
            let row = (i / columns) as f32;
            map.insert(
                c,
                Glyph {
                    region_position: Vec2::new(column * cell.x, row * cell.y),
                    region_size: cell,
                    bearing: Vec2::new(0.0, cell.y),
                    advance: cell.x,
                },
            );
        }
        map
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }
}

impl GlyphSource for GlyphMap {
    fn texture(&self) -> Texture {
        self.texture.clone()
    }

    fn glyph(&self, c: char) -> Option<Glyph> {
        self.glyphs.get(&c).copied()
    }

    fn line_height(&self) -> f32 {
        self.line_height
    }
}

pub(crate) struct TextState {
    font: Rc<dyn GlyphSource>,
}

impl std::fmt::Debug for TextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextState")
            .field("texture", &self.font.texture().id())
            .finish()
    }
}

impl<B: GpuBackend> ImrContext<B> {
    pub fn begin_text(&mut self, font: Rc<dyn GlyphSource>) {
        self.texts.push(TextState { font });
    }

    /// Draws `text` with its first baseline at `position`. `\r`, `\n` and
    /// `\r\n` start a new line; characters the font lacks are skipped.
    pub fn text(&mut self, text: &str, position: Vec2, color: Vec4) -> ImrResult<()> {
        let font = self
            .texts
            .last()
            .map(|t| t.font.clone())
            .ok_or(ImrError::TextNotBegun)?;
        if text.is_empty() {
            return Ok(());
        }
        self.push_program(TEXT_PROGRAM)?;
        let texture = font.texture();
        if let Err(e) = self.begin_instancing(Some(&texture)) {
            self.pop_program()?;
            return Err(e);
        }
        if let Err(e) = self.layout_glyphs(font.as_ref(), text, position, color) {
            self.abort_instancing();
            self.pop_program()?;
            return Err(e);
        }
        trace!("text run: {} glyphs", self.instance_count());
        let result = self.end_instancing();
        self.pop_program()?;
        result
    }

    fn layout_glyphs(
        &mut self,
        font: &dyn GlyphSource,
        text: &str,
        origin: Vec2,
        color: Vec4,
    ) -> ImrResult<()> {
        let mut pen = origin;
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\r' | '\n' => {
                    if c == '\r' && chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    pen.x = origin.x;
                    pen.y += font.line_height();
                }
                _ => {
                    let Some(glyph) = font.glyph(c) else {
                        continue;
                    };
                    let offset = Vec2::new(glyph.bearing.x, -glyph.bearing.y);
                    self.instance_region(
                        glyph.region_position,
                        glyph.region_size,
                        &InstanceArgs {
                            position: pen + offset,
                            color,
                            ..Default::default()
                        },
                    )?;
                    pen.x += glyph.advance;
                }
            }
        }
        Ok(())
    }

    pub fn end_text(&mut self) -> ImrResult<()> {
        self.texts.pop().map(|_| ()).ok_or(ImrError::TextNotBegun)
    }

    pub fn text_depth(&self) -> usize {
        self.texts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraOrigin;
    use crate::gpu::recording::RecordingBackend;
    use crate::texture::RenderTarget;

    fn font(imr: &mut ImrContext<RecordingBackend>) -> Rc<dyn GlyphSource> {
        let texture = imr.create_texture("font", 64, 64, &[255; 64 * 64 * 4]).unwrap();
        Rc::new(GlyphMap::monospace(texture, "abcdefgh", Vec2::new(8.0, 16.0)))
    }

    #[test]
    fn monospace_grid_wraps_rows() {
        let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
        let texture = imr.create_texture("font", 16, 32, &[0; 16 * 32 * 4]).unwrap();
        let map = GlyphMap::monospace(texture, "abc", Vec2::new(8.0, 16.0));
        assert_eq!(map.len(), 3);
        assert_eq!(map.glyph('c').unwrap().region_position, Vec2::new(0.0, 16.0));
    }

    #[test]
    fn line_breaks_reset_the_pen() {
        let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
        let font = font(&mut imr);
        let target = RenderTarget::Backbuffer {
            width: 200,
            height: 200,
        };
        imr.begin_camera(&target, CameraOrigin::LeftTop).unwrap();
        imr.begin_text(font);
        imr.text("ab\r\nc", Vec2::new(10.0, 20.0), Vec4::ONE).unwrap();
        imr.end_text().unwrap();
        imr.end_camera().unwrap();

        let draws = imr.backend().draws();
        assert_eq!(draws.len(), 1);
        let glyphs = draws[0].instances();
        assert_eq!(glyphs.len(), 3);
        assert_eq!(glyphs[0].translate, [10.0, 4.0]);
        assert_eq!(glyphs[1].translate, [18.0, 4.0]);
        assert_eq!(glyphs[2].translate, [10.0, 20.0]);
        assert_eq!(imr.program_stack.len(), 0);
    }

    #[test]
    fn text_without_begin_fails() {
        let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
        assert_eq!(
            imr.text("x", Vec2::ZERO, Vec4::ONE),
            Err(ImrError::TextNotBegun)
        );
        assert_eq!(imr.end_text(), Err(ImrError::TextNotBegun));
    }
}
