use std::collections::HashMap;

use glam::Vec2;

use crate::error::{ImrError, ImrResult};
use crate::texture::Texture;
use crate::utils::UvRect;

/// A named sub-rectangle of an atlas texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpriteRect {
    /// Pixel position of the top-left corner inside the atlas.
    pub position: Vec2,
    pub size: Vec2,
    /// Pivot, in units of the sprite size.
    pub offset: Vec2,
    pub uv: UvRect,
}

/// A texture subdivided into named sprites.
#[derive(Debug, Clone)]
pub struct Atlas {
    texture: Texture,
    sprites: HashMap<String, SpriteRect>,
}

impl Atlas {
    pub fn new(texture: Texture) -> Self {
        Self {
            texture,
            sprites: HashMap::new(),
        }
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// Registers (or replaces) a sprite and returns its rect.
    pub fn add_sprite(&mut self, name: &str, position: Vec2, size: Vec2, offset: Vec2) -> SpriteRect {
        let rect = SpriteRect {
            position,
            size,
            offset,
            uv: UvRect::from_pixels(position, size, self.texture.size()),
        };
        self.sprites.insert(name.to_string(), rect);
        rect
    }

    /// Cuts the whole texture into `tile_size` cells named `{prefix}_{index}`,
    /// row-major with the top row first. Returns the number of tiles added.
    pub fn add_grid(&mut self, prefix: &str, tile_size: Vec2, offset: Vec2) -> usize {
        if tile_size.x <= 0.0 || tile_size.y <= 0.0 {
            return 0;
        }
        let cols = (self.texture.size().x / tile_size.x).floor() as usize;
        let rows = (self.texture.size().y / tile_size.y).floor() as usize;
        for row in 0..rows {
            for col in 0..cols {
                let index = row * cols + col;
                let position = Vec2::new(col as f32, row as f32) * tile_size;
                self.add_sprite(&format!("{prefix}_{index}"), position, tile_size, offset);
            }
        }
        rows * cols
    }

    pub fn remove_sprite(&mut self, name: &str) -> ImrResult<SpriteRect> {
        self.sprites
            .remove(name)
            .ok_or_else(|| ImrError::SpriteNotFound(name.to_string()))
    }

    pub fn sprite(&self, name: &str) -> ImrResult<SpriteRect> {
        self.sprites
            .get(name)
            .copied()
            .ok_or_else(|| ImrError::SpriteNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sprites.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.sprites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sprites.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sprites.keys().map(String::as_str)
    }
}
