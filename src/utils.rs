use glam::{Mat4, Vec2, Vec4};

pub const WHITE: Vec4 = Vec4::ONE;

/// Normalized texture rectangle as consumed by the sprite shaders.
///
/// `x`/`z` are the left/right U, `y`/`w` the V of the top and bottom edges
/// after flipping to the bottom-left texel origin, so a full texture is
/// `{0, 1, 1, 0}`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct UvRect {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl UvRect {
    pub const FULL: UvRect = UvRect {
        x: 0.0,
        y: 1.0,
        z: 1.0,
        w: 0.0,
    };

    /// Pixel region of a `texture_size` texture to a Y-flipped UV rect.
    pub fn from_pixels(position: Vec2, size: Vec2, texture_size: Vec2) -> Self {
        let min = position / texture_size;
        let max = (position + size) / texture_size;
        UvRect {
            x: min.x,
            y: 1.0 - min.y,
            z: max.x,
            w: 1.0 - max.y,
        }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.x, self.y, self.z, self.w]
    }
}

impl Default for UvRect {
    fn default() -> Self {
        UvRect::FULL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rectangle {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rectangle {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Smallest rectangle holding every point.
    pub fn bounding(points: &[Vec2]) -> Self {
        let mut min = Vec2::splat(f32::INFINITY);
        let mut max = Vec2::splat(f32::NEG_INFINITY);
        for p in points {
            min = min.min(*p);
            max = max.max(*p);
        }
        if points.is_empty() {
            return Rectangle::default();
        }
        Rectangle::new(min.x, min.y, max.x - min.x, max.y - min.y)
    }

    pub fn contains(&self, position: Vec2) -> bool {
        position.x >= self.x
            && position.x <= self.x + self.width
            && position.y >= self.y
            && position.y <= self.y + self.height
    }

    pub fn pos(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width, self.height)
    }
}

pub fn deg_to_rad(degrees: f32) -> f32 {
    degrees * std::f32::consts::PI / 180.0
}

/// Smallest power of two that is >= `n` (1 for 0).
pub fn min_power_of_two(n: usize) -> usize {
    n.next_power_of_two()
}

/// Unit quad corner positions in the order the vertex shaders number them.
pub const QUAD_CORNERS: [Vec2; 4] = [
    Vec2::new(0.0, 0.0),
    Vec2::new(0.0, 1.0),
    Vec2::new(1.0, 1.0),
    Vec2::new(1.0, 0.0),
];

/// CPU mirror of the sprite vertex transform: pivot, size, scale, rotation,
/// translation and the half-pixel snap, in that order.
pub fn quad_corners(
    translate: Vec2,
    scale: Vec2,
    rotation_rad: f32,
    size: Vec2,
    offset: Vec2,
) -> [Vec2; 4] {
    let (sin, cos) = rotation_rad.sin_cos();
    QUAD_CORNERS.map(|corner| {
        let p = (corner - offset) * size * scale;
        let rotated = Vec2::new(p.x * cos - p.y * sin, p.x * sin + p.y * cos);
        (rotated + translate + Vec2::splat(0.5)).floor()
    })
}

/// Projection then view, column-major, as the shaders' `mat4x4` pair.
pub fn matrix_pair_bytes(projection: &Mat4, view: &Mat4) -> [u8; 128] {
    let mut bytes = [0u8; 128];
    bytes[..64].copy_from_slice(bytemuck::bytes_of(&projection.to_cols_array()));
    bytes[64..].copy_from_slice(bytemuck::bytes_of(&view.to_cols_array()));
    bytes
}
