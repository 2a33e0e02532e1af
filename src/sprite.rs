//! Single-sprite drawing and the try-batch engine.
//!
//! With batching off every [`ImrContext::draw`] is one quad draw. With
//! batching on, draws sharing the same textures queue up on the camera and
//! are flushed as one instanced draw when the textures change or the batch
//! ends. A run of one still goes through the direct path.

use glam::{Vec2, Vec4};
use log::trace;

use crate::atlas::SpriteRect;
use crate::error::{ImrError, ImrResult};
use crate::gpu::{DrawCall, GpuBackend};
use crate::instancing::InstanceArgs;
use crate::program::{SPRITE_PROGRAM, UNIFORM_PROJECTION};
use crate::texture::Texture;
use crate::utils::{deg_to_rad, quad_corners, UvRect, WHITE};
use crate::ImrContext;

/// One sprite draw. `rotation` is in degrees, `offset` is the pivot in units
/// of the sprite size.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawArgs {
    pub textures: [Option<Texture>; 4],
    pub sprite: Option<SpriteRect>,
    pub position: Vec2,
    pub scale: Vec2,
    pub rotation: f32,
    pub color: Vec4,
    pub offset: Vec2,
}

impl Default for DrawArgs {
    fn default() -> Self {
        Self {
            textures: [None, None, None, None],
            sprite: None,
            position: Vec2::ZERO,
            scale: Vec2::ONE,
            rotation: 0.0,
            color: WHITE,
            offset: Vec2::ZERO,
        }
    }
}

impl DrawArgs {
    pub fn new(texture: &Texture) -> Self {
        Self {
            textures: [Some(texture.clone()), None, None, None],
            ..Default::default()
        }
    }

    pub fn with_sprite(texture: &Texture, sprite: SpriteRect) -> Self {
        Self {
            sprite: Some(sprite),
            ..Self::new(texture)
        }
    }

    pub(crate) fn instance_args(&self) -> InstanceArgs {
        InstanceArgs {
            sprite: self.sprite,
            position: self.position,
            scale: self.scale,
            rotation: self.rotation,
            color: self.color,
            offset: self.offset,
        }
    }
}

/// Uniform block of the sprite program, 13 vec4s.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SpriteUniforms {
    pub projection: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    /// xy translate, zw scale
    pub translate_scale: [f32; 4],
    /// xy size in pixels, zw pivot
    pub size_offset: [f32; 4],
    pub color: [f32; 4],
    pub uv: [f32; 4],
    /// x rotation in radians
    pub rotation: [f32; 4],
}

impl SpriteUniforms {
    pub const SIZE: usize = std::mem::size_of::<SpriteUniforms>();

    pub fn from_bytes(bytes: &[u8]) -> Self {
        bytemuck::pod_read_unaligned(&bytes[..Self::SIZE])
    }

    /// Where the shader will place the four quad corners, before the camera.
    pub fn corners(&self) -> [Vec2; 4] {
        let [tx, ty, sx, sy] = self.translate_scale;
        let [w, h, ox, oy] = self.size_offset;
        quad_corners(
            Vec2::new(tx, ty),
            Vec2::new(sx, sy),
            self.rotation[0],
            Vec2::new(w, h),
            Vec2::new(ox, oy),
        )
    }
}

impl<B: GpuBackend> ImrContext<B> {
    /// Turns on deferred drawing for the current camera.
    pub fn begin_try_batch(&mut self) -> ImrResult<()> {
        let camera = self.cameras.last_mut().ok_or(ImrError::NoCamera)?;
        if !camera.pending.is_empty() {
            return Err(ImrError::BatchPending);
        }
        camera.batching = true;
        Ok(())
    }

    pub fn draw(&mut self, args: DrawArgs) -> ImrResult<()> {
        let camera = self.cameras.last().ok_or(ImrError::NoCamera)?;
        if !camera.batching {
            return self.draw_direct(&args);
        }
        let breaks_run = camera
            .pending
            .last()
            .is_some_and(|last| last.textures != args.textures);
        if breaks_run {
            self.flush_batch()?;
        }
        // a run never grows past what one instanced draw can hold
        let room = self.instance_room().max(1);
        let camera = self.cameras.last_mut().ok_or(ImrError::NoCamera)?;
        camera.pending.push(args);
        if camera.pending.len() >= room {
            self.flush_batch()?;
        }
        Ok(())
    }

    /// Flushes whatever is queued and turns batching off.
    pub fn end_try_batch(&mut self) -> ImrResult<()> {
        let camera = self.cameras.last_mut().ok_or(ImrError::NoCamera)?;
        if !camera.batching {
            return Err(ImrError::BatchNotStarted);
        }
        camera.batching = false;
        self.flush_batch()
    }

    /// Draws one sprite immediately, whatever the batching state.
    pub fn draw_single(&mut self, args: &DrawArgs) -> ImrResult<()> {
        self.draw_direct(args)
    }

    /// Number of draws queued on the current camera.
    pub fn pending_draws(&self) -> usize {
        self.cameras.last().map_or(0, |c| c.pending.len())
    }

    fn flush_batch(&mut self) -> ImrResult<()> {
        let camera = self.cameras.last_mut().ok_or(ImrError::NoCamera)?;
        let run = std::mem::take(&mut camera.pending);
        match run.len() {
            0 => Ok(()),
            1 => {
                trace!("flush: run of 1, direct");
                self.draw_direct(&run[0])
            }
            n => {
                trace!("flush: run of {}, instanced", n);
                self.begin_instancing_with(run[0].textures.clone())?;
                for draw in &run {
                    if let Err(e) = self.instance(&draw.instance_args()) {
                        self.abort_instancing();
                        return Err(e);
                    }
                }
                self.end_instancing()
            }
        }
    }

    fn draw_direct(&mut self, args: &DrawArgs) -> ImrResult<()> {
        let camera = self.cameras.last().ok_or(ImrError::NoCamera)?;
        let primary = args.textures[0].as_ref().unwrap_or(&self.white);
        let (size, uv, offset) = match &args.sprite {
            Some(sprite) => (sprite.size, sprite.uv, sprite.offset + args.offset),
            None => (primary.size(), UvRect::FULL, args.offset),
        };
        let uniforms = SpriteUniforms {
            projection: camera.projection.to_cols_array_2d(),
            view: camera.view.to_cols_array_2d(),
            translate_scale: [args.position.x, args.position.y, args.scale.x, args.scale.y],
            size_offset: [size.x, size.y, offset.x, offset.y],
            color: args.color.to_array(),
            uv: uv.to_array(),
            rotation: [deg_to_rad(args.rotation), 0.0, 0.0, 0.0],
        };
        let primary = primary.id();

        let program = self.programs.get(SPRITE_PROGRAM)?;
        let offset = program.uniform_offset(UNIFORM_PROJECTION)?;
        self.backend.use_program(program.id());
        self.backend.set_uniform(offset, bytemuck::bytes_of(&uniforms));
        self.backend.bind_texture(0, Some(primary));
        for slot in 1..4 {
            let texture = args.textures[slot].as_ref().map(Texture::id);
            self.backend.bind_texture(slot as u32, texture);
        }
        self.backend.draw(&DrawCall::Quad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;

    #[test]
    fn uniform_block_is_thirteen_vec4() {
        assert_eq!(SpriteUniforms::SIZE, 13 * 16);
    }

    #[test]
    fn corners_follow_size_and_pivot() {
        let u = SpriteUniforms {
            projection: Mat4::IDENTITY.to_cols_array_2d(),
            view: Mat4::IDENTITY.to_cols_array_2d(),
            translate_scale: [100.0, 50.0, 1.0, 1.0],
            size_offset: [32.0, 16.0, 0.5, 0.5],
            color: [1.0; 4],
            uv: UvRect::FULL.to_array(),
            rotation: [0.0; 4],
        };
        let c = u.corners();
        assert_eq!(c[0], Vec2::new(84.0, 42.0));
        assert_eq!(c[2], Vec2::new(116.0, 58.0));
    }
}
