use glam::{Vec2, Vec4};
use log::trace;

use crate::anim::AnimationCursor;
use crate::atlas::SpriteRect;
use crate::error::{ImrError, ImrResult};
use crate::gpu::{BufferTarget, BufferUsage, DrawCall, GpuBackend, VertexAttrib};
use crate::program::{INSTANCING_PROGRAM, UNIFORM_PROJECTION};
use crate::texture::Texture;
use crate::utils::{deg_to_rad, matrix_pair_bytes, quad_corners, UvRect, WHITE};
use crate::ImrContext;

/// Per-instance data as the instancing shaders read it: five vec4s.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRecord {
    pub translate: [f32; 2],
    pub scale: [f32; 2],
    /// radians
    pub rotation: f32,
    pub size: [f32; 2],
    pub _reserved0: f32,
    pub uv: [f32; 4],
    pub color: [f32; 4],
    pub offset: [f32; 2],
    pub _reserved1: [f32; 2],
}

impl InstanceRecord {
    pub const FLOATS: usize = 20;
    pub const SIZE: usize = Self::FLOATS * 4;
    /// Attribute registers 1..=5, one vec4 each.
    pub const ATTRIB_COUNT: u32 = 5;

    pub fn world_corners(&self) -> [Vec2; 4] {
        quad_corners(
            Vec2::from(self.translate),
            Vec2::from(self.scale),
            self.rotation,
            Vec2::from(self.size),
            Vec2::from(self.offset),
        )
    }
}

/// One instance. `rotation` is in degrees, `offset` is the pivot in units of
/// the sprite size (added to the sprite's own pivot when one is given).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceArgs {
    pub sprite: Option<SpriteRect>,
    pub position: Vec2,
    pub scale: Vec2,
    pub rotation: f32,
    pub color: Vec4,
    pub offset: Vec2,
}

impl Default for InstanceArgs {
    fn default() -> Self {
        Self {
            sprite: None,
            position: Vec2::ZERO,
            scale: Vec2::ONE,
            rotation: 0.0,
            color: WHITE,
            offset: Vec2::ZERO,
        }
    }
}

impl InstanceArgs {
    pub fn at(position: Vec2) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }
}

/// The one instance array every instancing context writes into.
#[derive(Debug)]
pub(crate) struct InstanceScratch {
    records: Vec<InstanceRecord>,
    capacity: usize,
}

impl InstanceScratch {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            records: Vec::new(),
            capacity,
        }
    }

    fn write(&mut self, index: usize, record: InstanceRecord) -> ImrResult<()> {
        if index >= self.capacity {
            return Err(ImrError::CapacityExceeded {
                requested: index + 1,
                capacity: self.capacity,
            });
        }
        if index >= self.records.len() {
            self.records.resize(index + 1, InstanceRecord::default());
        }
        self.records[index] = record;
        Ok(())
    }

    fn bytes(&self, base: usize, count: usize) -> &[u8] {
        bytemuck::cast_slice(&self.records[base..base + count])
    }
}

#[derive(Debug)]
pub(crate) struct InstancingState {
    textures: [Option<Texture>; 4],
    /// First scratch slot owned by this context.
    base: usize,
    count: usize,
}

impl<B: GpuBackend> ImrContext<B> {
    /// Opens an instancing context on `texture`, or on the white texture.
    pub fn begin_instancing(&mut self, texture: Option<&Texture>) -> ImrResult<()> {
        self.begin_instancing_with([texture.cloned(), None, None, None])
    }

    /// Opens an instancing context with up to four textures bound to slots 0..4.
    pub fn begin_instancing_with(&mut self, mut textures: [Option<Texture>; 4]) -> ImrResult<()> {
        let max = self.config.max_instancing_depth;
        if self.instancing.len() >= max {
            return Err(ImrError::InstancingTooDeep { max });
        }
        if textures[0].is_none() {
            textures[0] = Some(self.white.clone());
        }
        let base = self.instancing.last().map_or(0, |p| p.base + p.count);
        self.instancing.push(InstancingState {
            textures,
            base,
            count: 0,
        });
        Ok(())
    }

    pub fn instance(&mut self, args: &InstanceArgs) -> ImrResult<()> {
        let state = self.instancing.last().ok_or(ImrError::InstancingNotBegun)?;
        let texture_size = state.textures[0].as_ref().map_or(Vec2::ONE, Texture::size);
        let (size, uv, pivot) = match &args.sprite {
            Some(sprite) => (sprite.size, sprite.uv, sprite.offset + args.offset),
            None => (texture_size, UvRect::FULL, args.offset),
        };
        self.push_instance(args, size, uv, pivot)
    }

    /// Instances a raw pixel region of the primary texture.
    pub fn instance_region(
        &mut self,
        region_position: Vec2,
        region_size: Vec2,
        args: &InstanceArgs,
    ) -> ImrResult<()> {
        let state = self.instancing.last().ok_or(ImrError::InstancingNotBegun)?;
        let texture_size = state.textures[0].as_ref().map_or(Vec2::ONE, Texture::size);
        let uv = UvRect::from_pixels(region_position, region_size, texture_size);
        self.push_instance(args, region_size, uv, args.offset)
    }

    /// Instances whatever frame `cursor` currently shows.
    pub fn instance_cursor(
        &mut self,
        cursor: &dyn AnimationCursor,
        args: &InstanceArgs,
    ) -> ImrResult<()> {
        let sprite = cursor.current_sprite().ok_or(ImrError::NoAnimationFrame)?;
        self.instance(&InstanceArgs {
            sprite: Some(sprite),
            ..*args
        })
    }

    fn push_instance(
        &mut self,
        args: &InstanceArgs,
        size: Vec2,
        uv: UvRect,
        pivot: Vec2,
    ) -> ImrResult<()> {
        let state = self
            .instancing
            .last_mut()
            .ok_or(ImrError::InstancingNotBegun)?;
        let record = InstanceRecord {
            translate: args.position.to_array(),
            scale: args.scale.to_array(),
            rotation: deg_to_rad(args.rotation),
            size: size.to_array(),
            _reserved0: 0.0,
            uv: uv.to_array(),
            color: args.color.to_array(),
            offset: pivot.to_array(),
            _reserved1: [0.0; 2],
        };
        self.scratch.write(state.base + state.count, record)?;
        state.count += 1;
        Ok(())
    }

    /// Scratch slots still free above the innermost instancing context.
    pub(crate) fn instance_room(&self) -> usize {
        let used = self.instancing.last().map_or(0, |s| s.base + s.count);
        self.scratch.capacity.saturating_sub(used)
    }

    /// Instances written so far in the current context.
    pub fn instance_count(&self) -> usize {
        self.instancing.last().map_or(0, |s| s.count)
    }

    /// Issues one instanced draw for everything written since the matching
    /// begin, with the pushed program or the default instancing program.
    pub fn end_instancing(&mut self) -> ImrResult<()> {
        let state = self.instancing.pop().ok_or(ImrError::InstancingNotBegun)?;
        if state.count == 0 {
            return Ok(());
        }
        let camera = self.cameras.last().ok_or(ImrError::NoCamera)?;
        let matrices = matrix_pair_bytes(&camera.projection, &camera.view);

        let program = match self.program_stack.top() {
            Some(program) => program.clone(),
            None => self.programs.get(INSTANCING_PROGRAM)?,
        };
        let mut attribs = Vec::with_capacity(InstanceRecord::ATTRIB_COUNT as usize);
        for register in 1..=InstanceRecord::ATTRIB_COUNT {
            attribs.push(VertexAttrib {
                shader_location: program.attrib_location(register)?,
                components: 4,
                stride: InstanceRecord::SIZE as u32,
                offset: (register - 1) * 16,
                per_instance: true,
            });
        }
        let uniform_offset = program.uniform_offset(UNIFORM_PROJECTION)?;

        self.backend.use_program(program.id());
        self.backend.set_uniform(uniform_offset, &matrices);
        for (slot, texture) in state.textures.iter().enumerate() {
            self.backend
                .bind_texture(slot as u32, texture.as_ref().map(Texture::id));
        }

        let data = self.scratch.bytes(state.base, state.count);
        let buffer = self.pool.checkout(
            &mut self.backend,
            data.len(),
            BufferTarget::Vertex,
            BufferUsage::DynamicDraw,
        )?;
        self.backend.write_buffer(buffer.id(), 0, data);
        trace!("instanced draw: {} instances", state.count);
        let result = self.backend.draw(&DrawCall::InstancedQuad {
            instances: buffer.id(),
            count: state.count as u32,
            attribs: &attribs,
        });
        self.pool.give_back(buffer);
        result
    }

    /// Drops the current instancing context without drawing.
    pub(crate) fn abort_instancing(&mut self) {
        self.instancing.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_twenty_floats() {
        assert_eq!(std::mem::size_of::<InstanceRecord>(), InstanceRecord::SIZE);
        let record = InstanceRecord {
            translate: [1.0, 2.0],
            color: [0.1, 0.2, 0.3, 0.4],
            ..Default::default()
        };
        let floats: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&record));
        assert_eq!(floats[0], 1.0);
        assert_eq!(floats[12], 0.1);
    }

    #[test]
    fn scratch_refuses_past_capacity() {
        let mut scratch = InstanceScratch::new(2);
        scratch.write(0, InstanceRecord::default()).unwrap();
        scratch.write(1, InstanceRecord::default()).unwrap();
        assert_eq!(
            scratch.write(2, InstanceRecord::default()),
            Err(ImrError::CapacityExceeded {
                requested: 3,
                capacity: 2
            })
        );
    }
}
