//! The seam between the render-state machine and a concrete graphics API.
//!
//! The core never talks to wgpu (or anything else) directly: it drives a
//! [`GpuBackend`] with GL-style state changes (bind target, set viewport, use
//! program, bind texture slots, upload uniforms) and a handful of draw calls.
//! Backends own every GPU object and hand out plain ids.

pub mod recording;
#[cfg(feature = "backend-wgpu")]
pub mod wgpu_backend;

use glam::Vec4;

use crate::error::ImrResult;
use crate::program::ProgramSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameBufferId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

/// Surface a camera renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetId {
    Backbuffer,
    FrameBuffer(FrameBufferId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferTarget {
    Vertex,
    Index,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferUsage {
    StaticDraw,
    DynamicDraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendFunc {
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendFunc {
    pub const ALPHA: BlendFunc = BlendFunc {
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::OneMinusSrcAlpha,
    };
    pub const ADDITIVE: BlendFunc = BlendFunc {
        src: BlendFactor::One,
        dst: BlendFactor::One,
    };
}

impl Default for BlendFunc {
    fn default() -> Self {
        BlendFunc::ALPHA
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// One float vertex attribute read from a bound vertex buffer.
/// `stride` and `offset` are in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttrib {
    pub shader_location: u32,
    pub components: u32,
    pub stride: u32,
    pub offset: u32,
    pub per_instance: bool,
}

/// Unit quad shared by the sprite and instancing programs: xy corner plus the
/// corner index in z, which the shaders use to pick a UV.
pub const QUAD_VERTICES: [[f32; 3]; 4] = [
    [0.0, 0.0, 0.0],
    [0.0, 1.0, 1.0],
    [1.0, 1.0, 2.0],
    [1.0, 0.0, 3.0],
];
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCall<'a> {
    /// The unit quad, once, with the current uniforms.
    Quad,
    /// The unit quad `count` times, per-instance data in `instances`.
    InstancedQuad {
        instances: BufferId,
        count: u32,
        attribs: &'a [VertexAttrib],
    },
    /// Arbitrary triangles from a vertex and a u16 index buffer.
    Indexed {
        vertices: BufferId,
        indices: BufferId,
        index_count: u32,
        attribs: &'a [VertexAttrib],
    },
}

/// Graphics API capabilities the render layer consumes.
///
/// State set through this trait is sticky until changed, like GL: uniforms
/// belong to the program in use, texture slots stay bound until rebound.
pub trait GpuBackend {
    fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> ImrResult<TextureId>;
    fn delete_texture(&mut self, texture: TextureId);

    fn create_frame_buffer(
        &mut self,
        width: u32,
        height: u32,
        attachments: u32,
    ) -> ImrResult<FrameBufferId>;
    /// Color attachment `index` of a frame buffer, sampleable as a texture.
    fn frame_buffer_texture(&self, frame_buffer: FrameBufferId, index: u32) -> Option<TextureId>;
    fn delete_frame_buffer(&mut self, frame_buffer: FrameBufferId);

    fn create_program(&mut self, source: &ProgramSource) -> ImrResult<ProgramId>;
    fn delete_program(&mut self, program: ProgramId);

    fn create_buffer(
        &mut self,
        capacity: usize,
        target: BufferTarget,
        usage: BufferUsage,
    ) -> ImrResult<BufferId>;
    fn write_buffer(&mut self, buffer: BufferId, offset: usize, data: &[u8]);
    fn delete_buffer(&mut self, buffer: BufferId);

    fn bind_target(&mut self, target: TargetId);
    fn unbind_target(&mut self, target: TargetId);
    fn clear(&mut self, color: Vec4);
    fn set_viewport(&mut self, viewport: Viewport);
    fn set_blend_enabled(&mut self, enabled: bool);
    fn set_blend_func(&mut self, blend: BlendFunc);
    fn set_depth_test(&mut self, enabled: bool);

    fn use_program(&mut self, program: ProgramId);
    /// Writes into the uniform block of the program in use, at a byte offset.
    fn set_uniform(&mut self, offset: u32, data: &[u8]);
    fn bind_texture(&mut self, slot: u32, texture: Option<TextureId>);

    fn draw(&mut self, call: &DrawCall<'_>) -> ImrResult<()>;
}
