//! Headless backend that records every call instead of talking to a GPU.
//!
//! Draws capture a snapshot of the state they were issued with (target,
//! program, uniform block, bound textures, blend, viewport, buffer contents),
//! so tests can assert on what would have reached the screen.

use std::collections::HashMap;

use glam::{Mat4, Vec4};

use super::{
    BlendFunc, BufferId, BufferTarget, BufferUsage, DrawCall, FrameBufferId, GpuBackend,
    ProgramId, TargetId, TextureId, VertexAttrib, Viewport,
};
use crate::error::{ImrError, ImrResult};
use crate::instancing::InstanceRecord;
use crate::program::ProgramSource;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawKind {
    Quad,
    Instanced { count: u32 },
    Indexed { index_count: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub kind: DrawKind,
    pub target: Option<TargetId>,
    pub program: Option<ProgramId>,
    pub uniforms: Vec<u8>,
    pub textures: [Option<TextureId>; 4],
    pub viewport: Viewport,
    /// `None` when blending was disabled.
    pub blend: Option<BlendFunc>,
    pub depth_test: bool,
    /// Instance records for instanced draws, vertices for indexed draws.
    pub vertex_data: Vec<u8>,
    pub index_data: Vec<u8>,
    pub attribs: Vec<VertexAttrib>,
}

impl DrawRecord {
    /// Decodes the instance payload of an instanced draw.
    pub fn instances(&self) -> Vec<InstanceRecord> {
        match self.kind {
            DrawKind::Instanced { count } => read_pod(&self.vertex_data, count as usize),
            _ => Vec::new(),
        }
    }

    pub fn uniform_mat4(&self, offset: usize) -> Mat4 {
        let cols: [f32; 16] = bytemuck::pod_read_unaligned(&self.uniforms[offset..offset + 64]);
        Mat4::from_cols_array(&cols)
    }

    pub fn uniform_vec4(&self, offset: usize) -> Vec4 {
        let v: [f32; 4] = bytemuck::pod_read_unaligned(&self.uniforms[offset..offset + 16]);
        Vec4::from_array(v)
    }

    pub fn indices(&self) -> Vec<u16> {
        match self.kind {
            DrawKind::Indexed { index_count } => read_pod(&self.index_data, index_count as usize),
            _ => Vec::new(),
        }
    }

    pub fn vertices(&self) -> Vec<f32> {
        read_pod(&self.vertex_data, usize::MAX)
    }
}

/// Up to `count` values decoded from a byte buffer of arbitrary alignment.
fn read_pod<T: bytemuck::Pod>(bytes: &[u8], count: usize) -> Vec<T> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .take(count)
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    CreateTexture { id: TextureId, width: u32, height: u32 },
    DeleteTexture(TextureId),
    CreateFrameBuffer { id: FrameBufferId, width: u32, height: u32, attachments: u32 },
    DeleteFrameBuffer(FrameBufferId),
    CreateProgram { id: ProgramId, label: String },
    DeleteProgram(ProgramId),
    CreateBuffer { id: BufferId, capacity: usize, target: BufferTarget, usage: BufferUsage },
    WriteBuffer { id: BufferId, offset: usize, len: usize },
    DeleteBuffer(BufferId),
    BindTarget(TargetId),
    UnbindTarget(TargetId),
    Clear(Vec4),
    SetViewport(Viewport),
    SetBlendEnabled(bool),
    SetBlendFunc(BlendFunc),
    SetDepthTest(bool),
    UseProgram(ProgramId),
    SetUniform { offset: u32, len: usize },
    BindTexture { slot: u32, texture: Option<TextureId> },
    Draw(DrawRecord),
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    commands: Vec<GpuCommand>,
    next_id: u64,
    textures: HashMap<TextureId, (u32, u32)>,
    frame_buffers: HashMap<FrameBufferId, Vec<TextureId>>,
    programs: HashMap<ProgramId, Vec<u8>>,
    buffers: HashMap<BufferId, Vec<u8>>,
    target: Option<TargetId>,
    program: Option<ProgramId>,
    textures_bound: [Option<TextureId>; 4],
    viewport: Viewport,
    blend_enabled: bool,
    blend: BlendFunc,
    depth_test: bool,
    fail_shader_builds: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `create_program` fail with a shader build error.
    pub fn set_fail_shader_builds(&mut self, fail: bool) {
        self.fail_shader_builds = fail;
    }

    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<GpuCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn draws(&self) -> Vec<&DrawRecord> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                GpuCommand::Draw(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&GpuCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| pred(c)).count()
    }

    pub fn buffers_created(&self) -> usize {
        self.count(|c| matches!(c, GpuCommand::CreateBuffer { .. }))
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn live_frame_buffers(&self) -> usize {
        self.frame_buffers.len()
    }

    pub fn buffer_data(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn blend(&self) -> (bool, BlendFunc) {
        (self.blend_enabled, self.blend)
    }

    pub fn bound_target(&self) -> Option<TargetId> {
        self.target
    }

    pub fn current_program(&self) -> Option<ProgramId> {
        self.program
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn snapshot(&self, kind: DrawKind) -> DrawRecord {
        DrawRecord {
            kind,
            target: self.target,
            program: self.program,
            uniforms: self
                .program
                .and_then(|p| self.programs.get(&p))
                .cloned()
                .unwrap_or_default(),
            textures: self.textures_bound,
            viewport: self.viewport,
            blend: self.blend_enabled.then_some(self.blend),
            depth_test: self.depth_test,
            vertex_data: Vec::new(),
            index_data: Vec::new(),
            attribs: Vec::new(),
        }
    }

    fn buffer(&self, id: BufferId) -> ImrResult<Vec<u8>> {
        self.buffers
            .get(&id)
            .cloned()
            .ok_or_else(|| ImrError::Backend(format!("unknown buffer {:?}", id)))
    }
}

impl GpuBackend for RecordingBackend {
    fn create_texture(&mut self, width: u32, height: u32, _rgba: &[u8]) -> ImrResult<TextureId> {
        let id = TextureId(self.next());
        self.textures.insert(id, (width, height));
        self.commands.push(GpuCommand::CreateTexture { id, width, height });
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
        self.commands.push(GpuCommand::DeleteTexture(texture));
    }

    fn create_frame_buffer(
        &mut self,
        width: u32,
        height: u32,
        attachments: u32,
    ) -> ImrResult<FrameBufferId> {
        let id = FrameBufferId(self.next());
        let colors = (0..attachments)
            .map(|_| {
                let t = TextureId(self.next());
                self.textures.insert(t, (width, height));
                t
            })
            .collect();
        self.frame_buffers.insert(id, colors);
        self.commands.push(GpuCommand::CreateFrameBuffer {
            id,
            width,
            height,
            attachments,
        });
        Ok(id)
    }

    fn frame_buffer_texture(&self, frame_buffer: FrameBufferId, index: u32) -> Option<TextureId> {
        self.frame_buffers
            .get(&frame_buffer)
            .and_then(|colors| colors.get(index as usize).copied())
    }

    fn delete_frame_buffer(&mut self, frame_buffer: FrameBufferId) {
        if let Some(colors) = self.frame_buffers.remove(&frame_buffer) {
            for t in colors {
                self.textures.remove(&t);
            }
        }
        self.commands.push(GpuCommand::DeleteFrameBuffer(frame_buffer));
    }

    fn create_program(&mut self, source: &ProgramSource) -> ImrResult<ProgramId> {
        if self.fail_shader_builds {
            return Err(ImrError::ShaderBuild(format!(
                "{}: shader builds disabled",
                source.label
            )));
        }
        let id = ProgramId(self.next());
        self.programs
            .insert(id, vec![0; source.layout.uniform_block_size as usize]);
        self.commands.push(GpuCommand::CreateProgram {
            id,
            label: source.label.clone(),
        });
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        if self.program == Some(program) {
            self.program = None;
        }
        self.commands.push(GpuCommand::DeleteProgram(program));
    }

    fn create_buffer(
        &mut self,
        capacity: usize,
        target: BufferTarget,
        usage: BufferUsage,
    ) -> ImrResult<BufferId> {
        let id = BufferId(self.next());
        self.buffers.insert(id, vec![0; capacity]);
        self.commands.push(GpuCommand::CreateBuffer {
            id,
            capacity,
            target,
            usage,
        });
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: usize, data: &[u8]) {
        if let Some(storage) = self.buffers.get_mut(&buffer) {
            let end = offset + data.len();
            if storage.len() < end {
                storage.resize(end, 0);
            }
            storage[offset..end].copy_from_slice(data);
        }
        self.commands.push(GpuCommand::WriteBuffer {
            id: buffer,
            offset,
            len: data.len(),
        });
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
        self.commands.push(GpuCommand::DeleteBuffer(buffer));
    }

    fn bind_target(&mut self, target: TargetId) {
        self.target = Some(target);
        self.commands.push(GpuCommand::BindTarget(target));
    }

    fn unbind_target(&mut self, target: TargetId) {
        if self.target == Some(target) {
            self.target = None;
        }
        self.commands.push(GpuCommand::UnbindTarget(target));
    }

    fn clear(&mut self, color: Vec4) {
        self.commands.push(GpuCommand::Clear(color));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.commands.push(GpuCommand::SetViewport(viewport));
    }

    fn set_blend_enabled(&mut self, enabled: bool) {
        self.blend_enabled = enabled;
        self.commands.push(GpuCommand::SetBlendEnabled(enabled));
    }

    fn set_blend_func(&mut self, blend: BlendFunc) {
        self.blend = blend;
        self.commands.push(GpuCommand::SetBlendFunc(blend));
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.depth_test = enabled;
        self.commands.push(GpuCommand::SetDepthTest(enabled));
    }

    fn use_program(&mut self, program: ProgramId) {
        self.program = Some(program);
        self.commands.push(GpuCommand::UseProgram(program));
    }

    fn set_uniform(&mut self, offset: u32, data: &[u8]) {
        if let Some(block) = self.program.and_then(|p| self.programs.get_mut(&p)) {
            let start = offset as usize;
            let end = start + data.len();
            if block.len() < end {
                block.resize(end, 0);
            }
            block[start..end].copy_from_slice(data);
        }
        self.commands.push(GpuCommand::SetUniform {
            offset,
            len: data.len(),
        });
    }

    fn bind_texture(&mut self, slot: u32, texture: Option<TextureId>) {
        if let Some(entry) = self.textures_bound.get_mut(slot as usize) {
            *entry = texture;
        }
        self.commands.push(GpuCommand::BindTexture { slot, texture });
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> ImrResult<()> {
        let record = match call {
            DrawCall::Quad => self.snapshot(DrawKind::Quad),
            DrawCall::InstancedQuad {
                instances,
                count,
                attribs,
            } => {
                let mut record = self.snapshot(DrawKind::Instanced { count: *count });
                record.vertex_data = self.buffer(*instances)?;
                record.attribs = attribs.to_vec();
                record
            }
            DrawCall::Indexed {
                vertices,
                indices,
                index_count,
                attribs,
            } => {
                let mut record = self.snapshot(DrawKind::Indexed {
                    index_count: *index_count,
                });
                record.vertex_data = self.buffer(*vertices)?;
                record.index_data = self.buffer(*indices)?;
                record.attribs = attribs.to_vec();
                record
            }
        };
        self.commands.push(GpuCommand::Draw(record));
        Ok(())
    }
}
