//! Arbitrary indexed geometry, for callers that produce their own triangles.

use std::rc::Rc;

use glam::{Mat4, Vec2, Vec4};
use log::{trace, warn};

use crate::error::{ImrError, ImrResult};
use crate::gpu::{BufferTarget, BufferUsage, DrawCall, GpuBackend, VertexAttrib};
use crate::program::{Program, MESH_PROGRAM, UNIFORM_PROJECTION};
use crate::state_stack::BlendMode;
use crate::texture::Texture;
use crate::utils::matrix_pair_bytes;
use crate::ImrContext;

/// Deferred attribute binding. `stride` and `offset` count floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttribPointer {
    pub register: u32,
    pub components: u32,
    pub stride: u32,
    pub offset: u32,
}

#[derive(Debug)]
pub(crate) struct MeshState {
    program: Option<Rc<Program>>,
    use_projection_view: bool,
    textures: Vec<(u32, Option<Texture>)>,
    attribs: Vec<AttribPointer>,
    uniforms: Vec<(u32, Vec<u8>)>,
    vertices: Vec<f32>,
    indices: Vec<u16>,
    vertex_count: usize,
}

impl MeshState {
    pub(crate) fn uses(&self, program: &Program) -> bool {
        self.program.as_deref() == Some(program)
    }

    fn new() -> Self {
        Self {
            program: None,
            use_projection_view: true,
            textures: Vec::new(),
            attribs: Vec::new(),
            uniforms: Vec::new(),
            vertices: Vec::new(),
            indices: Vec::new(),
            vertex_count: 0,
        }
    }
}

/// Vertex layout of [`ImrContext::draw_mesh`]: position, uv, color.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

impl MeshVertex {
    pub const FLOATS: usize = 8;

    pub fn new(position: Vec2, uv: Vec2, color: Vec4) -> Self {
        Self {
            position: position.to_array(),
            uv: uv.to_array(),
            color: color.to_array(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeshDrawArgs {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u16>,
    pub texture: Option<Texture>,
    pub blend: BlendMode,
}

impl<B: GpuBackend> ImrContext<B> {
    pub fn begin_mesh(&mut self) {
        self.meshes.push(MeshState::new());
    }

    /// Selects (and activates) the program the mesh is drawn with.
    pub fn mesh_use_program(&mut self, name: &str) -> ImrResult<()> {
        if self.meshes.is_empty() {
            return Err(ImrError::MeshNotBegun);
        }
        let program = self.programs.get(name)?;
        self.backend.use_program(program.id());
        if let Some(state) = self.meshes.last_mut() {
            state.program = Some(program);
        }
        Ok(())
    }

    /// Whether end uploads the camera's projection and view to uniform register 0.
    pub fn set_use_projection_view(&mut self, enabled: bool) -> ImrResult<()> {
        let state = self.meshes.last_mut().ok_or(ImrError::MeshNotBegun)?;
        state.use_projection_view = enabled;
        Ok(())
    }

    /// Appends vertices (`stride` floats each) and indices relative to them.
    /// Indices are rebased so successive pushes form one mesh.
    pub fn push_meshes(&mut self, vertices: &[f32], stride: usize, indices: &[u16]) -> ImrResult<()> {
        let state = self.meshes.last_mut().ok_or(ImrError::MeshNotBegun)?;
        if stride == 0 || vertices.len() % stride != 0 {
            return Err(ImrError::InvalidVertexStride {
                len: vertices.len(),
                stride,
            });
        }
        let base = state.vertex_count;
        let mut rebased = Vec::with_capacity(indices.len());
        for &index in indices {
            let index = index as usize + base;
            let Ok(index) = u16::try_from(index) else {
                return Err(ImrError::MeshIndexOverflow { index });
            };
            rebased.push(index);
        }
        state.vertices.extend_from_slice(vertices);
        state.indices.extend(rebased);
        state.vertex_count += vertices.len() / stride;
        Ok(())
    }

    pub fn set_uniform_mat4(&mut self, register: u32, data: &[Mat4]) -> ImrResult<()> {
        let bytes: Vec<u8> = data
            .iter()
            .flat_map(|m| bytemuck::bytes_of(&m.to_cols_array()).to_vec())
            .collect();
        self.queue_mesh_uniform(register, bytes)
    }

    pub fn set_uniform_vec4(&mut self, register: u32, data: &[Vec4]) -> ImrResult<()> {
        let bytes: Vec<u8> = data
            .iter()
            .flat_map(|v| bytemuck::bytes_of(&v.to_array()).to_vec())
            .collect();
        self.queue_mesh_uniform(register, bytes)
    }

    fn queue_mesh_uniform(&mut self, register: u32, bytes: Vec<u8>) -> ImrResult<()> {
        let state = self.meshes.last_mut().ok_or(ImrError::MeshNotBegun)?;
        let program = state.program.as_ref().ok_or(ImrError::NoMeshProgram)?;
        let offset = program.uniform_offset(register)?;
        state.uniforms.push((offset, bytes));
        Ok(())
    }

    /// Binds `texture` to `slot` at end. `None` makes end fail.
    pub fn set_texture(&mut self, slot: u32, texture: Option<&Texture>) -> ImrResult<()> {
        let state = self.meshes.last_mut().ok_or(ImrError::MeshNotBegun)?;
        state.textures.push((slot, texture.cloned()));
        Ok(())
    }

    pub fn vertex_attrib_pointer(&mut self, pointer: AttribPointer) -> ImrResult<()> {
        let state = self.meshes.last_mut().ok_or(ImrError::MeshNotBegun)?;
        state.attribs.push(pointer);
        Ok(())
    }

    /// Draws the accumulated mesh and pops the context. The context is popped
    /// even when the draw fails.
    pub fn end_mesh(&mut self) -> ImrResult<()> {
        let state = self.meshes.pop().ok_or(ImrError::MeshNotBegun)?;
        let result = self.submit_mesh(&state);
        if let Err(e) = &result {
            warn!(
                "mesh dropped ({} vertices, {} indices): {}",
                state.vertex_count,
                state.indices.len(),
                e
            );
        }
        result
    }

    fn submit_mesh(&mut self, state: &MeshState) -> ImrResult<()> {
        let program = state.program.as_ref().ok_or(ImrError::NoMeshProgram)?;
        let mut textures = Vec::with_capacity(state.textures.len());
        for (slot, texture) in &state.textures {
            let texture = texture
                .as_ref()
                .ok_or(ImrError::MissingTexture { slot: *slot })?;
            textures.push((*slot, texture.id()));
        }
        if state.indices.is_empty() || state.vertices.is_empty() {
            trace!("empty mesh, nothing to draw");
            return Ok(());
        }
        let mut attribs = Vec::with_capacity(state.attribs.len());
        for pointer in &state.attribs {
            attribs.push(VertexAttrib {
                shader_location: program.attrib_location(pointer.register)?,
                components: pointer.components,
                stride: pointer.stride * 4,
                offset: pointer.offset * 4,
                per_instance: false,
            });
        }
        let matrices = if state.use_projection_view {
            let camera = self.cameras.last().ok_or(ImrError::NoCamera)?;
            Some((
                program.uniform_offset(UNIFORM_PROJECTION)?,
                matrix_pair_bytes(&camera.projection, &camera.view),
            ))
        } else {
            None
        };

        self.backend.use_program(program.id());
        if let Some((offset, bytes)) = matrices {
            self.backend.set_uniform(offset, &bytes);
        }
        for (offset, bytes) in &state.uniforms {
            self.backend.set_uniform(*offset, bytes);
        }
        for (slot, texture) in textures {
            self.backend.bind_texture(slot, Some(texture));
        }

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&state.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&state.indices);
        let vertices = self.pool.checkout(
            &mut self.backend,
            vertex_bytes.len(),
            BufferTarget::Vertex,
            BufferUsage::DynamicDraw,
        )?;
        let indices = match self.pool.checkout(
            &mut self.backend,
            index_bytes.len(),
            BufferTarget::Index,
            BufferUsage::DynamicDraw,
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.pool.give_back(vertices);
                return Err(e);
            }
        };
        self.backend.write_buffer(vertices.id(), 0, vertex_bytes);
        self.backend.write_buffer(indices.id(), 0, index_bytes);
        let result = self.backend.draw(&DrawCall::Indexed {
            vertices: vertices.id(),
            indices: indices.id(),
            index_count: state.indices.len() as u32,
            attribs: &attribs,
        });
        self.pool.give_back(vertices);
        self.pool.give_back(indices);
        result
    }

    /// One-shot textured mesh with the built-in mesh program.
    pub fn draw_mesh(&mut self, args: &MeshDrawArgs) -> ImrResult<()> {
        self.push_blend_mode(args.blend)?;
        let result = self.draw_mesh_inner(args);
        self.pop_blend()?;
        result
    }

    fn draw_mesh_inner(&mut self, args: &MeshDrawArgs) -> ImrResult<()> {
        self.begin_mesh();
        if let Err(e) = self.configure_builtin_mesh(args) {
            self.meshes.pop();
            return Err(e);
        }
        self.end_mesh()
    }

    fn configure_builtin_mesh(&mut self, args: &MeshDrawArgs) -> ImrResult<()> {
        let texture = args.texture.clone().unwrap_or_else(|| self.white.clone());
        let stride = MeshVertex::FLOATS as u32;
        self.mesh_use_program(MESH_PROGRAM)?;
        self.set_texture(0, Some(&texture))?;
        self.vertex_attrib_pointer(AttribPointer {
            register: 0,
            components: 4,
            stride,
            offset: 0,
        })?;
        self.vertex_attrib_pointer(AttribPointer {
            register: 1,
            components: 4,
            stride,
            offset: 4,
        })?;
        self.push_meshes(
            bytemuck::cast_slice(&args.vertices),
            MeshVertex::FLOATS,
            &args.indices,
        )
    }
}
