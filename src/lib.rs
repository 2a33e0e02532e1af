//! Immediate-mode 2D rendering on top of a pluggable GPU backend.
//!
//! Everything hangs off an [`ImrContext`]: camera, viewport, blend, program,
//! instancing, mesh and text stacks, the scratch buffer pool and the program
//! registry. Contexts nest strictly: open a camera, draw inside it, close it.
//!
//! ```no_run
//! use plutonium_imr::{ImrContext, camera::CameraOrigin, gpu::recording::RecordingBackend};
//! use plutonium_imr::texture::RenderTarget;
//!
//! let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
//! let target = RenderTarget::Backbuffer { width: 800, height: 600 };
//! imr.begin_camera(&target, CameraOrigin::LeftTop).unwrap();
//! imr.end_camera().unwrap();
//! ```

pub mod anim;
#[cfg(feature = "backend-wgpu")]
pub mod app;
pub mod atlas;
pub mod buffer_pool;
pub mod camera;
pub mod config;
pub mod error;
pub mod gpu;
pub mod instancing;
pub mod logging;
pub mod mesh;
pub mod primitive;
pub mod program;
pub mod sprite;
pub mod state_stack;
pub mod text;
pub mod texture;
pub mod utils;

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, warn};

pub use crate::config::ImrConfig;
pub use crate::error::{ImrError, ImrResult};

use crate::buffer_pool::BufferPool;
use crate::camera::CameraState;
use crate::gpu::{BlendFunc, GpuBackend, Viewport};
use crate::instancing::{InstanceScratch, InstancingState};
use crate::mesh::MeshState;
use crate::program::{Program, ProgramRegistry, ProgramSource};
use crate::state_stack::{BlendMode, StateStack};
use crate::text::TextState;
use crate::texture::{FrameBuffer, Release, ReleaseQueue, Texture};

/// The render context. Create one at startup, drive it from a single thread,
/// and destroy it (or drop it) at shutdown.
pub struct ImrContext<B: GpuBackend> {
    pub(crate) backend: B,
    pub(crate) config: ImrConfig,
    pub(crate) programs: ProgramRegistry,
    pub(crate) program_stack: StateStack<Rc<Program>>,
    pub(crate) cameras: Vec<CameraState>,
    pub(crate) viewports: StateStack<Viewport>,
    pub(crate) blends: StateStack<BlendFunc>,
    // blend stack depth owned by each open camera
    pub(crate) blend_floors: Vec<usize>,
    pub(crate) instancing: Vec<InstancingState>,
    pub(crate) scratch: InstanceScratch,
    pub(crate) meshes: Vec<MeshState>,
    pub(crate) texts: Vec<TextState>,
    pub(crate) pool: BufferPool,
    pub(crate) white: Texture,
    pub(crate) releases: ReleaseQueue,
    destroyed: bool,
}

impl<B: GpuBackend> ImrContext<B> {
    pub fn new(mut backend: B, config: ImrConfig) -> ImrResult<Self> {
        config.validate()?;
        let releases: ReleaseQueue = Rc::new(RefCell::new(Vec::new()));
        let white_id = backend.create_texture(1, 1, &[255, 255, 255, 255])?;
        let white = Texture::new(white_id, 1, 1, &config.white_texture_name, &releases);

        let mut ctx = Self {
            backend,
            scratch: InstanceScratch::new(config.max_instances),
            config,
            programs: ProgramRegistry::new(),
            program_stack: StateStack::new(),
            cameras: Vec::new(),
            viewports: StateStack::new(),
            blends: StateStack::new(),
            blend_floors: Vec::new(),
            instancing: Vec::new(),
            meshes: Vec::new(),
            texts: Vec::new(),
            pool: BufferPool::new(),
            white,
            releases,
            destroyed: false,
        };
        for (name, source) in program::builtin_sources() {
            ctx.build_program(name, &source)?;
        }
        debug!(
            "imr context ready: {} programs, {} instance slots",
            ctx.programs.len(),
            ctx.config.max_instances
        );
        Ok(ctx)
    }

    pub fn with_defaults(backend: B) -> ImrResult<Self> {
        Self::new(backend, ImrConfig::default())
    }

    /// Releases every GPU object the context owns. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if !self.cameras.is_empty() || !self.instancing.is_empty() || !self.meshes.is_empty() {
            warn!(
                "destroying imr context with open contexts: {} cameras, {} instancing, {} meshes",
                self.cameras.len(),
                self.instancing.len(),
                self.meshes.len()
            );
        }
        for (name, program) in self.programs.drain() {
            debug!("deleting program '{}'", name);
            self.backend.delete_program(program.id());
        }
        self.pool.destroy(&mut self.backend);
        self.collect_garbage();
        self.backend.delete_texture(self.white.id());
    }

    pub fn config(&self) -> &ImrConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    /// The 1×1 white texture used when a draw names no texture.
    pub fn white_texture(&self) -> &Texture {
        &self.white
    }

    /* RESOURCES */

    pub fn create_texture(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> ImrResult<Texture> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected || expected == 0 {
            return Err(ImrError::InvalidPixelData {
                len: rgba.len(),
                width,
                height,
                expected,
            });
        }
        let id = self.backend.create_texture(width, height, rgba)?;
        Ok(Texture::new(id, width, height, name, &self.releases))
    }

    pub fn load_texture_rgba(&mut self, rgba: &[u8], width: u32, height: u32) -> ImrResult<Texture> {
        self.create_texture("", width, height, rgba)
    }

    /// Decodes an image file into a texture. Rows are flipped so the bottom
    /// image row sits at V = 0.
    #[cfg(feature = "raster")]
    pub fn load_texture(&mut self, path: impl AsRef<std::path::Path>) -> ImrResult<Texture> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|e| ImrError::TextureLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let rgba = image.flipv().to_rgba8();
        let (width, height) = rgba.dimensions();
        self.create_texture(&path.display().to_string(), width, height, rgba.as_raw())
    }

    pub fn create_frame_buffer(
        &mut self,
        width: u32,
        height: u32,
        attachments: u32,
    ) -> ImrResult<FrameBuffer> {
        if width == 0 || height == 0 {
            return Err(ImrError::InvalidFrameBuffer { width, height });
        }
        let id = self
            .backend
            .create_frame_buffer(width, height, attachments.max(1))?;
        let mut colors = Vec::new();
        for index in 0..attachments.max(1) {
            let texture = self.backend.frame_buffer_texture(id, index).ok_or_else(|| {
                ImrError::Backend(format!("frame buffer {:?} has no attachment {index}", id))
            })?;
            colors.push(texture);
        }
        Ok(FrameBuffer::new(id, width, height, &colors, &self.releases))
    }

    /// Deletes GPU objects whose last handle was dropped. Returns how many.
    pub fn collect_garbage(&mut self) -> usize {
        let released: Vec<Release> = self.releases.borrow_mut().drain(..).collect();
        for release in &released {
            match *release {
                Release::Texture(id) => self.backend.delete_texture(id),
                Release::FrameBuffer(id) => self.backend.delete_frame_buffer(id),
            }
        }
        released.len()
    }

    /* PROGRAMS */

    pub fn register_program(&mut self, name: &str, program: Rc<Program>) -> ImrResult<()> {
        self.programs.register(name, program)
    }

    /// Builds `source` on the backend and registers it under `name`.
    pub fn build_program(&mut self, name: &str, source: &ProgramSource) -> ImrResult<Rc<Program>> {
        if self.programs.contains(name) {
            return Err(ImrError::ProgramAlreadyRegistered(name.to_string()));
        }
        let id = self.backend.create_program(source)?;
        let program = Rc::new(Program::new(id, source.layout.clone()));
        self.programs.register(name, program.clone())?;
        Ok(program)
    }

    /// Removes a program from the registry and deletes it on the GPU. A program
    /// still on the program stack or selected by an open mesh stays registered.
    pub fn unregister_program(&mut self, name: &str) -> ImrResult<()> {
        let program = self.programs.get(name)?;
        if self.program_stack.contains(&program) || self.meshes.iter().any(|m| m.uses(&program)) {
            return Err(ImrError::ProgramInUse(name.to_string()));
        }
        self.programs.unregister(name)?;
        self.backend.delete_program(program.id());
        Ok(())
    }

    pub fn program(&self, name: &str) -> ImrResult<Rc<Program>> {
        self.programs.get(name)
    }

    /// Selects a registered program for the instancing paths.
    pub fn push_program(&mut self, name: &str) -> ImrResult<()> {
        let program = self.programs.get(name)?;
        let backend = &mut self.backend;
        self.program_stack
            .push(program, |p| backend.use_program(p.id()));
        Ok(())
    }

    pub fn pop_program(&mut self) -> ImrResult<()> {
        if self.program_stack.is_empty() {
            return Err(ImrError::ProgramStackEmpty);
        }
        let backend = &mut self.backend;
        self.program_stack.pop(|p| backend.use_program(p.id()));
        Ok(())
    }

    /* BLEND */

    pub fn push_blend_mode(&mut self, mode: BlendMode) -> ImrResult<()> {
        if self.cameras.is_empty() {
            return Err(ImrError::NoCamera);
        }
        let backend = &mut self.backend;
        self.blends.push(mode.func(), |f| backend.set_blend_func(*f));
        Ok(())
    }

    pub fn push_additive_blend(&mut self) -> ImrResult<()> {
        self.push_blend_mode(BlendMode::Additive)
    }

    /// Pops a blend state pushed inside the current camera. The camera's own
    /// entry is never popped here.
    pub fn pop_blend(&mut self) -> ImrResult<()> {
        let floor = self.blend_floors.last().copied().unwrap_or(0);
        if self.blends.len() <= floor {
            return Err(ImrError::BlendStackUnderflow);
        }
        let backend = &mut self.backend;
        self.blends.pop(|f| backend.set_blend_func(*f));
        Ok(())
    }

    /* INTROSPECTION */

    pub fn camera_depth(&self) -> usize {
        self.cameras.len()
    }

    pub fn viewport_depth(&self) -> usize {
        self.viewports.len()
    }

    pub fn blend_depth(&self) -> usize {
        self.blends.len()
    }

    pub fn current_viewport(&self) -> Option<Viewport> {
        self.viewports.top().copied()
    }

    pub fn current_blend(&self) -> Option<BlendFunc> {
        self.blends.top().copied()
    }

    pub fn instancing_depth(&self) -> usize {
        self.instancing.len()
    }

    pub fn mesh_depth(&self) -> usize {
        self.meshes.len()
    }
}

impl<B: GpuBackend> Drop for ImrContext<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::recording::RecordingBackend;

    #[test]
    fn builtins_are_registered() {
        let imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
        for name in [
            program::INSTANCING_PROGRAM,
            program::TEXT_PROGRAM,
            program::SPRITE_PROGRAM,
            program::MESH_PROGRAM,
        ] {
            assert!(imr.program(name).is_ok(), "{name} missing");
        }
        assert_eq!(imr.backend().live_programs(), 4);
    }

    #[test]
    fn shader_failure_surfaces_at_startup() {
        let mut gpu = RecordingBackend::new();
        gpu.set_fail_shader_builds(true);
        assert!(matches!(
            ImrContext::with_defaults(gpu),
            Err(ImrError::ShaderBuild(_))
        ));
    }

    #[test]
    fn dropped_textures_are_collected() {
        let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
        let before = imr.backend().live_textures();
        let tex = imr.create_texture("t", 2, 2, &[0; 16]).unwrap();
        assert_eq!(imr.backend().live_textures(), before + 1);
        drop(tex);
        assert_eq!(imr.collect_garbage(), 1);
        assert_eq!(imr.backend().live_textures(), before);
    }

    #[test]
    fn color_texture_outlives_its_frame_buffer_handle() {
        let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
        let fb = imr.create_frame_buffer(16, 16, 1).unwrap();
        let color = fb.color_texture(0).unwrap();
        drop(fb);
        assert_eq!(imr.collect_garbage(), 0);
        assert_eq!(imr.backend().live_frame_buffers(), 1);
        drop(color);
        assert_eq!(imr.collect_garbage(), 1);
        assert_eq!(imr.backend().live_frame_buffers(), 0);
    }

    #[test]
    fn pixel_length_is_checked() {
        let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
        let err = imr.create_texture("bad", 2, 2, &[0; 15]).unwrap_err();
        assert_eq!(err.code(), 61);
    }

    #[test]
    fn destroy_releases_everything() {
        let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
        imr.destroy();
        assert_eq!(imr.backend().live_programs(), 0);
        assert_eq!(imr.backend().live_textures(), 0);
        imr.destroy();
    }

    #[test]
    fn program_stack_pop_on_empty_is_an_error() {
        let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
        assert_eq!(imr.pop_program(), Err(ImrError::ProgramStackEmpty));
        imr.push_program(program::TEXT_PROGRAM).unwrap();
        imr.pop_program().unwrap();
    }
}
