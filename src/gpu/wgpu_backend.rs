//! [`GpuBackend`] on wgpu.
//!
//! GL-style sticky state (target, viewport, blend, program, texture slots) is
//! kept on the CPU and folded into a cached render pipeline at draw time.
//! Every draw is encoded into its own render pass and submitted right away,
//! so queue writes to pooled buffers always land before the draw that reads
//! them.
//!
//! Frame buffers render with clip-space Y negated (see `TargetInfo`), which
//! leaves texel row 0 at the bottom of the image, the same convention loaded
//! textures use.

use std::collections::HashMap;

use glam::Vec4;
use log::{debug, trace, warn};
use wgpu::util::DeviceExt;

use super::{
    BlendFactor, BlendFunc, BufferId, BufferTarget, BufferUsage, DrawCall, FrameBufferId,
    GpuBackend, ProgramId, TargetId, TextureId, VertexAttrib, Viewport, QUAD_INDICES,
    QUAD_VERTICES,
};
use crate::error::{ImrError, ImrResult};
use crate::program::ProgramSource;

pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8UnormSrgb;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const TEXTURE_SLOTS: usize = 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct TargetInfo {
    y_sign: f32,
    _pad: [f32; 3],
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct DepthTarget {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl DepthTarget {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("imr-depth"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
        }
    }
}

struct GpuFrameBuffer {
    width: u32,
    height: u32,
    colors: Vec<TextureId>,
    depth: DepthTarget,
}

struct GpuProgram {
    label: String,
    module: wgpu::ShaderModule,
    vs_entry: String,
    fs_entry: String,
    uniforms: Vec<u8>,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    capacity: usize,
}

/// Where the backbuffer lives: a window surface or an offscreen texture.
enum Backbuffer {
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
        frame: Option<(wgpu::SurfaceTexture, wgpu::TextureView)>,
    },
    Offscreen(GpuTexture),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum VertexLayoutKey {
    Quad,
    QuadInstanced(Vec<VertexAttrib>),
    Indexed(Vec<VertexAttrib>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    blend: Option<BlendFunc>,
    depth_test: bool,
    layout: VertexLayoutKey,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    backbuffer: Backbuffer,
    backbuffer_size: (u32, u32),
    backbuffer_depth: DepthTarget,

    textures: HashMap<TextureId, GpuTexture>,
    frame_buffers: HashMap<FrameBufferId, GpuFrameBuffer>,
    programs: HashMap<ProgramId, GpuProgram>,
    buffers: HashMap<BufferId, GpuBuffer>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    texture_groups: HashMap<[Option<TextureId>; TEXTURE_SLOTS], wgpu::BindGroup>,

    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    fallback: GpuTexture,
    quad_vertices: wgpu::Buffer,
    quad_indices: wgpu::Buffer,
    backbuffer_info: wgpu::Buffer,
    frame_buffer_info: wgpu::Buffer,

    target: TargetId,
    viewport: Viewport,
    blend_enabled: bool,
    blend: BlendFunc,
    depth_test: bool,
    program: Option<ProgramId>,
    slots: [Option<TextureId>; TEXTURE_SLOTS],
    next_id: u64,
}

fn request_device(
    instance: &wgpu::Instance,
    surface: Option<&wgpu::Surface<'static>>,
) -> ImrResult<(wgpu::Adapter, wgpu::Device, wgpu::Queue)> {
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::default(),
        force_fallback_adapter: false,
        compatible_surface: surface,
    }))
    .ok_or_else(|| ImrError::Backend("no suitable graphics adapter".to_string()))?;
    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("imr-device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
            memory_hints: Default::default(),
        },
        None,
    ))
    .map_err(|e| ImrError::Backend(format!("device request failed: {e}")))?;
    Ok((adapter, device, queue))
}

fn color_texture(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> GpuTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture { texture, view }
}

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcColor => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDstColor => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

fn blend_state(func: BlendFunc) -> wgpu::BlendState {
    let component = wgpu::BlendComponent {
        src_factor: blend_factor(func.src),
        dst_factor: blend_factor(func.dst),
        operation: wgpu::BlendOperation::Add,
    };
    wgpu::BlendState {
        color: component,
        alpha: component,
    }
}

fn vertex_format(components: u32) -> ImrResult<wgpu::VertexFormat> {
    match components {
        1 => Ok(wgpu::VertexFormat::Float32),
        2 => Ok(wgpu::VertexFormat::Float32x2),
        3 => Ok(wgpu::VertexFormat::Float32x3),
        4 => Ok(wgpu::VertexFormat::Float32x4),
        n => Err(ImrError::InvalidAttribLayout(format!(
            "{n} components per attribute"
        ))),
    }
}

fn attributes(attribs: &[VertexAttrib]) -> ImrResult<Vec<wgpu::VertexAttribute>> {
    attribs
        .iter()
        .map(|a| {
            Ok(wgpu::VertexAttribute {
                format: vertex_format(a.components)?,
                offset: a.offset as u64,
                shader_location: a.shader_location,
            })
        })
        .collect()
}

/// All attributes of one draw read from the same buffer, so they must agree on stride.
fn shared_stride(attribs: &[VertexAttrib]) -> ImrResult<u64> {
    let first = attribs
        .first()
        .ok_or_else(|| ImrError::InvalidAttribLayout("draw without attributes".to_string()))?;
    if attribs.iter().any(|a| a.stride != first.stride) {
        return Err(ImrError::InvalidAttribLayout(
            "attributes of one buffer disagree on stride".to_string(),
        ));
    }
    Ok(first.stride as u64)
}

/// wgpu rejects queue writes whose length is not a multiple of four.
fn padded(data: &[u8]) -> std::borrow::Cow<'_, [u8]> {
    let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
    if data.len() % align == 0 {
        return std::borrow::Cow::Borrowed(data);
    }
    let mut owned = data.to_vec();
    owned.resize(data.len().next_multiple_of(align), 0);
    std::borrow::Cow::Owned(owned)
}

impl WgpuBackend {
    /// Renders the backbuffer into an offscreen texture of the given size.
    pub fn headless(width: u32, height: u32) -> ImrResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let (_adapter, device, queue) = request_device(&instance, None)?;
        let target = color_texture(
            &device,
            "imr-backbuffer",
            width.max(1),
            height.max(1),
            COLOR_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        Ok(Self::from_parts(
            device,
            queue,
            Backbuffer::Offscreen(target),
            (width.max(1), height.max(1)),
        ))
    }

    /// Renders the backbuffer into a window surface.
    pub fn with_surface(
        instance: &wgpu::Instance,
        surface: wgpu::Surface<'static>,
        width: u32,
        height: u32,
    ) -> ImrResult<Self> {
        let (_adapter, device, queue) = request_device(instance, Some(&surface))?;
        let config = wgpu::SurfaceConfiguration {
            desired_maximum_frame_latency: 2,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![COLOR_FORMAT],
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: COLOR_FORMAT,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
        };
        surface.configure(&device, &config);
        Ok(Self::from_parts(
            device,
            queue,
            Backbuffer::Surface {
                surface,
                config,
                frame: None,
            },
            (width.max(1), height.max(1)),
        ))
    }

    fn from_parts(
        device: wgpu::Device,
        queue: wgpu::Queue,
        backbuffer: Backbuffer,
        size: (u32, u32),
    ) -> Self {
        let uniform_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("imr-uniform-layout"),
            entries: &[uniform_entry(0), uniform_entry(1)],
        });

        let mut texture_entries = Vec::with_capacity(TEXTURE_SLOTS * 2);
        for slot in 0..TEXTURE_SLOTS as u32 {
            texture_entries.push(wgpu::BindGroupLayoutEntry {
                binding: slot * 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                },
                count: None,
            });
            texture_entries.push(wgpu::BindGroupLayoutEntry {
                binding: slot * 2 + 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("imr-texture-layout"),
            entries: &texture_entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("imr-pipeline-layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("imr-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let fallback = color_texture(
            &device,
            "imr-fallback",
            1,
            1,
            wgpu::TextureFormat::Rgba8UnormSrgb,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &fallback.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255, 255, 255, 255],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        let quad_vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("imr-quad-vertices"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let quad_indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("imr-quad-indices"),
            contents: bytemuck::cast_slice(&QUAD_INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });
        let info = |label, y_sign| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::bytes_of(&TargetInfo {
                    y_sign,
                    _pad: [0.0; 3],
                }),
                usage: wgpu::BufferUsages::UNIFORM,
            })
        };
        let backbuffer_info = info("imr-backbuffer-info", 1.0);
        let frame_buffer_info = info("imr-frame-buffer-info", -1.0);
        let backbuffer_depth = DepthTarget::new(&device, size.0, size.1);

        Self {
            device,
            queue,
            backbuffer,
            backbuffer_size: size,
            backbuffer_depth,
            textures: HashMap::new(),
            frame_buffers: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            pipelines: HashMap::new(),
            texture_groups: HashMap::new(),
            uniform_layout,
            texture_layout,
            pipeline_layout,
            sampler,
            fallback,
            quad_vertices,
            quad_indices,
            backbuffer_info,
            frame_buffer_info,
            target: TargetId::Backbuffer,
            viewport: Viewport::default(),
            blend_enabled: false,
            blend: BlendFunc::ALPHA,
            depth_test: false,
            program: None,
            slots: [None; TEXTURE_SLOTS],
            next_id: 1,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn backbuffer_size(&self) -> (u32, u32) {
        self.backbuffer_size
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        match &mut self.backbuffer {
            Backbuffer::Surface {
                surface, config, ..
            } => {
                config.width = width;
                config.height = height;
                surface.configure(&self.device, config);
            }
            Backbuffer::Offscreen(target) => {
                *target = color_texture(
                    &self.device,
                    "imr-backbuffer",
                    width,
                    height,
                    COLOR_FORMAT,
                    wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                );
            }
        }
        self.backbuffer_size = (width, height);
        self.backbuffer_depth = DepthTarget::new(&self.device, width, height);
    }

    /// Acquires the next surface texture. A no-op for offscreen backbuffers.
    pub fn begin_frame(&mut self) -> ImrResult<()> {
        if let Backbuffer::Surface { surface, frame, .. } = &mut self.backbuffer {
            let texture = surface
                .get_current_texture()
                .map_err(|e| ImrError::Backend(format!("surface acquire failed: {e}")))?;
            let view = texture
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default());
            *frame = Some((texture, view));
        }
        Ok(())
    }

    pub fn end_frame(&mut self) {
        if let Backbuffer::Surface { frame, .. } = &mut self.backbuffer {
            if let Some((texture, _)) = frame.take() {
                texture.present();
            }
        }
    }

    /// Copies a target's first color attachment back to the CPU as RGBA rows,
    /// in texture memory order.
    pub fn read_target(&self, target: TargetId) -> ImrResult<(u32, u32, Vec<u8>)> {
        let texture = match target {
            TargetId::Backbuffer => match &self.backbuffer {
                Backbuffer::Offscreen(t) => &t.texture,
                Backbuffer::Surface { .. } => {
                    return Err(ImrError::Backend(
                        "surface backbuffers cannot be read back".to_string(),
                    ))
                }
            },
            TargetId::FrameBuffer(id) => {
                let fb = self.frame_buffers.get(&id).ok_or_else(|| {
                    ImrError::Backend(format!("unknown frame buffer {:?}", id))
                })?;
                let color = fb.colors.first().and_then(|c| self.textures.get(c));
                &color
                    .ok_or_else(|| ImrError::Backend("frame buffer has no color".to_string()))?
                    .texture
            }
        };
        let size = texture.size();
        let bytes_per_row = (size.width * 4).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let output = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("imr-readback"),
            size: bytes_per_row as u64 * size.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("imr-readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &output,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(size.height),
                },
            },
            wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = output.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            tx.send(r).ok();
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| ImrError::Backend(e.to_string()))?
            .map_err(|e| ImrError::Backend(format!("readback failed: {e}")))?;

        let bgra = texture.format() == COLOR_FORMAT;
        let view = slice.get_mapped_range();
        let mut rgba = Vec::with_capacity((size.width * size.height * 4) as usize);
        for row in view.chunks(bytes_per_row as usize) {
            let row = &row[..(size.width * 4) as usize];
            if bgra {
                for px in row.chunks_exact(4) {
                    rgba.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
                }
            } else {
                rgba.extend_from_slice(row);
            }
        }
        drop(view);
        output.unmap();
        Ok((size.width, size.height, rgba))
    }

    fn target_size(&self, target: TargetId) -> (u32, u32) {
        match target {
            TargetId::Backbuffer => self.backbuffer_size,
            TargetId::FrameBuffer(id) => self
                .frame_buffers
                .get(&id)
                .map_or((0, 0), |fb| (fb.width, fb.height)),
        }
    }

    fn color_views(&self, target: TargetId) -> ImrResult<Vec<&wgpu::TextureView>> {
        match target {
            TargetId::Backbuffer => match &self.backbuffer {
                Backbuffer::Offscreen(t) => Ok(vec![&t.view]),
                Backbuffer::Surface { frame, .. } => frame
                    .as_ref()
                    .map(|(_, view)| vec![view])
                    .ok_or_else(|| ImrError::Backend("no frame in flight".to_string())),
            },
            TargetId::FrameBuffer(id) => {
                let fb = self
                    .frame_buffers
                    .get(&id)
                    .ok_or_else(|| ImrError::Backend(format!("unknown frame buffer {:?}", id)))?;
                Ok(fb
                    .colors
                    .iter()
                    .filter_map(|c| self.textures.get(c))
                    .map(|t| &t.view)
                    .collect())
            }
        }
    }

    fn depth_view(&self, target: TargetId) -> &wgpu::TextureView {
        match target {
            TargetId::FrameBuffer(id) => match self.frame_buffers.get(&id) {
                Some(fb) => &fb.depth.view,
                None => &self.backbuffer_depth.view,
            },
            TargetId::Backbuffer => &self.backbuffer_depth.view,
        }
    }

    /// Pixel rect of the current viewport in wgpu's top-left convention,
    /// clamped to the target. `None` when nothing would be visible.
    fn pass_viewport(&self) -> Option<[f32; 4]> {
        let (tw, th) = self.target_size(self.target);
        let v = self.viewport;
        let y = match self.target {
            TargetId::Backbuffer => th as i32 - v.y - v.height,
            TargetId::FrameBuffer(_) => v.y,
        };
        let x0 = v.x.clamp(0, tw as i32);
        let y0 = y.clamp(0, th as i32);
        let x1 = (v.x + v.width).clamp(0, tw as i32);
        let y1 = (y + v.height).clamp(0, th as i32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some([x0 as f32, y0 as f32, (x1 - x0) as f32, (y1 - y0) as f32])
    }

    fn build_pipeline(&self, key: &PipelineKey) -> ImrResult<wgpu::RenderPipeline> {
        let program = self
            .programs
            .get(&key.program)
            .ok_or_else(|| ImrError::Backend(format!("unknown program {:?}", key.program)))?;
        let quad_attribs = wgpu::vertex_attr_array![0 => Float32x3];
        let quad_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 3]>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &quad_attribs,
        };
        let extra_attribs;
        let buffers = match &key.layout {
            VertexLayoutKey::Quad => vec![quad_layout],
            VertexLayoutKey::QuadInstanced(attribs) => {
                extra_attribs = attributes(attribs)?;
                vec![
                    quad_layout,
                    wgpu::VertexBufferLayout {
                        array_stride: shared_stride(attribs)?,
                        step_mode: wgpu::VertexStepMode::Instance,
                        attributes: &extra_attribs,
                    },
                ]
            }
            VertexLayoutKey::Indexed(attribs) => {
                extra_attribs = attributes(attribs)?;
                vec![wgpu::VertexBufferLayout {
                    array_stride: shared_stride(attribs)?,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &extra_attribs,
                }]
            }
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(program.label.as_str()),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &program.module,
                    entry_point: Some(program.vs_entry.as_str()),
                    buffers: &buffers,
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.module,
                    entry_point: Some(program.fs_entry.as_str()),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: key.blend.map(blend_state),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: key.depth_test,
                    depth_compare: if key.depth_test {
                        wgpu::CompareFunction::LessEqual
                    } else {
                        wgpu::CompareFunction::Always
                    },
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(ImrError::Backend(format!(
                "pipeline for '{}' rejected: {err}",
                program.label
            )));
        }
        debug!("built pipeline for '{}' ({:?})", program.label, key.blend);
        Ok(pipeline)
    }

    fn texture_group(&self, slots: &[Option<TextureId>; TEXTURE_SLOTS]) -> wgpu::BindGroup {
        let views: Vec<&wgpu::TextureView> = slots
            .iter()
            .map(|slot| {
                slot.and_then(|id| self.textures.get(&id))
                    .map_or(&self.fallback.view, |t| &t.view)
            })
            .collect();
        let mut entries = Vec::with_capacity(TEXTURE_SLOTS * 2);
        for (slot, view) in views.into_iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: slot as u32 * 2,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: slot as u32 * 2 + 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
        }
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("imr-textures"),
            layout: &self.texture_layout,
            entries: &entries,
        })
    }

    fn buffer(&self, id: BufferId) -> ImrResult<&wgpu::Buffer> {
        self.buffers
            .get(&id)
            .map(|b| &b.buffer)
            .ok_or_else(|| ImrError::Backend(format!("unknown buffer {:?}", id)))
    }
}

impl GpuBackend for WgpuBackend {
    fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> ImrResult<TextureId> {
        if width == 0 || height == 0 {
            return Err(ImrError::Backend("zero-sized texture".to_string()));
        }
        let texture = color_texture(
            &self.device,
            "imr-texture",
            width,
            height,
            wgpu::TextureFormat::Rgba8UnormSrgb,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        let id = TextureId(self.next_id());
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
        self.texture_groups
            .retain(|slots, _| !slots.contains(&Some(texture)));
        for slot in self.slots.iter_mut() {
            if *slot == Some(texture) {
                *slot = None;
            }
        }
    }

    fn create_frame_buffer(
        &mut self,
        width: u32,
        height: u32,
        attachments: u32,
    ) -> ImrResult<FrameBufferId> {
        if width == 0 || height == 0 {
            return Err(ImrError::InvalidFrameBuffer { width, height });
        }
        let mut colors = Vec::with_capacity(attachments as usize);
        for _ in 0..attachments.max(1) {
            let texture = color_texture(
                &self.device,
                "imr-frame-buffer-color",
                width,
                height,
                COLOR_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
            );
            let id = TextureId(self.next_id());
            self.textures.insert(id, texture);
            colors.push(id);
        }
        let id = FrameBufferId(self.next_id());
        self.frame_buffers.insert(
            id,
            GpuFrameBuffer {
                width,
                height,
                colors,
                depth: DepthTarget::new(&self.device, width, height),
            },
        );
        Ok(id)
    }

    fn frame_buffer_texture(&self, frame_buffer: FrameBufferId, index: u32) -> Option<TextureId> {
        self.frame_buffers
            .get(&frame_buffer)?
            .colors
            .get(index as usize)
            .copied()
    }

    fn delete_frame_buffer(&mut self, frame_buffer: FrameBufferId) {
        if let Some(fb) = self.frame_buffers.remove(&frame_buffer) {
            for color in fb.colors {
                self.delete_texture(color);
            }
        }
        if self.target == TargetId::FrameBuffer(frame_buffer) {
            self.target = TargetId::Backbuffer;
        }
    }

    fn create_program(&mut self, source: &ProgramSource) -> ImrResult<ProgramId> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(source.label.as_str()),
                source: wgpu::ShaderSource::Wgsl(source.wgsl.clone()),
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(ImrError::ShaderBuild(format!("{}: {err}", source.label)));
        }
        // uniform buffers must be non-empty and 16-byte sized
        let block = (source.layout.uniform_block_size.max(16) as usize).next_multiple_of(16);
        let id = ProgramId(self.next_id());
        self.programs.insert(
            id,
            GpuProgram {
                label: source.label.clone(),
                module,
                vs_entry: source.vs_entry.clone(),
                fs_entry: source.fs_entry.clone(),
                uniforms: vec![0; block],
            },
        );
        debug!("program '{}' built as {:?}", source.label, id);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        self.pipelines.retain(|key, _| key.program != program);
        if self.program == Some(program) {
            self.program = None;
        }
    }

    fn create_buffer(
        &mut self,
        capacity: usize,
        target: BufferTarget,
        usage: BufferUsage,
    ) -> ImrResult<BufferId> {
        let kind = match target {
            BufferTarget::Vertex => wgpu::BufferUsages::VERTEX,
            BufferTarget::Index => wgpu::BufferUsages::INDEX,
        };
        let size = (capacity as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(match usage {
                BufferUsage::StaticDraw => "imr-static-buffer",
                BufferUsage::DynamicDraw => "imr-dynamic-buffer",
            }),
            size,
            usage: kind | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let id = BufferId(self.next_id());
        self.buffers.insert(
            id,
            GpuBuffer {
                buffer,
                capacity: size as usize,
            },
        );
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: usize, data: &[u8]) {
        let Some(gpu) = self.buffers.get(&buffer) else {
            warn!("write to unknown buffer {:?}", buffer);
            return;
        };
        let data = padded(data);
        if offset + data.len() > gpu.capacity {
            warn!(
                "write of {} bytes at {} overflows buffer {:?} ({} bytes)",
                data.len(),
                offset,
                buffer,
                gpu.capacity
            );
            return;
        }
        self.queue.write_buffer(&gpu.buffer, offset as u64, &data);
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if let Some(gpu) = self.buffers.remove(&buffer) {
            gpu.buffer.destroy();
        }
    }

    fn bind_target(&mut self, target: TargetId) {
        self.target = target;
    }

    fn unbind_target(&mut self, _target: TargetId) {
        self.target = TargetId::Backbuffer;
    }

    fn clear(&mut self, color: Vec4) {
        let views = match self.color_views(self.target) {
            Ok(views) => views,
            Err(e) => {
                warn!("clear skipped: {e}");
                return;
            }
        };
        let clear = wgpu::Color {
            r: color.x as f64,
            g: color.y as f64,
            b: color.z as f64,
            a: color.w as f64,
        };
        let attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = views
            .into_iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear),
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("imr-clear"),
            });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("imr-clear"),
            color_attachments: &attachments,
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: self.depth_view(self.target),
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.queue.submit(Some(encoder.finish()));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn set_blend_enabled(&mut self, enabled: bool) {
        self.blend_enabled = enabled;
    }

    fn set_blend_func(&mut self, blend: BlendFunc) {
        self.blend = blend;
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.depth_test = enabled;
    }

    fn use_program(&mut self, program: ProgramId) {
        self.program = Some(program);
    }

    fn set_uniform(&mut self, offset: u32, data: &[u8]) {
        let Some(program) = self.program.and_then(|id| self.programs.get_mut(&id)) else {
            warn!("uniform write with no program in use");
            return;
        };
        let start = offset as usize;
        let Some(dst) = program.uniforms.get_mut(start..start + data.len()) else {
            warn!(
                "uniform write of {} bytes at {} overflows '{}'",
                data.len(),
                offset,
                program.label
            );
            return;
        };
        dst.copy_from_slice(data);
    }

    fn bind_texture(&mut self, slot: u32, texture: Option<TextureId>) {
        if let Some(s) = self.slots.get_mut(slot as usize) {
            *s = texture;
        }
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> ImrResult<()> {
        let program_id = self
            .program
            .ok_or_else(|| ImrError::Backend("draw with no program in use".to_string()))?;
        let Some(viewport) = self.pass_viewport() else {
            trace!("draw outside the target, skipped");
            return Ok(());
        };
        let layout = match call {
            DrawCall::Quad => VertexLayoutKey::Quad,
            DrawCall::InstancedQuad { attribs, .. } => {
                VertexLayoutKey::QuadInstanced(attribs.to_vec())
            }
            DrawCall::Indexed { attribs, .. } => VertexLayoutKey::Indexed(attribs.to_vec()),
        };
        let key = PipelineKey {
            program: program_id,
            blend: self.blend_enabled.then_some(self.blend),
            depth_test: self.depth_test,
            layout,
        };
        if !self.pipelines.contains_key(&key) {
            let pipeline = self.build_pipeline(&key)?;
            self.pipelines.insert(key.clone(), pipeline);
        }
        if !self.texture_groups.contains_key(&self.slots) {
            let group = self.texture_group(&self.slots);
            self.texture_groups.insert(self.slots, group);
        }

        let program = self
            .programs
            .get(&program_id)
            .ok_or_else(|| ImrError::Backend(format!("unknown program {:?}", program_id)))?;
        let uniforms = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("imr-draw-uniforms"),
                contents: &program.uniforms,
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let info = match self.target {
            TargetId::Backbuffer => &self.backbuffer_info,
            TargetId::FrameBuffer(_) => &self.frame_buffer_info,
        };
        let uniform_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("imr-draw-uniforms"),
            layout: &self.uniform_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: info.as_entire_binding(),
                },
            ],
        });

        let views = self.color_views(self.target)?;
        let color = views
            .first()
            .copied()
            .ok_or_else(|| ImrError::Backend("target has no color attachment".to_string()))?;
        let (pipeline, textures) = match (
            self.pipelines.get(&key),
            self.texture_groups.get(&self.slots),
        ) {
            (Some(p), Some(t)) => (p, t),
            _ => return Err(ImrError::Backend("pipeline cache miss".to_string())),
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("imr-draw"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("imr-draw"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: self.depth_view(self.target),
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            let [x, y, w, h] = viewport;
            pass.set_viewport(x, y, w, h, 0.0, 1.0);
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &uniform_group, &[]);
            pass.set_bind_group(1, textures, &[]);
            match call {
                DrawCall::Quad => {
                    pass.set_vertex_buffer(0, self.quad_vertices.slice(..));
                    pass.set_index_buffer(self.quad_indices.slice(..), wgpu::IndexFormat::Uint16);
                    pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..1);
                }
                DrawCall::InstancedQuad {
                    instances, count, ..
                } => {
                    pass.set_vertex_buffer(0, self.quad_vertices.slice(..));
                    pass.set_vertex_buffer(1, self.buffer(*instances)?.slice(..));
                    pass.set_index_buffer(self.quad_indices.slice(..), wgpu::IndexFormat::Uint16);
                    pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..*count);
                }
                DrawCall::Indexed {
                    vertices,
                    indices,
                    index_count,
                    ..
                } => {
                    pass.set_vertex_buffer(0, self.buffer(*vertices)?.slice(..));
                    pass.set_index_buffer(
                        self.buffer(*indices)?.slice(..),
                        wgpu::IndexFormat::Uint16,
                    );
                    pass.draw_indexed(0..*index_count, 0, 0..1);
                }
            }
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}
