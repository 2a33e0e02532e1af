use std::sync::Arc;

use glam::Vec2;
use log::{error, info};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::Key,
    window::{Window, WindowId},
};

use crate::config::ImrConfig;
use crate::error::ImrResult;
use crate::gpu::wgpu_backend::WgpuBackend;
use crate::ImrContext;

pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Plutonium IMR".to_string(),
            width: 800,
            height: 600,
        }
    }
}

pub struct FrameContext {
    pub pressed_keys: Vec<Key>,
    pub mouse_position: Option<Vec2>,
    pub delta_time: f32,
    /// Backbuffer size in pixels.
    pub size: (u32, u32),
}

type FrameCallback = Box<dyn FnMut(&mut ImrContext<WgpuBackend>, &FrameContext) -> ImrResult<()>>;

pub struct ImrApp {
    window_config: WindowConfig,
    imr_config: ImrConfig,
    imr: Option<ImrContext<WgpuBackend>>,
    window: Option<Arc<Window>>,
    last_frame: std::time::Instant,
    frame_callback: FrameCallback,
    frame_context: FrameContext,
}

impl ImrApp {
    pub fn new<F>(window_config: WindowConfig, imr_config: ImrConfig, frame_callback: F) -> Self
    where
        F: FnMut(&mut ImrContext<WgpuBackend>, &FrameContext) -> ImrResult<()> + 'static,
    {
        let size = (window_config.width, window_config.height);
        Self {
            window_config,
            imr_config,
            imr: None,
            window: None,
            last_frame: std::time::Instant::now(),
            frame_callback: Box::new(frame_callback),
            frame_context: FrameContext {
                pressed_keys: Vec::new(),
                mouse_position: None,
                delta_time: 0.0,
                size,
            },
        }
    }

    pub fn imr(&mut self) -> Option<&mut ImrContext<WgpuBackend>> {
        self.imr.as_mut()
    }

    pub fn window(&self) -> Option<&Window> {
        self.window.as_deref()
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let attributes = Window::default_attributes()
            .with_title(&self.window_config.title)
            .with_inner_size(PhysicalSize::new(
                self.window_config.width,
                self.window_config.height,
            ));
        let window = Arc::new(event_loop.create_window(attributes)?);
        let size = window.inner_size();
        let surface = instance.create_surface(window.clone())?;
        let backend = WgpuBackend::with_surface(&instance, surface, size.width, size.height)?;
        let imr = ImrContext::new(backend, self.imr_config.clone())?;
        info!("window {}x{} ready", size.width, size.height);
        self.frame_context.size = (size.width, size.height);
        self.imr = Some(imr);
        self.window = Some(window);
        Ok(())
    }

    fn redraw(&mut self) -> ImrResult<()> {
        let Some(imr) = &mut self.imr else {
            return Ok(());
        };
        imr.backend_mut().begin_frame()?;
        let result = (self.frame_callback)(imr, &self.frame_context);
        imr.backend_mut().end_frame();
        imr.collect_garbage();
        result
    }
}

impl ApplicationHandler<()> for ImrApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.imr.is_some() {
            return;
        }
        if let Err(e) = self.start(event_loop) {
            error!("failed to start: {e:#}");
            event_loop.exit();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() {
                    self.frame_context.pressed_keys.push(event.logical_key);
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.frame_context.mouse_position =
                    Some(Vec2::new(position.x as f32, position.y as f32));
            }
            WindowEvent::RedrawRequested => {
                let now = std::time::Instant::now();
                self.frame_context.delta_time = (now - self.last_frame).as_secs_f32();
                self.last_frame = now;

                if let Err(e) = self.redraw() {
                    error!("frame skipped: {e}");
                }
                self.frame_context.pressed_keys.clear();
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            WindowEvent::Resized(new_size) => {
                self.frame_context.size = (new_size.width, new_size.height);
                if let Some(imr) = &mut self.imr {
                    imr.backend_mut().resize(new_size.width, new_size.height);
                }
            }
            WindowEvent::CloseRequested => {
                if let Some(mut imr) = self.imr.take() {
                    imr.destroy();
                }
                event_loop.exit();
            }
            _ => (),
        }
    }
}

/// Opens a window and calls `frame_callback` once per redraw with a live
/// context. Errors returned by the callback are logged and the frame is skipped.
pub fn run_app<F>(
    window_config: WindowConfig,
    imr_config: ImrConfig,
    frame_callback: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnMut(&mut ImrContext<WgpuBackend>, &FrameContext) -> ImrResult<()> + 'static,
{
    let event_loop = EventLoop::new()?;
    let mut app = ImrApp::new(window_config, imr_config, frame_callback);
    event_loop.run_app(&mut app)?;
    Ok(())
}
