use glam::{Mat4, Vec2, Vec4};
use log::trace;

use crate::error::{ImrError, ImrResult};
use crate::gpu::{BlendFunc, GpuBackend, Viewport};
use crate::sprite::DrawArgs;
use crate::texture::RenderTarget;
use crate::utils::Rectangle;
use crate::ImrContext;

const NEAR: f32 = 0.01;
const FAR: f32 = 1.0;

/// Where world (0, 0) lands on the target and which way Y grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraOrigin {
    #[default]
    Center,
    LeftTop,
    LeftBottom,
    LeftCenter,
}

impl CameraOrigin {
    pub fn projection(self, size: Vec2) -> Mat4 {
        let (w, h) = (size.x, size.y);
        let (hw, hh) = (w * 0.5, h * 0.5);
        match self {
            CameraOrigin::Center => Mat4::orthographic_lh(-hw, hw, hh, -hh, NEAR, FAR),
            CameraOrigin::LeftTop => Mat4::orthographic_lh(0.0, w, h, 0.0, NEAR, FAR),
            CameraOrigin::LeftBottom => Mat4::orthographic_lh(0.0, w, 0.0, -h, NEAR, FAR),
            CameraOrigin::LeftCenter => Mat4::orthographic_lh(0.0, w, hh, -hh, NEAR, FAR),
        }
    }
}

/// Camera rig placement. `rotation` is in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraArgs {
    pub position: Vec2,
    pub scale: Vec2,
    pub rotation: f32,
}

impl Default for CameraArgs {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            scale: Vec2::ONE,
            rotation: 0.0,
        }
    }
}

impl CameraArgs {
    /// World transform of the rig: scale, then rotation, then the pixel-snapped translation.
    pub fn transform(&self) -> Mat4 {
        Mat4::from_scale(self.scale.extend(1.0))
            * Mat4::from_rotation_z(self.rotation)
            * Mat4::from_translation(self.position.round().extend(0.0))
    }
}

#[derive(Debug)]
pub(crate) struct CameraState {
    pub(crate) target: RenderTarget,
    pub(crate) projection: Mat4,
    pub(crate) view: Mat4,
    pub(crate) world_rect: Rectangle,
    pub(crate) batching: bool,
    pub(crate) pending: Vec<DrawArgs>,
    // instancing, mesh and text depths when the camera began
    pub(crate) inner_floor: [usize; 3],
}

impl CameraState {
    fn screen_to_world(&self, screen: Vec2) -> Vec2 {
        let size = self.target.size();
        let ndc = 2.0 * (screen - size * 0.5) / size;
        let world = (self.projection * self.view).inverse() * Vec4::new(ndc.x, ndc.y, 0.0, 1.0);
        Vec2::new(world.x, world.y) / world.w
    }

    fn world_to_screen(&self, world: Vec2) -> Vec2 {
        let size = self.target.size();
        let clip = self.projection * self.view * Vec4::new(world.x, world.y, 0.0, 1.0);
        let ndc = Vec2::new(clip.x, clip.y) / clip.w;
        ndc * size * 0.5 + size * 0.5
    }

    fn refresh_world_rect(&mut self) {
        let size = self.target.size();
        let corners = [
            Vec2::ZERO,
            Vec2::new(size.x, 0.0),
            size,
            Vec2::new(0.0, size.y),
        ]
        .map(|c| self.screen_to_world(c));
        self.world_rect = Rectangle::bounding(&corners);
    }
}

impl<B: GpuBackend> ImrContext<B> {
    /// Opens a camera on `target`: binds it, pushes a full-target viewport and
    /// alpha blending, and resets the view.
    pub fn begin_camera(&mut self, target: &RenderTarget, origin: CameraOrigin) -> ImrResult<()> {
        let (width, height) = (target.width(), target.height());
        if width == 0 || height == 0 {
            return Err(ImrError::InvalidFrameBuffer { width, height });
        }
        self.backend.bind_target(target.target_id());

        let backend = &mut self.backend;
        self.viewports.push(
            Viewport {
                x: 0,
                y: 0,
                width: width as i32,
                height: height as i32,
            },
            |v| backend.set_viewport(*v),
        );
        backend.set_blend_enabled(true);
        self.blends
            .push(BlendFunc::ALPHA, |f| backend.set_blend_func(*f));
        self.blend_floors.push(self.blends.len());

        let inner_floor = self.inner_depths();
        self.cameras.push(CameraState {
            target: target.clone(),
            projection: origin.projection(target.size()),
            view: Mat4::IDENTITY,
            world_rect: Rectangle::default(),
            batching: false,
            pending: Vec::new(),
            inner_floor,
        });
        trace!("camera begin #{} on {:?}", self.cameras.len(), target.target_id());
        self.camera(CameraArgs::default())
    }

    /// Replaces the view of the current camera.
    pub fn camera(&mut self, args: CameraArgs) -> ImrResult<()> {
        let state = self.cameras.last_mut().ok_or(ImrError::NoCamera)?;
        state.view = args.transform().inverse();
        state.refresh_world_rect();
        Ok(())
    }

    pub fn clear(&mut self, color: Vec4) -> ImrResult<()> {
        if self.cameras.is_empty() {
            return Err(ImrError::NoCamera);
        }
        self.backend.clear(color);
        Ok(())
    }

    pub fn screen_to_world(&self, screen: Vec2) -> ImrResult<Vec2> {
        let state = self.cameras.last().ok_or(ImrError::NoCamera)?;
        Ok(state.screen_to_world(screen))
    }

    pub fn world_to_screen(&self, world: Vec2) -> ImrResult<Vec2> {
        let state = self.cameras.last().ok_or(ImrError::NoCamera)?;
        Ok(state.world_to_screen(world))
    }

    /// World-space bounds of everything the current camera can see.
    pub fn world_rect(&self) -> ImrResult<Rectangle> {
        let state = self.cameras.last().ok_or(ImrError::NoCamera)?;
        Ok(state.world_rect)
    }

    pub fn projection(&self) -> ImrResult<Mat4> {
        let state = self.cameras.last().ok_or(ImrError::NoCamera)?;
        Ok(state.projection)
    }

    pub fn view(&self) -> ImrResult<Mat4> {
        let state = self.cameras.last().ok_or(ImrError::NoCamera)?;
        Ok(state.view)
    }

    pub fn enable_depth_test(&mut self) {
        self.backend.set_depth_test(true);
    }

    pub fn disable_depth_test(&mut self) {
        self.backend.set_depth_test(false);
    }

    fn inner_depths(&self) -> [usize; 3] {
        [self.instancing.len(), self.meshes.len(), self.texts.len()]
    }

    /// Closes the current camera. A sprite batch still open or queued, or an
    /// instancing, mesh or text context begun inside the camera and not yet
    /// ended, is an error and leaves the camera in place.
    pub fn end_camera(&mut self) -> ImrResult<()> {
        let depths = self.inner_depths();
        let state = self.cameras.last().ok_or(ImrError::CameraNotBegun)?;
        if state.batching || !state.pending.is_empty() {
            return Err(ImrError::UnflushedBatch);
        }
        let open = ["instancing", "mesh", "text"]
            .into_iter()
            .zip(depths.into_iter().zip(state.inner_floor))
            .find(|(_, (depth, floor))| depth > floor);
        if let Some((context, _)) = open {
            return Err(ImrError::UnclosedContext(context));
        }
        let target = state.target.target_id();

        // pushes made inside the camera that were never popped go with it
        let floor = self.blend_floors.pop().unwrap_or(0);
        let backend = &mut self.backend;
        while self.blends.len() > floor {
            self.blends.pop(|f| backend.set_blend_func(*f));
        }
        self.blends.pop(|f| backend.set_blend_func(*f));
        self.viewports.pop(|v| backend.set_viewport(*v));
        self.cameras.pop();

        backend.unbind_target(target);
        if let Some(parent) = self.cameras.last() {
            backend.bind_target(parent.target.target_id());
        }
        trace!("camera end, {} still open", self.cameras.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn left_top_maps_origin_to_upper_left() {
        let p = CameraOrigin::LeftTop.projection(Vec2::new(800.0, 600.0));
        let ndc = p * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((ndc.x + 1.0).abs() < 1e-5);
        assert!((ndc.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn center_maps_origin_to_middle() {
        let p = CameraOrigin::Center.projection(Vec2::new(800.0, 600.0));
        let ndc = p * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
    }

    #[test]
    fn rig_translation_is_pixel_snapped() {
        let args = CameraArgs {
            position: Vec2::new(10.4, -3.6),
            ..Default::default()
        };
        let moved = args.transform() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_eq!((moved.x, moved.y), (10.0, -4.0));
    }
}
