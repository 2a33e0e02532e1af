use glam::{Vec2, Vec4};

use crate::error::ImrResult;
use crate::gpu::GpuBackend;
use crate::instancing::InstanceArgs;
use crate::utils::WHITE;
use crate::ImrContext;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineArgs {
    pub from: Vec2,
    pub to: Vec2,
    pub thickness: f32,
    pub color: Vec4,
}

impl Default for LineArgs {
    fn default() -> Self {
        Self {
            from: Vec2::ZERO,
            to: Vec2::ZERO,
            thickness: 1.0,
            color: WHITE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircleArgs {
    pub center: Vec2,
    pub radius: f32,
    pub thickness: f32,
    pub color: Vec4,
    pub segments: u32,
}

impl Default for CircleArgs {
    fn default() -> Self {
        Self {
            center: Vec2::ZERO,
            radius: 50.0,
            thickness: 1.0,
            color: WHITE,
            segments: 10,
        }
    }
}

impl<B: GpuBackend> ImrContext<B> {
    /// Opens an instancing context on the white texture for lines and circles.
    pub fn begin_primitives(&mut self) -> ImrResult<()> {
        self.begin_instancing(None)
    }

    /// A line is one white quad stretched from `from` to `to`, pivoted on
    /// the middle of its left edge.
    pub fn line(&mut self, args: &LineArgs) -> ImrResult<()> {
        let delta = args.to - args.from;
        self.instance(&InstanceArgs {
            sprite: None,
            position: args.from,
            scale: Vec2::new(delta.length(), args.thickness),
            rotation: delta.y.atan2(delta.x).to_degrees(),
            color: args.color,
            offset: Vec2::new(0.0, 0.5),
        })
    }

    /// Circle outline made of `segments` lines.
    pub fn circle(&mut self, args: &CircleArgs) -> ImrResult<()> {
        if args.segments == 0 {
            return Ok(());
        }
        let step = (360.0 / args.segments as f32).to_radians();
        let point = |i: u32| {
            let angle = step * i as f32;
            args.center + Vec2::new(angle.cos(), angle.sin()) * args.radius
        };
        for i in 0..args.segments {
            self.line(&LineArgs {
                from: point(i),
                to: point(i + 1),
                thickness: args.thickness,
                color: args.color,
            })?;
        }
        Ok(())
    }

    pub fn end_primitives(&mut self) -> ImrResult<()> {
        self.end_instancing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraOrigin;
    use crate::gpu::recording::{DrawKind, RecordingBackend};
    use crate::texture::RenderTarget;

    #[test]
    fn line_becomes_one_stretched_instance() {
        let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
        let target = RenderTarget::Backbuffer {
            width: 100,
            height: 100,
        };
        imr.begin_camera(&target, CameraOrigin::LeftTop).unwrap();
        imr.begin_primitives().unwrap();
        imr.line(&LineArgs {
            from: Vec2::new(10.0, 10.0),
            to: Vec2::new(10.0, 40.0),
            thickness: 2.0,
            ..Default::default()
        })
        .unwrap();
        imr.end_primitives().unwrap();
        imr.end_camera().unwrap();

        let draws = imr.backend().draws();
        assert_eq!(draws.len(), 1);
        let record = draws[0].instances()[0];
        assert_eq!(record.scale, [30.0, 2.0]);
        assert!((record.rotation - std::f32::consts::FRAC_PI_2).abs() < 1e-5);
        assert_eq!(record.offset, [0.0, 0.5]);
        assert_eq!(draws[0].textures[0], Some(imr.white_texture().id()));
    }

    #[test]
    fn circle_uses_one_instance_per_segment() {
        let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
        let target = RenderTarget::Backbuffer {
            width: 100,
            height: 100,
        };
        imr.begin_camera(&target, CameraOrigin::Center).unwrap();
        imr.begin_primitives().unwrap();
        imr.circle(&CircleArgs {
            segments: 12,
            ..Default::default()
        })
        .unwrap();
        imr.end_primitives().unwrap();
        imr.end_camera().unwrap();

        assert_eq!(
            imr.backend().draws()[0].kind,
            DrawKind::Instanced { count: 12 }
        );
    }
}
