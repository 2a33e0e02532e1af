use std::fs;
use std::path::Path;

use anyhow::Context;
use glam::{Vec2, Vec4};
use image::RgbaImage;
use plutonium_imr::camera::CameraOrigin;
use plutonium_imr::gpu::wgpu_backend::WgpuBackend;
use plutonium_imr::gpu::TargetId;
use plutonium_imr::logging::{init_logging, LoggingConfig};
use plutonium_imr::sprite::DrawArgs;
use plutonium_imr::texture::{RenderTarget, Texture};
use plutonium_imr::ImrContext;

const WIDTH: u32 = 512;
const HEIGHT: u32 = 512;
const BACKGROUND: Vec4 = Vec4::new(0.1, 0.2, 0.3, 1.0);

fn checkerboard(size: u32, cell: u32) -> Vec<u8> {
    let mut rgba = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let light = ((x / cell) + (y / cell)) % 2 == 0;
            // a red corner marks the texture's first row so flips show up
            let marked = x < cell && y < cell;
            let px = match (marked, light) {
                (true, _) => [255, 0, 0, 255],
                (false, true) => [230, 230, 230, 255],
                (false, false) => [40, 40, 40, 255],
            };
            rgba.extend_from_slice(&px);
        }
    }
    rgba
}

fn context() -> anyhow::Result<(ImrContext<WgpuBackend>, Texture)> {
    let backend = WgpuBackend::headless(WIDTH, HEIGHT)?;
    let mut imr = ImrContext::with_defaults(backend)?;
    let texture = imr.load_texture_rgba(&checkerboard(64, 8), 64, 64)?;
    Ok((imr, texture))
}

fn backbuffer() -> RenderTarget {
    RenderTarget::Backbuffer {
        width: WIDTH,
        height: HEIGHT,
    }
}

fn sprite(texture: &Texture, i: usize) -> DrawArgs {
    let column = (i % 6) as f32;
    let row = (i / 6) as f32;
    DrawArgs {
        position: Vec2::new(48.0 + column * 80.0, 48.0 + row * 80.0),
        rotation: 15.0 * i as f32,
        offset: Vec2::splat(0.5),
        color: Vec4::new(1.0, 1.0 - 0.03 * i as f32, 1.0, 1.0),
        ..DrawArgs::new(texture)
    }
}

fn read_back(imr: &ImrContext<WgpuBackend>) -> anyhow::Result<RgbaImage> {
    let (w, h, rgba) = imr.backend().read_target(TargetId::Backbuffer)?;
    RgbaImage::from_raw(w, h, rgba).context("readback size mismatch")
}

/// The same sprites through the try-batch path (one instanced draw) or one
/// quad draw at a time.
fn render_sprites(batched: bool) -> anyhow::Result<RgbaImage> {
    let (mut imr, texture) = context()?;
    imr.begin_camera(&backbuffer(), CameraOrigin::LeftTop)?;
    imr.clear(BACKGROUND)?;
    if batched {
        imr.begin_try_batch()?;
    }
    for i in 0..30 {
        let args = sprite(&texture, i);
        if batched {
            imr.draw(args)?;
        } else {
            imr.draw_single(&args)?;
        }
    }
    if batched {
        imr.end_try_batch()?;
    }
    imr.end_camera()?;
    read_back(&imr)
}

/// Draws the texture into a frame buffer, then the frame buffer's color onto
/// the backbuffer. Must match drawing the texture directly.
fn render_through_frame_buffer(direct: bool) -> anyhow::Result<RgbaImage> {
    let (mut imr, texture) = context()?;
    let fb = imr.create_frame_buffer(64, 64, 1)?;
    let source = if direct {
        texture.clone()
    } else {
        let target = RenderTarget::from(fb.clone());
        imr.begin_camera(&target, CameraOrigin::LeftTop)?;
        imr.clear(Vec4::ZERO)?;
        imr.draw_single(&DrawArgs::new(&texture))?;
        imr.end_camera()?;
        fb.color_texture(0).context("frame buffer without color")?
    };
    imr.begin_camera(&backbuffer(), CameraOrigin::LeftTop)?;
    imr.clear(BACKGROUND)?;
    imr.draw_single(&DrawArgs {
        position: Vec2::new(100.0, 100.0),
        scale: Vec2::splat(4.0),
        ..DrawArgs::new(&source)
    })?;
    imr.end_camera()?;
    read_back(&imr)
}

fn compare_with_tolerance(a: &RgbaImage, b: &RgbaImage, tolerance: u8) -> bool {
    if a.dimensions() != b.dimensions() {
        return false;
    }
    a.pixels().zip(b.pixels()).all(|(pa, pb)| {
        let da = pa.0;
        let db = pb.0;
        (0..4).all(|i| da[i].abs_diff(db[i]) <= tolerance)
    })
}

/// Saves under snapshots/actual and checks against snapshots/golden,
/// creating the golden image on first run.
fn snapshot(name: &str, image: &RgbaImage) -> anyhow::Result<()> {
    fs::create_dir_all("snapshots/actual")?;
    fs::create_dir_all("snapshots/golden")?;
    let actual = Path::new("snapshots/actual").join(format!("{name}.png"));
    let golden = Path::new("snapshots/golden").join(format!("{name}.png"));
    image.save(&actual)?;

    if !golden.exists() {
        fs::copy(&actual, &golden)?;
        println!("golden created at {}", golden.display());
        return Ok(());
    }
    let expected = image::open(&golden)
        .with_context(|| format!("decode {}", golden.display()))?
        .to_rgba8();
    if !compare_with_tolerance(image, &expected, 3) {
        anyhow::bail!("{name}: differs from {}", golden.display());
    }
    println!("{name}: ok");
    Ok(())
}

fn check_equal(name: &str, a: &RgbaImage, b: &RgbaImage) -> anyhow::Result<()> {
    if !compare_with_tolerance(a, b, 1) {
        anyhow::bail!("{name}: the two render paths disagree");
    }
    println!("{name}: paths agree");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_logging(LoggingConfig::default());

    let batched = render_sprites(true)?;
    let direct = render_sprites(false)?;
    check_equal("sprites_batched_vs_direct", &batched, &direct)?;
    snapshot("sprites", &batched)?;

    let through_fb = render_through_frame_buffer(false)?;
    let plain = render_through_frame_buffer(true)?;
    check_equal("frame_buffer_round_trip", &through_fb, &plain)?;
    snapshot("frame_buffer", &through_fb)?;
    Ok(())
}
