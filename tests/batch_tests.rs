use glam::Vec2;
use plutonium_imr::atlas::Atlas;
use plutonium_imr::camera::CameraOrigin;
use plutonium_imr::gpu::recording::{DrawKind, RecordingBackend};
use plutonium_imr::sprite::{DrawArgs, SpriteUniforms};
use plutonium_imr::texture::{RenderTarget, Texture};
use plutonium_imr::{ImrConfig, ImrContext, ImrError};

fn setup() -> (ImrContext<RecordingBackend>, Texture, Texture) {
    let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
    let a = imr.create_texture("a", 256, 256, &vec![255; 256 * 256 * 4]).unwrap();
    let b = imr.create_texture("b", 16, 16, &[255; 16 * 16 * 4]).unwrap();
    let target = RenderTarget::Backbuffer {
        width: 640,
        height: 480,
    };
    imr.begin_camera(&target, CameraOrigin::LeftTop).unwrap();
    (imr, a, b)
}

fn sprites(texture: &Texture) -> Vec<DrawArgs> {
    let mut atlas = Atlas::new(texture.clone());
    let hero = atlas.add_sprite(
        "hero",
        Vec2::new(64.0, 0.0),
        Vec2::new(32.0, 48.0),
        Vec2::new(0.5, 0.5),
    );
    vec![
        DrawArgs {
            position: Vec2::new(100.0, 80.0),
            scale: Vec2::new(2.0, 1.0),
            rotation: 30.0,
            offset: Vec2::new(0.1, 0.0),
            ..DrawArgs::with_sprite(texture, hero)
        },
        DrawArgs {
            position: Vec2::new(300.5, 200.25),
            rotation: -45.0,
            ..DrawArgs::new(texture)
        },
    ]
}

#[test]
fn batched_and_direct_place_the_same_corners() {
    let (mut imr, a, _) = setup();
    let draws = sprites(&a);

    imr.begin_try_batch().unwrap();
    for args in &draws {
        imr.draw(args.clone()).unwrap();
    }
    imr.end_try_batch().unwrap();
    for args in &draws {
        imr.draw_single(args).unwrap();
    }
    imr.end_camera().unwrap();

    let records = imr.backend().draws();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].kind, DrawKind::Instanced { count: 2 });
    let instances = records[0].instances();
    for (i, direct) in records[1..].iter().enumerate() {
        assert_eq!(direct.kind, DrawKind::Quad);
        let uniforms = SpriteUniforms::from_bytes(&direct.uniforms);
        assert_eq!(instances[i].world_corners(), uniforms.corners(), "sprite {i}");
        assert_eq!(instances[i].uv, uniforms.uv);
        assert_eq!(instances[i].color, uniforms.color);
    }
    assert_eq!(records[0].textures[0], Some(a.id()));
}

#[test]
fn alternating_textures_flush_twice() {
    let (mut imr, a, b) = setup();
    imr.begin_try_batch().unwrap();
    imr.draw(DrawArgs::new(&a)).unwrap();
    imr.draw(DrawArgs::new(&b)).unwrap();
    imr.draw(DrawArgs::new(&a)).unwrap();

    let flushed = imr.backend().draws();
    assert_eq!(flushed.len(), 2);
    assert!(flushed.iter().all(|d| d.kind == DrawKind::Quad));
    assert_eq!(flushed[0].textures[0], Some(a.id()));
    assert_eq!(flushed[1].textures[0], Some(b.id()));
    assert_eq!(imr.pending_draws(), 1);

    imr.end_try_batch().unwrap();
    assert_eq!(imr.backend().draws().len(), 3);
    assert_eq!(imr.pending_draws(), 0);
    imr.end_camera().unwrap();
}

#[test]
fn same_texture_run_is_one_instanced_draw() {
    let (mut imr, a, _) = setup();
    imr.begin_try_batch().unwrap();
    for i in 0..10 {
        imr.draw(DrawArgs {
            position: Vec2::new(i as f32 * 10.0, 0.0),
            ..DrawArgs::new(&a)
        })
        .unwrap();
    }
    assert!(imr.backend().draws().is_empty());
    imr.end_try_batch().unwrap();
    imr.end_camera().unwrap();

    let draws = imr.backend().draws();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].kind, DrawKind::Instanced { count: 10 });
    assert_eq!(draws[0].instances()[9].translate, [90.0, 0.0]);
}

#[test]
fn batch_protocol_errors() {
    let (mut imr, a, _) = setup();
    assert_eq!(imr.end_try_batch(), Err(ImrError::BatchNotStarted));
    imr.begin_try_batch().unwrap();
    imr.draw(DrawArgs::new(&a)).unwrap();
    imr.end_try_batch().unwrap();
    imr.end_camera().unwrap();

    assert_eq!(imr.begin_try_batch(), Err(ImrError::NoCamera));
    assert_eq!(imr.draw(DrawArgs::new(&a)), Err(ImrError::NoCamera));
}

#[test]
fn untextured_draw_uses_the_white_texture() {
    let (mut imr, _, _) = setup();
    imr.draw(DrawArgs::default()).unwrap();
    imr.end_camera().unwrap();
    let white = imr.white_texture().id();
    assert_eq!(imr.backend().draws()[0].textures[0], Some(white));
}

#[test]
fn long_runs_split_at_scratch_capacity() {
    let config = ImrConfig {
        max_instances: 2,
        ..Default::default()
    };
    let mut imr = ImrContext::new(RecordingBackend::new(), config).unwrap();
    let texture = imr.create_texture("t", 4, 4, &[255; 64]).unwrap();
    let target = RenderTarget::Backbuffer {
        width: 64,
        height: 64,
    };
    imr.begin_camera(&target, CameraOrigin::LeftTop).unwrap();
    imr.begin_try_batch().unwrap();
    for i in 0..5 {
        imr.draw(DrawArgs {
            position: Vec2::splat(i as f32),
            ..DrawArgs::new(&texture)
        })
        .unwrap();
        assert!(imr.pending_draws() < 2);
    }
    imr.end_try_batch().unwrap();
    imr.end_camera().unwrap();

    let kinds: Vec<DrawKind> = imr.backend().draws().iter().map(|d| d.kind).collect();
    assert_eq!(
        kinds,
        vec![
            DrawKind::Instanced { count: 2 },
            DrawKind::Instanced { count: 2 },
            DrawKind::Quad,
        ]
    );
}
