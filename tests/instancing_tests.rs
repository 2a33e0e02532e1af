use glam::{Vec2, Vec4};
use plutonium_imr::camera::CameraOrigin;
use plutonium_imr::gpu::recording::{DrawKind, GpuCommand, RecordingBackend};
use plutonium_imr::gpu::{BufferTarget, BufferUsage};
use plutonium_imr::instancing::{InstanceArgs, InstanceRecord};
use plutonium_imr::program::{ProgramLayout, ProgramSource, INSTANCING_PROGRAM, TEXT_PROGRAM};
use plutonium_imr::texture::RenderTarget;
use plutonium_imr::{ImrConfig, ImrContext, ImrError};

fn context(config: ImrConfig) -> ImrContext<RecordingBackend> {
    let mut imr = ImrContext::new(RecordingBackend::new(), config).unwrap();
    let target = RenderTarget::Backbuffer {
        width: 320,
        height: 240,
    };
    imr.begin_camera(&target, CameraOrigin::LeftTop).unwrap();
    imr
}

#[test]
fn scratch_overflow_is_an_error() {
    let mut imr = context(ImrConfig {
        max_instances: 2,
        ..Default::default()
    });
    imr.begin_instancing(None).unwrap();
    imr.instance(&InstanceArgs::default()).unwrap();
    imr.instance(&InstanceArgs::default()).unwrap();
    assert_eq!(
        imr.instance(&InstanceArgs::default()),
        Err(ImrError::CapacityExceeded {
            requested: 3,
            capacity: 2
        })
    );
    imr.end_instancing().unwrap();
    assert_eq!(
        imr.backend().draws()[0].kind,
        DrawKind::Instanced { count: 2 }
    );
}

#[test]
fn nested_contexts_do_not_overwrite_the_parent() {
    let mut imr = context(ImrConfig::default());
    imr.begin_instancing(None).unwrap();
    imr.instance(&InstanceArgs::at(Vec2::new(1.0, 1.0))).unwrap();
    imr.instance(&InstanceArgs::at(Vec2::new(2.0, 2.0))).unwrap();

    imr.begin_instancing(None).unwrap();
    assert_eq!(imr.instancing_depth(), 2);
    imr.instance(&InstanceArgs::at(Vec2::new(9.0, 9.0))).unwrap();
    imr.end_instancing().unwrap();

    imr.instance(&InstanceArgs::at(Vec2::new(3.0, 3.0))).unwrap();
    imr.end_instancing().unwrap();

    let draws = imr.backend().draws();
    assert_eq!(draws.len(), 2);
    let inner: Vec<_> = draws[0].instances().iter().map(|r| r.translate).collect();
    let outer: Vec<_> = draws[1].instances().iter().map(|r| r.translate).collect();
    assert_eq!(inner, vec![[9.0, 9.0]]);
    assert_eq!(outer, vec![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]]);
}

#[test]
fn depth_is_capped() {
    let mut imr = context(ImrConfig {
        max_instancing_depth: 2,
        ..Default::default()
    });
    imr.begin_instancing(None).unwrap();
    imr.begin_instancing(None).unwrap();
    assert_eq!(
        imr.begin_instancing(None),
        Err(ImrError::InstancingTooDeep { max: 2 })
    );
    imr.end_instancing().unwrap();
    imr.end_instancing().unwrap();
    assert_eq!(imr.end_instancing(), Err(ImrError::InstancingNotBegun));
}

#[test]
fn record_layout_reaches_the_backend() {
    let mut imr = context(ImrConfig::default());
    let texture = imr.create_texture("t", 8, 4, &[255; 8 * 4 * 4]).unwrap();
    imr.begin_instancing(Some(&texture)).unwrap();
    imr.instance(&InstanceArgs {
        position: Vec2::new(5.0, 6.0),
        scale: Vec2::new(2.0, 3.0),
        rotation: 90.0,
        color: Vec4::new(1.0, 0.0, 0.0, 0.5),
        ..Default::default()
    })
    .unwrap();
    imr.end_instancing().unwrap();

    let draw = imr.backend().draws()[0].clone();
    let record: InstanceRecord = draw.instances()[0];
    assert_eq!(record.size, [8.0, 4.0]);
    assert!((record.rotation - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    assert_eq!(record.color, [1.0, 0.0, 0.0, 0.5]);
    assert_eq!(draw.attribs.len(), InstanceRecord::ATTRIB_COUNT as usize);
    assert!(draw
        .attribs
        .iter()
        .all(|a| a.per_instance && a.stride == InstanceRecord::SIZE as u32));
    assert_eq!(draw.textures[0], Some(texture.id()));
    let program = imr.program(INSTANCING_PROGRAM).unwrap();
    assert_eq!(draw.program, Some(program.id()));
    assert_eq!(draw.uniform_mat4(0), imr.projection().unwrap());
}

#[test]
fn empty_context_draws_nothing() {
    let mut imr = context(ImrConfig::default());
    imr.begin_instancing(None).unwrap();
    imr.end_instancing().unwrap();
    assert!(imr.backend().draws().is_empty());
}

#[test]
fn pushed_program_takes_over() {
    let mut imr = context(ImrConfig::default());
    let custom = imr
        .build_program(
            "tinted",
            &ProgramSource::new("tinted", "// test", ProgramLayout::instancing()),
        )
        .unwrap();
    imr.push_program("tinted").unwrap();
    imr.begin_instancing(None).unwrap();
    imr.instance(&InstanceArgs::default()).unwrap();
    imr.end_instancing().unwrap();
    imr.pop_program().unwrap();

    imr.push_program(TEXT_PROGRAM).unwrap();
    imr.pop_program().unwrap();
    assert_eq!(imr.backend().draws()[0].program, Some(custom.id()));
}

#[test]
fn scratch_buffers_are_reused_across_flushes() {
    let mut imr = context(ImrConfig::default());
    for _ in 0..5 {
        imr.begin_instancing(None).unwrap();
        for _ in 0..3 {
            imr.instance(&InstanceArgs::default()).unwrap();
        }
        imr.end_instancing().unwrap();
    }
    let created = imr.backend().count(|c| {
        matches!(
            c,
            GpuCommand::CreateBuffer {
                target: BufferTarget::Vertex,
                usage: BufferUsage::DynamicDraw,
                ..
            }
        )
    });
    assert_eq!(created, 1);
    assert_eq!(imr.backend().draws().len(), 5);
}

#[test]
fn instancing_outside_a_camera_fails_at_end() {
    let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
    imr.begin_instancing(None).unwrap();
    imr.instance(&InstanceArgs::default()).unwrap();
    assert_eq!(imr.end_instancing(), Err(ImrError::NoCamera));
    assert_eq!(imr.instancing_depth(), 0);
}
