use glam::{Mat4, Vec2, Vec4};
use plutonium_imr::camera::CameraOrigin;
use plutonium_imr::gpu::recording::{DrawKind, RecordingBackend};
use plutonium_imr::gpu::BlendFunc;
use plutonium_imr::mesh::{AttribPointer, MeshDrawArgs, MeshVertex};
use plutonium_imr::program::MESH_PROGRAM;
use plutonium_imr::state_stack::BlendMode;
use plutonium_imr::texture::RenderTarget;
use plutonium_imr::{ImrContext, ImrError};

fn context() -> ImrContext<RecordingBackend> {
    let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
    let target = RenderTarget::Backbuffer {
        width: 200,
        height: 100,
    };
    imr.begin_camera(&target, CameraOrigin::Center).unwrap();
    imr
}

fn quad_floats(n: usize) -> Vec<f32> {
    (0..n * MeshVertex::FLOATS).map(|i| i as f32).collect()
}

#[test]
fn second_push_is_rebased_past_the_first() {
    let mut imr = context();
    let white = imr.white_texture().clone();
    imr.begin_mesh();
    imr.mesh_use_program(MESH_PROGRAM).unwrap();
    imr.set_texture(0, Some(&white)).unwrap();
    imr.vertex_attrib_pointer(AttribPointer {
        register: 0,
        components: 4,
        stride: 8,
        offset: 0,
    })
    .unwrap();
    imr.push_meshes(&quad_floats(4), MeshVertex::FLOATS, &[0, 1, 2, 2, 3, 0])
        .unwrap();
    imr.push_meshes(&quad_floats(3), MeshVertex::FLOATS, &[0, 1, 2])
        .unwrap();
    imr.end_mesh().unwrap();
    imr.end_camera().unwrap();

    let draws = imr.backend().draws();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].kind, DrawKind::Indexed { index_count: 9 });
    assert_eq!(draws[0].indices(), vec![0, 1, 2, 2, 3, 0, 4, 5, 6]);
    assert_eq!(draws[0].attribs[0].stride, 32);
    assert_eq!(imr.mesh_depth(), 0);
}

#[test]
fn projection_and_view_land_in_the_uniform_block() {
    let mut imr = context();
    let white = imr.white_texture().clone();
    imr.begin_mesh();
    imr.mesh_use_program(MESH_PROGRAM).unwrap();
    imr.set_texture(0, Some(&white)).unwrap();
    imr.push_meshes(&quad_floats(3), MeshVertex::FLOATS, &[0, 1, 2])
        .unwrap();
    imr.end_mesh().unwrap();

    let record = imr.backend().draws()[0].clone();
    assert_eq!(record.uniform_mat4(0), imr.projection().unwrap());
    assert_eq!(record.uniform_mat4(64), imr.view().unwrap());
    imr.end_camera().unwrap();
}

#[test]
fn explicit_uniforms_replace_the_camera_matrices() {
    let mut imr = context();
    let white = imr.white_texture().clone();
    let custom = Mat4::from_scale(glam::Vec3::splat(3.0));
    imr.begin_mesh();
    imr.mesh_use_program(MESH_PROGRAM).unwrap();
    imr.set_use_projection_view(false).unwrap();
    imr.set_uniform_mat4(0, &[custom, Mat4::IDENTITY]).unwrap();
    imr.set_texture(0, Some(&white)).unwrap();
    imr.push_meshes(&quad_floats(3), MeshVertex::FLOATS, &[0, 1, 2])
        .unwrap();
    imr.end_mesh().unwrap();
    imr.end_camera().unwrap();

    let record = imr.backend().draws()[0].clone();
    assert_eq!(record.uniform_mat4(0), custom);
    assert_eq!(record.uniform_mat4(64), Mat4::IDENTITY);
}

#[test]
fn missing_texture_fails_and_still_pops() {
    let mut imr = context();
    imr.begin_mesh();
    imr.mesh_use_program(MESH_PROGRAM).unwrap();
    imr.set_texture(1, None).unwrap();
    imr.push_meshes(&quad_floats(3), MeshVertex::FLOATS, &[0, 1, 2])
        .unwrap();
    assert_eq!(imr.end_mesh(), Err(ImrError::MissingTexture { slot: 1 }));
    assert_eq!(imr.mesh_depth(), 0);
    assert!(imr.backend().draws().is_empty());
    imr.end_camera().unwrap();
}

#[test]
fn mesh_protocol_errors() {
    let mut imr = context();
    assert_eq!(imr.end_mesh(), Err(ImrError::MeshNotBegun));
    assert_eq!(
        imr.mesh_use_program(MESH_PROGRAM),
        Err(ImrError::MeshNotBegun)
    );
    imr.begin_mesh();
    assert!(matches!(
        imr.mesh_use_program("nope"),
        Err(ImrError::ProgramNotRegistered(_))
    ));
    assert_eq!(
        imr.set_uniform_vec4(0, &[Vec4::ONE]),
        Err(ImrError::NoMeshProgram)
    );
    assert_eq!(
        imr.push_meshes(&[0.0; 7], 8, &[0]),
        Err(ImrError::InvalidVertexStride { len: 7, stride: 8 })
    );
    assert_eq!(imr.end_mesh(), Err(ImrError::NoMeshProgram));
    imr.end_camera().unwrap();
}

#[test]
fn indices_past_u16_are_refused() {
    let mut imr = context();
    imr.begin_mesh();
    imr.push_meshes(&vec![0.0; 65_535], 1, &[0]).unwrap();
    assert_eq!(
        imr.push_meshes(&[0.0; 2], 1, &[1]),
        Err(ImrError::MeshIndexOverflow { index: 65_536 })
    );
    let _ = imr.end_mesh();
    imr.end_camera().unwrap();
}

#[test]
fn draw_mesh_wraps_blend_and_texture() {
    let mut imr = context();
    let texture = imr.create_texture("tile", 2, 2, &[255; 16]).unwrap();
    let corner = |x: f32, y: f32| MeshVertex::new(Vec2::new(x, y), Vec2::new(x, y), Vec4::ONE);
    imr.draw_mesh(&MeshDrawArgs {
        vertices: vec![corner(0.0, 0.0), corner(1.0, 0.0), corner(1.0, 1.0)],
        indices: vec![0, 1, 2],
        texture: Some(texture.clone()),
        blend: BlendMode::Additive,
    })
    .unwrap();

    let record = imr.backend().draws()[0].clone();
    assert_eq!(record.blend, Some(BlendFunc::ADDITIVE));
    assert_eq!(record.textures[0], Some(texture.id()));
    assert_eq!(record.attribs.len(), 2);
    assert_eq!(record.attribs[1].offset, 16);
    assert_eq!(
        record.vertices()[MeshVertex::FLOATS..2 * MeshVertex::FLOATS],
        [1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0, 1.0]
    );
    assert_eq!(imr.current_blend(), Some(BlendFunc::ALPHA));
    imr.end_camera().unwrap();
}
