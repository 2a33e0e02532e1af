use std::rc::Rc;

use glam::Vec2;
use plutonium_imr::anim::{AnimationCursor, AnimationSet, SpriteAnimation};
use plutonium_imr::atlas::Atlas;
use plutonium_imr::camera::CameraOrigin;
use plutonium_imr::gpu::recording::RecordingBackend;
use plutonium_imr::instancing::InstanceArgs;
use plutonium_imr::texture::RenderTarget;
use plutonium_imr::{ImrContext, ImrError};

const FRAMES: [&str; 4] = ["walk_0", "walk_1", "walk_2", "walk_3"];

fn walk_set(imr: &mut ImrContext<RecordingBackend>) -> Rc<AnimationSet> {
    let texture = imr.create_texture("walk", 64, 64, &vec![0; 64 * 64 * 4]).unwrap();
    let mut atlas = Atlas::new(texture);
    atlas.add_grid("walk", Vec2::splat(32.0), Vec2::new(0.5, 1.0));
    let mut set = AnimationSet::new(Rc::new(atlas));
    set.add_animation("walk", &FRAMES, 1.0).unwrap();
    set.add_animation("idle", &FRAMES[..1], 0.5).unwrap();
    Rc::new(set)
}

#[test]
fn looping_animation_wraps() {
    let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
    let mut anim = SpriteAnimation::new(walk_set(&mut imr));
    assert!(anim.current_sprite().is_none());

    anim.set_animation("walk", true, true).unwrap();
    anim.update(0.3);
    assert_eq!(anim.frame(), 1);
    anim.update(0.5);
    assert_eq!(anim.frame(), 3);
    anim.update(0.25);
    assert_eq!(anim.frame(), 0);
    assert!(!anim.is_finished());
}

#[test]
fn one_shot_animation_holds_the_last_frame() {
    let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
    let set = walk_set(&mut imr);
    let mut anim = SpriteAnimation::new(set.clone());
    anim.set_animation("walk", false, true).unwrap();
    anim.update(10.0);
    assert_eq!(anim.frame(), 3);
    assert!(anim.is_finished());
    let last = set.animation("walk").unwrap().frames[3];
    assert_eq!(anim.current_sprite(), Some(last));
}

#[test]
fn switching_without_reset_keeps_position() {
    let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
    let mut anim = SpriteAnimation::new(walk_set(&mut imr));
    anim.set_animation("walk", true, true).unwrap();
    anim.update(0.6);
    assert_eq!(anim.frame(), 2);
    anim.set_animation("walk", true, false).unwrap();
    assert_eq!(anim.frame(), 2);
    anim.set_animation("walk", true, true).unwrap();
    assert_eq!(anim.frame(), 0);
    anim.set_animation("idle", true, false).unwrap();
    assert_eq!(anim.frame(), 0);
    assert_eq!(
        anim.set_animation("run", true, true),
        Err(ImrError::AnimationNotFound("run".to_string()))
    );
}

#[test]
fn unknown_frame_name_is_rejected() {
    let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
    let texture = imr.create_texture("t", 4, 4, &[0; 64]).unwrap();
    let mut set = AnimationSet::new(Rc::new(Atlas::new(texture)));
    assert!(matches!(
        set.add_animation("walk", &["nope"], 1.0),
        Err(ImrError::SpriteNotFound(_))
    ));
}

#[test]
fn cursor_feeds_instancing() {
    let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
    let set = walk_set(&mut imr);
    let mut anim = SpriteAnimation::new(set.clone());
    anim.set_animation("walk", true, true).unwrap();
    anim.update(0.5);

    let target = RenderTarget::Backbuffer {
        width: 100,
        height: 100,
    };
    imr.begin_camera(&target, CameraOrigin::LeftTop).unwrap();
    let texture = anim.texture().unwrap();
    imr.begin_instancing(Some(&texture)).unwrap();
    imr.instance_cursor(&anim, &InstanceArgs::at(Vec2::new(10.0, 10.0)))
        .unwrap();
    imr.end_instancing().unwrap();
    imr.end_camera().unwrap();

    let frame = set.animation("walk").unwrap().frames[2];
    let record = imr.backend().draws()[0].instances()[0];
    assert_eq!(record.uv, frame.uv.to_array());
    assert_eq!(record.offset, [0.5, 1.0]);
    assert_eq!(record.size, [32.0, 32.0]);
}

#[test]
fn cursor_without_frame_is_an_error() {
    let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
    let anim = SpriteAnimation::new(walk_set(&mut imr));
    let target = RenderTarget::Backbuffer {
        width: 100,
        height: 100,
    };
    imr.begin_camera(&target, CameraOrigin::LeftTop).unwrap();
    imr.begin_instancing(None).unwrap();
    assert_eq!(
        imr.instance_cursor(&anim, &InstanceArgs::default()),
        Err(ImrError::NoAnimationFrame)
    );
    imr.end_instancing().unwrap();
    imr.end_camera().unwrap();
}

#[test]
fn huge_steps_advance_in_one_go() {
    let mut imr = ImrContext::with_defaults(RecordingBackend::new()).unwrap();
    let set = walk_set(&mut imr);

    let mut looping = SpriteAnimation::new(set.clone());
    looping.set_animation("walk", true, true).unwrap();
    looping.update(1.0e7);
    assert!(looping.frame() < FRAMES.len());
    looping.update(f32::INFINITY);
    looping.update(f32::NAN);
    assert!(looping.frame() < FRAMES.len());
    assert!(looping.current_sprite().is_some());

    let mut once = SpriteAnimation::new(set);
    once.set_animation("walk", false, true).unwrap();
    once.update(1.0e30);
    assert_eq!(once.frame(), 3);
    assert!(once.is_finished());
}
