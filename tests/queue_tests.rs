//! Frame-level tests of the render queue.

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::{create_renderer, cube_mesh, headless, headless_mut, unlit_material};
use glam::{Mat4, Vec4};
use lantern::pipeline::{
    PingPong, PostEffect, PostProcessPass, RenderCommand, RenderPass, RenderQueue, TonemapOperator,
};
use lantern::resources::MeshInstance;
use lantern::{RenderResult, Renderer};
use rstest::rstest;

/// Hook that appends `entry` to `log`.
fn trace(
    log: &Rc<RefCell<Vec<String>>>,
    entry: &str,
) -> impl FnMut(&mut Renderer) -> RenderResult<()> + 'static {
    let log = Rc::clone(log);
    let entry = entry.to_string();
    move |_: &mut Renderer| {
        log.borrow_mut().push(entry.clone());
        Ok(())
    }
}

#[test]
fn test_hooks_run_in_order() {
    let mut renderer = create_renderer(4, 4);
    let mesh = cube_mesh(&mut renderer);
    let events = Rc::new(RefCell::new(Vec::new()));

    let mut queue = RenderQueue::new();
    let pass = RenderPass::new("scene")
        .with_setup({
            let events = Rc::clone(&events);
            move |renderer, view, projection| {
                events.borrow_mut().push("setup".to_string());
                renderer.set_per_frame_uniforms(view, projection, None);
                Ok(())
            }
        })
        .with_before(trace(&events, "before"))
        .with_teardown(trace(&events, "teardown"))
        .with_after(trace(&events, "after"));
    let scene = queue.push_pass(pass);

    let command = RenderCommand::new(MeshInstance::new(mesh, unlit_material(Vec4::ONE)))
        .with_before(trace(&events, "command.before"))
        .with_after(trace(&events, "command.after"));
    queue.enqueue(scene, command).unwrap();
    queue.execute(&mut renderer).unwrap();

    assert_eq!(
        *events.borrow(),
        ["setup", "before", "command.before", "command.after", "teardown", "after"]
    );
    assert!(queue.pass(scene).unwrap().commands().is_empty());
    assert_eq!(headless(&renderer).counters().draw_calls, 1);
}

#[test]
fn test_passes_run_in_queue_order() {
    let mut renderer = create_renderer(4, 4);
    let events = Rc::new(RefCell::new(Vec::new()));

    let mut queue = RenderQueue::new();
    queue.push_pass(RenderPass::new("scene").with_before(trace(&events, "scene")));
    queue.push_pass(RenderPass::new("overlay").with_before(trace(&events, "overlay")));
    queue.prepend_pass(RenderPass::new("shadow").with_before(trace(&events, "shadow")));
    queue.execute(&mut renderer).unwrap();

    assert_eq!(*events.borrow(), ["shadow", "scene", "overlay"]);
}

#[test]
fn test_pass_reads_shared_camera() {
    let mut renderer = create_renderer(4, 4);
    let view = Rc::new(Cell::new(Mat4::IDENTITY));
    let projection = Rc::new(Cell::new(Mat4::IDENTITY));

    let mut queue = RenderQueue::new();
    queue.push_pass(RenderPass::new("scene").with_camera(Rc::clone(&view), Rc::clone(&projection)));

    let moved = Mat4::from_translation(glam::Vec3::new(0.0, 0.0, -3.0));
    view.set(moved);
    queue.execute(&mut renderer).unwrap();
    assert_eq!(renderer.frame_matrices(), (moved, Mat4::IDENTITY));
}

#[test]
fn test_viewport_resize_rebuilds_once() {
    let mut renderer = create_renderer(4, 4);
    let mut queue = RenderQueue::new();
    for _ in 0..3 {
        queue.execute(&mut renderer).unwrap();
    }
    assert_eq!(queue.rebuild_count(), 1);

    headless_mut(&mut renderer).set_drawable_size(6, 3);
    for _ in 0..3 {
        queue.execute(&mut renderer).unwrap();
    }
    assert_eq!(queue.rebuild_count(), 2);
    assert_eq!(queue.target_size(), Some((6, 3)));
    assert_eq!(headless(&renderer).screen_pixel(5, 2), [0.25, 0.5, 0.75, 1.0]);
}

#[test]
fn test_post_invert_reaches_screen() {
    let mut renderer = create_renderer(4, 4);
    let mut queue = RenderQueue::new();
    queue.push_post_pass(PostProcessPass::new("invert", PostEffect::Invert));
    queue.execute(&mut renderer).unwrap();

    let backend = headless(&renderer);
    assert_eq!(backend.screen_pixel(2, 2), [0.75, 0.5, 0.25, 1.0]);
    let log = backend.draw_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].framebuffer, None);
    // one post pass: the index flipped once
    assert_eq!(queue.active_buffer(), PingPong::B);
}

#[rstest]
#[case::no_post(0, PingPong::A)]
#[case::one(1, PingPong::B)]
#[case::two(2, PingPong::A)]
#[case::three(3, PingPong::B)]
fn test_ping_pong_parity_follows_post_pass_count(#[case] passes: usize, #[case] after_one: PingPong) {
    let mut renderer = create_renderer(4, 4);
    let mut queue = RenderQueue::new();
    for i in 0..passes {
        queue.push_post_pass(PostProcessPass::new(&format!("copy {i}"), PostEffect::Copy));
    }

    queue.execute(&mut renderer).unwrap();
    assert_eq!(queue.active_buffer(), after_one);
    assert_eq!(headless(&renderer).screen_pixel(1, 1), [0.25, 0.5, 0.75, 1.0]);

    // The next frame resolves into the flipped buffer and still reaches the screen
    queue.execute(&mut renderer).unwrap();
    assert_eq!(queue.active_buffer(), PingPong::A);
    assert_eq!(headless(&renderer).screen_pixel(1, 1), [0.25, 0.5, 0.75, 1.0]);
}

#[test]
fn test_double_invert_is_identity() {
    let mut renderer = create_renderer(4, 4);
    let mut queue = RenderQueue::new();
    queue.push_post_pass(PostProcessPass::new("invert", PostEffect::Invert));
    queue.push_post_pass(PostProcessPass::new("invert again", PostEffect::Invert));
    queue.execute(&mut renderer).unwrap();

    assert_eq!(headless(&renderer).screen_pixel(0, 3), [0.25, 0.5, 0.75, 1.0]);
}

#[test]
fn test_tonemap_clamp_with_unit_gamma() {
    let mut renderer = create_renderer(4, 4);
    let mut queue = RenderQueue::new();
    queue.push_post_pass(PostProcessPass::new(
        "tonemap",
        PostEffect::Tonemap {
            exposure: 2.0,
            gamma: 1.0,
            operator: TonemapOperator::Clamp,
        },
    ));
    queue.execute(&mut renderer).unwrap();

    assert_eq!(headless(&renderer).screen_pixel(1, 1), [0.5, 1.0, 1.0, 1.0]);
}
