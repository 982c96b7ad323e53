//! Materials drawn through the whole stack.

mod common;

use std::rc::Rc;

use common::{camera, create_renderer, cube_mesh, headless};
use glam::Vec4;
use lantern::backend::TextureTarget;
use lantern::loader::{self, AssetSlot, HdrImage};
use lantern::material::{Material, PbrMaterial, SkyboxMaterial, TextureSlot, UnlitMaterial};
use lantern::pipeline::{RenderCommand, RenderPass, RenderQueue};
use lantern::resources::MeshInstance;
use lantern::IblEnvironment;

fn png_bytes() -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 255]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageOutputFormat::Png)
        .unwrap();
    bytes.into_inner()
}

#[test]
fn test_pbr_with_environment_selects_ibl_variant() {
    let mut renderer = create_renderer(4, 4);
    let ibl = Rc::new(IblEnvironment::bake(&mut renderer, &HdrImage::solid(4, 2, [0.2, 0.3, 0.4])).unwrap());
    let mesh = cube_mesh(&mut renderer);
    let material = Material::pbr(PbrMaterial {
        metallic: 1.0,
        environment: Some(Rc::clone(&ibl)),
        ..PbrMaterial::default()
    })
    .shared();

    let (view, projection) = camera();
    renderer.set_per_frame_uniforms(view, projection, None);
    renderer
        .render_mesh_instance(&MeshInstance::new(mesh, material))
        .unwrap();

    let backend = headless(&renderer);
    let record = backend.draw_log().last().unwrap();
    assert_eq!(record.program.as_deref(), Some("pbr+IBL"));
    assert_eq!(
        backend.bound_texture(5, TextureTarget::CubeMap),
        Some(ibl.irradiance().handle())
    );
    assert_eq!(
        backend.bound_texture(6, TextureTarget::CubeMap),
        Some(ibl.prefilter().handle())
    );
    assert_eq!(
        backend.bound_texture(7, TextureTarget::Texture2D),
        Some(ibl.brdf_lut().handle())
    );
}

#[test]
fn test_skybox_pass_through_queue() {
    let mut renderer = create_renderer(4, 4);
    let ibl = Rc::new(IblEnvironment::bake(&mut renderer, &HdrImage::solid(4, 2, [1.0, 1.0, 1.0])).unwrap());
    let mesh = cube_mesh(&mut renderer);
    let skybox = Material::skybox(SkyboxMaterial::new(Rc::clone(&ibl))).shared();

    let mut queue = RenderQueue::new();
    let pass = queue.push_pass(RenderPass::new("sky"));
    queue
        .enqueue(pass, RenderCommand::new(MeshInstance::new(mesh, skybox)))
        .unwrap();
    queue.execute(&mut renderer).unwrap();

    let backend = headless(&renderer);
    let record = backend
        .draw_log()
        .iter()
        .rev()
        .find(|record| record.program.as_deref() == Some("skybox"))
        .unwrap();
    assert_eq!(record.count, 36);
    assert!(record.framebuffer.is_some());
    // queue restores the default state after the frame
    assert_eq!(backend.render_state(), lantern::backend::RenderState::default());
}

#[test]
fn test_deferred_texture_uploads_once_loaded() {
    let mut renderer = create_renderer(4, 4);
    let mesh = cube_mesh(&mut renderer);
    let slot: AssetSlot<image::RgbaImage> = AssetSlot::new("red.png");
    let material = Material::unlit(UnlitMaterial {
        color: Vec4::ONE,
        albedo_map: TextureSlot::from(slot.clone()),
        ..UnlitMaterial::default()
    })
    .shared();
    let instance = MeshInstance::new(mesh, Rc::clone(&material));
    let white = renderer.fallbacks().white().handle();

    renderer.render_mesh_instance(&instance).unwrap();
    assert_eq!(
        headless(&renderer).bound_texture(0, TextureTarget::Texture2D),
        Some(white)
    );

    loader::complete_image(&slot, &png_bytes());
    assert!(slot.is_ready());
    // a new material binding picks the upload up
    let lighting = *renderer.lighting();
    renderer.set_lighting(lighting);
    renderer.render_mesh_instance(&instance).unwrap();

    let bound = headless(&renderer).bound_texture(0, TextureTarget::Texture2D);
    assert!(bound.is_some());
    assert_ne!(bound, Some(white));
    let record = headless(&renderer).draw_log().last().unwrap().clone();
    assert_eq!(record.program.as_deref(), Some("basic_unlit+ALBEDO_MAP"));
}
