//! Common utilities for the integration tests.
//!
//! Every test runs on the headless backend, so no GPU or window is needed.

#![allow(dead_code)]

use std::rc::Rc;

use lantern::backend::HeadlessBackend;
use lantern::material::{BasicMaterial, Material, SharedMaterial, UnlitMaterial};
use lantern::resources::{BufferFormat, Geometry, Mesh};
use lantern::{IblConfig, Renderer, RendererConfig};

use glam::{Mat4, Vec3, Vec4};

// ============================================================================
// Logging
// ============================================================================

/// Route `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

// ============================================================================
// Renderer
// ============================================================================

/// IBL settings small enough for the CPU kernels.
pub fn tiny_ibl() -> IblConfig {
    IblConfig::default()
        .with_environment_size(4)
        .with_irradiance(2, 0.1)
        .with_prefilter(4, 2, 16)
        .with_brdf_lut(4, 16)
}

pub fn test_config() -> RendererConfig {
    RendererConfig::default()
        .with_clear_color([0.25, 0.5, 0.75, 1.0])
        .with_ibl(tiny_ibl())
}

/// Headless renderer with a `width` x `height` drawable.
pub fn create_renderer(width: u32, height: u32) -> Renderer {
    init_logging();
    Renderer::new(Box::new(HeadlessBackend::new(width, height)), test_config())
        .expect("headless renderer")
}

pub fn headless(renderer: &Renderer) -> &HeadlessBackend {
    renderer
        .backend_as::<HeadlessBackend>()
        .expect("headless backend")
}

pub fn headless_mut(renderer: &mut Renderer) -> &mut HeadlessBackend {
    renderer
        .backend_as_mut::<HeadlessBackend>()
        .expect("headless backend")
}

// ============================================================================
// Scene fixtures
// ============================================================================

pub fn camera() -> (Mat4, Mat4) {
    let view = Mat4::look_at_rh(Vec3::new(0.0, 1.0, 4.0), Vec3::ZERO, Vec3::Y);
    let projection = Mat4::perspective_rh_gl(60f32.to_radians(), 1.0, 0.1, 100.0);
    (view, projection)
}

pub fn quad_mesh(renderer: &mut Renderer) -> Rc<Mesh> {
    Rc::new(
        Mesh::new(
            renderer.backend_mut(),
            &Geometry::fullscreen_quad().with_label("quad"),
            BufferFormat::Concatenated,
        )
        .expect("quad mesh"),
    )
}

pub fn cube_mesh(renderer: &mut Renderer) -> Rc<Mesh> {
    Rc::new(
        Mesh::new(
            renderer.backend_mut(),
            &Geometry::unit_cube().with_label("cube"),
            BufferFormat::Interleaved,
        )
        .expect("cube mesh"),
    )
}

pub fn basic_material() -> SharedMaterial {
    Material::basic(BasicMaterial::default()).shared()
}

pub fn unlit_material(color: Vec4) -> SharedMaterial {
    Material::unlit(UnlitMaterial {
        color,
        ..UnlitMaterial::default()
    })
    .shared()
}
