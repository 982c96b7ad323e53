//! Draw-path integration tests: state elision, variant caching and meshes.

mod common;

use std::rc::Rc;

use rstest::rstest;

use common::{basic_material, camera, create_renderer, cube_mesh, headless, quad_mesh, unlit_material};
use glam::{Mat4, Vec3, Vec4};
use lantern::backend::DrawMode;
use lantern::resources::{BufferFormat, Geometry, InstancedMesh, Mesh, MeshInstance};
use lantern::shader::{ShaderFeatures, ShaderKind};
use lantern::{DrawCall, RenderError, ResourceError};

// ============================================================================
// Bind elision
// ============================================================================

#[test]
fn test_shared_material_binds_once() {
    let mut renderer = create_renderer(8, 8);
    let mesh = cube_mesh(&mut renderer);
    let material = basic_material();
    let (view, projection) = camera();
    renderer.set_per_frame_uniforms(view, projection, None);

    for x in 0..3 {
        let instance = MeshInstance::new(Rc::clone(&mesh), Rc::clone(&material))
            .with_transform(Mat4::from_translation(Vec3::new(x as f32, 0.0, 0.0)));
        renderer.render_mesh_instance(&instance).unwrap();
    }

    let stats = renderer.stats();
    assert_eq!(stats.draw_calls, 3);
    assert_eq!(stats.shader_binds, 1);
    assert_eq!(stats.material_binds, 1);
    assert_eq!(stats.vertex_array_binds, 1);
    assert_eq!(stats.indices, 3 * 36);
}

#[test]
fn test_material_switch_rebinds() {
    let mut renderer = create_renderer(8, 8);
    let mesh = cube_mesh(&mut renderer);
    let red = unlit_material(Vec4::new(1.0, 0.0, 0.0, 1.0));
    let green = unlit_material(Vec4::new(0.0, 1.0, 0.0, 1.0));
    let (view, projection) = camera();
    renderer.set_per_frame_uniforms(view, projection, None);

    for material in [&red, &green, &green, &red] {
        let instance = MeshInstance::new(Rc::clone(&mesh), Rc::clone(material));
        renderer.render_mesh_instance(&instance).unwrap();
    }

    let stats = renderer.stats();
    assert_eq!(stats.shader_binds, 1);
    assert_eq!(stats.material_binds, 3);
    assert_eq!(stats.vertex_array_binds, 1);

    let program = renderer.current_program().unwrap();
    let color = headless(&renderer).uniform_value(program, "base_color").cloned();
    assert_eq!(color, Some(Vec4::new(1.0, 0.0, 0.0, 1.0).into()));
}

// ============================================================================
// Variant cache
// ============================================================================

#[test]
fn test_variant_cache_identity() {
    let mut renderer = create_renderer(8, 8);
    let source = ShaderKind::Basic.source();

    let first = renderer
        .get_or_create_shader(&source, ShaderFeatures::ALBEDO_MAP)
        .unwrap();
    // NORMAL_MAP is not declared by the basic shader
    let second = renderer
        .get_or_create_shader(&source, ShaderFeatures::ALBEDO_MAP | ShaderFeatures::NORMAL_MAP)
        .unwrap();
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(renderer.shader_count(), 1);

    let plain = renderer
        .get_or_create_shader(&source, ShaderFeatures::empty())
        .unwrap();
    assert!(!Rc::ptr_eq(&first, &plain));
    assert_eq!(renderer.shader_count(), 2);
    assert_eq!(headless(&renderer).counters().programs_linked, 2);
}

#[rstest]
#[case(ShaderFeatures::empty(), "basic")]
#[case(ShaderFeatures::SHADOWS | ShaderFeatures::ALBEDO_MAP, "basic+ALBEDO_MAP+SHADOWS")]
#[case(ShaderFeatures::ALBEDO_MAP | ShaderFeatures::SHADOWS, "basic+ALBEDO_MAP+SHADOWS")]
fn test_variant_names_are_order_independent(#[case] requested: ShaderFeatures, #[case] name: &str) {
    let mut renderer = create_renderer(8, 8);
    let shader = renderer
        .get_or_create_shader(&ShaderKind::Basic.source(), requested)
        .unwrap();
    assert_eq!(shader.name(), name);
}

// ============================================================================
// Meshes
// ============================================================================

#[test]
fn test_single_group_mesh_draws_once() {
    let mut renderer = create_renderer(8, 8);
    let mesh = quad_mesh(&mut renderer);
    assert_eq!(mesh.submeshes().len(), 1);

    renderer.set_per_frame_uniforms(Mat4::IDENTITY, Mat4::IDENTITY, None);
    let instance = MeshInstance::new(mesh, unlit_material(Vec4::ONE));
    renderer.render_mesh_instance(&instance).unwrap();

    let log = headless(&renderer).draw_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].mode, DrawMode::Triangles);
    assert_eq!(log[0].first, 0);
    assert_eq!(log[0].count, 6);
    assert!(log[0].indexed);
    assert_eq!(log[0].instances, 1);
}

#[test]
fn test_groups_draw_with_their_materials() {
    let mut renderer = create_renderer(8, 8);
    let geometry = Geometry::unit_cube()
        .with_group(0, 18, 0)
        .with_group(18, 18, 1);
    let mesh = Rc::new(Mesh::new(renderer.backend_mut(), &geometry, BufferFormat::Separate).unwrap());
    assert_eq!(mesh.material_count(), 2);

    renderer.set_per_frame_uniforms(Mat4::IDENTITY, Mat4::IDENTITY, None);
    let instance = MeshInstance::new(mesh, vec![basic_material(), unlit_material(Vec4::ONE)]);
    renderer.render_mesh_instance(&instance).unwrap();

    let log = headless(&renderer).draw_log();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].program.as_deref(), Some("basic"));
    assert_eq!((log[0].first, log[0].count), (0, 18));
    assert_eq!(log[1].program.as_deref(), Some("basic_unlit"));
    assert_eq!((log[1].first, log[1].count), (18, 18));
}

#[test]
fn test_buffer_refcount_blocks_destroy() {
    let mut renderer = create_renderer(8, 8);
    let mut mesh = Mesh::new(
        renderer.backend_mut(),
        &Geometry::unit_cube(),
        BufferFormat::Concatenated,
    )
    .unwrap();
    let vertices = Rc::clone(mesh.vertex_buffer());
    assert_eq!(vertices.ref_count(), 1);

    let shared = Mesh::from_buffers(
        renderer.backend_mut(),
        "cube.shared",
        DrawMode::Triangles,
        Rc::clone(&vertices),
        mesh.index_buffer().cloned(),
        &Geometry::unit_cube().resolved_groups(),
    )
    .unwrap();
    assert_eq!(vertices.ref_count(), 2);

    let err = mesh.destroy(renderer.backend_mut()).unwrap_err();
    assert!(matches!(
        err,
        RenderError::Resource(ResourceError::BufferInUse { count: 1, .. })
    ));
    assert!(!vertices.is_destroyed());

    drop(shared);
    assert_eq!(vertices.ref_count(), 1);
    mesh.destroy(renderer.backend_mut()).unwrap();
    assert!(vertices.is_destroyed());
}

#[test]
fn test_shared_mesh_destroy_requires_sole_owner() {
    let mut renderer = create_renderer(8, 8);
    let mesh = quad_mesh(&mut renderer);
    let instance = MeshInstance::new(Rc::clone(&mesh), unlit_material(Vec4::ONE));

    let err = Mesh::destroy_shared(mesh, renderer.backend_mut()).unwrap_err();
    assert!(matches!(err, RenderError::Resource(ResourceError::MeshInUse(_))));

    let mesh = Rc::clone(instance.mesh());
    drop(instance);
    Mesh::destroy_shared(mesh, renderer.backend_mut()).unwrap();
}

#[test]
fn test_instanced_mesh_draws_one_call_per_group() {
    let mut renderer = create_renderer(8, 8);
    let mesh = cube_mesh(&mut renderer);
    let mut instanced = InstancedMesh::new(mesh, unlit_material(Vec4::ONE));
    for i in 0..5 {
        instanced.push(Mat4::from_translation(Vec3::splat(i as f32)));
    }

    renderer.set_per_frame_uniforms(Mat4::IDENTITY, Mat4::IDENTITY, None);
    renderer.render_instanced_mesh(&mut instanced).unwrap();

    let log = headless(&renderer).draw_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].instances, 5);
    assert_eq!(log[0].program.as_deref(), Some("basic_unlit+INSTANCED"));
    assert_eq!(renderer.stats().instances, 5);
}

#[test]
fn test_emptied_instanced_mesh_draws_nothing() {
    let mut renderer = create_renderer(8, 8);
    let mesh = cube_mesh(&mut renderer);
    let mut instanced = InstancedMesh::new(mesh, unlit_material(Vec4::ONE));
    instanced.push(Mat4::IDENTITY);

    renderer.set_per_frame_uniforms(Mat4::IDENTITY, Mat4::IDENTITY, None);
    renderer.render_instanced_mesh(&mut instanced).unwrap();
    assert_eq!(headless(&renderer).draw_log().len(), 1);

    instanced.clear();
    renderer.set_per_frame_uniforms(Mat4::IDENTITY, Mat4::IDENTITY, None);
    renderer.render_instanced_mesh(&mut instanced).unwrap();
    assert_eq!(headless(&renderer).draw_log().len(), 1);
    assert_eq!(renderer.stats().draw_calls, 0);

    instanced.push(Mat4::IDENTITY);
    let removed = instanced.remove(0);
    assert_eq!(removed, Some(Mat4::IDENTITY));
    renderer.render_instanced_mesh(&mut instanced).unwrap();
    assert_eq!(renderer.stats().draw_calls, 0);
}

#[test]
fn test_zero_instance_draw_is_skipped() {
    let mut renderer = create_renderer(8, 8);
    let mesh = cube_mesh(&mut renderer);
    renderer.set_per_frame_uniforms(Mat4::IDENTITY, Mat4::IDENTITY, None);
    let instance = MeshInstance::new(Rc::clone(&mesh), unlit_material(Vec4::ONE));
    renderer.render_mesh_instance(&instance).unwrap();
    let before = headless(&renderer).draw_log().len();

    renderer.draw_instanced(&DrawCall::arrays(DrawMode::Triangles, 3), 0).unwrap();
    assert_eq!(headless(&renderer).draw_log().len(), before);
}
