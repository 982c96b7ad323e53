//! Image-based lighting bakes on the headless backend.

mod common;

use std::rc::Rc;

use common::{create_renderer, headless, test_config};
use lantern::backend::{BackendError, Capabilities, CubeFace, HeadlessBackend};
use lantern::loader::hdr;
use lantern::loader::HdrImage;
use lantern::{IblEnvironment, RenderError, Renderer};

/// Flat-encoded Radiance file of one color.
fn radiance_file(width: u32, height: u32, rgbe: [u8; 4]) -> Vec<u8> {
    let mut bytes = format!("#?RADIANCE\nFORMAT=32-bit_rle_rgbe\n\n-Y {height} +X {width}\n").into_bytes();
    for _ in 0..width * height {
        bytes.extend_from_slice(&rgbe);
    }
    bytes
}

fn faces(renderer: &mut Renderer, cube: &lantern::resources::TextureCubeMap, level: u32) -> Vec<Vec<f32>> {
    CubeFace::ALL
        .iter()
        .map(|face| cube.read_face(renderer.backend_mut(), *face, level).unwrap())
        .collect()
}

#[test]
fn test_uniform_environment_gives_uniform_irradiance() {
    let mut renderer = create_renderer(4, 4);
    let image = hdr::decode(&radiance_file(4, 2, [128, 128, 128, 128])).unwrap();
    assert_eq!(image.pixel(3, 1), Some([0.5, 0.5, 0.5]));

    let ibl = IblEnvironment::bake(&mut renderer, &image).unwrap();
    assert_eq!(ibl.irradiance().size(), 2);

    let irradiance = faces(&mut renderer, ibl.irradiance(), 0);
    let reference = irradiance[0][0];
    for texel in irradiance.iter().flat_map(|face| face.chunks(4)) {
        assert!((texel[0] - reference).abs() < 1e-5, "{texel:?} vs {reference}");
        assert_eq!(texel[0], texel[1]);
        assert_eq!(texel[1], texel[2]);
    }
    // cosine-weighted mean of a constant radiance is the radiance itself
    assert!((reference - 0.5).abs() < 0.025, "irradiance {reference}");

    for texel in faces(&mut renderer, ibl.environment(), 0).iter().flat_map(|face| face.chunks(4)) {
        assert_eq!(&texel[..3], &[0.5, 0.5, 0.5]);
    }
}

#[test]
fn test_bake_is_idempotent() {
    let mut renderer = create_renderer(4, 4);
    let mut data = Vec::new();
    for i in 0..8 {
        data.extend_from_slice(&[i as f32 * 0.25, 1.0, 2.0 - i as f32 * 0.25]);
    }
    let image = HdrImage::new(4, 2, data).unwrap();

    let first = IblEnvironment::bake(&mut renderer, &image).unwrap();
    let second = IblEnvironment::bake(&mut renderer, &image).unwrap();

    assert_eq!(
        faces(&mut renderer, first.environment(), 0),
        faces(&mut renderer, second.environment(), 0)
    );
    assert_eq!(
        faces(&mut renderer, first.irradiance(), 0),
        faces(&mut renderer, second.irradiance(), 0)
    );
    for level in 0..first.prefilter().mip_levels() {
        assert_eq!(
            faces(&mut renderer, first.prefilter(), level),
            faces(&mut renderer, second.prefilter(), level)
        );
    }
    assert!(Rc::ptr_eq(first.brdf_lut(), second.brdf_lut()));
}

#[test]
fn test_bake_releases_capture_resources() {
    let mut renderer = create_renderer(4, 4);
    let textures_before = headless(&renderer).live_textures();
    let arrays_before = headless(&renderer).live_vertex_arrays();

    let ibl = IblEnvironment::bake(&mut renderer, &HdrImage::solid(4, 2, [1.0, 0.5, 0.25])).unwrap();
    assert_eq!(ibl.prefilter().mip_levels(), 2);
    assert_eq!(ibl.prefilter().level_size(1), 2);

    let backend = headless(&renderer);
    assert_eq!(backend.live_framebuffers(), 0);
    assert_eq!(backend.live_renderbuffers(), 0);
    assert_eq!(backend.live_vertex_arrays(), arrays_before);
    // three cubes plus the BRDF table
    assert_eq!(backend.live_textures(), textures_before + 4);

    ibl.destroy(renderer.backend_mut());
    assert_eq!(headless(&renderer).live_textures(), textures_before + 1);
}

#[test]
fn test_brdf_lut_is_baked_once() {
    let mut renderer = create_renderer(4, 4);
    let first = renderer.brdf_lut().unwrap();
    let draws = headless(&renderer).counters().draw_calls;
    let second = renderer.brdf_lut().unwrap();

    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(headless(&renderer).counters().draw_calls, draws);
    assert_eq!(first.width(), 4);

    let texels = first.read_pixels(renderer.backend_mut(), 0).unwrap();
    assert!(texels.iter().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn test_missing_float_linear_filtering_is_an_error() {
    let backend = HeadlessBackend::new(4, 4).with_capabilities(Capabilities {
        float_linear_filtering: false,
        ..Capabilities::default()
    });
    let mut renderer = Renderer::new(Box::new(backend), test_config()).unwrap();

    let err = IblEnvironment::bake(&mut renderer, &HdrImage::solid(4, 2, [1.0, 1.0, 1.0])).unwrap_err();
    assert!(matches!(
        err,
        RenderError::Backend(BackendError::FeatureNotSupported(_))
    ));
}
