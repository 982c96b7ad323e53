//! Image-based lighting precomputation.
//!
//! An equirectangular HDR environment is baked into three cube maps and one
//! lookup table, all rendered on the device:
//!
//! 1. the environment cube (equirect projected onto six faces),
//! 2. the diffuse irradiance cube (cosine-weighted hemisphere integral),
//! 3. the specular prefilter cube (GGX importance sampling, roughness per mip),
//! 4. the split-sum BRDF lookup table (baked once per renderer).
//!
//! Cube faces are captured with a unit cube seen from its center through six
//! fixed 90° views, sharing one framebuffer and depth renderbuffer.

pub mod kernels;

use std::f32::consts::FRAC_PI_2;
use std::rc::Rc;

use glam::{Mat4, Vec3};

use crate::backend::{
    Attachment, CubeFace, FilterMode, FramebufferHandle, GraphicsBackend, RenderState,
    RenderbufferDescriptor, RenderbufferFormat, RenderbufferHandle, TextureFormat, WrapMode,
};
use crate::error::RenderResult;
use crate::loader::hdr::HdrImage;
use crate::renderer::Renderer;
use crate::resources::geometry::{BufferFormat, Geometry};
use crate::resources::mesh::Mesh;
use crate::resources::texture::{full_mip_chain, Texture2D, TextureCubeMap, TextureOptions};
use crate::shader::{Shader, ShaderFeatures, ShaderKind};

/// Capture target and up vector per face, in GL face order.
const CAPTURE_FACES: [(CubeFace, Vec3, Vec3); 6] = [
    (CubeFace::PositiveX, Vec3::X, Vec3::NEG_Y),
    (CubeFace::NegativeX, Vec3::NEG_X, Vec3::NEG_Y),
    (CubeFace::PositiveY, Vec3::Y, Vec3::Z),
    (CubeFace::NegativeY, Vec3::NEG_Y, Vec3::NEG_Z),
    (CubeFace::PositiveZ, Vec3::Z, Vec3::NEG_Y),
    (CubeFace::NegativeZ, Vec3::NEG_Z, Vec3::NEG_Y),
];

/// View matrix looking from the origin through `face`.
pub fn capture_view(face: CubeFace) -> Mat4 {
    let (_, target, up) = CAPTURE_FACES[face.index()];
    Mat4::look_at_rh(Vec3::ZERO, target, up)
}

/// 90° square projection shared by all faces.
pub fn capture_projection() -> Mat4 {
    Mat4::perspective_rh_gl(FRAC_PI_2, 1.0, 0.1, 10.0)
}

/// Framebuffer, depth storage and cube geometry shared by the capture passes
pub struct CaptureRig {
    framebuffer: FramebufferHandle,
    depth: RenderbufferHandle,
    depth_size: u32,
    cube: Mesh,
}

impl CaptureRig {
    pub fn new(backend: &mut dyn GraphicsBackend, size: u32) -> RenderResult<Self> {
        let framebuffer = backend.create_framebuffer(Some("ibl.capture"))?;
        let depth = backend.create_renderbuffer(&RenderbufferDescriptor {
            label: Some("ibl.capture.depth".to_string()),
            format: RenderbufferFormat::Depth24,
            width: size,
            height: size,
            samples: 0,
        })?;
        backend.attach_renderbuffer(framebuffer, Attachment::Depth, depth);
        let cube = Mesh::new(
            backend,
            &Geometry::unit_cube().with_label("ibl.capture.cube"),
            BufferFormat::Concatenated,
        )?;
        Ok(Self {
            framebuffer,
            depth,
            depth_size: size,
            cube,
        })
    }

    /// Render all six faces of one level of `target` with the program in use.
    fn render_faces(
        &mut self,
        renderer: &mut Renderer,
        target: &TextureCubeMap,
        level: u32,
    ) -> RenderResult<()> {
        let size = target.level_size(level);
        let backend = renderer.backend_mut();
        if self.depth_size != size {
            backend.resize_renderbuffer(self.depth, size, size);
            self.depth_size = size;
        }
        backend.bind_framebuffer(Some(self.framebuffer));
        backend.set_viewport(0, 0, size, size);
        backend.set_render_state(&RenderState::fullscreen());

        let projection = capture_projection();
        for face in CubeFace::ALL {
            let backend = renderer.backend_mut();
            backend.attach_texture(
                self.framebuffer,
                Attachment::Color0,
                target.handle(),
                Some(face),
                level,
            );
            backend.check_framebuffer(self.framebuffer)?;
            backend.clear(Some([0.0, 0.0, 0.0, 1.0]), Some(1.0));

            renderer.set_per_frame_uniforms(capture_view(face), projection, None);
            renderer.draw_mesh(&self.cube)?;
        }
        Ok(())
    }

    pub fn destroy(mut self, backend: &mut dyn GraphicsBackend) -> RenderResult<()> {
        self.cube.destroy(backend)?;
        backend.destroy_renderbuffer(self.depth);
        backend.destroy_framebuffer(self.framebuffer);
        Ok(())
    }
}

fn capture_shader(renderer: &mut Renderer, kind: ShaderKind) -> RenderResult<Rc<Shader>> {
    let shader = renderer.get_or_create_shader(&kind.source(), ShaderFeatures::empty())?;
    renderer.use_shader(&shader);
    Ok(shader)
}

fn float_cube(
    backend: &mut dyn GraphicsBackend,
    label: &str,
    size: u32,
    mip_levels: u32,
) -> RenderResult<TextureCubeMap> {
    let mut options = TextureOptions::default().with_wrap(WrapMode::ClampToEdge);
    if mip_levels > 1 {
        options = options.with_mipmaps(FilterMode::Linear);
    }
    TextureCubeMap::new(backend, label, size, TextureFormat::Rgba16Float, mip_levels, options)
}

/// Undo the capture state: default framebuffer, full viewport, no tracked bindings.
fn restore(renderer: &mut Renderer) {
    let backend = renderer.backend_mut();
    let (width, height) = backend.drawable_size();
    backend.bind_framebuffer(None);
    backend.set_viewport(0, 0, width, height);
    backend.set_render_state(&RenderState::default());
    renderer.reset_state();
}

/// Upload an HDR image as the equirect source texture.
pub fn equirect_texture(renderer: &mut Renderer, hdr: &HdrImage) -> RenderResult<Texture2D> {
    // Radiance files store the top row first
    let options = TextureOptions::default().with_flip_y(true);
    Texture2D::from_hdr(renderer.backend_mut(), "ibl.equirect", hdr, options)
}

/// Project an equirect texture onto the faces of a new cube map.
pub fn equirect_to_cube(
    renderer: &mut Renderer,
    rig: &mut CaptureRig,
    equirect: &Texture2D,
    size: u32,
) -> RenderResult<TextureCubeMap> {
    log::info!("IBL: equirect {}x{} -> cube {}", equirect.width(), equirect.height(), size);
    let cube = float_cube(renderer.backend_mut(), "ibl.environment", size, full_mip_chain(size))?;
    let shader = capture_shader(renderer, ShaderKind::EquirectToCube)?;
    if let Some(unit) = shader.sampler_unit("equirectangular_map") {
        equirect.bind(renderer.backend_mut(), unit);
    }
    rig.render_faces(renderer, &cube, 0)?;
    cube.generate_mipmaps(renderer.backend_mut());
    Ok(cube)
}

/// Convolve an environment cube into a diffuse irradiance cube.
pub fn irradiance(
    renderer: &mut Renderer,
    rig: &mut CaptureRig,
    environment: &TextureCubeMap,
    size: u32,
    sample_delta: f32,
) -> RenderResult<TextureCubeMap> {
    log::info!("IBL: irradiance {} (sample delta {})", size, sample_delta);
    let cube = float_cube(renderer.backend_mut(), "ibl.irradiance", size, 1)?;
    let shader = capture_shader(renderer, ShaderKind::Irradiance)?;
    if let Some(unit) = shader.sampler_unit("environment_map") {
        environment.bind(renderer.backend_mut(), unit);
    }
    shader.set(renderer.backend_mut(), "sample_delta", sample_delta);
    rig.render_faces(renderer, &cube, 0)?;
    Ok(cube)
}

/// Prefilter an environment cube for `mip_levels` roughness steps.
///
/// Level `m` holds roughness `m / (mip_levels - 1)`.
pub fn prefilter(
    renderer: &mut Renderer,
    rig: &mut CaptureRig,
    environment: &TextureCubeMap,
    size: u32,
    mip_levels: u32,
    sample_count: u32,
) -> RenderResult<TextureCubeMap> {
    let mip_levels = mip_levels.clamp(1, full_mip_chain(size));
    log::info!("IBL: prefilter {} with {} mip(s)", size, mip_levels);
    let cube = float_cube(renderer.backend_mut(), "ibl.prefilter", size, mip_levels)?;
    let shader = capture_shader(renderer, ShaderKind::Prefilter)?;
    if let Some(unit) = shader.sampler_unit("environment_map") {
        environment.bind(renderer.backend_mut(), unit);
    }
    shader.set(renderer.backend_mut(), "sample_count", sample_count as i32);

    for level in 0..cube.mip_levels() {
        let roughness = if cube.mip_levels() > 1 {
            level as f32 / (cube.mip_levels() - 1) as f32
        } else {
            0.0
        };
        shader.set(renderer.backend_mut(), "roughness", roughness);
        rig.render_faces(renderer, &cube, level)?;
    }
    Ok(cube)
}

/// Bake the split-sum BRDF table into a two-channel float texture.
pub fn bake_brdf_lut(renderer: &mut Renderer, size: u32) -> RenderResult<Texture2D> {
    log::info!("IBL: BRDF lookup table {}x{}", size, size);
    let samples = renderer.config().ibl.brdf_sample_count;
    let backend = renderer.backend_mut();
    let lut = Texture2D::render_target(backend, "ibl.brdf_lut", size, size, TextureFormat::Rg16Float)?;
    let framebuffer = backend.create_framebuffer(Some("ibl.brdf_lut"))?;
    backend.attach_texture(framebuffer, Attachment::Color0, lut.handle(), None, 0);
    let mut quad = Mesh::new(
        backend,
        &Geometry::fullscreen_quad().with_label("ibl.brdf_lut.quad"),
        BufferFormat::Concatenated,
    )?;

    let result = (|| -> RenderResult<()> {
        let shader = capture_shader(renderer, ShaderKind::BrdfLut)?;
        let backend = renderer.backend_mut();
        backend.check_framebuffer(framebuffer)?;
        backend.bind_framebuffer(Some(framebuffer));
        backend.set_viewport(0, 0, size, size);
        backend.set_render_state(&RenderState::fullscreen());
        shader.set(backend, "sample_count", samples as i32);
        renderer.draw_mesh(&quad)
    })();

    restore(renderer);
    let backend = renderer.backend_mut();
    quad.destroy(backend)?;
    backend.destroy_framebuffer(framebuffer);
    match result {
        Ok(()) => Ok(lut),
        Err(err) => {
            lut.destroy(backend);
            Err(err)
        }
    }
}

/// Baked image-based lighting for one environment
#[derive(Debug)]
pub struct IblEnvironment {
    environment: TextureCubeMap,
    irradiance: TextureCubeMap,
    prefilter: TextureCubeMap,
    brdf_lut: Rc<Texture2D>,
}

impl IblEnvironment {
    /// Run the whole bake for `hdr` using the renderer's IBL settings.
    ///
    /// The capture rig and the equirect texture are released afterwards, on
    /// success and on failure.
    pub fn bake(renderer: &mut Renderer, hdr: &HdrImage) -> RenderResult<Self> {
        let config = renderer.config().ibl.clone();
        let brdf_lut = renderer.brdf_lut()?;
        let equirect = equirect_texture(renderer, hdr)?;
        let mut rig = match CaptureRig::new(renderer.backend_mut(), config.environment_size) {
            Ok(rig) => rig,
            Err(err) => {
                equirect.destroy(renderer.backend_mut());
                return Err(err);
            }
        };

        let baked = (|| -> RenderResult<(TextureCubeMap, TextureCubeMap, TextureCubeMap)> {
            let environment = equirect_to_cube(renderer, &mut rig, &equirect, config.environment_size)?;
            let irradiance = irradiance(
                renderer,
                &mut rig,
                &environment,
                config.irradiance_size,
                config.irradiance_sample_delta,
            )?;
            let prefilter = prefilter(
                renderer,
                &mut rig,
                &environment,
                config.prefilter_size,
                config.prefilter_mip_levels,
                config.prefilter_sample_count,
            )?;
            Ok((environment, irradiance, prefilter))
        })();

        restore(renderer);
        let backend = renderer.backend_mut();
        equirect.destroy(backend);
        rig.destroy(backend)?;

        let (environment, irradiance, prefilter) = baked?;
        log::info!("IBL: environment baked");
        Ok(Self {
            environment,
            irradiance,
            prefilter,
            brdf_lut,
        })
    }

    pub fn environment(&self) -> &TextureCubeMap {
        &self.environment
    }

    pub fn irradiance(&self) -> &TextureCubeMap {
        &self.irradiance
    }

    pub fn prefilter(&self) -> &TextureCubeMap {
        &self.prefilter
    }

    pub fn brdf_lut(&self) -> &Rc<Texture2D> {
        &self.brdf_lut
    }

    /// Bind the maps to the IBL sampler units of `shader`, which must be in use.
    pub fn bind(&self, backend: &mut dyn GraphicsBackend, shader: &Shader) {
        if let Some(unit) = shader.sampler_unit("irradiance_map") {
            self.irradiance.bind(backend, unit);
        }
        if let Some(unit) = shader.sampler_unit("prefilter_map") {
            self.prefilter.bind(backend, unit);
        }
        if let Some(unit) = shader.sampler_unit("brdf_lut") {
            self.brdf_lut.bind(backend, unit);
        }
        shader.set(
            backend,
            "prefilter_max_lod",
            self.prefilter.mip_levels().saturating_sub(1) as f32,
        );
    }

    /// Release the cube maps. The BRDF table belongs to the renderer.
    pub fn destroy(&self, backend: &mut dyn GraphicsBackend) {
        self.environment.destroy(backend);
        self.irradiance.destroy(backend);
        self.prefilter.destroy(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(CubeFace::PositiveX)]
    #[case(CubeFace::NegativeY)]
    #[case(CubeFace::NegativeZ)]
    fn test_capture_view_centers_its_face(#[case] face: CubeFace) {
        let view_projection = capture_projection() * capture_view(face);
        let inverse = view_projection.inverse();
        let near = inverse.project_point3(Vec3::new(0.0, 0.0, -1.0));
        let far = inverse.project_point3(Vec3::new(0.0, 0.0, 1.0));
        let (hit, s, t) = kernels::cube_face_coords((far - near).normalize());
        assert_eq!(hit, face);
        assert!((s - 0.5).abs() < 1e-4 && (t - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_capture_projection_is_ninety_degrees() {
        let corner = capture_projection()
            .inverse()
            .project_point3(Vec3::new(1.0, 1.0, 1.0));
        assert!((corner.x / -corner.z - 1.0).abs() < 1e-4);
        assert!((corner.y / -corner.z - 1.0).abs() < 1e-4);
    }
}
