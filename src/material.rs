//! Materials: which shader variant to draw with and what to feed it.
//!
//! A material picks a [`ShaderSource`], requests feature flags from the maps
//! it carries and, on activation, binds its textures to the fixed sampler
//! units and pushes its uniforms. Maps that are still loading sample the
//! fallback textures until their [`AssetSlot`] resolves.

use std::cell::RefCell;
use std::rc::Rc;

use glam::{Vec3, Vec4};
use image::RgbaImage;

use crate::backend::{BlendMode, CullMode, FilterMode, GraphicsBackend, RenderState, UniformValue};
use crate::error::RenderResult;
use crate::ibl::IblEnvironment;
use crate::loader::AssetSlot;
use crate::resources::texture::{FallbackTextures, Texture2D, TextureOptions};
use crate::shader::{Shader, ShaderFeatures, ShaderKind, ShaderSource};

/// Materials are shared between mesh instances and mutated in place.
pub type SharedMaterial = Rc<RefCell<Material>>;

/// Directional light and ambient term pushed to lit materials
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lighting {
    /// Direction the light travels, world space
    pub direction: Vec3,
    pub color: Vec3,
    pub ambient: Vec3,
}

impl Default for Lighting {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.4, -1.0, -0.3).normalize(),
            color: Vec3::ONE,
            ambient: Vec3::splat(0.03),
        }
    }
}

/// A texture input that may still be loading
#[derive(Debug, Clone, Default)]
pub enum TextureSlot {
    #[default]
    Empty,
    Pending(AssetSlot<RgbaImage>),
    Ready(Rc<Texture2D>),
}

impl TextureSlot {
    pub fn is_empty(&self) -> bool {
        matches!(self, TextureSlot::Empty)
    }

    pub fn texture(&self) -> Option<&Rc<Texture2D>> {
        match self {
            TextureSlot::Ready(texture) => Some(texture),
            _ => None,
        }
    }

    /// Upload a pending image once it has arrived.
    ///
    /// A failed load empties the slot.
    pub fn poll(&mut self, backend: &mut dyn GraphicsBackend, srgb: bool) -> RenderResult<()> {
        let TextureSlot::Pending(asset) = self else {
            return Ok(());
        };
        if asset.is_failed() {
            log::warn!(
                "Texture '{}' will not be used: {}",
                asset.name(),
                asset.error_message().unwrap_or_default()
            );
            *self = TextureSlot::Empty;
            return Ok(());
        }
        let options = TextureOptions::default()
            .with_flip_y(true)
            .with_mipmaps(FilterMode::Linear);
        let name = asset.name().to_string();
        let uploaded = asset.with_ready(|image| {
            Texture2D::from_rgba8(
                backend,
                &name,
                image.width(),
                image.height(),
                image.as_raw(),
                srgb,
                options,
            )
        });
        if let Some(texture) = uploaded {
            *self = TextureSlot::Ready(Rc::new(texture?));
        }
        Ok(())
    }

    /// Bind the texture, or the white fallback, to the unit of `sampler`.
    fn bind(
        &self,
        backend: &mut dyn GraphicsBackend,
        shader: &Shader,
        sampler: &str,
        fallbacks: &FallbackTextures,
    ) {
        let Some(unit) = shader.sampler_unit(sampler) else {
            return;
        };
        match self.texture() {
            Some(texture) => texture.bind(backend, unit),
            None => fallbacks.white().bind(backend, unit),
        }
    }
}

impl From<Rc<Texture2D>> for TextureSlot {
    fn from(texture: Rc<Texture2D>) -> Self {
        TextureSlot::Ready(texture)
    }
}

impl From<AssetSlot<RgbaImage>> for TextureSlot {
    fn from(asset: AssetSlot<RgbaImage>) -> Self {
        TextureSlot::Pending(asset)
    }
}

/// Blinn-Phong lit surface
#[derive(Debug, Clone)]
pub struct BasicMaterial {
    pub color: Vec4,
    pub specular: Vec3,
    pub shininess: f32,
    pub albedo_map: TextureSlot,
    pub vertex_colors: bool,
    pub flat_shading: bool,
    pub shadow_map: Option<Rc<Texture2D>>,
}

impl Default for BasicMaterial {
    fn default() -> Self {
        Self {
            color: Vec4::ONE,
            specular: Vec3::splat(0.5),
            shininess: 32.0,
            albedo_map: TextureSlot::Empty,
            vertex_colors: false,
            flat_shading: false,
            shadow_map: None,
        }
    }
}

/// Flat color, optionally textured and alpha tested
#[derive(Debug, Clone)]
pub struct UnlitMaterial {
    pub color: Vec4,
    pub albedo_map: TextureSlot,
    pub alpha_cutoff: Option<f32>,
    pub vertex_colors: bool,
}

impl Default for UnlitMaterial {
    fn default() -> Self {
        Self {
            color: Vec4::ONE,
            albedo_map: TextureSlot::Empty,
            alpha_cutoff: None,
            vertex_colors: false,
        }
    }
}

/// Metallic-roughness physically based surface
#[derive(Debug, Clone)]
pub struct PbrMaterial {
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub normal_scale: f32,
    pub occlusion_strength: f32,
    pub alpha_cutoff: Option<f32>,
    pub albedo_map: TextureSlot,
    pub normal_map: TextureSlot,
    pub metallic_roughness_map: TextureSlot,
    pub occlusion_map: TextureSlot,
    pub emissive_map: TextureSlot,
    /// Baked image-based lighting, enables the `IBL` variant
    pub environment: Option<Rc<IblEnvironment>>,
    pub shadow_map: Option<Rc<Texture2D>>,
    pub vertex_colors: bool,
    pub flat_shading: bool,
}

impl Default for PbrMaterial {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            emissive: Vec3::ZERO,
            normal_scale: 1.0,
            occlusion_strength: 1.0,
            alpha_cutoff: None,
            albedo_map: TextureSlot::Empty,
            normal_map: TextureSlot::Empty,
            metallic_roughness_map: TextureSlot::Empty,
            occlusion_map: TextureSlot::Empty,
            emissive_map: TextureSlot::Empty,
            environment: None,
            shadow_map: None,
            vertex_colors: false,
            flat_shading: false,
        }
    }
}

/// Ground grid fading out with distance
#[derive(Debug, Clone)]
pub struct GridMaterial {
    pub color: Vec4,
    pub cell_size: f32,
    pub fade_distance: f32,
}

impl Default for GridMaterial {
    fn default() -> Self {
        Self {
            color: Vec4::new(0.5, 0.5, 0.5, 1.0),
            cell_size: 1.0,
            fade_distance: 50.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LineMaterial {
    pub color: Vec4,
    pub vertex_colors: bool,
}

impl Default for LineMaterial {
    fn default() -> Self {
        Self {
            color: Vec4::ONE,
            vertex_colors: false,
        }
    }
}

/// Cel shading with a fixed number of light bands
#[derive(Debug, Clone)]
pub struct ToonMaterial {
    pub color: Vec4,
    pub bands: f32,
    pub albedo_map: TextureSlot,
}

impl Default for ToonMaterial {
    fn default() -> Self {
        Self {
            color: Vec4::ONE,
            bands: 4.0,
            albedo_map: TextureSlot::Empty,
        }
    }
}

/// Environment cube drawn around the camera at the far plane
#[derive(Debug, Clone)]
pub struct SkyboxMaterial {
    pub environment: Rc<IblEnvironment>,
    /// Mip level of the environment to show, blurs the background when > 0
    pub lod: f32,
    pub exposure: f32,
}

impl SkyboxMaterial {
    pub fn new(environment: Rc<IblEnvironment>) -> Self {
        Self {
            environment,
            lod: 0.0,
            exposure: 1.0,
        }
    }
}

/// User shader with explicit uniforms and sampler inputs
#[derive(Debug, Clone)]
pub struct CustomMaterial {
    pub source: ShaderSource,
    pub features: ShaderFeatures,
    pub uniforms: Vec<(String, UniformValue)>,
    pub textures: Vec<(String, TextureSlot)>,
}

impl CustomMaterial {
    pub fn new(source: ShaderSource) -> Self {
        Self {
            source,
            features: ShaderFeatures::empty(),
            uniforms: Vec::new(),
            textures: Vec::new(),
        }
    }

    pub fn with_uniform(mut self, name: &str, value: impl Into<UniformValue>) -> Self {
        self.uniforms.push((name.to_string(), value.into()));
        self
    }

    pub fn with_texture(mut self, sampler: &str, texture: impl Into<TextureSlot>) -> Self {
        self.textures.push((sampler.to_string(), texture.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub enum MaterialKind {
    Basic(BasicMaterial),
    BasicUnlit(UnlitMaterial),
    Pbr(PbrMaterial),
    Grid(GridMaterial),
    Line(LineMaterial),
    Toon(ToonMaterial),
    Skybox(SkyboxMaterial),
    Custom(CustomMaterial),
    /// Draws nothing; used by passes that bind their own program
    Empty,
}

impl MaterialKind {
    fn render_state(&self) -> RenderState {
        match self {
            MaterialKind::Grid(_) => RenderState {
                depth_write: false,
                cull: CullMode::None,
                blend: Some(BlendMode::Alpha),
                ..RenderState::default()
            },
            MaterialKind::Line(_) => RenderState {
                cull: CullMode::None,
                blend: Some(BlendMode::Alpha),
                ..RenderState::default()
            },
            MaterialKind::Skybox(_) => RenderState {
                depth_write: false,
                cull: CullMode::None,
                ..RenderState::default()
            },
            MaterialKind::BasicUnlit(unlit) if unlit.color.w < 1.0 => RenderState {
                blend: Some(BlendMode::Alpha),
                ..RenderState::default()
            },
            _ => RenderState::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Material {
    pub label: String,
    pub kind: MaterialKind,
    pub render_state: RenderState,
}

impl Material {
    pub fn new(label: &str, kind: MaterialKind) -> Self {
        let render_state = kind.render_state();
        Self {
            label: label.to_string(),
            kind,
            render_state,
        }
    }

    pub fn empty() -> Self {
        Self::new("empty", MaterialKind::Empty)
    }

    pub fn basic(material: BasicMaterial) -> Self {
        Self::new("basic", MaterialKind::Basic(material))
    }

    pub fn unlit(material: UnlitMaterial) -> Self {
        Self::new("basic_unlit", MaterialKind::BasicUnlit(material))
    }

    pub fn pbr(material: PbrMaterial) -> Self {
        Self::new("pbr", MaterialKind::Pbr(material))
    }

    pub fn grid(material: GridMaterial) -> Self {
        Self::new("grid", MaterialKind::Grid(material))
    }

    pub fn line(material: LineMaterial) -> Self {
        Self::new("line", MaterialKind::Line(material))
    }

    pub fn toon(material: ToonMaterial) -> Self {
        Self::new("toon", MaterialKind::Toon(material))
    }

    pub fn skybox(material: SkyboxMaterial) -> Self {
        Self::new("skybox", MaterialKind::Skybox(material))
    }

    pub fn custom(label: &str, material: CustomMaterial) -> Self {
        Self::new(label, MaterialKind::Custom(material))
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn with_render_state(mut self, render_state: RenderState) -> Self {
        self.render_state = render_state;
        self
    }

    pub fn shared(self) -> SharedMaterial {
        Rc::new(RefCell::new(self))
    }

    /// Base source of this material, `None` for [`MaterialKind::Empty`].
    pub fn shader_source(&self) -> Option<ShaderSource> {
        let kind = match &self.kind {
            MaterialKind::Basic(_) => ShaderKind::Basic,
            MaterialKind::BasicUnlit(_) => ShaderKind::BasicUnlit,
            MaterialKind::Pbr(_) => ShaderKind::Pbr,
            MaterialKind::Grid(_) => ShaderKind::Grid,
            MaterialKind::Line(_) => ShaderKind::Line,
            MaterialKind::Skybox(_) => ShaderKind::Skybox,
            MaterialKind::Toon(_) => {
                return Some(ShaderKind::Toon.source().with_forced(ShaderFeatures::FLAT_SHADING))
            }
            MaterialKind::Custom(custom) => return Some(custom.source.clone()),
            MaterialKind::Empty => return None,
        };
        Some(kind.source())
    }

    /// Flags implied by the maps and switches this material carries.
    pub fn requested_features(&self) -> ShaderFeatures {
        fn map(slot: &TextureSlot, flag: ShaderFeatures) -> ShaderFeatures {
            if slot.is_empty() {
                ShaderFeatures::empty()
            } else {
                flag
            }
        }

        let mut features = ShaderFeatures::empty();
        match &self.kind {
            MaterialKind::Basic(basic) => {
                features |= map(&basic.albedo_map, ShaderFeatures::ALBEDO_MAP);
                features.set(ShaderFeatures::VERTEX_COLORS, basic.vertex_colors);
                features.set(ShaderFeatures::FLAT_SHADING, basic.flat_shading);
                features.set(ShaderFeatures::SHADOWS, basic.shadow_map.is_some());
            }
            MaterialKind::BasicUnlit(unlit) => {
                features |= map(&unlit.albedo_map, ShaderFeatures::ALBEDO_MAP);
                features.set(ShaderFeatures::ALPHA_TEST, unlit.alpha_cutoff.is_some());
                features.set(ShaderFeatures::VERTEX_COLORS, unlit.vertex_colors);
            }
            MaterialKind::Pbr(pbr) => {
                features |= map(&pbr.albedo_map, ShaderFeatures::ALBEDO_MAP);
                features |= map(&pbr.normal_map, ShaderFeatures::NORMAL_MAP);
                features |= map(&pbr.metallic_roughness_map, ShaderFeatures::METALLIC_ROUGHNESS_MAP);
                features |= map(&pbr.occlusion_map, ShaderFeatures::OCCLUSION_MAP);
                features |= map(&pbr.emissive_map, ShaderFeatures::EMISSIVE_MAP);
                features.set(ShaderFeatures::IBL, pbr.environment.is_some());
                features.set(ShaderFeatures::SHADOWS, pbr.shadow_map.is_some());
                features.set(ShaderFeatures::ALPHA_TEST, pbr.alpha_cutoff.is_some());
                features.set(ShaderFeatures::VERTEX_COLORS, pbr.vertex_colors);
                features.set(ShaderFeatures::FLAT_SHADING, pbr.flat_shading);
            }
            MaterialKind::Line(line) => {
                features.set(ShaderFeatures::VERTEX_COLORS, line.vertex_colors);
            }
            MaterialKind::Toon(toon) => features |= map(&toon.albedo_map, ShaderFeatures::ALBEDO_MAP),
            MaterialKind::Custom(custom) => features |= custom.features,
            MaterialKind::Grid(_) | MaterialKind::Skybox(_) | MaterialKind::Empty => {}
        }
        features
    }

    /// Bind textures, push uniforms and apply the render state.
    ///
    /// `shader` must be the variant selected for this material and in use.
    pub fn activate(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        shader: &Shader,
        fallbacks: &FallbackTextures,
        lighting: &Lighting,
    ) -> RenderResult<()> {
        log::trace!("Material '{}': activate with '{}'", self.label, shader.name());
        backend.set_render_state(&self.render_state);

        match &mut self.kind {
            MaterialKind::Basic(basic) => {
                basic.albedo_map.poll(backend, true)?;
                basic.albedo_map.bind(backend, shader, "albedo_map", fallbacks);
                bind_shadow_map(backend, shader, basic.shadow_map.as_deref(), fallbacks);
                shader.set(backend, "base_color", basic.color);
                shader.set(backend, "specular_color", basic.specular);
                shader.set(backend, "shininess", basic.shininess);
                set_lighting(backend, shader, lighting);
            }
            MaterialKind::BasicUnlit(unlit) => {
                unlit.albedo_map.poll(backend, true)?;
                unlit.albedo_map.bind(backend, shader, "albedo_map", fallbacks);
                shader.set(backend, "base_color", unlit.color);
                shader.set(backend, "alpha_cutoff", unlit.alpha_cutoff.unwrap_or(0.5));
            }
            MaterialKind::Pbr(pbr) => {
                for (slot, sampler, srgb) in [
                    (&mut pbr.albedo_map, "albedo_map", true),
                    (&mut pbr.normal_map, "normal_map", false),
                    (&mut pbr.metallic_roughness_map, "metallic_roughness_map", false),
                    (&mut pbr.occlusion_map, "occlusion_map", false),
                    (&mut pbr.emissive_map, "emissive_map", true),
                ] {
                    slot.poll(backend, srgb)?;
                    slot.bind(backend, shader, sampler, fallbacks);
                }
                if let Some(environment) = &pbr.environment {
                    environment.bind(backend, shader);
                }
                bind_shadow_map(backend, shader, pbr.shadow_map.as_deref(), fallbacks);
                shader.set(backend, "base_color", pbr.base_color);
                shader.set(backend, "metallic", pbr.metallic);
                shader.set(backend, "roughness", pbr.roughness);
                shader.set(backend, "emissive", pbr.emissive);
                shader.set(backend, "normal_scale", pbr.normal_scale);
                shader.set(backend, "occlusion_strength", pbr.occlusion_strength);
                shader.set(backend, "alpha_cutoff", pbr.alpha_cutoff.unwrap_or(0.5));
                set_lighting(backend, shader, lighting);
            }
            MaterialKind::Grid(grid) => {
                shader.set(backend, "grid_color", grid.color);
                shader.set(backend, "cell_size", grid.cell_size);
                shader.set(backend, "fade_distance", grid.fade_distance);
            }
            MaterialKind::Line(line) => {
                shader.set(backend, "line_color", line.color);
            }
            MaterialKind::Toon(toon) => {
                toon.albedo_map.poll(backend, true)?;
                toon.albedo_map.bind(backend, shader, "albedo_map", fallbacks);
                shader.set(backend, "base_color", toon.color);
                shader.set(backend, "bands", toon.bands);
                set_lighting(backend, shader, lighting);
            }
            MaterialKind::Skybox(skybox) => {
                if let Some(unit) = shader.sampler_unit("environment_map") {
                    skybox.environment.environment().bind(backend, unit);
                }
                shader.set(backend, "lod", skybox.lod);
                shader.set(backend, "exposure", skybox.exposure);
            }
            MaterialKind::Custom(custom) => {
                for (sampler, slot) in &mut custom.textures {
                    slot.poll(backend, true)?;
                    slot.bind(backend, shader, sampler, fallbacks);
                }
                for (name, value) in &custom.uniforms {
                    if !shader.set(backend, name, value.clone()) {
                        log::trace!("Material '{}': '{}' not accepted", self.label, name);
                    }
                }
            }
            MaterialKind::Empty => {}
        }
        Ok(())
    }

    /// Undo state changes made by [`Material::activate`].
    pub fn cleanup(&self, backend: &mut dyn GraphicsBackend) {
        if self.render_state != RenderState::default() {
            log::trace!("Material '{}': restore default render state", self.label);
            backend.set_render_state(&RenderState::default());
        }
    }
}

fn set_lighting(backend: &mut dyn GraphicsBackend, shader: &Shader, lighting: &Lighting) {
    shader.set(backend, "light_direction", lighting.direction);
    shader.set(backend, "light_color", lighting.color);
    shader.set(backend, "ambient_color", lighting.ambient);
}

fn bind_shadow_map(
    backend: &mut dyn GraphicsBackend,
    shader: &Shader,
    shadow_map: Option<&Texture2D>,
    fallbacks: &FallbackTextures,
) {
    let Some(unit) = shader.sampler_unit("shadow_map") else {
        return;
    };
    shadow_map.unwrap_or(fallbacks.white()).bind(backend, unit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessBackend, TextureTarget};
    use crate::loader::AssetSlot;
    use rstest::rstest;

    fn compile(backend: &mut HeadlessBackend, material: &Material) -> Shader {
        let source = material.shader_source().unwrap();
        let shader = Shader::new(backend, &source.specialize(material.requested_features())).unwrap();
        backend.use_program(Some(shader.program()));
        shader
    }

    #[test]
    fn test_toon_forces_flat_shading() {
        let material = Material::toon(ToonMaterial::default());
        let source = material.shader_source().unwrap();
        assert_eq!(
            source.specialized_name(material.requested_features()),
            "toon+FLAT_SHADING"
        );
    }

    #[rstest]
    #[case::plain(PbrMaterial::default(), "pbr")]
    #[case::roughness_map(
        PbrMaterial {
            metallic_roughness_map: TextureSlot::Pending(AssetSlot::new("mr.png")),
            ..PbrMaterial::default()
        },
        "pbr+METALLIC_ROUGHNESS_MAP"
    )]
    #[case::alpha_and_colors(
        PbrMaterial { alpha_cutoff: Some(0.3), vertex_colors: true, ..PbrMaterial::default() },
        "pbr+ALPHA_TEST+VERTEX_COLORS"
    )]
    fn test_pbr_variant_names(#[case] pbr: PbrMaterial, #[case] expected: &str) {
        let material = Material::pbr(pbr);
        let source = material.shader_source().unwrap();
        assert_eq!(source.specialized_name(material.requested_features()), expected);
    }

    #[test]
    fn test_empty_material_has_no_source() {
        assert!(Material::empty().shader_source().is_none());
    }

    #[test]
    fn test_activate_pushes_uniforms() {
        let mut backend = HeadlessBackend::new(4, 4);
        let fallbacks = FallbackTextures::new(&mut backend).unwrap();
        let mut material = Material::pbr(PbrMaterial {
            metallic: 0.75,
            ..PbrMaterial::default()
        });
        let shader = compile(&mut backend, &material);

        material
            .activate(&mut backend, &shader, &fallbacks, &Lighting::default())
            .unwrap();
        assert_eq!(
            backend.uniform_value(shader.program(), "metallic"),
            Some(&UniformValue::Float(0.75))
        );
        assert_eq!(
            backend.uniform_value(shader.program(), "light_color"),
            Some(&UniformValue::Vec3(Vec3::ONE))
        );
    }

    #[test]
    fn test_pending_map_uses_fallback_until_loaded() {
        let mut backend = HeadlessBackend::new(4, 4);
        let fallbacks = FallbackTextures::new(&mut backend).unwrap();
        let asset = AssetSlot::new("albedo.png");
        let mut material = Material::basic(BasicMaterial {
            albedo_map: TextureSlot::Pending(asset.clone()),
            ..BasicMaterial::default()
        });
        assert!(material.requested_features().contains(ShaderFeatures::ALBEDO_MAP));
        let shader = compile(&mut backend, &material);

        material
            .activate(&mut backend, &shader, &fallbacks, &Lighting::default())
            .unwrap();
        assert_eq!(
            backend.bound_texture(0, TextureTarget::Texture2D),
            Some(fallbacks.white().handle())
        );

        asset.resolve(RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255])));
        material
            .activate(&mut backend, &shader, &fallbacks, &Lighting::default())
            .unwrap();
        let MaterialKind::Basic(basic) = &material.kind else {
            unreachable!()
        };
        let texture = basic.albedo_map.texture().unwrap();
        assert_eq!(
            backend.bound_texture(0, TextureTarget::Texture2D),
            Some(texture.handle())
        );
    }

    #[test]
    fn test_failed_map_is_dropped() {
        let mut backend = HeadlessBackend::new(4, 4);
        let asset: AssetSlot<RgbaImage> = AssetSlot::new("missing.png");
        let mut slot = TextureSlot::Pending(asset.clone());
        asset.fail(crate::error::LoadError::Failed {
            name: "missing.png".to_string(),
            reason: "404".to_string(),
        });
        slot.poll(&mut backend, true).unwrap();
        assert!(slot.is_empty());
    }

    #[test]
    fn test_grid_cleanup_restores_default_state() {
        let mut backend = HeadlessBackend::new(4, 4);
        let fallbacks = FallbackTextures::new(&mut backend).unwrap();
        let mut material = Material::grid(GridMaterial::default());
        let shader = compile(&mut backend, &material);

        material
            .activate(&mut backend, &shader, &fallbacks, &Lighting::default())
            .unwrap();
        assert_eq!(backend.render_state().blend, Some(BlendMode::Alpha));
        material.cleanup(&mut backend);
        assert_eq!(backend.render_state(), RenderState::default());
    }
}
