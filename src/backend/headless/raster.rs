//! Fragment kernels and texture sampling for the headless backend.
//!
//! A kernel stands in for the fragment shader of a full-screen or capture
//! pass. It is looked up by the base name of the program label (the part
//! before the first `+`) and evaluated once per covered pixel.

use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};

use super::{HeadlessBackend, HeadlessProgram, Image};
use crate::backend::types::{FilterMode, TextureTarget, UniformValue, WrapMode};
use crate::ibl::kernels;

/// CPU replacement of a fragment shader
pub type FragmentKernel = fn(&FragmentContext<'_>) -> [f32; 4];

/// Inputs visible to a kernel while shading one pixel
pub struct FragmentContext<'a> {
    pub(super) backend: &'a HeadlessBackend,
    pub(super) program: &'a HeadlessProgram,
    pub(super) inverse_view_projection: Option<glam::Mat4>,
    pub(super) uv: Vec2,
}

impl<'a> FragmentContext<'a> {
    /// Viewport-relative coordinate in [0, 1]
    pub fn uv(&self) -> Vec2 {
        self.uv
    }

    /// Normalized device coordinate in [-1, 1]
    pub fn ndc(&self) -> Vec2 {
        self.uv * 2.0 - Vec2::ONE
    }

    pub fn uniform(&self, name: &str) -> Option<&'a UniformValue> {
        self.program.value(name)
    }

    pub fn float(&self, name: &str, default: f32) -> f32 {
        self.uniform(name).and_then(UniformValue::as_f32).unwrap_or(default)
    }

    pub fn int(&self, name: &str, default: i32) -> i32 {
        self.uniform(name).and_then(UniformValue::as_i32).unwrap_or(default)
    }

    /// Direction from the camera through this pixel, using `ubo_per_frame.view_projection`.
    pub fn world_direction(&self) -> Vec3 {
        let ndc = self.ndc();
        match self.inverse_view_projection {
            Some(inverse) => {
                let near = inverse.project_point3(Vec3::new(ndc.x, ndc.y, -1.0));
                let far = inverse.project_point3(Vec3::new(ndc.x, ndc.y, 1.0));
                (far - near).normalize_or_zero()
            }
            None => Vec3::new(ndc.x, ndc.y, -1.0).normalize(),
        }
    }

    /// Sample the 2D texture bound to the unit a sampler uniform points at.
    pub fn sample_2d(&self, sampler: &str, uv: Vec2) -> Vec4 {
        let Some(texture) = self.bound(sampler, TextureTarget::Texture2D) else {
            return Vec4::ZERO;
        };
        match texture.faces.first().and_then(|levels| levels.first()) {
            Some(image) => sample_image(image, uv, texture.desc.mag_filter, texture.desc.wrap),
            None => Vec4::ZERO,
        }
    }

    /// Sample a cube map by direction at an explicit level of detail.
    pub fn sample_cube(&self, sampler: &str, dir: Vec3, lod: f32) -> Vec4 {
        let Some(texture) = self.bound(sampler, TextureTarget::CubeMap) else {
            return Vec4::ZERO;
        };
        let (face, s, t) = kernels::cube_face_coords(dir);
        let Some(levels) = texture.faces.get(face.index()) else {
            return Vec4::ZERO;
        };

        let max_level = match texture.desc.mipmap_filter {
            Some(_) => levels.len().saturating_sub(1) as f32,
            None => 0.0,
        };
        let lod = lod.clamp(0.0, max_level);
        let filter = texture.desc.mag_filter;
        let uv = Vec2::new(s, t);
        let at = |level: usize| {
            levels
                .get(level)
                .map(|image| sample_image(image, uv, filter, WrapMode::ClampToEdge))
                .unwrap_or(Vec4::ZERO)
        };

        match texture.desc.mipmap_filter {
            Some(FilterMode::Linear) => {
                let lower = lod.floor();
                let fraction = lod - lower;
                if fraction > 0.0 {
                    at(lower as usize).lerp(at(lower as usize + 1), fraction)
                } else {
                    at(lower as usize)
                }
            }
            _ => at(lod.round() as usize),
        }
    }

    fn bound(&self, sampler: &str, target: TextureTarget) -> Option<&'a super::HeadlessTexture> {
        let unit = self.int(sampler, 0) as u32;
        let id = self.backend.texture_units.get(&(unit, target))?;
        self.backend.textures.get(id)
    }
}

/// Filtered lookup in one image, `uv` in texture space with row 0 at v = 0.
pub(super) fn sample_image(image: &Image, uv: Vec2, filter: FilterMode, wrap: WrapMode) -> Vec4 {
    let (w, h) = (image.width as i64, image.height as i64);
    let fetch = |x: i64, y: i64| Vec4::from_array(image.texel(wrap_coord(x, w, wrap), wrap_coord(y, h, wrap)));

    match filter {
        FilterMode::Nearest => {
            let x = (uv.x * w as f32).floor() as i64;
            let y = (uv.y * h as f32).floor() as i64;
            fetch(x, y)
        }
        FilterMode::Linear => {
            let x = uv.x * w as f32 - 0.5;
            let y = uv.y * h as f32 - 0.5;
            let (x0, y0) = (x.floor(), y.floor());
            let (fx, fy) = (x - x0, y - y0);
            let (x0, y0) = (x0 as i64, y0 as i64);

            let top = fetch(x0, y0).lerp(fetch(x0 + 1, y0), fx);
            let bottom = fetch(x0, y0 + 1).lerp(fetch(x0 + 1, y0 + 1), fx);
            top.lerp(bottom, fy)
        }
    }
}

fn wrap_coord(c: i64, size: i64, wrap: WrapMode) -> u32 {
    let size = size.max(1);
    let wrapped = match wrap {
        WrapMode::ClampToEdge => c.clamp(0, size - 1),
        WrapMode::Repeat => c.rem_euclid(size),
        WrapMode::MirroredRepeat => {
            let period = c.rem_euclid(2 * size);
            if period < size {
                period
            } else {
                2 * size - 1 - period
            }
        }
    };
    wrapped as u32
}

/// Kernels registered on every new headless backend, keyed by base program name.
pub(super) fn default_kernels() -> Vec<(&'static str, FragmentKernel)> {
    vec![
        ("equirect_to_cube", equirect_to_cube),
        ("irradiance", irradiance),
        ("prefilter", prefilter),
        ("brdf_lut", brdf_lut),
        ("post_copy", post_copy),
        ("post_invert", post_invert),
        ("post_tonemap", post_tonemap),
    ]
}

fn equirect_to_cube(ctx: &FragmentContext<'_>) -> [f32; 4] {
    let uv = kernels::equirect_uv(ctx.world_direction());
    let color = ctx.sample_2d("equirectangular_map", uv);
    color.xyz().extend(1.0).to_array()
}

fn irradiance(ctx: &FragmentContext<'_>) -> [f32; 4] {
    let normal = ctx.world_direction();
    let delta = ctx.float("sample_delta", 0.025).max(1e-3);
    let color = kernels::irradiance(normal, delta, |dir| {
        ctx.sample_cube("environment_map", dir, 0.0).xyz()
    });
    color.extend(1.0).to_array()
}

fn prefilter(ctx: &FragmentContext<'_>) -> [f32; 4] {
    let normal = ctx.world_direction();
    let roughness = ctx.float("roughness", 0.0);
    let samples = ctx.int("sample_count", 1024).max(1) as u32;
    let color = kernels::prefiltered(normal, roughness, samples, |dir| {
        ctx.sample_cube("environment_map", dir, 0.0).xyz()
    });
    color.extend(1.0).to_array()
}

fn brdf_lut(ctx: &FragmentContext<'_>) -> [f32; 4] {
    let uv = ctx.uv();
    let samples = ctx.int("sample_count", 1024).max(1) as u32;
    let scale_bias = kernels::integrate_brdf(uv.x, uv.y, samples);
    [scale_bias.x, scale_bias.y, 0.0, 1.0]
}

fn post_copy(ctx: &FragmentContext<'_>) -> [f32; 4] {
    ctx.sample_2d("input_texture", ctx.uv()).to_array()
}

fn post_invert(ctx: &FragmentContext<'_>) -> [f32; 4] {
    let color = ctx.sample_2d("input_texture", ctx.uv());
    (Vec3::ONE - color.xyz()).extend(color.w).to_array()
}

fn post_tonemap(ctx: &FragmentContext<'_>) -> [f32; 4] {
    let color = ctx.sample_2d("input_texture", ctx.uv());
    let exposed = color.xyz() * ctx.float("exposure", 1.0);
    let mapped = match ctx.int("tonemap_operator", 1) {
        0 => kernels::reinhard_tonemap(exposed),
        1 => kernels::aces_tonemap(exposed),
        _ => exposed.clamp(Vec3::ZERO, Vec3::ONE),
    };
    let gamma = ctx.float("gamma", 2.2).max(1e-3);
    mapped.powf(1.0 / gamma).extend(1.0).to_array()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> Image {
        let mut image = Image::new(2, 2);
        image.set(0, 0, [1.0, 0.0, 0.0, 1.0]);
        image.set(1, 0, [0.0, 1.0, 0.0, 1.0]);
        image.set(0, 1, [0.0, 0.0, 1.0, 1.0]);
        image.set(1, 1, [1.0, 1.0, 1.0, 1.0]);
        image
    }

    #[test]
    fn test_nearest_sampling_picks_texel() {
        let image = checker();
        let value = sample_image(&image, Vec2::new(0.75, 0.25), FilterMode::Nearest, WrapMode::ClampToEdge);
        assert_eq!(value, Vec4::new(0.0, 1.0, 0.0, 1.0));
    }

    #[test]
    fn test_linear_sampling_blends_at_center() {
        let image = checker();
        let value = sample_image(&image, Vec2::splat(0.5), FilterMode::Linear, WrapMode::ClampToEdge);
        assert!((value - Vec4::new(0.5, 0.5, 0.5, 1.0)).abs().max_element() < 1e-6);
    }

    #[test]
    fn test_wrap_modes() {
        assert_eq!(wrap_coord(-1, 4, WrapMode::ClampToEdge), 0);
        assert_eq!(wrap_coord(-1, 4, WrapMode::Repeat), 3);
        assert_eq!(wrap_coord(4, 4, WrapMode::MirroredRepeat), 3);
        assert_eq!(wrap_coord(9, 4, WrapMode::MirroredRepeat), 1);
    }
}
