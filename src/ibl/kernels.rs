//! Per-texel IBL math.
//!
//! These are the integrals the capture shaders evaluate per fragment
//! (LearnOpenGL, "Diffuse irradiance" and "Specular IBL"). The headless backend
//! runs them directly; the GLSL versions live in `src/shaders/`.

use std::f32::consts::{FRAC_1_PI, PI};

use glam::{Vec2, Vec3};

use crate::backend::types::CubeFace;

/// Equirectangular texture coordinate for a world direction.
pub fn equirect_uv(dir: Vec3) -> Vec2 {
    let inv_atan = Vec2::new(0.5 * FRAC_1_PI, FRAC_1_PI);
    Vec2::new(dir.z.atan2(dir.x), dir.y.clamp(-1.0, 1.0).asin()) * inv_atan + 0.5
}

/// World direction through a cube face at face coordinates `s`, `t` in [-1, 1].
///
/// Inverse of the GL face selection rule: `t` grows along the rows of the face
/// as stored, which is downwards in world space for the side faces.
pub fn cube_direction(face: CubeFace, s: f32, t: f32) -> Vec3 {
    let dir = match face {
        CubeFace::PositiveX => Vec3::new(1.0, -t, -s),
        CubeFace::NegativeX => Vec3::new(-1.0, -t, s),
        CubeFace::PositiveY => Vec3::new(s, 1.0, t),
        CubeFace::NegativeY => Vec3::new(s, -1.0, -t),
        CubeFace::PositiveZ => Vec3::new(s, -t, 1.0),
        CubeFace::NegativeZ => Vec3::new(-s, -t, -1.0),
    };
    dir.normalize()
}

/// Face and face coordinates (both in [0, 1]) hit by a direction.
pub fn cube_face_coords(dir: Vec3) -> (CubeFace, f32, f32) {
    let abs = dir.abs();
    let (face, sc, tc, ma) = if abs.x >= abs.y && abs.x >= abs.z {
        if dir.x >= 0.0 {
            (CubeFace::PositiveX, -dir.z, -dir.y, abs.x)
        } else {
            (CubeFace::NegativeX, dir.z, -dir.y, abs.x)
        }
    } else if abs.y >= abs.z {
        if dir.y >= 0.0 {
            (CubeFace::PositiveY, dir.x, dir.z, abs.y)
        } else {
            (CubeFace::NegativeY, dir.x, -dir.z, abs.y)
        }
    } else if dir.z >= 0.0 {
        (CubeFace::PositiveZ, dir.x, -dir.y, abs.z)
    } else {
        (CubeFace::NegativeZ, -dir.x, -dir.y, abs.z)
    };
    let ma = ma.max(f32::MIN_POSITIVE);
    (face, 0.5 * (sc / ma + 1.0), 0.5 * (tc / ma + 1.0))
}

/// Cosine-weighted hemisphere integral around `normal`.
///
/// Uniform grid over (phi, theta) with step `sample_delta`, weighted by
/// `cos(theta) * sin(theta)` and scaled by PI.
pub fn irradiance<F: Fn(Vec3) -> Vec3>(normal: Vec3, sample_delta: f32, sample_env: F) -> Vec3 {
    let (right, up) = tangent_frame(normal, Vec3::Y);

    let mut irradiance = Vec3::ZERO;
    let mut sample_count = 0.0f32;

    let mut phi = 0.0f32;
    while phi < 2.0 * PI {
        let mut theta = 0.0f32;
        while theta < 0.5 * PI {
            let tangent_sample = Vec3::new(
                theta.sin() * phi.cos(),
                theta.sin() * phi.sin(),
                theta.cos(),
            );
            let sample_vec =
                tangent_sample.x * right + tangent_sample.y * up + tangent_sample.z * normal;

            irradiance += sample_env(sample_vec) * theta.cos() * theta.sin();
            sample_count += 1.0;

            theta += sample_delta;
        }
        phi += sample_delta;
    }

    PI * irradiance / sample_count.max(1.0)
}

/// GGX-prefiltered radiance around `normal` for one roughness (N = V = R).
pub fn prefiltered<F: Fn(Vec3) -> Vec3>(
    normal: Vec3,
    roughness: f32,
    sample_count: u32,
    sample_env: F,
) -> Vec3 {
    let v = normal;
    let mut prefiltered = Vec3::ZERO;
    let mut total_weight = 0.0;

    for i in 0..sample_count {
        let xi = hammersley(i, sample_count);
        let h = importance_sample_ggx(xi, normal, roughness);
        let l = (2.0 * v.dot(h) * h - v).normalize();

        let n_dot_l = normal.dot(l);
        if n_dot_l > 0.0 {
            prefiltered += sample_env(l) * n_dot_l;
            total_weight += n_dot_l;
        }
    }

    if total_weight > 0.0 {
        prefiltered / total_weight
    } else {
        sample_env(normal)
    }
}

/// Split-sum BRDF integration: scale and bias applied to F0.
pub fn integrate_brdf(n_dot_v: f32, roughness: f32, sample_count: u32) -> Vec2 {
    let n_dot_v = n_dot_v.max(1e-4);
    let v = Vec3::new((1.0 - n_dot_v * n_dot_v).sqrt(), 0.0, n_dot_v);
    let n = Vec3::Z;

    let mut a = 0.0f32;
    let mut b = 0.0f32;

    for i in 0..sample_count {
        let xi = hammersley(i, sample_count);
        let h = importance_sample_ggx(xi, n, roughness);
        let l = (2.0 * v.dot(h) * h - v).normalize();

        let n_dot_l = l.z.max(0.0);
        let n_dot_h = h.z.max(0.0);
        let v_dot_h = v.dot(h).max(0.0);

        if n_dot_l > 0.0 {
            let g = geometry_smith(n_dot_v, n_dot_l, roughness);
            let g_vis = (g * v_dot_h) / (n_dot_h * n_dot_v).max(1e-6);
            let fc = (1.0 - v_dot_h).powi(5);

            a += (1.0 - fc) * g_vis;
            b += fc * g_vis;
        }
    }

    Vec2::new(a, b) / sample_count.max(1) as f32
}

/// Schlick-GGX geometry term with the IBL remapping `k = a^2 / 2`.
fn geometry_schlick_ggx(n_dot_v: f32, roughness: f32) -> f32 {
    let k = (roughness * roughness) / 2.0;
    n_dot_v / (n_dot_v * (1.0 - k) + k)
}

fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    geometry_schlick_ggx(n_dot_v, roughness) * geometry_schlick_ggx(n_dot_l, roughness)
}

/// Hammersley sequence for low-discrepancy sampling.
pub fn hammersley(i: u32, n: u32) -> Vec2 {
    Vec2::new(i as f32 / n as f32, radical_inverse_vdc(i))
}

fn radical_inverse_vdc(mut bits: u32) -> f32 {
    bits = bits.rotate_right(16);
    bits = ((bits & 0x55555555) << 1) | ((bits & 0xAAAAAAAA) >> 1);
    bits = ((bits & 0x33333333) << 2) | ((bits & 0xCCCCCCCC) >> 2);
    bits = ((bits & 0x0F0F0F0F) << 4) | ((bits & 0xF0F0F0F0) >> 4);
    bits = ((bits & 0x00FF00FF) << 8) | ((bits & 0xFF00FF00) >> 8);
    bits as f32 * 2.328_306_4e-10
}

/// GGX importance sampling of the half vector around `n`.
pub fn importance_sample_ggx(xi: Vec2, n: Vec3, roughness: f32) -> Vec3 {
    let a = roughness * roughness;

    let phi = 2.0 * PI * xi.x;
    let cos_theta = ((1.0 - xi.y) / (1.0 + (a * a - 1.0) * xi.y)).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();

    let h = Vec3::new(phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta);
    let (tangent, bitangent) = tangent_frame(n, Vec3::Z);

    (tangent * h.x + bitangent * h.y + n * h.z).normalize()
}

fn tangent_frame(n: Vec3, preferred_up: Vec3) -> (Vec3, Vec3) {
    let up = if n.dot(preferred_up).abs() < 0.999 {
        preferred_up
    } else if preferred_up == Vec3::X {
        Vec3::Z
    } else {
        Vec3::X
    };
    let tangent = up.cross(n).normalize();
    let bitangent = n.cross(tangent);
    (tangent, bitangent)
}

/// ACES filmic curve (Narkowicz fit).
pub fn aces_tonemap(color: Vec3) -> Vec3 {
    let (a, b, c, d, e) = (2.51, 0.03, 2.43, 0.59, 0.14);
    ((color * (a * color + b)) / (color * (c * color + d) + e)).clamp(Vec3::ZERO, Vec3::ONE)
}

pub fn reinhard_tonemap(color: Vec3) -> Vec3 {
    color / (color + Vec3::ONE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_direction_round_trips_through_face_selection() {
        for face in CubeFace::ALL {
            for &(s, t) in &[(-0.75f32, -0.25f32), (0.5, 0.5), (0.0, 0.9)] {
                let dir = cube_direction(face, s, t);
                let (hit, u, v) = cube_face_coords(dir);
                assert_eq!(hit, face);
                assert!((u * 2.0 - 1.0 - s).abs() < 1e-5, "{face:?} s");
                assert!((v * 2.0 - 1.0 - t).abs() < 1e-5, "{face:?} t");
            }
        }
    }

    #[test]
    fn test_irradiance_of_uniform_environment_is_isotropic() {
        let color = Vec3::new(0.5, 1.0, 2.0);
        let up = irradiance(Vec3::Y, 0.1, |_| color);
        let side = irradiance(Vec3::X, 0.1, |_| color);
        assert!((up - side).abs().max_element() < 1e-5);
        // The cosine lobe integrates to one over the hemisphere
        assert!((up.x / color.x - 1.0).abs() < 0.1, "{up:?}");
    }

    #[test]
    fn test_prefilter_at_zero_roughness_is_mirror() {
        let env = |d: Vec3| d.abs();
        let n = Vec3::new(0.3, 0.8, -0.5).normalize();
        let result = prefiltered(n, 0.0, 16, env);
        assert!((result - n.abs()).abs().max_element() < 1e-4);
    }

    #[test]
    fn test_brdf_lut_is_bounded() {
        for &(n_dot_v, roughness) in &[(0.1, 0.1), (0.5, 0.5), (1.0, 1.0)] {
            let value = integrate_brdf(n_dot_v, roughness, 64);
            assert!(value.x >= 0.0 && value.y >= 0.0);
            assert!(value.x + value.y <= 1.0 + 1e-3, "{value:?}");
        }
    }

    #[test]
    fn test_equirect_uv_center_and_poles() {
        let uv = equirect_uv(Vec3::X);
        assert!((uv - Vec2::new(0.5, 0.5)).length() < 1e-6);
        assert!((equirect_uv(Vec3::Y).y - 1.0).abs() < 1e-6);
        assert!(equirect_uv(-Vec3::Y).y.abs() < 1e-6);
    }

    #[test]
    fn test_tonemap_operators_stay_in_range() {
        let hot = Vec3::splat(50.0);
        assert!(aces_tonemap(hot).max_element() <= 1.0);
        assert!(reinhard_tonemap(hot).max_element() < 1.0);
    }
}
