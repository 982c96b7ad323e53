//! Lantern - a WebGL2-style real-time 3D rendering core
//!
//! The crate drives a GL-like [`backend::GraphicsBackend`]:
//! - **glow**: WebGL2 in the browser, OpenGL ES 3.0 / GL 3.3 on native
//! - **headless**: CPU only, for tests and tooling
//!
//! # Features
//! - Shader variants specialized by feature flags and cached per renderer
//! - Shared per-frame / per-model uniform blocks
//! - Reference-counted meshes with multi-material groups and instancing
//! - A render queue with MSAA resolve and ping-pong post-processing
//! - Image-based lighting baked from Radiance HDR environments

pub mod backend;
pub mod error;
pub mod ibl;
pub mod loader;
pub mod material;
pub mod pipeline;
pub mod renderer;
pub mod resources;
pub mod shader;

// Web-specific modules
#[cfg(all(target_arch = "wasm32", feature = "glow-backend"))]
pub mod web;

pub use error::{LoadError, RenderError, RenderResult, ResourceError};
pub use ibl::IblEnvironment;
pub use material::{Material, MaterialKind, SharedMaterial};
pub use pipeline::{PostEffect, PostProcessPass, RenderCommand, RenderPass, RenderQueue};
pub use renderer::{DrawCall, Renderer, RendererStats};

/// Sizes and sample counts of the image-based lighting bake
#[derive(Debug, Clone, PartialEq)]
pub struct IblConfig {
    /// Face size of the environment cube
    pub environment_size: u32,
    /// Face size of the diffuse irradiance cube
    pub irradiance_size: u32,
    /// Angular step of the irradiance integral, in radians
    pub irradiance_sample_delta: f32,
    /// Face size of mip 0 of the specular prefilter cube
    pub prefilter_size: u32,
    pub prefilter_mip_levels: u32,
    /// GGX samples per prefilter texel
    pub prefilter_sample_count: u32,
    pub brdf_lut_size: u32,
    pub brdf_sample_count: u32,
}

impl Default for IblConfig {
    fn default() -> Self {
        Self {
            environment_size: 512,
            irradiance_size: 32,
            irradiance_sample_delta: 0.025,
            prefilter_size: 128,
            prefilter_mip_levels: 5,
            prefilter_sample_count: 1024,
            brdf_lut_size: 512,
            brdf_sample_count: 1024,
        }
    }
}

impl IblConfig {
    pub fn with_environment_size(mut self, size: u32) -> Self {
        self.environment_size = size;
        self
    }

    pub fn with_irradiance(mut self, size: u32, sample_delta: f32) -> Self {
        self.irradiance_size = size;
        self.irradiance_sample_delta = sample_delta;
        self
    }

    pub fn with_prefilter(mut self, size: u32, mip_levels: u32, sample_count: u32) -> Self {
        self.prefilter_size = size;
        self.prefilter_mip_levels = mip_levels.max(1);
        self.prefilter_sample_count = sample_count;
        self
    }

    pub fn with_brdf_lut(mut self, size: u32, sample_count: u32) -> Self {
        self.brdf_lut_size = size;
        self.brdf_sample_count = sample_count;
        self
    }
}

/// Configuration of a [`Renderer`] and the [`RenderQueue`]s it executes
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Requested MSAA samples, clamped to the device maximum
    pub msaa_samples: u32,
    /// Clear color of the offscreen target
    pub clear_color: [f32; 4],
    /// Use half-float offscreen targets when the device can render to them
    pub float_targets: bool,
    pub ibl: IblConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            msaa_samples: 4,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            float_targets: true,
            ibl: IblConfig::default(),
        }
    }
}

impl RendererConfig {
    pub fn with_msaa_samples(mut self, samples: u32) -> Self {
        self.msaa_samples = samples;
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_float_targets(mut self, enabled: bool) -> Self {
        self.float_targets = enabled;
        self
    }

    pub fn with_ibl(mut self, ibl: IblConfig) -> Self {
        self.ibl = ibl;
        self
    }
}

// Web initialization helper
#[cfg(target_arch = "wasm32")]
pub fn init_web_logging() {
    // Set up panic hook for better error messages in console
    console_error_panic_hook::set_once();
    if console_log::init_with_level(log::Level::Info).is_err() {
        log::warn!("Logger already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = RendererConfig::default()
            .with_msaa_samples(0)
            .with_float_targets(false)
            .with_ibl(IblConfig::default().with_prefilter(64, 0, 256));
        assert_eq!(config.msaa_samples, 0);
        assert!(!config.float_targets);
        assert_eq!(config.ibl.prefilter_size, 64);
        assert_eq!(config.ibl.prefilter_mip_levels, 1);
        assert_eq!(config.ibl.environment_size, 512);
    }
}
