//! Full-screen post-processing passes.

use std::fmt;

use crate::backend::{RenderState, UniformValue};
use crate::error::RenderResult;
use crate::pipeline::pass::Hook;
use crate::renderer::Renderer;
use crate::resources::mesh::Mesh;
use crate::resources::texture::Texture2D;
use crate::shader::{ShaderFeatures, ShaderKind, ShaderSource};

/// Tone curve of [`PostEffect::Tonemap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TonemapOperator {
    Reinhard,
    #[default]
    Aces,
    /// Clamp to [0, 1] only
    Clamp,
}

impl TonemapOperator {
    fn as_uniform(&self) -> i32 {
        match self {
            TonemapOperator::Reinhard => 0,
            TonemapOperator::Aces => 1,
            TonemapOperator::Clamp => 2,
        }
    }
}

/// Shader run by a post pass
///
/// Custom sources read the previous output from `input_texture` and the
/// full-screen quad's `uv` attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum PostEffect {
    Copy,
    Invert,
    Tonemap {
        exposure: f32,
        gamma: f32,
        operator: TonemapOperator,
    },
    Custom(ShaderSource),
}

impl PostEffect {
    pub fn tonemap() -> Self {
        PostEffect::Tonemap {
            exposure: 1.0,
            gamma: 2.2,
            operator: TonemapOperator::default(),
        }
    }

    pub fn source(&self) -> ShaderSource {
        match self {
            PostEffect::Copy => ShaderKind::PostCopy.source(),
            PostEffect::Invert => ShaderKind::PostInvert.source(),
            PostEffect::Tonemap { .. } => ShaderKind::PostTonemap.source(),
            PostEffect::Custom(source) => source.clone(),
        }
    }
}

/// One full-screen shader between the scene and the screen
pub struct PostProcessPass {
    label: String,
    effect: PostEffect,
    uniforms: Vec<(String, UniformValue)>,
    before: Option<Hook>,
    after: Option<Hook>,
}

impl PostProcessPass {
    pub fn new(label: &str, effect: PostEffect) -> Self {
        Self {
            label: label.to_string(),
            effect,
            uniforms: Vec::new(),
            before: None,
            after: None,
        }
    }

    /// Extra uniform pushed after the effect's own.
    pub fn with_uniform(mut self, name: &str, value: impl Into<UniformValue>) -> Self {
        self.set_uniform(name, value);
        self
    }

    pub fn with_before(mut self, hook: impl FnMut(&mut Renderer) -> RenderResult<()> + 'static) -> Self {
        self.before = Some(Box::new(hook));
        self
    }

    pub fn with_after(mut self, hook: impl FnMut(&mut Renderer) -> RenderResult<()> + 'static) -> Self {
        self.after = Some(Box::new(hook));
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn effect(&self) -> &PostEffect {
        &self.effect
    }

    pub fn effect_mut(&mut self) -> &mut PostEffect {
        &mut self.effect
    }

    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) {
        let value = value.into();
        match self.uniforms.iter_mut().find(|(existing, _)| existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.uniforms.push((name.to_string(), value)),
        }
    }

    /// Draw `quad` with `input` on the effect's input unit into the bound framebuffer.
    pub(crate) fn execute(
        &mut self,
        renderer: &mut Renderer,
        input: &Texture2D,
        quad: &Mesh,
    ) -> RenderResult<()> {
        let shader = renderer.get_or_create_shader(&self.effect.source(), ShaderFeatures::empty())?;
        if let Some(before) = &mut self.before {
            before(renderer)?;
        }

        renderer.use_shader(&shader);
        let backend = renderer.backend_mut();
        backend.set_render_state(&RenderState::fullscreen());
        input.bind(backend, shader.sampler_unit("input_texture").unwrap_or(0));
        if let PostEffect::Tonemap {
            exposure,
            gamma,
            operator,
        } = &self.effect
        {
            shader.set(backend, "exposure", *exposure);
            shader.set(backend, "gamma", *gamma);
            shader.set(backend, "tonemap_operator", operator.as_uniform());
        }
        for (name, value) in &self.uniforms {
            if !shader.set(backend, name, value.clone()) {
                log::trace!("PostProcessPass '{}': '{}' not set", self.label, name);
            }
        }

        renderer.draw_mesh(quad)?;

        if let Some(after) = &mut self.after {
            after(renderer)?;
        }
        Ok(())
    }
}

impl fmt::Debug for PostProcessPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostProcessPass")
            .field("label", &self.label)
            .field("effect", &self.effect)
            .field("uniforms", &self.uniforms)
            .finish()
    }
}
