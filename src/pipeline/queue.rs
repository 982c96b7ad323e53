//! The per-frame render queue.
//!
//! Passes draw into a multisampled offscreen target which is resolved into
//! one of two single-sampled color textures. Post passes then bounce between
//! those two textures, the last one writing to the screen.

use std::collections::HashMap;

use crate::backend::{
    Attachment, FilterMode, FramebufferHandle, GraphicsBackend, RenderState, RenderbufferDescriptor,
    RenderbufferFormat, RenderbufferHandle, TextureFormat,
};
use crate::error::{RenderResult, ResourceError};
use crate::pipeline::pass::{RenderCommand, RenderPass};
use crate::pipeline::post::PostProcessPass;
use crate::renderer::Renderer;
use crate::resources::geometry::{BufferFormat, Geometry};
use crate::resources::mesh::Mesh;
use crate::resources::texture::Texture2D;

/// Which ping-pong buffer holds the latest output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PingPong {
    #[default]
    A,
    B,
}

impl PingPong {
    pub fn flip(self) -> Self {
        match self {
            PingPong::A => PingPong::B,
            PingPong::B => PingPong::A,
        }
    }

    fn index(self) -> usize {
        match self {
            PingPong::A => 0,
            PingPong::B => 1,
        }
    }
}

/// Stable handle of a pass; survives `prepend_pass` and `remove_pass`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(usize);

impl PassId {
    pub fn raw(&self) -> usize {
        self.0
    }
}

struct ColorTarget {
    framebuffer: FramebufferHandle,
    texture: Texture2D,
}

/// Everything sized to the drawable
struct OffscreenTargets {
    width: u32,
    height: u32,
    multisample: FramebufferHandle,
    multisample_color: RenderbufferHandle,
    multisample_depth: RenderbufferHandle,
    ping_pong: [ColorTarget; 2],
}

impl OffscreenTargets {
    fn new(
        backend: &mut dyn GraphicsBackend,
        width: u32,
        height: u32,
        samples: u32,
        float_color: bool,
    ) -> RenderResult<Self> {
        let (texture_format, renderbuffer_format) = if float_color {
            (TextureFormat::Rgba16Float, RenderbufferFormat::Rgba16Float)
        } else {
            (TextureFormat::Rgba8Unorm, RenderbufferFormat::Rgba8)
        };
        log::debug!(
            "RenderQueue: offscreen targets {}x{}, {} samples, {:?}",
            width,
            height,
            samples,
            texture_format
        );

        let multisample = backend.create_framebuffer(Some("queue.multisample"))?;
        let multisample_color = backend.create_renderbuffer(&RenderbufferDescriptor {
            label: Some("queue.multisample.color".to_string()),
            format: renderbuffer_format,
            width,
            height,
            samples,
        })?;
        let multisample_depth = backend.create_renderbuffer(&RenderbufferDescriptor {
            label: Some("queue.multisample.depth".to_string()),
            format: RenderbufferFormat::Depth24Stencil8,
            width,
            height,
            samples,
        })?;
        backend.attach_renderbuffer(multisample, Attachment::Color0, multisample_color);
        backend.attach_renderbuffer(multisample, Attachment::DepthStencil, multisample_depth);
        backend.check_framebuffer(multisample)?;

        let ping = color_target(backend, "queue.ping", width, height, texture_format)?;
        let pong = color_target(backend, "queue.pong", width, height, texture_format)?;

        Ok(Self {
            width,
            height,
            multisample,
            multisample_color,
            multisample_depth,
            ping_pong: [ping, pong],
        })
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn destroy(self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_framebuffer(self.multisample);
        backend.destroy_renderbuffer(self.multisample_color);
        backend.destroy_renderbuffer(self.multisample_depth);
        for target in self.ping_pong {
            backend.destroy_framebuffer(target.framebuffer);
            target.texture.destroy(backend);
        }
    }
}

fn color_target(
    backend: &mut dyn GraphicsBackend,
    label: &str,
    width: u32,
    height: u32,
    format: TextureFormat,
) -> RenderResult<ColorTarget> {
    let texture = Texture2D::render_target(backend, label, width, height, format)?;
    let framebuffer = backend.create_framebuffer(Some(label))?;
    backend.attach_texture(framebuffer, Attachment::Color0, texture.handle(), None, 0);
    backend.check_framebuffer(framebuffer)?;
    Ok(ColorTarget {
        framebuffer,
        texture,
    })
}

/// Ordered render passes followed by a post-processing chain
pub struct RenderQueue {
    passes: Vec<(PassId, RenderPass)>,
    index: HashMap<PassId, usize>,
    next_id: usize,
    post_passes: Vec<PostProcessPass>,
    targets: Option<OffscreenTargets>,
    quad: Option<Mesh>,
    active: PingPong,
    rebuilds: u32,
}

impl Default for RenderQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderQueue {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            index: HashMap::new(),
            next_id: 0,
            post_passes: Vec::new(),
            targets: None,
            quad: None,
            active: PingPong::A,
            rebuilds: 0,
        }
    }

    /// Append a pass.
    pub fn push_pass(&mut self, pass: RenderPass) -> PassId {
        let id = self.allocate_id();
        self.index.insert(id, self.passes.len());
        self.passes.push((id, pass));
        id
    }

    /// Insert a pass in front of all others.
    pub fn prepend_pass(&mut self, pass: RenderPass) -> PassId {
        let id = self.allocate_id();
        self.passes.insert(0, (id, pass));
        self.reindex();
        id
    }

    pub fn remove_pass(&mut self, id: PassId) -> Option<RenderPass> {
        let position = self.index.remove(&id)?;
        let (_, pass) = self.passes.remove(position);
        self.reindex();
        Some(pass)
    }

    pub fn pass(&self, id: PassId) -> Option<&RenderPass> {
        let position = *self.index.get(&id)?;
        self.passes.get(position).map(|(_, pass)| pass)
    }

    pub fn pass_mut(&mut self, id: PassId) -> Option<&mut RenderPass> {
        let position = *self.index.get(&id)?;
        self.passes.get_mut(position).map(|(_, pass)| pass)
    }

    /// Pass ids in execution order
    pub fn pass_ids(&self) -> Vec<PassId> {
        self.passes.iter().map(|(id, _)| *id).collect()
    }

    /// Queue a command into a pass for the next frame.
    pub fn enqueue(&mut self, id: PassId, command: RenderCommand) -> RenderResult<()> {
        let pass = self
            .pass_mut(id)
            .ok_or(ResourceError::UnknownPass(id.0))?;
        pass.enqueue(command);
        Ok(())
    }

    pub fn push_post_pass(&mut self, pass: PostProcessPass) {
        self.post_passes.push(pass);
    }

    pub fn post_passes(&self) -> &[PostProcessPass] {
        &self.post_passes
    }

    pub fn post_passes_mut(&mut self) -> &mut Vec<PostProcessPass> {
        &mut self.post_passes
    }

    /// Ping-pong buffer the next frame resolves into.
    ///
    /// Flips once per post pass, the final screen pass included, so after a
    /// frame its parity follows the number of post passes. It only names the
    /// buffer holding the latest output when there are no post passes.
    pub fn active_buffer(&self) -> PingPong {
        self.active
    }

    /// How many times the offscreen targets were (re)created
    pub fn rebuild_count(&self) -> u32 {
        self.rebuilds
    }

    /// Size of the offscreen targets, `None` before the first frame.
    pub fn target_size(&self) -> Option<(u32, u32)> {
        self.targets.as_ref().map(OffscreenTargets::size)
    }

    /// Render one frame.
    pub fn execute(&mut self, renderer: &mut Renderer) -> RenderResult<()> {
        self.ensure_targets(renderer)?;
        if self.quad.is_none() {
            self.quad = Some(Mesh::new(
                renderer.backend_mut(),
                &Geometry::fullscreen_quad().with_label("queue.quad"),
                BufferFormat::Concatenated,
            )?);
        }

        let result = self.render_frame(renderer);

        renderer.reset_state();
        let backend = renderer.backend_mut();
        backend.bind_framebuffer(None);
        backend.set_render_state(&RenderState::default());
        result
    }

    /// Release the offscreen targets and the quad.
    pub fn destroy(mut self, renderer: &mut Renderer) -> RenderResult<()> {
        renderer.reset_state();
        let backend = renderer.backend_mut();
        if let Some(targets) = self.targets.take() {
            targets.destroy(backend);
        }
        if let Some(mut quad) = self.quad.take() {
            quad.destroy(backend)?;
        }
        Ok(())
    }

    fn render_frame(&mut self, renderer: &mut Renderer) -> RenderResult<()> {
        let Some(targets) = &self.targets else {
            return Ok(());
        };
        let size = targets.size();
        let clear_color = renderer.config().clear_color;

        let backend = renderer.backend_mut();
        backend.bind_framebuffer(Some(targets.multisample));
        backend.set_viewport(0, 0, size.0, size.1);
        backend.set_render_state(&RenderState::default());
        backend.clear(Some(clear_color), Some(1.0));

        for (_, pass) in &mut self.passes {
            let backend = renderer.backend_mut();
            backend.bind_framebuffer(Some(targets.multisample));
            backend.set_viewport(0, 0, size.0, size.1);
            pass.execute(renderer)?;
        }
        renderer.reset_state();

        let resolved = &targets.ping_pong[self.active.index()];
        renderer.backend_mut().blit_framebuffer(
            Some(targets.multisample),
            size,
            Some(resolved.framebuffer),
            size,
            FilterMode::Nearest,
        );

        if self.post_passes.is_empty() {
            let screen = renderer.backend().drawable_size();
            renderer.backend_mut().blit_framebuffer(
                Some(resolved.framebuffer),
                size,
                None,
                screen,
                FilterMode::Linear,
            );
            return Ok(());
        }

        let Some(quad) = &self.quad else {
            return Ok(());
        };
        let last = self.post_passes.len() - 1;
        for (i, post) in self.post_passes.iter_mut().enumerate() {
            let input = &targets.ping_pong[self.active.index()];
            let output = (i != last).then(|| targets.ping_pong[self.active.flip().index()].framebuffer);
            let backend = renderer.backend_mut();
            backend.bind_framebuffer(output);
            let (width, height) = match output {
                Some(_) => size,
                None => backend.drawable_size(),
            };
            backend.set_viewport(0, 0, width, height);
            post.execute(renderer, &input.texture, quad)?;
            self.active = self.active.flip();
        }
        Ok(())
    }

    /// Create the targets, or rebuild them when the drawable size changed.
    fn ensure_targets(&mut self, renderer: &mut Renderer) -> RenderResult<()> {
        let (width, height) = renderer.backend().drawable_size();
        let (width, height) = (width.max(1), height.max(1));
        if self.target_size() == Some((width, height)) {
            return Ok(());
        }

        let capabilities = renderer.backend().capabilities().clone();
        let config = renderer.config();
        let samples = config.msaa_samples.min(capabilities.max_samples);
        let samples = if samples > 1 { samples } else { 0 };
        let float_color = config.float_targets && capabilities.color_buffer_float;

        renderer.reset_state();
        let backend = renderer.backend_mut();
        if let Some(previous) = self.targets.take() {
            log::info!(
                "RenderQueue: drawable resized {}x{} -> {}x{}",
                previous.width,
                previous.height,
                width,
                height
            );
            previous.destroy(backend);
        }
        self.targets = Some(OffscreenTargets::new(backend, width, height, samples, float_color)?);
        self.rebuilds += 1;
        Ok(())
    }

    fn allocate_id(&mut self) -> PassId {
        let id = PassId(self.next_id);
        self.next_id += 1;
        id
    }

    fn reindex(&mut self) {
        self.index = self
            .passes
            .iter()
            .enumerate()
            .map(|(position, (id, _))| (*id, position))
            .collect();
    }
}
