//! Headless backend for testing and tooling.
//!
//! No GPU is involved. Buffers and textures live in CPU memory, programs are
//! introspected from their GLSL text, draws are recorded, and full-screen
//! passes whose program has a registered [`FragmentKernel`] are shaded on the
//! CPU into the bound color target.

mod glsl;
mod raster;

use std::any::Any;
use std::collections::HashMap;

use glam::Mat4;

pub use glsl::{preprocess, reflect, GlslInterface};
pub use raster::{FragmentContext, FragmentKernel};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::shader::uniform_buffer::{read_mat4, BlockLayout, PER_FRAME_BLOCK};

/// RGBA float image, row 0 first
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Image {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<[f32; 4]>,
}

impl Image {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            texels: vec![[0.0, 0.0, 0.0, 1.0]; (width * height) as usize],
        }
    }

    pub fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        self.texels
            .get((y * self.width + x) as usize)
            .copied()
            .unwrap_or([0.0; 4])
    }

    pub fn set(&mut self, x: u32, y: u32, value: [f32; 4]) {
        if x < self.width && y < self.height {
            self.texels[(y * self.width + x) as usize] = value;
        }
    }

    fn fill(&mut self, value: [f32; 4]) {
        self.texels.fill(value);
    }

    /// 2x2 box filter down to the next mip level.
    fn downsample(&self) -> Image {
        let (w, h) = ((self.width / 2).max(1), (self.height / 2).max(1));
        let mut out = Image::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let mut sum = [0.0f32; 4];
                for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let sx = (2 * x + dx).min(self.width - 1);
                    let sy = (2 * y + dy).min(self.height - 1);
                    let texel = self.texel(sx, sy);
                    for c in 0..4 {
                        sum[c] += texel[c] * 0.25;
                    }
                }
                out.set(x, y, sum);
            }
        }
        out
    }
}

#[derive(Debug)]
pub(crate) struct HeadlessTexture {
    pub desc: TextureDescriptor,
    /// Indexed `[face][level]`, one face for 2D textures
    pub faces: Vec<Vec<Image>>,
}

impl HeadlessTexture {
    fn image_mut(&mut self, face: Option<CubeFace>, level: u32) -> Option<&mut Image> {
        let face = face.map(|f| f.index()).unwrap_or(0);
        self.faces.get_mut(face)?.get_mut(level as usize)
    }

    fn image(&self, face: Option<CubeFace>, level: u32) -> Option<&Image> {
        let face = face.map(|f| f.index()).unwrap_or(0);
        self.faces.get(face)?.get(level as usize)
    }
}

#[derive(Debug)]
struct HeadlessBuffer {
    desc: BufferDescriptor,
    data: Vec<u8>,
}

#[derive(Debug)]
struct HeadlessRenderbuffer {
    desc: RenderbufferDescriptor,
    color: Option<Image>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColorTarget {
    Texture {
        texture: u64,
        face: Option<CubeFace>,
        level: u32,
    },
    Renderbuffer(u64),
}

#[derive(Debug, Default)]
struct HeadlessFramebuffer {
    label: Option<String>,
    color: Option<ColorTarget>,
    depth: Option<u64>,
}

pub(crate) struct HeadlessProgram {
    label: String,
    uniforms: Vec<ActiveUniform>,
    blocks: Vec<String>,
    block_bindings: HashMap<u32, u32>,
    values: HashMap<u32, UniformValue>,
    kernel: Option<FragmentKernel>,
}

impl HeadlessProgram {
    pub(crate) fn value(&self, name: &str) -> Option<&UniformValue> {
        let index = self.uniforms.iter().position(|u| u.name == name)?;
        self.values.get(&(index as u32))
    }
}

/// One recorded draw call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRecord {
    pub program: Option<String>,
    pub mode: DrawMode,
    pub first: u32,
    pub count: u32,
    pub instances: u32,
    pub indexed: bool,
    pub vertex_array: Option<VertexArrayHandle>,
    pub framebuffer: Option<FramebufferHandle>,
}

/// State-change counters, observable by tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadlessCounters {
    pub programs_linked: u32,
    pub program_binds: u32,
    pub vertex_array_binds: u32,
    pub texture_binds: u32,
    pub framebuffer_binds: u32,
    pub buffer_writes: u32,
    pub texture_uploads: u32,
    pub draw_calls: u32,
    pub clears: u32,
    pub blits: u32,
}

/// CPU-only implementation of [`GraphicsBackend`]
pub struct HeadlessBackend {
    capabilities: Capabilities,
    screen: Image,
    next_id: u64,
    buffers: HashMap<u64, HeadlessBuffer>,
    vertex_arrays: HashMap<u64, VertexArrayDescriptor>,
    pub(crate) textures: HashMap<u64, HeadlessTexture>,
    renderbuffers: HashMap<u64, HeadlessRenderbuffer>,
    framebuffers: HashMap<u64, HeadlessFramebuffer>,
    programs: HashMap<u64, HeadlessProgram>,
    kernels: HashMap<String, FragmentKernel>,
    pub(crate) texture_units: HashMap<(u32, TextureTarget), u64>,
    uniform_bindings: HashMap<u32, u64>,
    bound_framebuffer: Option<u64>,
    bound_program: Option<u64>,
    bound_vertex_array: Option<u64>,
    viewport: (i32, i32, u32, u32),
    render_state: RenderState,
    counters: HeadlessCounters,
    draw_log: Vec<DrawRecord>,
}

impl HeadlessBackend {
    /// Create a backend whose default framebuffer is `width` x `height`.
    pub fn new(width: u32, height: u32) -> Self {
        let kernels = raster::default_kernels()
            .into_iter()
            .map(|(name, kernel)| (name.to_string(), kernel))
            .collect();
        log::debug!("HeadlessBackend: created with {}x{} drawable", width, height);
        Self {
            capabilities: Capabilities::default(),
            screen: Image::new(width.max(1), height.max(1)),
            next_id: 1,
            buffers: HashMap::new(),
            vertex_arrays: HashMap::new(),
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            kernels,
            texture_units: HashMap::new(),
            uniform_bindings: HashMap::new(),
            bound_framebuffer: None,
            bound_program: None,
            bound_vertex_array: None,
            viewport: (0, 0, width, height),
            render_state: RenderState::default(),
            counters: HeadlessCounters::default(),
            draw_log: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Simulate a canvas resize.
    pub fn set_drawable_size(&mut self, width: u32, height: u32) {
        self.screen = Image::new(width.max(1), height.max(1));
    }

    /// Register a CPU fragment kernel for programs whose base name is `name`.
    pub fn register_kernel(&mut self, name: &str, kernel: FragmentKernel) {
        self.kernels.insert(name.to_string(), kernel);
    }

    pub fn counters(&self) -> &HeadlessCounters {
        &self.counters
    }

    pub fn reset_counters(&mut self) {
        self.counters = HeadlessCounters::default();
    }

    pub fn draw_log(&self) -> &[DrawRecord] {
        &self.draw_log
    }

    pub fn take_draw_log(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.draw_log)
    }

    pub fn screen_pixel(&self, x: u32, y: u32) -> [f32; 4] {
        self.screen.texel(x, y)
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.data.as_slice())
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0).map(|t| &t.desc)
    }

    pub fn renderbuffer_size(&self, renderbuffer: RenderbufferHandle) -> Option<(u32, u32)> {
        self.renderbuffers
            .get(&renderbuffer.0)
            .map(|r| (r.desc.width, r.desc.height))
    }

    pub fn bound_texture(&self, unit: u32, target: TextureTarget) -> Option<TextureHandle> {
        self.texture_units.get(&(unit, target)).copied().map(TextureHandle)
    }

    pub fn bound_program(&self) -> Option<ProgramHandle> {
        self.bound_program.map(ProgramHandle)
    }

    pub fn program_label(&self, program: ProgramHandle) -> Option<&str> {
        self.programs.get(&program.0).map(|p| p.label.as_str())
    }

    pub fn uniform_value(&self, program: ProgramHandle, name: &str) -> Option<&UniformValue> {
        self.programs.get(&program.0)?.value(name)
    }

    pub fn render_state(&self) -> RenderState {
        self.render_state
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_renderbuffers(&self) -> usize {
        self.renderbuffers.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_vertex_arrays(&self) -> usize {
        self.vertex_arrays.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn color_target(&self, framebuffer: Option<u64>) -> Option<ColorTarget> {
        self.framebuffers.get(&framebuffer?)?.color
    }

    /// Color image a framebuffer renders into, the screen for `None`.
    fn target_image(&self, framebuffer: Option<u64>) -> Option<&Image> {
        if framebuffer.is_none() {
            return Some(&self.screen);
        }
        match self.color_target(framebuffer)? {
            ColorTarget::Texture {
                texture,
                face,
                level,
            } => self.textures.get(&texture)?.image(face, level),
            ColorTarget::Renderbuffer(id) => self.renderbuffers.get(&id)?.color.as_ref(),
        }
    }

    fn target_image_mut(&mut self, framebuffer: Option<u64>) -> Option<(&mut Image, bool)> {
        if framebuffer.is_none() {
            return Some((&mut self.screen, true));
        }
        match self.color_target(framebuffer)? {
            ColorTarget::Texture {
                texture,
                face,
                level,
            } => {
                let texture = self.textures.get_mut(&texture)?;
                let clamp = !texture.desc.format.is_float();
                texture.image_mut(face, level).map(|image| (image, clamp))
            }
            ColorTarget::Renderbuffer(id) => {
                let renderbuffer = self.renderbuffers.get_mut(&id)?;
                let clamp = renderbuffer.desc.format == RenderbufferFormat::Rgba8;
                renderbuffer.color.as_mut().map(|image| (image, clamp))
            }
        }
    }

    fn record_draw(&mut self, record: DrawRecord) {
        if record.instances == 0 {
            return;
        }
        log::trace!(
            "HeadlessBackend: draw {:?} count={} first={} instances={} program={:?}",
            record.mode,
            record.count,
            record.first,
            record.instances,
            record.program
        );
        self.counters.draw_calls += 1;
        self.draw_log.push(record);
        self.shade_viewport();
    }

    /// Run the bound program's kernel, if any, over the viewport.
    fn shade_viewport(&mut self) {
        let Some(program) = self.bound_program.and_then(|id| self.programs.get(&id)) else {
            return;
        };
        let Some(kernel) = program.kernel else {
            return;
        };
        let Some(target) = self.target_image(self.bound_framebuffer) else {
            return;
        };
        let (target_w, target_h) = (target.width, target.height);

        let inverse_view_projection = self.frame_view_projection(program).map(|m| m.inverse());
        let (vx, vy, vw, vh) = self.viewport;
        let mut shaded = Vec::with_capacity((vw * vh) as usize);
        for py in vy.max(0)..(vy + vh as i32).min(target_h as i32) {
            for px in vx.max(0)..(vx + vw as i32).min(target_w as i32) {
                let uv = glam::Vec2::new(
                    (px - vx) as f32 + 0.5,
                    (py - vy) as f32 + 0.5,
                ) / glam::Vec2::new(vw.max(1) as f32, vh.max(1) as f32);
                let ctx = FragmentContext {
                    backend: self,
                    program,
                    inverse_view_projection,
                    uv,
                };
                shaded.push((px as u32, py as u32, kernel(&ctx)));
            }
        }

        let blend = self.render_state.blend;
        if let Some((image, clamp)) = self.target_image_mut(self.bound_framebuffer) {
            for (x, y, mut color) in shaded {
                if let Some(mode) = blend {
                    let dst = image.texel(x, y);
                    let alpha = color[3];
                    for c in 0..4 {
                        color[c] = match mode {
                            BlendMode::Alpha => color[c] * alpha + dst[c] * (1.0 - alpha),
                            BlendMode::Additive => color[c] + dst[c],
                        };
                    }
                }
                if clamp {
                    color = color.map(|c| c.clamp(0.0, 1.0));
                }
                image.set(x, y, color);
            }
        }
    }

    /// `ubo_per_frame.view_projection` as seen by `program`.
    fn frame_view_projection(&self, program: &HeadlessProgram) -> Option<Mat4> {
        let block = program.blocks.iter().position(|b| b == PER_FRAME_BLOCK)? as u32;
        let binding = program.block_bindings.get(&block)?;
        let buffer = self.buffers.get(self.uniform_bindings.get(binding)?)?;
        let offset = BlockLayout::per_frame().offset_of("view_projection")?;
        read_mat4(&buffer.data, offset)
    }
}

/// Expand uploaded texels to RGBA floats.
fn expand_texels(format: TextureFormat, data: TexelData, count: usize) -> Vec<[f32; 4]> {
    let channels = format.channels() as usize;
    let values: Vec<f32> = match data {
        TexelData::U8(bytes) => bytes.iter().map(|b| *b as f32 / 255.0).collect(),
        TexelData::F32(floats) => floats.to_vec(),
    };
    (0..count)
        .map(|i| {
            let mut texel = [0.0, 0.0, 0.0, 1.0];
            for (c, slot) in texel.iter_mut().enumerate().take(channels.min(4)) {
                if let Some(v) = values.get(i * channels + c) {
                    *slot = *v;
                }
            }
            texel
        })
        .collect()
}

impl GraphicsBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "Headless"
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn drawable_size(&self) -> (u32, u32) {
        (self.screen.width, self.screen.height)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn create_buffer(
        &mut self,
        desc: &BufferDescriptor,
        data: Option<&[u8]>,
    ) -> BackendResult<BufferHandle> {
        log::trace!(
            "HeadlessBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let mut contents = vec![0u8; desc.size as usize];
        if let Some(data) = data {
            let len = data.len().min(contents.len());
            contents[..len].copy_from_slice(&data[..len]);
        }
        let id = self.allocate_id();
        self.buffers.insert(
            id,
            HeadlessBuffer {
                desc: desc.clone(),
                data: contents,
            },
        );
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(target) = self.buffers.get_mut(&buffer.0) else {
            log::warn!("HeadlessBackend: write to unknown buffer {:?}", buffer);
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > target.data.len() {
            log::warn!(
                "HeadlessBackend: write of {} bytes at {} overflows buffer {:?} ({} bytes)",
                data.len(),
                offset,
                target.desc.label,
                target.data.len()
            );
            return;
        }
        target.data[start..end].copy_from_slice(data);
        self.counters.buffer_writes += 1;
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
        self.uniform_bindings.retain(|_, b| *b != buffer.0);
    }

    fn create_vertex_array(
        &mut self,
        desc: &VertexArrayDescriptor,
    ) -> BackendResult<VertexArrayHandle> {
        for attribute in &desc.attributes {
            if !self.buffers.contains_key(&attribute.buffer.0) {
                return Err(BackendError::InvalidHandle(format!(
                    "attribute {} cites a destroyed buffer",
                    attribute.location
                )));
            }
        }
        let id = self.allocate_id();
        self.vertex_arrays.insert(id, desc.clone());
        Ok(VertexArrayHandle(id))
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayHandle>) {
        self.bound_vertex_array = vertex_array.map(|v| v.0);
        self.counters.vertex_array_binds += 1;
    }

    fn destroy_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        self.vertex_arrays.remove(&vertex_array.0);
        if self.bound_vertex_array == Some(vertex_array.0) {
            self.bound_vertex_array = None;
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let limit = match desc.target {
            TextureTarget::Texture2D => self.capabilities.max_texture_size,
            TextureTarget::CubeMap => self.capabilities.max_cube_map_size,
        };
        if desc.width == 0 || desc.height == 0 || desc.width > limit || desc.height > limit {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: size {}x{} outside 1..={}",
                desc.label, desc.width, desc.height, limit
            )));
        }
        log::trace!(
            "HeadlessBackend: creating texture {:?} ({}x{}, {} mips, {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.mip_levels,
            desc.format
        );
        let face_count = match desc.target {
            TextureTarget::Texture2D => 1,
            TextureTarget::CubeMap => 6,
        };
        let faces = (0..face_count)
            .map(|_| {
                (0..desc.mip_levels)
                    .map(|level| {
                        let (w, h) = desc.level_size(level);
                        Image::new(w, h)
                    })
                    .collect()
            })
            .collect();
        let id = self.allocate_id();
        self.textures.insert(
            id,
            HeadlessTexture {
                desc: desc.clone(),
                faces,
            },
        );
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, region: &TextureRegion, data: TexelData) {
        let Some(target) = self.textures.get_mut(&texture.0) else {
            log::warn!("HeadlessBackend: upload to unknown texture {:?}", texture);
            return;
        };
        let format = target.desc.format;
        let Some(image) = target.image_mut(region.face, region.level) else {
            log::warn!(
                "HeadlessBackend: upload to missing level {} of {:?}",
                region.level,
                target.desc.label
            );
            return;
        };
        if (image.width, image.height) != (region.width, region.height) {
            *image = Image::new(region.width, region.height);
        }
        image.texels = expand_texels(format, data, (region.width * region.height) as usize);
        self.counters.texture_uploads += 1;
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) {
        let Some(target) = self.textures.get_mut(&texture.0) else {
            return;
        };
        for levels in &mut target.faces {
            for level in 1..levels.len() {
                levels[level] = levels[level - 1].downsample();
            }
        }
    }

    fn bind_texture(&mut self, unit: u32, target: TextureTarget, texture: Option<TextureHandle>) {
        match texture {
            Some(texture) => {
                self.texture_units.insert((unit, target), texture.0);
            }
            None => {
                self.texture_units.remove(&(unit, target));
            }
        }
        self.counters.texture_binds += 1;
    }

    fn read_texture(
        &mut self,
        texture: TextureHandle,
        region: &TextureRegion,
    ) -> BackendResult<Vec<f32>> {
        let image = self
            .textures
            .get(&texture.0)
            .and_then(|t| t.image(region.face, region.level))
            .ok_or_else(|| BackendError::InvalidHandle(format!("texture {:?}", texture)))?;
        Ok(image.texels.iter().flatten().copied().collect())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
        self.texture_units.retain(|_, t| *t != texture.0);
    }

    fn create_renderbuffer(
        &mut self,
        desc: &RenderbufferDescriptor,
    ) -> BackendResult<RenderbufferHandle> {
        if desc.samples > self.capabilities.max_samples {
            return Err(BackendError::FeatureNotSupported(format!(
                "{} samples (max {})",
                desc.samples, self.capabilities.max_samples
            )));
        }
        let color = desc
            .format
            .is_color()
            .then(|| Image::new(desc.width.max(1), desc.height.max(1)));
        let id = self.allocate_id();
        self.renderbuffers.insert(
            id,
            HeadlessRenderbuffer {
                desc: desc.clone(),
                color,
            },
        );
        Ok(RenderbufferHandle(id))
    }

    fn resize_renderbuffer(&mut self, renderbuffer: RenderbufferHandle, width: u32, height: u32) {
        if let Some(target) = self.renderbuffers.get_mut(&renderbuffer.0) {
            target.desc.width = width;
            target.desc.height = height;
            if target.color.is_some() {
                target.color = Some(Image::new(width.max(1), height.max(1)));
            }
        }
    }

    fn destroy_renderbuffer(&mut self, renderbuffer: RenderbufferHandle) {
        self.renderbuffers.remove(&renderbuffer.0);
    }

    fn create_framebuffer(&mut self, label: Option<&str>) -> BackendResult<FramebufferHandle> {
        let id = self.allocate_id();
        self.framebuffers.insert(
            id,
            HeadlessFramebuffer {
                label: label.map(str::to_string),
                ..Default::default()
            },
        );
        Ok(FramebufferHandle(id))
    }

    fn attach_texture(
        &mut self,
        framebuffer: FramebufferHandle,
        attachment: Attachment,
        texture: TextureHandle,
        face: Option<CubeFace>,
        level: u32,
    ) {
        let Some(target) = self.framebuffers.get_mut(&framebuffer.0) else {
            return;
        };
        match attachment {
            Attachment::Color0 => {
                target.color = Some(ColorTarget::Texture {
                    texture: texture.0,
                    face,
                    level,
                })
            }
            Attachment::Depth | Attachment::DepthStencil => target.depth = Some(texture.0),
        }
    }

    fn attach_renderbuffer(
        &mut self,
        framebuffer: FramebufferHandle,
        attachment: Attachment,
        renderbuffer: RenderbufferHandle,
    ) {
        let Some(target) = self.framebuffers.get_mut(&framebuffer.0) else {
            return;
        };
        match attachment {
            Attachment::Color0 => target.color = Some(ColorTarget::Renderbuffer(renderbuffer.0)),
            Attachment::Depth | Attachment::DepthStencil => target.depth = Some(renderbuffer.0),
        }
    }

    fn check_framebuffer(&mut self, framebuffer: FramebufferHandle) -> BackendResult<()> {
        let target = self
            .framebuffers
            .get(&framebuffer.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("framebuffer {:?}", framebuffer)))?;
        let label = target.label.clone().unwrap_or_default();
        match target.color {
            None if target.depth.is_none() => Err(BackendError::FramebufferIncomplete(format!(
                "'{label}': missing attachment"
            ))),
            Some(ColorTarget::Texture { texture, .. }) => {
                let texture = self.textures.get(&texture).ok_or_else(|| {
                    BackendError::FramebufferIncomplete(format!("'{label}': destroyed texture"))
                })?;
                if texture.desc.format.is_float() && !self.capabilities.color_buffer_float {
                    return Err(BackendError::FramebufferIncomplete(format!(
                        "'{label}': {:?} is not color-renderable without EXT_color_buffer_float",
                        texture.desc.format
                    )));
                }
                Ok(())
            }
            Some(ColorTarget::Renderbuffer(id)) if !self.renderbuffers.contains_key(&id) => Err(
                BackendError::FramebufferIncomplete(format!("'{label}': destroyed renderbuffer")),
            ),
            _ => Ok(()),
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.bound_framebuffer = framebuffer.map(|f| f.0);
        self.counters.framebuffer_binds += 1;
    }

    fn blit_framebuffer(
        &mut self,
        src: Option<FramebufferHandle>,
        src_size: (u32, u32),
        dst: Option<FramebufferHandle>,
        dst_size: (u32, u32),
        _filter: FilterMode,
    ) {
        self.counters.blits += 1;
        let Some(source) = self.target_image(src.map(|f| f.0)).cloned() else {
            log::warn!("HeadlessBackend: blit from framebuffer without color");
            return;
        };
        let Some((image, _)) = self.target_image_mut(dst.map(|f| f.0)) else {
            log::warn!("HeadlessBackend: blit into framebuffer without color");
            return;
        };
        let (dw, dh) = (dst_size.0.min(image.width), dst_size.1.min(image.height));
        let (sw, sh) = (src_size.0.max(1), src_size.1.max(1));
        for y in 0..dh {
            for x in 0..dw {
                let sx = ((x as u64 * sw as u64) / dst_size.0.max(1) as u64) as u32;
                let sy = ((y as u64 * sh as u64) / dst_size.1.max(1) as u64) as u32;
                let texel = source.texel(sx.min(source.width - 1), sy.min(source.height - 1));
                image.set(x, y, texel);
            }
        }
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer.0);
        if self.bound_framebuffer == Some(framebuffer.0) {
            self.bound_framebuffer = None;
        }
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport = (x, y, width, height);
    }

    fn set_render_state(&mut self, state: &RenderState) {
        self.render_state = *state;
    }

    fn clear(&mut self, color: Option<[f32; 4]>, _depth: Option<f32>) {
        self.counters.clears += 1;
        if let Some(color) = color {
            if let Some((image, _)) = self.target_image_mut(self.bound_framebuffer) {
                image.fill(color);
            }
        }
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        let vertex = reflect(desc.vertex).map_err(|log| BackendError::ShaderCompilationFailed {
            label: desc.label.to_string(),
            stage: ShaderStage::Vertex,
            log,
        })?;
        let fragment =
            reflect(desc.fragment).map_err(|log| BackendError::ShaderCompilationFailed {
                label: desc.label.to_string(),
                stage: ShaderStage::Fragment,
                log,
            })?;
        let interface = vertex.merge(fragment);
        if !interface.has_main {
            return Err(BackendError::ProgramLinkFailed {
                label: desc.label.to_string(),
                log: "missing entry point 'main'".to_string(),
            });
        }

        let base = desc.label.split('+').next().unwrap_or(desc.label);
        let kernel = self.kernels.get(base).copied();
        log::debug!(
            "HeadlessBackend: linked '{}' ({} uniforms, {} blocks, kernel: {})",
            desc.label,
            interface.uniforms.len(),
            interface.blocks.len(),
            kernel.is_some()
        );

        let id = self.allocate_id();
        self.programs.insert(
            id,
            HeadlessProgram {
                label: desc.label.to_string(),
                uniforms: interface.uniforms,
                blocks: interface.blocks,
                block_bindings: HashMap::new(),
                values: HashMap::new(),
                kernel,
            },
        );
        self.counters.programs_linked += 1;
        Ok(ProgramHandle(id))
    }

    fn active_uniforms(&mut self, program: ProgramHandle) -> Vec<ActiveUniform> {
        self.programs
            .get(&program.0)
            .map(|p| p.uniforms.clone())
            .unwrap_or_default()
    }

    fn uniform_location(&mut self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        let name = name.strip_suffix("[0]").unwrap_or(name);
        let index = self
            .programs
            .get(&program.0)?
            .uniforms
            .iter()
            .position(|u| u.name == name)?;
        Some(UniformLocation {
            program,
            index: index as u32,
        })
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        self.bound_program = program.map(|p| p.0);
        if program.is_some() {
            self.counters.program_binds += 1;
        }
    }

    fn set_uniform(&mut self, location: &UniformLocation, value: &UniformValue) {
        if self.bound_program != Some(location.program.0) {
            log::warn!(
                "HeadlessBackend: uniform set on {:?} while it is not in use",
                location.program
            );
            return;
        }
        if let Some(program) = self.programs.get_mut(&location.program.0) {
            program.values.insert(location.index, value.clone());
        }
    }

    fn uniform_block_index(&mut self, program: ProgramHandle, name: &str) -> Option<u32> {
        self.programs
            .get(&program.0)?
            .blocks
            .iter()
            .position(|b| b == name)
            .map(|i| i as u32)
    }

    fn uniform_block_size(&mut self, program: ProgramHandle, block_index: u32) -> u32 {
        let name = self
            .programs
            .get(&program.0)
            .and_then(|p| p.blocks.get(block_index as usize));
        match name.map(String::as_str) {
            Some(PER_FRAME_BLOCK) => BlockLayout::per_frame().size() as u32,
            Some(crate::shader::uniform_buffer::PER_MODEL_BLOCK) => {
                BlockLayout::per_model().size() as u32
            }
            _ => 0,
        }
    }

    fn uniform_block_binding(&mut self, program: ProgramHandle, block_index: u32, binding: u32) {
        if let Some(program) = self.programs.get_mut(&program.0) {
            program.block_bindings.insert(block_index, binding);
        }
    }

    fn bind_uniform_buffer(&mut self, binding: u32, buffer: Option<BufferHandle>) {
        match buffer {
            Some(buffer) => {
                self.uniform_bindings.insert(binding, buffer.0);
            }
            None => {
                self.uniform_bindings.remove(&binding);
            }
        }
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program.0);
        if self.bound_program == Some(program.0) {
            self.bound_program = None;
        }
    }

    fn draw_arrays(&mut self, mode: DrawMode, first: u32, count: u32, instances: u32) {
        let record = DrawRecord {
            program: self.current_label(),
            mode,
            first,
            count,
            instances,
            indexed: false,
            vertex_array: self.bound_vertex_array.map(VertexArrayHandle),
            framebuffer: self.bound_framebuffer.map(FramebufferHandle),
        };
        self.record_draw(record);
    }

    fn draw_elements(
        &mut self,
        mode: DrawMode,
        count: u32,
        _index_type: IndexType,
        offset: u32,
        instances: u32,
    ) {
        let record = DrawRecord {
            program: self.current_label(),
            mode,
            first: offset,
            count,
            instances,
            indexed: true,
            vertex_array: self.bound_vertex_array.map(VertexArrayHandle),
            framebuffer: self.bound_framebuffer.map(FramebufferHandle),
        };
        self.record_draw(record);
    }
}

impl HeadlessBackend {
    fn current_label(&self) -> Option<String> {
        self.bound_program
            .and_then(|id| self.programs.get(&id))
            .map(|p| p.label.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = "#version 300 es\nlayout(location = 0) in vec3 position;\nvoid main() { gl_Position = vec4(position, 1.0); }\n";
    const FRAGMENT: &str = "#version 300 es\nprecision highp float;\nuniform sampler2D input_texture;\nout vec4 color;\nvoid main() { color = vec4(1.0); }\n";

    #[test]
    fn test_buffer_write_round_trip() {
        let mut backend = HeadlessBackend::new(4, 4);
        let desc = BufferDescriptor::new(BufferKind::Vertex, BufferUsage::Dynamic, 8);
        let buffer = backend.create_buffer(&desc, Some(&[1, 2, 3, 4])).unwrap();
        backend.write_buffer(buffer, 4, &[9, 9]);
        assert_eq!(backend.buffer_contents(buffer), Some(&[1, 2, 3, 4, 9, 9, 0, 0][..]));

        // Out-of-range writes are rejected whole
        backend.write_buffer(buffer, 7, &[5, 5]);
        assert_eq!(backend.counters().buffer_writes, 1);
    }

    #[test]
    fn test_compile_error_reports_stage() {
        let mut backend = HeadlessBackend::new(4, 4);
        let err = backend
            .create_program(&ProgramDescriptor {
                label: "broken",
                vertex: VERTEX,
                fragment: "void main() {}",
            })
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::ShaderCompilationFailed {
                stage: ShaderStage::Fragment,
                ..
            }
        ));
    }

    #[test]
    fn test_post_copy_kernel_shades_bound_target() {
        let mut backend = HeadlessBackend::new(2, 2);
        let program = backend
            .create_program(&ProgramDescriptor {
                label: "post_copy",
                vertex: VERTEX,
                fragment: FRAGMENT,
            })
            .unwrap();

        let source = backend
            .create_texture(
                &TextureDescriptor::new_2d(2, 2, TextureFormat::Rgba32Float)
                    .with_filter(FilterMode::Nearest, FilterMode::Nearest),
            )
            .unwrap();
        let texels: Vec<f32> = (0..16).map(|i| i as f32).collect();
        backend.write_texture(source, &TextureRegion::level_2d(0, 2, 2), TexelData::F32(&texels));
        backend.bind_texture(0, TextureTarget::Texture2D, Some(source));

        backend.use_program(Some(program));
        let location = backend.uniform_location(program, "input_texture").unwrap();
        backend.set_uniform(&location, &UniformValue::Int(0));
        backend.bind_framebuffer(None);
        backend.set_viewport(0, 0, 2, 2);
        backend.draw_arrays(DrawMode::Triangles, 0, 3, 1);

        // The screen is an 8-bit target, so values clamp to [0, 1]
        assert_eq!(backend.screen_pixel(0, 0), [0.0, 1.0, 1.0, 1.0]);
        assert_eq!(backend.draw_log().len(), 1);
        assert_eq!(backend.draw_log()[0].program.as_deref(), Some("post_copy"));
    }

    #[test]
    fn test_float_render_target_requires_extension() {
        let caps = Capabilities {
            color_buffer_float: false,
            ..Capabilities::default()
        };
        let mut backend = HeadlessBackend::new(4, 4).with_capabilities(caps);
        let texture = backend
            .create_texture(&TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba16Float))
            .unwrap();
        let framebuffer = backend.create_framebuffer(Some("offscreen")).unwrap();
        backend.attach_texture(framebuffer, Attachment::Color0, texture, None, 0);
        assert!(matches!(
            backend.check_framebuffer(framebuffer),
            Err(BackendError::FramebufferIncomplete(_))
        ));
    }

    #[test]
    fn test_mipmaps_box_filter() {
        let mut backend = HeadlessBackend::new(4, 4);
        let texture = backend
            .create_texture(
                &TextureDescriptor::new_2d(2, 2, TextureFormat::Rgba32Float).with_mip_levels(2),
            )
            .unwrap();
        let texels = [
            1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0,
        ];
        backend.write_texture(texture, &TextureRegion::level_2d(0, 2, 2), TexelData::F32(&texels));
        backend.generate_mipmaps(texture);
        let level = backend
            .read_texture(texture, &TextureRegion::level_2d(1, 1, 1))
            .unwrap();
        assert_eq!(level, vec![0.5, 0.5, 0.5, 1.0]);
    }
}
