//! OpenGL ES 3.0 / WebGL2 backend built on `glow`.
//!
//! The same code path serves a browser canvas (through
//! `glow::Context::from_webgl2_context`) and native GL contexts created by
//! the host.

use std::any::Any;
use std::collections::HashMap;

use glow::HasContext;

use crate::backend::traits::*;
use crate::backend::types::*;

struct GlTexture {
    raw: glow::Texture,
    desc: TextureDescriptor,
}

struct GlRenderbuffer {
    raw: glow::Renderbuffer,
    desc: RenderbufferDescriptor,
}

struct GlProgram {
    raw: glow::Program,
    label: String,
    uniforms: Vec<ActiveUniform>,
    locations: Vec<glow::UniformLocation>,
}

/// glow implementation of [`GraphicsBackend`]
pub struct GlowBackend {
    gl: glow::Context,
    capabilities: Capabilities,
    drawable: (u32, u32),
    next_id: u64,
    buffers: HashMap<u64, (glow::Buffer, BufferKind)>,
    vertex_arrays: HashMap<u64, glow::VertexArray>,
    textures: HashMap<u64, GlTexture>,
    renderbuffers: HashMap<u64, GlRenderbuffer>,
    framebuffers: HashMap<u64, glow::Framebuffer>,
    programs: HashMap<u64, GlProgram>,
    bound_framebuffer: Option<u64>,
}

impl GlowBackend {
    /// Wrap a current GL context; `drawable` is the size of the default framebuffer.
    pub fn new(gl: glow::Context, drawable: (u32, u32)) -> BackendResult<Self> {
        let capabilities = unsafe { query_capabilities(&gl) };
        log::info!(
            "GlowBackend: {} (max texture {}, max cube {}, {} samples, float linear: {}, float color: {})",
            unsafe { gl.get_parameter_string(glow::VERSION) },
            capabilities.max_texture_size,
            capabilities.max_cube_map_size,
            capabilities.max_samples,
            capabilities.float_linear_filtering,
            capabilities.color_buffer_float
        );
        if capabilities.max_texture_size == 0 {
            return Err(BackendError::InitializationFailed(
                "context reports no texture support".to_string(),
            ));
        }
        Ok(Self {
            gl,
            capabilities,
            drawable,
            next_id: 1,
            buffers: HashMap::new(),
            vertex_arrays: HashMap::new(),
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            bound_framebuffer: None,
        })
    }

    /// Update the default framebuffer size after a canvas or window resize.
    pub fn set_drawable_size(&mut self, width: u32, height: u32) {
        self.drawable = (width, height);
    }

    pub fn context(&self) -> &glow::Context {
        &self.gl
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn framebuffer(&self, handle: Option<FramebufferHandle>) -> Option<glow::Framebuffer> {
        handle.and_then(|h| self.framebuffers.get(&h.0).copied())
    }

    unsafe fn compile(
        &self,
        label: &str,
        stage: ShaderStage,
        source: &str,
    ) -> BackendResult<glow::Shader> {
        let kind = match stage {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        };
        let shader = self
            .gl
            .create_shader(kind)
            .map_err(BackendError::InitializationFailed)?;
        self.gl.shader_source(shader, source);
        self.gl.compile_shader(shader);
        if !self.gl.get_shader_compile_status(shader) {
            let log = self.gl.get_shader_info_log(shader);
            self.gl.delete_shader(shader);
            return Err(BackendError::ShaderCompilationFailed {
                label: label.to_string(),
                stage,
                log,
            });
        }
        Ok(shader)
    }
}

unsafe fn query_capabilities(gl: &glow::Context) -> Capabilities {
    let extensions = gl.supported_extensions();
    let has = |name: &str| {
        extensions.contains(name) || extensions.contains(&format!("GL_{name}"))
    };
    // Desktop GL 3.x has both features in core
    let desktop = !gl.version().is_embedded;
    Capabilities {
        max_texture_size: gl.get_parameter_i32(glow::MAX_TEXTURE_SIZE).max(0) as u32,
        max_cube_map_size: gl.get_parameter_i32(glow::MAX_CUBE_MAP_TEXTURE_SIZE).max(0) as u32,
        max_samples: gl.get_parameter_i32(glow::MAX_SAMPLES).max(0) as u32,
        max_texture_units: gl
            .get_parameter_i32(glow::MAX_COMBINED_TEXTURE_IMAGE_UNITS)
            .max(0) as u32,
        float_linear_filtering: desktop || has("OES_texture_float_linear"),
        color_buffer_float: desktop || has("EXT_color_buffer_float"),
    }
}

/// (internal format, format, type) of a texture upload.
fn texture_format(format: TextureFormat) -> (u32, u32, u32) {
    match format {
        TextureFormat::Rgba8Unorm => (glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE),
        TextureFormat::Rgba8UnormSrgb => (glow::SRGB8_ALPHA8, glow::RGBA, glow::UNSIGNED_BYTE),
        TextureFormat::Rgb32Float => (glow::RGB32F, glow::RGB, glow::FLOAT),
        TextureFormat::Rgba16Float => (glow::RGBA16F, glow::RGBA, glow::FLOAT),
        TextureFormat::Rgba32Float => (glow::RGBA32F, glow::RGBA, glow::FLOAT),
        TextureFormat::Rg16Float => (glow::RG16F, glow::RG, glow::FLOAT),
        TextureFormat::Rg32Float => (glow::RG32F, glow::RG, glow::FLOAT),
        TextureFormat::Depth24 => (
            glow::DEPTH_COMPONENT24,
            glow::DEPTH_COMPONENT,
            glow::UNSIGNED_INT,
        ),
    }
}

fn min_filter(filter: FilterMode, mipmap: Option<FilterMode>) -> u32 {
    match (filter, mipmap) {
        (FilterMode::Nearest, None) => glow::NEAREST,
        (FilterMode::Linear, None) => glow::LINEAR,
        (FilterMode::Nearest, Some(FilterMode::Nearest)) => glow::NEAREST_MIPMAP_NEAREST,
        (FilterMode::Nearest, Some(FilterMode::Linear)) => glow::NEAREST_MIPMAP_LINEAR,
        (FilterMode::Linear, Some(FilterMode::Nearest)) => glow::LINEAR_MIPMAP_NEAREST,
        (FilterMode::Linear, Some(FilterMode::Linear)) => glow::LINEAR_MIPMAP_LINEAR,
    }
}

fn filter(filter: FilterMode) -> u32 {
    match filter {
        FilterMode::Nearest => glow::NEAREST,
        FilterMode::Linear => glow::LINEAR,
    }
}

fn wrap(mode: WrapMode) -> u32 {
    match mode {
        WrapMode::ClampToEdge => glow::CLAMP_TO_EDGE,
        WrapMode::Repeat => glow::REPEAT,
        WrapMode::MirroredRepeat => glow::MIRRORED_REPEAT,
    }
}

fn texture_target(target: TextureTarget) -> u32 {
    match target {
        TextureTarget::Texture2D => glow::TEXTURE_2D,
        TextureTarget::CubeMap => glow::TEXTURE_CUBE_MAP,
    }
}

/// Image target of one face, or the 2D target.
fn face_target(face: Option<CubeFace>) -> u32 {
    match face {
        Some(face) => glow::TEXTURE_CUBE_MAP_POSITIVE_X + face.index() as u32,
        None => glow::TEXTURE_2D,
    }
}

fn buffer_target(kind: BufferKind) -> u32 {
    match kind {
        BufferKind::Vertex => glow::ARRAY_BUFFER,
        BufferKind::Index => glow::ELEMENT_ARRAY_BUFFER,
        BufferKind::Uniform => glow::UNIFORM_BUFFER,
    }
}

fn component_type(ty: ComponentType) -> u32 {
    match ty {
        ComponentType::I8 => glow::BYTE,
        ComponentType::U8 => glow::UNSIGNED_BYTE,
        ComponentType::I16 => glow::SHORT,
        ComponentType::U16 => glow::UNSIGNED_SHORT,
        ComponentType::I32 => glow::INT,
        ComponentType::U32 => glow::UNSIGNED_INT,
        ComponentType::F32 => glow::FLOAT,
    }
}

fn draw_mode(mode: DrawMode) -> u32 {
    match mode {
        DrawMode::Points => glow::POINTS,
        DrawMode::Lines => glow::LINES,
        DrawMode::LineStrip => glow::LINE_STRIP,
        DrawMode::LineLoop => glow::LINE_LOOP,
        DrawMode::Triangles => glow::TRIANGLES,
        DrawMode::TriangleStrip => glow::TRIANGLE_STRIP,
        DrawMode::TriangleFan => glow::TRIANGLE_FAN,
    }
}

fn attachment(attachment: Attachment) -> u32 {
    match attachment {
        Attachment::Color0 => glow::COLOR_ATTACHMENT0,
        Attachment::Depth => glow::DEPTH_ATTACHMENT,
        Attachment::DepthStencil => glow::DEPTH_STENCIL_ATTACHMENT,
    }
}

fn renderbuffer_format(format: RenderbufferFormat) -> u32 {
    match format {
        RenderbufferFormat::Depth24 => glow::DEPTH_COMPONENT24,
        RenderbufferFormat::Depth24Stencil8 => glow::DEPTH24_STENCIL8,
        RenderbufferFormat::Rgba8 => glow::RGBA8,
        RenderbufferFormat::Rgba16Float => glow::RGBA16F,
    }
}

fn uniform_type(gl_type: u32) -> Option<UniformType> {
    Some(match gl_type {
        glow::FLOAT => UniformType::Float,
        glow::FLOAT_VEC2 => UniformType::Vec2,
        glow::FLOAT_VEC3 => UniformType::Vec3,
        glow::FLOAT_VEC4 => UniformType::Vec4,
        glow::INT => UniformType::Int,
        glow::BOOL => UniformType::Bool,
        glow::FLOAT_MAT3 => UniformType::Mat3,
        glow::FLOAT_MAT4 => UniformType::Mat4,
        glow::SAMPLER_2D => UniformType::Sampler2D,
        glow::SAMPLER_CUBE => UniformType::SamplerCube,
        _ => return None,
    })
}

impl GraphicsBackend for GlowBackend {
    fn name(&self) -> &'static str {
        "glow"
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn drawable_size(&self) -> (u32, u32) {
        self.drawable
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
        let target = buffer_target(desc.kind);
        let usage = match desc.usage {
            BufferUsage::Static => glow::STATIC_DRAW,
            BufferUsage::Dynamic => glow::DYNAMIC_DRAW,
        };
        let raw = unsafe {
            let raw = self
                .gl
                .create_buffer()
                .map_err(BackendError::BufferCreationFailed)?;
            self.gl.bind_buffer(target, Some(raw));
            match data {
                Some(data) if data.len() as u64 == desc.size => {
                    self.gl.buffer_data_u8_slice(target, data, usage)
                }
                Some(data) => {
                    self.gl.buffer_data_size(target, desc.size as i32, usage);
                    self.gl.buffer_sub_data_u8_slice(target, 0, data);
                }
                None => self.gl.buffer_data_size(target, desc.size as i32, usage),
            }
            // Index buffers stay attached to whichever VAO is bound
            if desc.kind != BufferKind::Index {
                self.gl.bind_buffer(target, None);
            }
            raw
        };
        log::debug!("GlowBackend: buffer {:?} ({} bytes)", desc.label, desc.size);
        let id = self.allocate_id();
        self.buffers.insert(id, (raw, desc.kind));
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(&(raw, kind)) = self.buffers.get(&buffer.0) else {
            log::warn!("GlowBackend: write to unknown buffer {:?}", buffer);
            return;
        };
        // Writing an element buffer through ARRAY_BUFFER keeps VAO state untouched
        let target = match kind {
            BufferKind::Index => glow::COPY_WRITE_BUFFER,
            other => buffer_target(other),
        };
        unsafe {
            self.gl.bind_buffer(target, Some(raw));
            self.gl.buffer_sub_data_u8_slice(target, offset as i32, data);
            self.gl.bind_buffer(target, None);
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some((raw, _)) = self.buffers.remove(&buffer.0) {
            unsafe { self.gl.delete_buffer(raw) };
        }
    }

    fn create_vertex_array(
        &mut self,
        desc: &VertexArrayDescriptor,
    ) -> BackendResult<VertexArrayHandle> {
        let raw = unsafe {
            let raw = self
                .gl
                .create_vertex_array()
                .map_err(BackendError::BufferCreationFailed)?;
            self.gl.bind_vertex_array(Some(raw));
            for attribute in &desc.attributes {
                let Some(&(buffer, _)) = self.buffers.get(&attribute.buffer.0) else {
                    self.gl.bind_vertex_array(None);
                    self.gl.delete_vertex_array(raw);
                    return Err(BackendError::InvalidHandle(format!(
                        "attribute {} cites a destroyed buffer",
                        attribute.location
                    )));
                };
                self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
                self.gl.enable_vertex_attrib_array(attribute.location);
                let ty = component_type(attribute.component_type);
                if attribute.component_type == ComponentType::F32 || attribute.normalized {
                    self.gl.vertex_attrib_pointer_f32(
                        attribute.location,
                        attribute.components as i32,
                        ty,
                        attribute.normalized,
                        attribute.stride as i32,
                        attribute.offset as i32,
                    );
                } else {
                    self.gl.vertex_attrib_pointer_i32(
                        attribute.location,
                        attribute.components as i32,
                        ty,
                        attribute.stride as i32,
                        attribute.offset as i32,
                    );
                }
                if attribute.divisor > 0 {
                    self.gl.vertex_attrib_divisor(attribute.location, attribute.divisor);
                }
            }
            if let Some(index) = desc.index_buffer {
                let raw_index = self.buffers.get(&index.0).map(|(b, _)| *b);
                self.gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, raw_index);
            }
            self.gl.bind_vertex_array(None);
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
            raw
        };
        log::debug!(
            "GlowBackend: vertex array {:?} ({} attributes)",
            desc.label,
            desc.attributes.len()
        );
        let id = self.allocate_id();
        self.vertex_arrays.insert(id, raw);
        Ok(VertexArrayHandle(id))
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayHandle>) {
        let raw = vertex_array.and_then(|v| self.vertex_arrays.get(&v.0).copied());
        unsafe { self.gl.bind_vertex_array(raw) };
    }

    fn destroy_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        if let Some(raw) = self.vertex_arrays.remove(&vertex_array.0) {
            unsafe { self.gl.delete_vertex_array(raw) };
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let target = texture_target(desc.target);
        let (internal, format, ty) = texture_format(desc.format);
        let raw = unsafe {
            let raw = self
                .gl
                .create_texture()
                .map_err(BackendError::TextureCreationFailed)?;
            self.gl.bind_texture(target, Some(raw));
            let faces: Vec<Option<CubeFace>> = match desc.target {
                TextureTarget::Texture2D => vec![None],
                TextureTarget::CubeMap => CubeFace::ALL.iter().copied().map(Some).collect(),
            };
            for face in faces {
                for level in 0..desc.mip_levels {
                    let (w, h) = desc.level_size(level);
                    self.gl.tex_image_2d(
                        face_target(face),
                        level as i32,
                        internal as i32,
                        w as i32,
                        h as i32,
                        0,
                        format,
                        ty,
                        None,
                    );
                }
            }
            let min = min_filter(desc.min_filter, desc.mipmap_filter);
            self.gl.tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, min as i32);
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, filter(desc.mag_filter) as i32);
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_WRAP_S, wrap(desc.wrap) as i32);
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_WRAP_T, wrap(desc.wrap) as i32);
            if desc.target == TextureTarget::CubeMap {
                self.gl
                    .tex_parameter_i32(target, glow::TEXTURE_WRAP_R, wrap(desc.wrap) as i32);
            }
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_MAX_LEVEL, desc.mip_levels as i32 - 1);
            self.gl.bind_texture(target, None);
            raw
        };
        log::debug!(
            "GlowBackend: texture {:?} {}x{} {:?} ({} mips)",
            desc.label,
            desc.width,
            desc.height,
            desc.format,
            desc.mip_levels
        );
        let id = self.allocate_id();
        self.textures.insert(
            id,
            GlTexture {
                raw,
                desc: desc.clone(),
            },
        );
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, region: &TextureRegion, data: TexelData) {
        let Some(texture) = self.textures.get(&texture.0) else {
            log::warn!("GlowBackend: upload to unknown texture {:?}", texture);
            return;
        };
        let (internal, format, _) = texture_format(texture.desc.format);
        let (ty, bytes): (u32, &[u8]) = match data {
            TexelData::U8(bytes) => (glow::UNSIGNED_BYTE, bytes),
            TexelData::F32(floats) => (glow::FLOAT, bytemuck::cast_slice(floats)),
        };
        let target = texture_target(texture.desc.target);
        unsafe {
            self.gl.bind_texture(target, Some(texture.raw));
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.gl.tex_image_2d(
                face_target(region.face),
                region.level as i32,
                internal as i32,
                region.width as i32,
                region.height as i32,
                0,
                format,
                ty,
                Some(bytes),
            );
            self.gl.bind_texture(target, None);
        }
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) {
        if let Some(texture) = self.textures.get(&texture.0) {
            let target = texture_target(texture.desc.target);
            unsafe {
                self.gl.bind_texture(target, Some(texture.raw));
                self.gl.generate_mipmap(target);
                self.gl.bind_texture(target, None);
            }
        }
    }

    fn bind_texture(&mut self, unit: u32, target: TextureTarget, texture: Option<TextureHandle>) {
        let raw = texture.and_then(|t| self.textures.get(&t.0).map(|t| t.raw));
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl.bind_texture(texture_target(target), raw);
        }
    }

    fn read_texture(
        &mut self,
        texture: TextureHandle,
        region: &TextureRegion,
    ) -> BackendResult<Vec<f32>> {
        let texture = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("texture {:?}", texture)))?;
        let float = texture.desc.format.is_float();
        if float && !self.capabilities.color_buffer_float {
            return Err(BackendError::FeatureNotSupported(
                "reading float textures requires EXT_color_buffer_float".to_string(),
            ));
        }
        let texel_count = (region.width * region.height) as usize;
        let restore = self.bound_framebuffer.and_then(|id| self.framebuffers.get(&id).copied());
        unsafe {
            let framebuffer = self
                .gl
                .create_framebuffer()
                .map_err(BackendError::FramebufferCreationFailed)?;
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
            self.gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                face_target(region.face),
                Some(texture.raw),
                region.level as i32,
            );
            let result = if float {
                let mut pixels = vec![0.0f32; texel_count * 4];
                self.gl.read_pixels(
                    0,
                    0,
                    region.width as i32,
                    region.height as i32,
                    glow::RGBA,
                    glow::FLOAT,
                    glow::PixelPackData::Slice(bytemuck::cast_slice_mut(&mut pixels)),
                );
                pixels
            } else {
                let mut pixels = vec![0u8; texel_count * 4];
                self.gl.read_pixels(
                    0,
                    0,
                    region.width as i32,
                    region.height as i32,
                    glow::RGBA,
                    glow::UNSIGNED_BYTE,
                    glow::PixelPackData::Slice(&mut pixels),
                );
                pixels.iter().map(|b| *b as f32 / 255.0).collect()
            };
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, restore);
            self.gl.delete_framebuffer(framebuffer);
            Ok(result)
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(texture) = self.textures.remove(&texture.0) {
            unsafe { self.gl.delete_texture(texture.raw) };
        }
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
        let raw = unsafe {
            let raw = self
                .gl
                .create_renderbuffer()
                .map_err(BackendError::FramebufferCreationFailed)?;
            self.gl.bind_renderbuffer(glow::RENDERBUFFER, Some(raw));
            storage(&self.gl, desc);
            self.gl.bind_renderbuffer(glow::RENDERBUFFER, None);
            raw
        };
        let id = self.allocate_id();
        self.renderbuffers.insert(
            id,
            GlRenderbuffer {
                raw,
                desc: desc.clone(),
            },
        );
        Ok(RenderbufferHandle(id))
    }

    fn resize_renderbuffer(&mut self, renderbuffer: RenderbufferHandle, width: u32, height: u32) {
        let Some(target) = self.renderbuffers.get_mut(&renderbuffer.0) else {
            return;
        };
        target.desc.width = width;
        target.desc.height = height;
        unsafe {
            self.gl.bind_renderbuffer(glow::RENDERBUFFER, Some(target.raw));
            storage(&self.gl, &target.desc);
            self.gl.bind_renderbuffer(glow::RENDERBUFFER, None);
        }
    }

    fn destroy_renderbuffer(&mut self, renderbuffer: RenderbufferHandle) {
        if let Some(target) = self.renderbuffers.remove(&renderbuffer.0) {
            unsafe { self.gl.delete_renderbuffer(target.raw) };
        }
    }

    fn create_framebuffer(&mut self, label: Option<&str>) -> BackendResult<FramebufferHandle> {
        let raw = unsafe {
            self.gl
                .create_framebuffer()
                .map_err(BackendError::FramebufferCreationFailed)?
        };
        log::debug!("GlowBackend: framebuffer {:?}", label);
        let id = self.allocate_id();
        self.framebuffers.insert(id, raw);
        Ok(FramebufferHandle(id))
    }

    fn attach_texture(
        &mut self,
        framebuffer: FramebufferHandle,
        point: Attachment,
        texture: TextureHandle,
        face: Option<CubeFace>,
        level: u32,
    ) {
        let (Some(raw), Some(texture)) = (
            self.framebuffers.get(&framebuffer.0).copied(),
            self.textures.get(&texture.0),
        ) else {
            return;
        };
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(raw));
            self.gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                attachment(point),
                face_target(face),
                Some(texture.raw),
                level as i32,
            );
        }
        self.bound_framebuffer = Some(framebuffer.0);
    }

    fn attach_renderbuffer(
        &mut self,
        framebuffer: FramebufferHandle,
        point: Attachment,
        renderbuffer: RenderbufferHandle,
    ) {
        let (Some(raw), Some(renderbuffer)) = (
            self.framebuffers.get(&framebuffer.0).copied(),
            self.renderbuffers.get(&renderbuffer.0),
        ) else {
            return;
        };
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(raw));
            self.gl.framebuffer_renderbuffer(
                glow::FRAMEBUFFER,
                attachment(point),
                glow::RENDERBUFFER,
                Some(renderbuffer.raw),
            );
        }
        self.bound_framebuffer = Some(framebuffer.0);
    }

    fn check_framebuffer(&mut self, framebuffer: FramebufferHandle) -> BackendResult<()> {
        let raw = self
            .framebuffers
            .get(&framebuffer.0)
            .copied()
            .ok_or_else(|| BackendError::InvalidHandle(format!("framebuffer {:?}", framebuffer)))?;
        let status = unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(raw));
            self.gl.check_framebuffer_status(glow::FRAMEBUFFER)
        };
        self.bound_framebuffer = Some(framebuffer.0);
        if status == glow::FRAMEBUFFER_COMPLETE {
            Ok(())
        } else {
            Err(BackendError::FramebufferIncomplete(format!("status 0x{status:x}")))
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        let raw = self.framebuffer(framebuffer);
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, raw) };
        self.bound_framebuffer = framebuffer.map(|f| f.0);
    }

    fn blit_framebuffer(
        &mut self,
        src: Option<FramebufferHandle>,
        src_size: (u32, u32),
        dst: Option<FramebufferHandle>,
        dst_size: (u32, u32),
        mode: FilterMode,
    ) {
        let (read, draw) = (self.framebuffer(src), self.framebuffer(dst));
        unsafe {
            self.gl.bind_framebuffer(glow::READ_FRAMEBUFFER, read);
            self.gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, draw);
            self.gl.blit_framebuffer(
                0,
                0,
                src_size.0 as i32,
                src_size.1 as i32,
                0,
                0,
                dst_size.0 as i32,
                dst_size.1 as i32,
                glow::COLOR_BUFFER_BIT,
                filter(mode),
            );
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, draw);
        }
        self.bound_framebuffer = dst.map(|f| f.0);
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if let Some(raw) = self.framebuffers.remove(&framebuffer.0) {
            unsafe { self.gl.delete_framebuffer(raw) };
        }
        if self.bound_framebuffer == Some(framebuffer.0) {
            self.bound_framebuffer = None;
        }
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        unsafe { self.gl.viewport(x, y, width as i32, height as i32) };
    }

    fn set_render_state(&mut self, state: &RenderState) {
        unsafe {
            if state.depth_test {
                self.gl.enable(glow::DEPTH_TEST);
                // Skyboxes are drawn at the far plane
                self.gl.depth_func(glow::LEQUAL);
            } else {
                self.gl.disable(glow::DEPTH_TEST);
            }
            self.gl.depth_mask(state.depth_write);
            match state.cull {
                CullMode::None => self.gl.disable(glow::CULL_FACE),
                CullMode::Front => {
                    self.gl.enable(glow::CULL_FACE);
                    self.gl.cull_face(glow::FRONT);
                }
                CullMode::Back => {
                    self.gl.enable(glow::CULL_FACE);
                    self.gl.cull_face(glow::BACK);
                }
            }
            match state.blend {
                None => self.gl.disable(glow::BLEND),
                Some(BlendMode::Alpha) => {
                    self.gl.enable(glow::BLEND);
                    self.gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
                }
                Some(BlendMode::Additive) => {
                    self.gl.enable(glow::BLEND);
                    self.gl.blend_func(glow::ONE, glow::ONE);
                }
            }
        }
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) {
        let mut mask = 0;
        unsafe {
            if let Some([r, g, b, a]) = color {
                self.gl.clear_color(r, g, b, a);
                mask |= glow::COLOR_BUFFER_BIT;
            }
            if let Some(depth) = depth {
                // Depth writes must be enabled for the clear to take effect
                self.gl.depth_mask(true);
                self.gl.clear_depth_f32(depth);
                mask |= glow::DEPTH_BUFFER_BIT;
            }
            if mask != 0 {
                self.gl.clear(mask);
            }
        }
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        let program = unsafe {
            let vertex = self.compile(desc.label, ShaderStage::Vertex, desc.vertex)?;
            let fragment = match self.compile(desc.label, ShaderStage::Fragment, desc.fragment) {
                Ok(fragment) => fragment,
                Err(err) => {
                    self.gl.delete_shader(vertex);
                    return Err(err);
                }
            };
            let program = self
                .gl
                .create_program()
                .map_err(BackendError::InitializationFailed)?;
            self.gl.attach_shader(program, vertex);
            self.gl.attach_shader(program, fragment);
            self.gl.link_program(program);
            self.gl.detach_shader(program, vertex);
            self.gl.detach_shader(program, fragment);
            self.gl.delete_shader(vertex);
            self.gl.delete_shader(fragment);
            if !self.gl.get_program_link_status(program) {
                let log = self.gl.get_program_info_log(program);
                self.gl.delete_program(program);
                return Err(BackendError::ProgramLinkFailed {
                    label: desc.label.to_string(),
                    log,
                });
            }
            program
        };

        // Block members have no location and are skipped here
        let mut uniforms = Vec::new();
        let mut locations = Vec::new();
        unsafe {
            for index in 0..self.gl.get_active_uniforms(program) {
                let Some(active) = self.gl.get_active_uniform(program, index) else {
                    continue;
                };
                let Some(ty) = uniform_type(active.utype) else {
                    log::debug!("GlowBackend: skipping uniform '{}' of type 0x{:x}", active.name, active.utype);
                    continue;
                };
                let Some(location) = self.gl.get_uniform_location(program, &active.name) else {
                    continue;
                };
                let name = active.name.trim_end_matches("[0]").to_string();
                uniforms.push(ActiveUniform {
                    name,
                    ty,
                    size: active.size.max(1) as u32,
                });
                locations.push(location);
            }
        }
        log::debug!(
            "GlowBackend: linked program '{}' ({} uniforms)",
            desc.label,
            uniforms.len()
        );

        let id = self.allocate_id();
        self.programs.insert(
            id,
            GlProgram {
                raw: program,
                label: desc.label.to_string(),
                uniforms,
                locations,
            },
        );
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
        let raw = program.and_then(|p| self.programs.get(&p.0).map(|p| p.raw));
        unsafe { self.gl.use_program(raw) };
    }

    fn set_uniform(&mut self, location: &UniformLocation, value: &UniformValue) {
        let Some(program) = self.programs.get(&location.program.0) else {
            return;
        };
        let Some(loc) = program.locations.get(location.index as usize) else {
            log::warn!("GlowBackend: stale uniform location in '{}'", program.label);
            return;
        };
        let loc = Some(loc);
        unsafe {
            match value {
                UniformValue::Float(v) => self.gl.uniform_1_f32(loc, *v),
                UniformValue::Vec2(v) => self.gl.uniform_2_f32(loc, v.x, v.y),
                UniformValue::Vec3(v) => self.gl.uniform_3_f32(loc, v.x, v.y, v.z),
                UniformValue::Vec4(v) => self.gl.uniform_4_f32(loc, v.x, v.y, v.z, v.w),
                UniformValue::Int(v) => self.gl.uniform_1_i32(loc, *v),
                UniformValue::Bool(v) => self.gl.uniform_1_i32(loc, *v as i32),
                UniformValue::Mat3(m) => {
                    self.gl.uniform_matrix_3_f32_slice(loc, false, &m.to_cols_array())
                }
                UniformValue::Mat4(m) => {
                    self.gl.uniform_matrix_4_f32_slice(loc, false, &m.to_cols_array())
                }
                UniformValue::FloatArray(values) => self.gl.uniform_1_f32_slice(loc, values),
                UniformValue::Vec3Array(values) => {
                    let flat: Vec<f32> = values.iter().flat_map(|v| v.to_array()).collect();
                    self.gl.uniform_3_f32_slice(loc, &flat)
                }
                UniformValue::Vec4Array(values) => {
                    let flat: Vec<f32> = values.iter().flat_map(|v| v.to_array()).collect();
                    self.gl.uniform_4_f32_slice(loc, &flat)
                }
                UniformValue::Mat4Array(values) => {
                    let flat: Vec<f32> = values.iter().flat_map(|m| m.to_cols_array()).collect();
                    self.gl.uniform_matrix_4_f32_slice(loc, false, &flat)
                }
            }
        }
    }

    fn uniform_block_index(&mut self, program: ProgramHandle, name: &str) -> Option<u32> {
        let raw = self.programs.get(&program.0)?.raw;
        unsafe { self.gl.get_uniform_block_index(raw, name) }
    }

    fn uniform_block_size(&mut self, program: ProgramHandle, block_index: u32) -> u32 {
        let Some(raw) = self.programs.get(&program.0).map(|p| p.raw) else {
            return 0;
        };
        unsafe {
            self.gl
                .get_active_uniform_block_parameter_i32(raw, block_index, glow::UNIFORM_BLOCK_DATA_SIZE)
                .max(0) as u32
        }
    }

    fn uniform_block_binding(&mut self, program: ProgramHandle, block_index: u32, binding: u32) {
        if let Some(raw) = self.programs.get(&program.0).map(|p| p.raw) {
            unsafe { self.gl.uniform_block_binding(raw, block_index, binding) };
        }
    }

    fn bind_uniform_buffer(&mut self, binding: u32, buffer: Option<BufferHandle>) {
        let raw = buffer.and_then(|b| self.buffers.get(&b.0).map(|(raw, _)| *raw));
        unsafe { self.gl.bind_buffer_base(glow::UNIFORM_BUFFER, binding, raw) };
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        if let Some(program) = self.programs.remove(&program.0) {
            unsafe { self.gl.delete_program(program.raw) };
        }
    }

    fn draw_arrays(&mut self, mode: DrawMode, first: u32, count: u32, instances: u32) {
        if instances == 0 {
            return;
        }
        unsafe {
            if instances > 1 {
                self.gl.draw_arrays_instanced(
                    draw_mode(mode),
                    first as i32,
                    count as i32,
                    instances as i32,
                );
            } else {
                self.gl.draw_arrays(draw_mode(mode), first as i32, count as i32);
            }
        }
    }

    fn draw_elements(
        &mut self,
        mode: DrawMode,
        count: u32,
        index_type: IndexType,
        offset: u32,
        instances: u32,
    ) {
        let element = match index_type {
            IndexType::U16 => glow::UNSIGNED_SHORT,
            IndexType::U32 => glow::UNSIGNED_INT,
        };
        if instances == 0 {
            return;
        }
        let byte_offset = (offset * index_type.size()) as i32;
        unsafe {
            if instances > 1 {
                self.gl.draw_elements_instanced(
                    draw_mode(mode),
                    count as i32,
                    element,
                    byte_offset,
                    instances as i32,
                );
            } else {
                self.gl
                    .draw_elements(draw_mode(mode), count as i32, element, byte_offset);
            }
        }
    }
}

unsafe fn storage(gl: &glow::Context, desc: &RenderbufferDescriptor) {
    let format = renderbuffer_format(desc.format);
    if desc.samples > 1 {
        gl.renderbuffer_storage_multisample(
            glow::RENDERBUFFER,
            desc.samples as i32,
            format,
            desc.width as i32,
            desc.height as i32,
        );
    } else {
        gl.renderbuffer_storage(glow::RENDERBUFFER, format, desc.width as i32, desc.height as i32);
    }
}
