//! Core backend abstraction traits
//!
//! The renderer talks to the graphics API exclusively through [`GraphicsBackend`].
//! The interface follows WebGL2 / OpenGL ES 3.0 semantics: programs with
//! introspectable uniforms, uniform blocks bound to indexed binding points,
//! vertex array objects, framebuffers with texture and renderbuffer
//! attachments, and blits between framebuffers.

use crate::backend::types::*;
use std::any::Any;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to compile {stage} shader '{label}': {log}")]
    ShaderCompilationFailed {
        label: String,
        stage: ShaderStage,
        log: String,
    },
    #[error("Failed to link program '{label}': {log}")]
    ProgramLinkFailed { label: String, log: String },
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create framebuffer: {0}")]
    FramebufferCreationFailed(String),
    #[error("Framebuffer incomplete: {0}")]
    FramebufferIncomplete(String),
    #[error("Feature not supported: {0}")]
    FeatureNotSupported(String),
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("Out of memory")]
    OutOfMemory,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture (2D or cube)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a renderbuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderbufferHandle(pub(crate) u64);

/// Handle to a framebuffer object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferHandle(pub(crate) u64);

/// Handle to a vertex array object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexArrayHandle(pub(crate) u64);

/// Handle to a linked program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u64);

/// Location of a uniform inside a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation {
    pub(crate) program: ProgramHandle,
    pub(crate) index: u32,
}

impl UniformLocation {
    pub fn program(&self) -> ProgramHandle {
        self.program
    }
}

/// Main graphics backend trait
pub trait GraphicsBackend: Any {
    /// Human readable backend name
    fn name(&self) -> &'static str;

    /// Device limits and optional features
    fn capabilities(&self) -> &Capabilities;

    /// Size of the default framebuffer (canvas or window)
    fn drawable_size(&self) -> (u32, u32);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    // Buffers

    /// Create a buffer, optionally with initial contents
    fn create_buffer(
        &mut self,
        desc: &BufferDescriptor,
        data: Option<&[u8]>,
    ) -> BackendResult<BufferHandle>;

    /// Write data into a buffer at a byte offset
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    // Vertex arrays

    fn create_vertex_array(
        &mut self,
        desc: &VertexArrayDescriptor,
    ) -> BackendResult<VertexArrayHandle>;

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayHandle>);

    fn destroy_vertex_array(&mut self, vertex_array: VertexArrayHandle);

    // Textures

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Upload texels into one level (and face) of a texture
    fn write_texture(&mut self, texture: TextureHandle, region: &TextureRegion, data: TexelData);

    fn generate_mipmaps(&mut self, texture: TextureHandle);

    /// Bind a texture to a texture unit
    fn bind_texture(&mut self, unit: u32, target: TextureTarget, texture: Option<TextureHandle>);

    /// Read back one level (and face) as RGBA floats
    fn read_texture(
        &mut self,
        texture: TextureHandle,
        region: &TextureRegion,
    ) -> BackendResult<Vec<f32>>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    // Render targets

    fn create_renderbuffer(
        &mut self,
        desc: &RenderbufferDescriptor,
    ) -> BackendResult<RenderbufferHandle>;

    /// Reallocate renderbuffer storage at a new size
    fn resize_renderbuffer(&mut self, renderbuffer: RenderbufferHandle, width: u32, height: u32);

    fn destroy_renderbuffer(&mut self, renderbuffer: RenderbufferHandle);

    fn create_framebuffer(&mut self, label: Option<&str>) -> BackendResult<FramebufferHandle>;

    /// Attach a texture level (and cube face) to a framebuffer
    fn attach_texture(
        &mut self,
        framebuffer: FramebufferHandle,
        attachment: Attachment,
        texture: TextureHandle,
        face: Option<CubeFace>,
        level: u32,
    );

    fn attach_renderbuffer(
        &mut self,
        framebuffer: FramebufferHandle,
        attachment: Attachment,
        renderbuffer: RenderbufferHandle,
    );

    /// Verify framebuffer completeness
    fn check_framebuffer(&mut self, framebuffer: FramebufferHandle) -> BackendResult<()>;

    /// Bind a framebuffer for drawing, `None` selects the default framebuffer
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);

    /// Copy the color attachment of one framebuffer into another
    fn blit_framebuffer(
        &mut self,
        src: Option<FramebufferHandle>,
        src_size: (u32, u32),
        dst: Option<FramebufferHandle>,
        dst_size: (u32, u32),
        filter: FilterMode,
    );

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    // Fixed-function state

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32);

    fn set_render_state(&mut self, state: &RenderState);

    /// Clear the bound framebuffer
    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>);

    // Programs

    /// Compile and link a program
    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle>;

    /// Active non-block uniforms of a linked program
    fn active_uniforms(&mut self, program: ProgramHandle) -> Vec<ActiveUniform>;

    fn uniform_location(&mut self, program: ProgramHandle, name: &str) -> Option<UniformLocation>;

    fn use_program(&mut self, program: Option<ProgramHandle>);

    /// Set a uniform of the currently used program
    fn set_uniform(&mut self, location: &UniformLocation, value: &UniformValue);

    /// Index of a named uniform block, `None` if absent or optimized out
    fn uniform_block_index(&mut self, program: ProgramHandle, name: &str) -> Option<u32>;

    /// Size in bytes of a uniform block as reported by the driver
    fn uniform_block_size(&mut self, program: ProgramHandle, block_index: u32) -> u32;

    fn uniform_block_binding(&mut self, program: ProgramHandle, block_index: u32, binding: u32);

    /// Bind a uniform buffer to an indexed binding point
    fn bind_uniform_buffer(&mut self, binding: u32, buffer: Option<BufferHandle>);

    fn destroy_program(&mut self, program: ProgramHandle);

    // Draws

    /// Non-indexed draw. `instances == 0` draws nothing.
    fn draw_arrays(&mut self, mode: DrawMode, first: u32, count: u32, instances: u32);

    /// Indexed draw, `offset` is in elements. `instances == 0` draws nothing.
    fn draw_elements(
        &mut self,
        mode: DrawMode,
        count: u32,
        index_type: IndexType,
        offset: u32,
        instances: u32,
    );
}
