//! Common types shared between backends

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgb32Float,
    Rgba16Float,
    Rgba32Float,
    Rg16Float,
    Rg32Float,
    Depth24,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth24)
    }

    /// Whether the texel storage is floating point (half or full precision).
    pub fn is_float(&self) -> bool {
        matches!(
            self,
            TextureFormat::Rgb32Float
                | TextureFormat::Rgba16Float
                | TextureFormat::Rgba32Float
                | TextureFormat::Rg16Float
                | TextureFormat::Rg32Float
        )
    }

    /// 32-bit float formats, which only filter linearly with `OES_texture_float_linear`.
    pub fn requires_float_linear_extension(&self) -> bool {
        matches!(
            self,
            TextureFormat::Rgb32Float | TextureFormat::Rgba32Float | TextureFormat::Rg32Float
        )
    }

    pub fn channels(&self) -> u32 {
        match self {
            TextureFormat::Depth24 => 1,
            TextureFormat::Rg16Float | TextureFormat::Rg32Float => 2,
            TextureFormat::Rgb32Float => 3,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Rgba16Float
            | TextureFormat::Rgba32Float => 4,
        }
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb | TextureFormat::Depth24 => 4,
            TextureFormat::Rg16Float => 4,
            TextureFormat::Rgba16Float | TextureFormat::Rg32Float => 8,
            TextureFormat::Rgb32Float => 12,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

/// Texture binding target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Texture2D,
    CubeMap,
}

/// One face of a cube map, in GL face order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    pub fn index(&self) -> usize {
        match self {
            CubeFace::PositiveX => 0,
            CubeFace::NegativeX => 1,
            CubeFace::PositiveY => 2,
            CubeFace::NegativeY => 3,
            CubeFace::PositiveZ => 4,
            CubeFace::NegativeZ => 5,
        }
    }
}

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Wrap mode for texture coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapMode {
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

/// Texture descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub target: TextureTarget,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    /// Filter between mip levels, `None` disables mipmapped sampling
    pub mipmap_filter: Option<FilterMode>,
    pub wrap: WrapMode,
}

impl TextureDescriptor {
    pub fn new_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: None,
            target: TextureTarget::Texture2D,
            width,
            height,
            mip_levels: 1,
            format,
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            mipmap_filter: None,
            wrap: WrapMode::Repeat,
        }
    }

    pub fn new_cube(size: u32, format: TextureFormat) -> Self {
        Self {
            target: TextureTarget::CubeMap,
            wrap: WrapMode::ClampToEdge,
            ..Self::new_2d(size, size, format)
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    pub fn with_filter(mut self, min: FilterMode, mag: FilterMode) -> Self {
        self.min_filter = min;
        self.mag_filter = mag;
        self
    }

    pub fn with_mipmap_filter(mut self, filter: FilterMode) -> Self {
        self.mipmap_filter = Some(filter);
        self
    }

    pub fn with_wrap(mut self, wrap: WrapMode) -> Self {
        self.wrap = wrap;
        self
    }

    /// Whether any sampling path of this texture filters linearly.
    pub fn uses_linear_filtering(&self) -> bool {
        self.min_filter == FilterMode::Linear
            || self.mag_filter == FilterMode::Linear
            || self.mipmap_filter == Some(FilterMode::Linear)
    }

    /// Size of the given mip level (never below 1).
    pub fn level_size(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }
}

/// Texel data handed to a texture upload
#[derive(Debug, Clone, Copy)]
pub enum TexelData<'a> {
    U8(&'a [u8]),
    F32(&'a [f32]),
}

impl TexelData<'_> {
    pub fn len(&self) -> usize {
        match self {
            TexelData::U8(data) => data.len(),
            TexelData::F32(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Destination of a texture upload or readback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub face: Option<CubeFace>,
    pub level: u32,
    pub width: u32,
    pub height: u32,
}

impl TextureRegion {
    pub fn level_2d(level: u32, width: u32, height: u32) -> Self {
        Self {
            face: None,
            level,
            width,
            height,
        }
    }

    pub fn cube_face(face: CubeFace, level: u32, size: u32) -> Self {
        Self {
            face: Some(face),
            level,
            width: size,
            height: size,
        }
    }
}

/// What a device buffer is bound as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
}

/// Expected update frequency of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Static,
    Dynamic,
}

/// Buffer descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub kind: BufferKind,
    pub usage: BufferUsage,
    pub size: u64,
}

impl BufferDescriptor {
    pub fn new(kind: BufferKind, usage: BufferUsage, size: u64) -> Self {
        Self {
            label: None,
            kind,
            usage,
            size,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Scalar type of one vertex component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
}

impl ComponentType {
    pub fn size(&self) -> usize {
        match self {
            ComponentType::I8 | ComponentType::U8 => 1,
            ComponentType::I16 | ComponentType::U16 => 2,
            ComponentType::I32 | ComponentType::U32 | ComponentType::F32 => 4,
        }
    }
}

/// One attribute pointer of a vertex array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttributeBinding {
    pub location: u32,
    pub buffer: super::traits::BufferHandle,
    pub component_type: ComponentType,
    pub components: u32,
    pub normalized: bool,
    pub stride: u32,
    pub offset: u32,
    pub divisor: u32,
}

/// Vertex array (attribute layout + element buffer) descriptor
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VertexArrayDescriptor {
    pub label: Option<String>,
    pub attributes: Vec<VertexAttributeBinding>,
    pub index_buffer: Option<super::traits::BufferHandle>,
}

/// Primitive assembly mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DrawMode {
    Points,
    Lines,
    LineStrip,
    LineLoop,
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
}

/// Index element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn size(&self) -> u32 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// Renderbuffer storage format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderbufferFormat {
    Depth24,
    Depth24Stencil8,
    Rgba8,
    Rgba16Float,
}

impl RenderbufferFormat {
    pub fn is_color(&self) -> bool {
        matches!(self, RenderbufferFormat::Rgba8 | RenderbufferFormat::Rgba16Float)
    }
}

/// Renderbuffer descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderbufferDescriptor {
    pub label: Option<String>,
    pub format: RenderbufferFormat,
    pub width: u32,
    pub height: u32,
    /// Multisample count, 0 or 1 for single-sampled storage
    pub samples: u32,
}

/// Framebuffer attachment point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attachment {
    Color0,
    Depth,
    DepthStencil,
}

/// GLSL uniform type as reported by program introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    Bool,
    Mat3,
    Mat4,
    Sampler2D,
    SamplerCube,
}

impl UniformType {
    pub fn is_sampler(&self) -> bool {
        matches!(self, UniformType::Sampler2D | UniformType::SamplerCube)
    }

    /// Parse the GLSL spelling of a type.
    pub fn from_glsl(name: &str) -> Option<Self> {
        Some(match name {
            "float" => UniformType::Float,
            "vec2" => UniformType::Vec2,
            "vec3" => UniformType::Vec3,
            "vec4" => UniformType::Vec4,
            "int" => UniformType::Int,
            "bool" => UniformType::Bool,
            "mat3" => UniformType::Mat3,
            "mat4" => UniformType::Mat4,
            "sampler2D" => UniformType::Sampler2D,
            "samplerCube" => UniformType::SamplerCube,
            _ => return None,
        })
    }
}

/// An active (non-block) uniform of a linked program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveUniform {
    /// Name without a trailing `[0]`
    pub name: String,
    pub ty: UniformType,
    /// Array length, 1 for non-arrays
    pub size: u32,
}

/// A value pushed to a uniform location
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Int(i32),
    Bool(bool),
    Mat3(Mat3),
    Mat4(Mat4),
    FloatArray(Vec<f32>),
    Vec3Array(Vec<Vec3>),
    Vec4Array(Vec<Vec4>),
    Mat4Array(Vec<Mat4>),
}

impl UniformValue {
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            UniformValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            UniformValue::Int(v) => Some(*v),
            UniformValue::Bool(v) => Some(*v as i32),
            _ => None,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<bool> for UniformValue {
    fn from(v: bool) -> Self {
        UniformValue::Bool(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<Mat3> for UniformValue {
    fn from(v: Mat3) -> Self {
        UniformValue::Mat3(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        UniformValue::Mat4(v)
    }
}

/// Cull mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

/// Fixed-function blending presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Alpha,
    Additive,
}

/// Fixed-function state applied before a draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub cull: CullMode,
    pub blend: Option<BlendMode>,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            cull: CullMode::Back,
            blend: None,
        }
    }
}

impl RenderState {
    /// State for full-screen and capture passes: no depth, no culling.
    pub fn fullscreen() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            cull: CullMode::None,
            blend: None,
        }
    }
}

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
        }
    }
}

/// Program (vertex + fragment pair) descriptor
#[derive(Debug, Clone, Copy)]
pub struct ProgramDescriptor<'a> {
    pub label: &'a str,
    pub vertex: &'a str,
    pub fragment: &'a str,
}

/// Device limits and optional features
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub max_texture_size: u32,
    pub max_cube_map_size: u32,
    pub max_samples: u32,
    pub max_texture_units: u32,
    /// `OES_texture_float_linear` or desktop equivalent
    pub float_linear_filtering: bool,
    /// `EXT_color_buffer_float` or desktop equivalent
    pub color_buffer_float: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            max_texture_size: 4096,
            max_cube_map_size: 4096,
            max_samples: 4,
            max_texture_units: 16,
            float_linear_filtering: true,
            color_buffer_float: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_size_never_zero() {
        let desc = TextureDescriptor::new_cube(16, TextureFormat::Rgba16Float).with_mip_levels(8);
        assert_eq!(desc.level_size(0), (16, 16));
        assert_eq!(desc.level_size(4), (1, 1));
        assert_eq!(desc.level_size(7), (1, 1));
    }

    #[test]
    fn test_uniform_type_from_glsl() {
        assert_eq!(UniformType::from_glsl("samplerCube"), Some(UniformType::SamplerCube));
        assert_eq!(UniformType::from_glsl("mat3"), Some(UniformType::Mat3));
        assert_eq!(UniformType::from_glsl("dmat4"), None);
    }

    #[test]
    fn test_linear_filtering_detection() {
        let nearest = TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba32Float)
            .with_filter(FilterMode::Nearest, FilterMode::Nearest);
        assert!(!nearest.uses_linear_filtering());
        assert!(nearest.with_mipmap_filter(FilterMode::Linear).uses_linear_filtering());
    }
}
