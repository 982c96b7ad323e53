//! CPU-side geometry descriptions and their packing into device buffers.
//!
//! A [`Geometry`] is what a geometry generator or file parser hands to the
//! core: a draw mode, optional indices, named attribute channels backed by raw
//! typed arrays, and optional material groups. [`BufferFormat`] decides how the
//! channels are laid out in device memory.

use crate::backend::{ComponentType, DrawMode, IndexType};
use crate::error::ResourceError;

/// Shader location of each attribute name the built-in shaders consume.
pub const ATTRIBUTE_LOCATIONS: &[(&str, u32)] = &[
    ("position", 0),
    ("normal", 1),
    ("uv", 2),
    ("tangent", 3),
    ("color", 4),
];

/// First of the four locations taking a per-instance `mat4`.
pub const INSTANCE_TRANSFORM_LOCATION: u32 = 6;

pub fn attribute_location(name: &str) -> Option<u32> {
    ATTRIBUTE_LOCATIONS
        .iter()
        .find(|(attribute, _)| *attribute == name)
        .map(|(_, location)| *location)
}

/// Raw typed array backing one or more attributes
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeData {
    F32(Vec<f32>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
}

impl AttributeData {
    pub fn component_type(&self) -> ComponentType {
        match self {
            AttributeData::F32(_) => ComponentType::F32,
            AttributeData::U8(_) => ComponentType::U8,
            AttributeData::U16(_) => ComponentType::U16,
            AttributeData::I16(_) => ComponentType::I16,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            AttributeData::F32(data) => bytemuck::cast_slice(data),
            AttributeData::U8(data) => data,
            AttributeData::U16(data) => bytemuck::cast_slice(data),
            AttributeData::I16(data) => bytemuck::cast_slice(data),
        }
    }
}

/// One vertex channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub enabled: bool,
    /// Index into the geometry buffers, or into the device buffers once packed
    pub buffer_index: usize,
    pub component_type: ComponentType,
    pub components: u32,
    pub normalized: bool,
    /// Byte offset of the first element
    pub offset: usize,
    /// Byte distance between elements, 0 means tightly packed
    pub stride: usize,
    /// Per-instance step rate, `None` for per-vertex data
    pub divisor: Option<u32>,
}

impl Attribute {
    /// A tightly packed, enabled, per-vertex channel reading `buffer_index`.
    pub fn new(buffer_index: usize, component_type: ComponentType, components: u32) -> Self {
        Self {
            enabled: true,
            buffer_index,
            component_type,
            components,
            normalized: false,
            offset: 0,
            stride: 0,
            divisor: None,
        }
    }

    pub fn normalized(mut self) -> Self {
        self.normalized = true;
        self
    }

    /// Bytes of one element
    pub fn element_size(&self) -> usize {
        self.component_type.size() * self.components as usize
    }

    /// Stride with the tightly packed default resolved.
    pub fn effective_stride(&self) -> usize {
        if self.stride == 0 {
            self.element_size()
        } else {
            self.stride
        }
    }
}

/// Index array, 16-bit while every vertex is addressable with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexData {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexData {
    /// Pick the narrowest type able to address `vertex_count` vertices and
    /// every index in `indices`.
    pub fn from_indices(indices: Vec<u32>, vertex_count: usize) -> Self {
        if vertex_count > 1 << 16 {
            return IndexData::U32(indices);
        }
        match indices.iter().map(|&i| u16::try_from(i)).collect::<Result<Vec<u16>, _>>() {
            Ok(narrow) => IndexData::U16(narrow),
            Err(_) => IndexData::U32(indices),
        }
    }

    pub fn index_type(&self) -> IndexType {
        match self {
            IndexData::U16(_) => IndexType::U16,
            IndexData::U32(_) => IndexType::U32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IndexData::U16(data) => data.len(),
            IndexData::U32(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            IndexData::U16(data) => bytemuck::cast_slice(data),
            IndexData::U32(data) => bytemuck::cast_slice(data),
        }
    }
}

/// A material-indexed element range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Group {
    pub offset: u32,
    pub count: u32,
    pub material_index: usize,
}

/// Device packing policy for attribute channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferFormat {
    /// One device buffer per channel
    Separate,
    /// One buffer, channels stored back to back
    #[default]
    Concatenated,
    /// One buffer, channels interleaved per vertex
    Interleaved,
}

/// Channels packed for upload, attributes rewritten to index `buffers`
#[derive(Debug, Clone, PartialEq)]
pub struct PackedVertices {
    pub buffers: Vec<Vec<u8>>,
    pub attributes: Vec<(String, Attribute)>,
    pub vertex_count: usize,
}

/// Geometry handed to the core by generators and loaders
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Geometry {
    pub label: Option<String>,
    pub mode: DrawMode,
    pub indices: Option<IndexData>,
    pub attributes: Vec<(String, Attribute)>,
    pub buffers: Vec<AttributeData>,
    pub groups: Vec<Group>,
}

impl Geometry {
    pub fn new(mode: DrawMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add a float channel backed by its own array.
    pub fn with_attribute(mut self, name: &str, components: u32, data: Vec<f32>) -> Self {
        self.buffers.push(AttributeData::F32(data));
        let attribute = Attribute::new(self.buffers.len() - 1, ComponentType::F32, components);
        self.attributes.push((name.to_string(), attribute));
        self
    }

    /// Add a channel with an explicit layout over an existing or new buffer.
    pub fn with_raw_attribute(mut self, name: &str, attribute: Attribute) -> Self {
        self.attributes.push((name.to_string(), attribute));
        self
    }

    pub fn with_buffer(mut self, data: AttributeData) -> Self {
        self.buffers.push(data);
        self
    }

    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        let vertex_count = self.vertex_count();
        self.indices = Some(IndexData::from_indices(indices, vertex_count));
        self
    }

    pub fn with_group(mut self, offset: u32, count: u32, material_index: usize) -> Self {
        self.groups.push(Group {
            offset,
            count,
            material_index,
        });
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|(attribute, _)| attribute == name)
            .map(|(_, attribute)| attribute)
    }

    /// Vertices addressed by the `position` channel (0 without one).
    pub fn vertex_count(&self) -> usize {
        let Some(position) = self.attribute("position") else {
            return 0;
        };
        let Some(buffer) = self.buffers.get(position.buffer_index) else {
            return 0;
        };
        let available = buffer.bytes().len().saturating_sub(position.offset);
        let stride = position.effective_stride();
        if available < position.element_size() {
            0
        } else {
            (available - position.element_size()) / stride + 1
        }
    }

    /// Drawable elements: indices when indexed, vertices otherwise.
    pub fn element_count(&self) -> usize {
        match &self.indices {
            Some(indices) => indices.len(),
            None => self.vertex_count(),
        }
    }

    /// Groups covering the geometry, one default group when none are given.
    pub fn resolved_groups(&self) -> Vec<Group> {
        if self.groups.is_empty() {
            vec![Group {
                offset: 0,
                count: self.element_count() as u32,
                material_index: 0,
            }]
        } else {
            self.groups.clone()
        }
    }

    /// Copy the enabled channels into device buffer images.
    pub fn pack(&self, format: BufferFormat) -> Result<PackedVertices, ResourceError> {
        let vertex_count = self.vertex_count();
        if vertex_count == 0 {
            return Err(ResourceError::InvalidGeometry(
                "geometry has no position channel".to_string(),
            ));
        }

        let mut channels = Vec::new();
        for (name, attribute) in self.attributes.iter().filter(|(_, a)| a.enabled) {
            let buffer = self.buffers.get(attribute.buffer_index).ok_or_else(|| {
                ResourceError::InvalidGeometry(format!(
                    "attribute '{name}' reads missing buffer {}",
                    attribute.buffer_index
                ))
            })?;
            let size = attribute.element_size();
            let stride = attribute.effective_stride();
            let source = buffer.bytes();
            let last = attribute.offset + (vertex_count - 1) * stride + size;
            if last > source.len() {
                return Err(ResourceError::InvalidGeometry(format!(
                    "attribute '{name}' needs {last} bytes, buffer has {}",
                    source.len()
                )));
            }
            let mut bytes = Vec::with_capacity(size * vertex_count);
            for vertex in 0..vertex_count {
                let start = attribute.offset + vertex * stride;
                bytes.extend_from_slice(&source[start..start + size]);
            }
            channels.push((name.clone(), attribute.clone(), bytes));
        }

        let packed = match format {
            BufferFormat::Separate => {
                let mut buffers = Vec::with_capacity(channels.len());
                let mut attributes = Vec::with_capacity(channels.len());
                for (name, attribute, bytes) in channels {
                    let stride = attribute.element_size();
                    attributes.push((
                        name,
                        Attribute {
                            buffer_index: buffers.len(),
                            offset: 0,
                            stride,
                            ..attribute
                        },
                    ));
                    buffers.push(bytes);
                }
                PackedVertices {
                    buffers,
                    attributes,
                    vertex_count,
                }
            }
            BufferFormat::Concatenated => {
                let mut data = Vec::new();
                let mut attributes = Vec::with_capacity(channels.len());
                for (name, attribute, bytes) in channels {
                    // Keep every channel 4-byte aligned
                    data.resize(data.len().next_multiple_of(4), 0);
                    let stride = attribute.element_size();
                    attributes.push((
                        name,
                        Attribute {
                            buffer_index: 0,
                            offset: data.len(),
                            stride,
                            ..attribute
                        },
                    ));
                    data.extend_from_slice(&bytes);
                }
                PackedVertices {
                    buffers: vec![data],
                    attributes,
                    vertex_count,
                }
            }
            BufferFormat::Interleaved => {
                let mut offsets = Vec::with_capacity(channels.len());
                let mut stride: usize = 0;
                for (_, attribute, _) in &channels {
                    offsets.push(stride);
                    stride = (stride + attribute.element_size()).next_multiple_of(4);
                }
                let mut data = vec![0u8; stride * vertex_count];
                for ((_, attribute, bytes), offset) in channels.iter().zip(&offsets) {
                    let size = attribute.element_size();
                    for (vertex, element) in bytes.chunks_exact(size).enumerate() {
                        let start = vertex * stride + offset;
                        data[start..start + size].copy_from_slice(element);
                    }
                }
                let attributes = channels
                    .into_iter()
                    .zip(offsets)
                    .map(|((name, attribute, _), offset)| {
                        (
                            name,
                            Attribute {
                                buffer_index: 0,
                                offset,
                                stride,
                                ..attribute
                            },
                        )
                    })
                    .collect();
                PackedVertices {
                    buffers: vec![data],
                    attributes,
                    vertex_count,
                }
            }
        };
        Ok(packed)
    }

    /// Indexed unit cube centered at the origin, with normals and uvs.
    ///
    /// Faces wind counter-clockwise when seen from outside.
    pub fn unit_cube() -> Self {
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            // normal, u axis, v axis
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ];

        let mut positions = Vec::with_capacity(72);
        let mut normals = Vec::with_capacity(72);
        let mut uvs = Vec::with_capacity(48);
        let mut indices = Vec::with_capacity(36);
        for (face, (n, u, v)) in faces.iter().enumerate() {
            for (s, t) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                for axis in 0..3 {
                    positions.push(n[axis] + s * u[axis] + t * v[axis]);
                }
                normals.extend_from_slice(n);
                uvs.extend_from_slice(&[(s + 1.0) * 0.5, (t + 1.0) * 0.5]);
            }
            let base = face as u32 * 4;
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Geometry::new(DrawMode::Triangles)
            .with_label("unit_cube")
            .with_attribute("position", 3, positions)
            .with_attribute("normal", 3, normals)
            .with_attribute("uv", 2, uvs)
            .with_indices(indices)
    }

    /// Two triangles covering clip space, uvs spanning [0, 1].
    pub fn fullscreen_quad() -> Self {
        Geometry::new(DrawMode::Triangles)
            .with_label("fullscreen_quad")
            .with_attribute(
                "position",
                3,
                vec![-1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 1.0, 1.0, 0.0, -1.0, 1.0, 0.0],
            )
            .with_attribute("uv", 2, vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0])
            .with_indices(vec![0, 1, 2, 0, 2, 3])
    }
}
