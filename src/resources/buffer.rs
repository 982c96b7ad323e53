//! Reference-counted vertex and index buffers.
//!
//! Every [`SubMesh`](super::SubMesh) or [`InstancedMesh`](super::InstancedMesh)
//! citing a buffer holds a [`BufferCitation`]; destroying a buffer while any
//! citation is alive fails with [`ResourceError::BufferInUse`].

use std::cell::Cell;
use std::rc::Rc;

use crate::backend::{
    BufferDescriptor, BufferHandle, BufferKind, BufferUsage, GraphicsBackend, IndexType,
    VertexAttributeBinding,
};
use crate::error::{RenderResult, ResourceError};
use crate::resources::geometry::{attribute_location, Attribute, IndexData, PackedVertices};

#[derive(Debug, Default)]
struct RefCount {
    count: Cell<u32>,
    destroyed: Cell<bool>,
}

impl RefCount {
    fn retain(&self) {
        self.count.set(self.count.get() + 1);
    }

    fn release(&self) {
        let count = self.count.get();
        debug_assert!(count > 0, "buffer released more often than retained");
        self.count.set(count.saturating_sub(1));
    }

    fn check_free(&self, label: &str) -> Result<(), ResourceError> {
        match self.count.get() {
            0 => Ok(()),
            count => Err(ResourceError::BufferInUse {
                label: label.to_string(),
                count,
            }),
        }
    }
}

/// Vertex channels in one or more device buffers
#[derive(Debug)]
pub struct VertexBuffer {
    label: String,
    handles: Vec<BufferHandle>,
    attributes: Vec<(String, Attribute)>,
    vertex_count: usize,
    refs: RefCount,
}

impl VertexBuffer {
    /// Upload packed channels, one device buffer per packed buffer.
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        packed: &PackedVertices,
        usage: BufferUsage,
    ) -> RenderResult<Self> {
        let mut handles = Vec::with_capacity(packed.buffers.len());
        for (index, data) in packed.buffers.iter().enumerate() {
            let desc = BufferDescriptor::new(BufferKind::Vertex, usage, data.len() as u64)
                .with_label(format!("{label}.vertices{index}"));
            match backend.create_buffer(&desc, Some(data)) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in handles {
                        backend.destroy_buffer(handle);
                    }
                    return Err(err.into());
                }
            }
        }
        log::debug!(
            "VertexBuffer '{}': {} vertices in {} buffer(s)",
            label,
            packed.vertex_count,
            handles.len()
        );
        Ok(Self {
            label: label.to_string(),
            handles,
            attributes: packed.attributes.clone(),
            vertex_count: packed.vertex_count,
            refs: RefCount::default(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn handles(&self) -> &[BufferHandle] {
        &self.handles
    }

    pub fn attributes(&self) -> &[(String, Attribute)] {
        &self.attributes
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Number of live citations
    pub fn ref_count(&self) -> u32 {
        self.refs.count.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.refs.destroyed.get()
    }

    /// Attribute pointers for every channel with a known shader location.
    pub fn attribute_bindings(&self) -> Vec<VertexAttributeBinding> {
        self.attributes
            .iter()
            .filter_map(|(name, attribute)| {
                let Some(location) = attribute_location(name) else {
                    log::warn!("VertexBuffer '{}': no location for '{}'", self.label, name);
                    return None;
                };
                let buffer = *self.handles.get(attribute.buffer_index)?;
                Some(VertexAttributeBinding {
                    location,
                    buffer,
                    component_type: attribute.component_type,
                    components: attribute.components,
                    normalized: attribute.normalized,
                    stride: attribute.effective_stride() as u32,
                    offset: attribute.offset as u32,
                    divisor: attribute.divisor.unwrap_or(0),
                })
            })
            .collect()
    }

    /// Release the device buffers. Fails while citations remain.
    pub fn destroy(&self, backend: &mut dyn GraphicsBackend) -> RenderResult<()> {
        self.refs.check_free(&self.label)?;
        if !self.refs.destroyed.replace(true) {
            for handle in &self.handles {
                backend.destroy_buffer(*handle);
            }
        }
        Ok(())
    }
}

/// Element indices in one device buffer
#[derive(Debug)]
pub struct IndexBuffer {
    label: String,
    handle: BufferHandle,
    index_type: IndexType,
    count: usize,
    refs: RefCount,
}

impl IndexBuffer {
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        indices: &IndexData,
        usage: BufferUsage,
    ) -> RenderResult<Self> {
        let bytes = indices.bytes();
        let desc = BufferDescriptor::new(BufferKind::Index, usage, bytes.len() as u64)
            .with_label(format!("{label}.indices"));
        let handle = backend.create_buffer(&desc, Some(bytes))?;
        Ok(Self {
            label: label.to_string(),
            handle,
            index_type: indices.index_type(),
            count: indices.len(),
            refs: RefCount::default(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn ref_count(&self) -> u32 {
        self.refs.count.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.refs.destroyed.get()
    }

    pub fn destroy(&self, backend: &mut dyn GraphicsBackend) -> RenderResult<()> {
        self.refs.check_free(&self.label)?;
        if !self.refs.destroyed.replace(true) {
            backend.destroy_buffer(self.handle);
        }
        Ok(())
    }
}

/// A live citation of a vertex buffer and its optional index buffer.
///
/// Counts are incremented on creation and decremented on drop.
#[derive(Debug)]
pub struct BufferCitation {
    vertices: Rc<VertexBuffer>,
    indices: Option<Rc<IndexBuffer>>,
}

impl BufferCitation {
    pub fn new(vertices: &Rc<VertexBuffer>, indices: Option<&Rc<IndexBuffer>>) -> Self {
        vertices.refs.retain();
        if let Some(indices) = indices {
            indices.refs.retain();
        }
        Self {
            vertices: Rc::clone(vertices),
            indices: indices.cloned(),
        }
    }

    pub fn vertices(&self) -> &Rc<VertexBuffer> {
        &self.vertices
    }

    pub fn indices(&self) -> Option<&Rc<IndexBuffer>> {
        self.indices.as_ref()
    }
}

impl Clone for BufferCitation {
    fn clone(&self) -> Self {
        Self::new(&self.vertices, self.indices.as_ref())
    }
}

impl Drop for BufferCitation {
    fn drop(&mut self) {
        self.vertices.refs.release();
        if let Some(indices) = &self.indices {
            indices.refs.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DrawMode, HeadlessBackend};
    use crate::resources::geometry::{BufferFormat, Geometry};

    fn buffers(backend: &mut HeadlessBackend) -> (Rc<VertexBuffer>, Rc<IndexBuffer>) {
        let geometry = Geometry::unit_cube();
        let packed = geometry.pack(BufferFormat::Concatenated).unwrap();
        let vertices = VertexBuffer::new(backend, "cube", &packed, BufferUsage::Static).unwrap();
        let indices =
            IndexBuffer::new(backend, "cube", geometry.indices.as_ref().unwrap(), BufferUsage::Static)
                .unwrap();
        (Rc::new(vertices), Rc::new(indices))
    }

    #[test]
    fn test_destroy_refused_while_cited() {
        let mut backend = HeadlessBackend::new(4, 4);
        let (vertices, indices) = buffers(&mut backend);

        let first = BufferCitation::new(&vertices, Some(&indices));
        let second = first.clone();
        assert_eq!(vertices.ref_count(), 2);
        assert_eq!(indices.ref_count(), 2);

        let err = vertices.destroy(&mut backend).unwrap_err();
        assert!(err.to_string().contains("still referenced by 2"));

        drop(first);
        assert_eq!(vertices.ref_count(), 1);
        drop(second);
        assert_eq!(vertices.ref_count(), 0);
        assert_eq!(indices.ref_count(), 0);

        vertices.destroy(&mut backend).unwrap();
        indices.destroy(&mut backend).unwrap();
        assert_eq!(backend.live_buffers(), 0);
        // A second destroy is a no-op
        vertices.destroy(&mut backend).unwrap();
    }

    #[test]
    fn test_separate_format_uploads_one_buffer_per_channel() {
        let mut backend = HeadlessBackend::new(4, 4);
        let packed = Geometry::unit_cube().pack(BufferFormat::Separate).unwrap();
        let vertices = VertexBuffer::new(&mut backend, "cube", &packed, BufferUsage::Static).unwrap();
        assert_eq!(vertices.handles().len(), 3);

        let bindings = vertices.attribute_bindings();
        let locations: Vec<u32> = bindings.iter().map(|b| b.location).collect();
        assert_eq!(locations, vec![0, 1, 2]);
        assert_ne!(bindings[0].buffer, bindings[1].buffer);
    }

    #[test]
    fn test_unknown_channel_has_no_binding() {
        let mut backend = HeadlessBackend::new(4, 4);
        let geometry = Geometry::new(DrawMode::Points)
            .with_attribute("position", 3, vec![0.0; 3])
            .with_attribute("bone_weights", 4, vec![0.0; 4]);
        let packed = geometry.pack(BufferFormat::Interleaved).unwrap();
        let vertices = VertexBuffer::new(&mut backend, "points", &packed, BufferUsage::Static).unwrap();
        assert_eq!(vertices.attribute_bindings().len(), 1);
    }
}
