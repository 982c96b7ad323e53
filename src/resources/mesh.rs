//! Meshes, sub-mesh ranges, placed instances and GPU instancing.

use std::ops::Range;
use std::rc::Rc;

use glam::Mat4;

use crate::backend::{
    BufferDescriptor, BufferHandle, BufferKind, BufferUsage, ComponentType, DrawMode,
    GraphicsBackend, IndexType, VertexArrayDescriptor, VertexArrayHandle, VertexAttributeBinding,
};
use crate::error::{RenderResult, ResourceError};
use crate::material::SharedMaterial;
use crate::resources::buffer::{BufferCitation, IndexBuffer, VertexBuffer};
use crate::resources::geometry::{BufferFormat, Geometry, Group, INSTANCE_TRANSFORM_LOCATION};

/// A material-indexed element range of a [`Mesh`]
#[derive(Debug)]
pub struct SubMesh {
    material_index: usize,
    offset: u32,
    count: u32,
    citation: BufferCitation,
}

impl SubMesh {
    pub fn material_index(&self) -> usize {
        self.material_index
    }

    /// First element (index or vertex) of the range
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn vertex_buffer(&self) -> &Rc<VertexBuffer> {
        self.citation.vertices()
    }

    pub fn index_buffer(&self) -> Option<&Rc<IndexBuffer>> {
        self.citation.indices()
    }
}

/// One vertex buffer, at most one index buffer, drawn as sub-mesh ranges
#[derive(Debug)]
pub struct Mesh {
    label: String,
    mode: DrawMode,
    vertices: Rc<VertexBuffer>,
    indices: Option<Rc<IndexBuffer>>,
    vertex_array: VertexArrayHandle,
    submeshes: Vec<SubMesh>,
}

impl Mesh {
    /// Upload a geometry and split it into its groups.
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        geometry: &Geometry,
        format: BufferFormat,
    ) -> RenderResult<Self> {
        let label = geometry.label.clone().unwrap_or_else(|| "mesh".to_string());
        let packed = geometry.pack(format)?;
        let vertices = Rc::new(VertexBuffer::new(backend, &label, &packed, BufferUsage::Static)?);
        let indices = match &geometry.indices {
            Some(indices) => Some(Rc::new(IndexBuffer::new(
                backend,
                &label,
                indices,
                BufferUsage::Static,
            )?)),
            None => None,
        };
        Self::from_buffers(
            backend,
            &label,
            geometry.mode,
            vertices,
            indices,
            &geometry.resolved_groups(),
        )
    }

    /// Build a mesh over existing, possibly shared, buffers.
    pub fn from_buffers(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        mode: DrawMode,
        vertices: Rc<VertexBuffer>,
        indices: Option<Rc<IndexBuffer>>,
        groups: &[Group],
    ) -> RenderResult<Self> {
        let vertex_array = backend.create_vertex_array(&VertexArrayDescriptor {
            label: Some(label.to_string()),
            attributes: vertices.attribute_bindings(),
            index_buffer: indices.as_ref().map(|i| i.handle()),
        })?;

        let mut mesh = Self {
            label: label.to_string(),
            mode,
            vertices,
            indices,
            vertex_array,
            submeshes: Vec::with_capacity(groups.len()),
        };
        for group in groups {
            mesh.add_submesh(group.material_index, group.offset, group.count)?;
        }
        if mesh.covered_elements() != mesh.element_count() {
            log::warn!(
                "Mesh '{}': sub-meshes cover {} of {} elements",
                mesh.label,
                mesh.covered_elements(),
                mesh.element_count()
            );
        }
        log::debug!(
            "Mesh '{}': {} vertices, {} sub-mesh(es)",
            mesh.label,
            mesh.vertices.vertex_count(),
            mesh.submeshes.len()
        );
        Ok(mesh)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn mode(&self) -> DrawMode {
        self.mode
    }

    pub fn vertex_buffer(&self) -> &Rc<VertexBuffer> {
        &self.vertices
    }

    pub fn index_buffer(&self) -> Option<&Rc<IndexBuffer>> {
        self.indices.as_ref()
    }

    pub fn index_type(&self) -> Option<IndexType> {
        self.indices.as_ref().map(|i| i.index_type())
    }

    pub fn vertex_array(&self) -> VertexArrayHandle {
        self.vertex_array
    }

    pub fn submeshes(&self) -> &[SubMesh] {
        &self.submeshes
    }

    /// Indices when indexed, vertices otherwise
    pub fn element_count(&self) -> usize {
        match &self.indices {
            Some(indices) => indices.count(),
            None => self.vertices.vertex_count(),
        }
    }

    /// Length a per-group material array must have.
    pub fn material_count(&self) -> usize {
        self.submeshes
            .iter()
            .map(|s| s.material_index + 1)
            .max()
            .unwrap_or(0)
    }

    fn covered_elements(&self) -> usize {
        self.submeshes.iter().map(|s| s.count as usize).sum()
    }

    /// Append a range, citing this mesh's buffers.
    pub fn add_submesh(&mut self, material_index: usize, offset: u32, count: u32) -> RenderResult<()> {
        let end = offset as usize + count as usize;
        if end > self.element_count() {
            return Err(ResourceError::InvalidGeometry(format!(
                "sub-mesh {}..{} exceeds {} elements of '{}'",
                offset,
                end,
                self.element_count(),
                self.label
            ))
            .into());
        }
        self.submeshes.push(SubMesh {
            material_index,
            offset,
            count,
            citation: BufferCitation::new(&self.vertices, self.indices.as_ref()),
        });
        Ok(())
    }

    /// Detach a range; its citation ends when the returned value is dropped.
    pub fn remove_submesh(&mut self, index: usize) -> Option<SubMesh> {
        (index < self.submeshes.len()).then(|| self.submeshes.remove(index))
    }

    pub fn clear_submeshes(&mut self) {
        self.submeshes.clear();
    }

    /// Drop the sub-meshes and release the device objects.
    ///
    /// Fails without side effects while another owner (an instanced mesh or a
    /// mesh sharing the buffers) still cites them.
    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) -> RenderResult<()> {
        let own = self.submeshes.len() as u32;
        let foreign = self.vertices.ref_count().saturating_sub(own);
        if foreign > 0 {
            return Err(ResourceError::BufferInUse {
                label: self.vertices.label().to_string(),
                count: foreign,
            }
            .into());
        }
        self.submeshes.clear();
        self.vertices.destroy(backend)?;
        if let Some(indices) = &self.indices {
            indices.destroy(backend)?;
        }
        backend.destroy_vertex_array(self.vertex_array);
        Ok(())
    }

    /// Destroy a mesh held through an `Rc`, refused while other holders exist.
    pub fn destroy_shared(mesh: Rc<Mesh>, backend: &mut dyn GraphicsBackend) -> RenderResult<()> {
        match Rc::try_unwrap(mesh) {
            Ok(mut mesh) => mesh.destroy(backend),
            Err(mesh) => Err(ResourceError::MeshInUse(mesh.label.clone()).into()),
        }
    }
}

/// One material for every sub-mesh, or one per material index
#[derive(Debug, Clone)]
pub enum Materials {
    Single(SharedMaterial),
    PerGroup(Vec<SharedMaterial>),
}

impl Materials {
    pub fn for_index(&self, material_index: usize) -> Option<&SharedMaterial> {
        match self {
            Materials::Single(material) => Some(material),
            Materials::PerGroup(materials) => materials.get(material_index),
        }
    }

    fn check_against(&self, mesh: &Mesh) {
        if let Materials::PerGroup(materials) = self {
            if materials.len() != mesh.material_count() {
                log::warn!(
                    "Mesh '{}' uses {} material(s) but {} were supplied",
                    mesh.label(),
                    mesh.material_count(),
                    materials.len()
                );
            }
        }
    }
}

impl From<SharedMaterial> for Materials {
    fn from(material: SharedMaterial) -> Self {
        Materials::Single(material)
    }
}

impl From<Vec<SharedMaterial>> for Materials {
    fn from(materials: Vec<SharedMaterial>) -> Self {
        Materials::PerGroup(materials)
    }
}

/// A placed mesh: shared mesh, its materials and a model transform
#[derive(Debug, Clone)]
pub struct MeshInstance {
    mesh: Rc<Mesh>,
    materials: Materials,
    transform: Mat4,
}

impl MeshInstance {
    pub fn new(mesh: Rc<Mesh>, materials: impl Into<Materials>) -> Self {
        let materials = materials.into();
        materials.check_against(&mesh);
        Self {
            mesh,
            materials,
            transform: Mat4::IDENTITY,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn mesh(&self) -> &Rc<Mesh> {
        &self.mesh
    }

    pub fn materials(&self) -> &Materials {
        &self.materials
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }
}

const INSTANCE_STRIDE: usize = std::mem::size_of::<Mat4>();

/// A mesh drawn many times with per-instance transforms
#[derive(Debug)]
pub struct InstancedMesh {
    mesh: Rc<Mesh>,
    materials: Materials,
    citation: BufferCitation,
    transforms: Vec<Mat4>,
    capacity: usize,
    instance_buffer: Option<BufferHandle>,
    vertex_array: Option<VertexArrayHandle>,
    dirty: Option<Range<usize>>,
    reallocations: u32,
}

impl InstancedMesh {
    pub fn new(mesh: Rc<Mesh>, materials: impl Into<Materials>) -> Self {
        let materials = materials.into();
        materials.check_against(&mesh);
        let citation = BufferCitation::new(mesh.vertex_buffer(), mesh.index_buffer());
        Self {
            mesh,
            materials,
            citation,
            transforms: Vec::new(),
            capacity: 0,
            instance_buffer: None,
            vertex_array: None,
            dirty: None,
            reallocations: 0,
        }
    }

    pub fn mesh(&self) -> &Rc<Mesh> {
        &self.mesh
    }

    pub fn materials(&self) -> &Materials {
        &self.materials
    }

    pub fn transforms(&self) -> &[Mat4] {
        &self.transforms
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Instances the device buffer can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How often the device buffer was (re)allocated
    pub fn reallocations(&self) -> u32 {
        self.reallocations
    }

    /// Vertex array including the instance attributes, after [`sync`](Self::sync).
    pub fn vertex_array(&self) -> Option<VertexArrayHandle> {
        self.vertex_array
    }

    pub fn push(&mut self, transform: Mat4) -> usize {
        self.transforms.push(transform);
        let index = self.transforms.len() - 1;
        self.mark_dirty(index..index + 1);
        index
    }

    pub fn set(&mut self, index: usize, transform: Mat4) -> bool {
        let Some(slot) = self.transforms.get_mut(index) else {
            return false;
        };
        *slot = transform;
        self.mark_dirty(index..index + 1);
        true
    }

    /// Remove an instance; the last one takes its slot.
    pub fn remove(&mut self, index: usize) -> Option<Mat4> {
        if index >= self.transforms.len() {
            return None;
        }
        let removed = self.transforms.swap_remove(index);
        if index < self.transforms.len() {
            self.mark_dirty(index..index + 1);
        }
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.transforms.clear();
        self.dirty = None;
    }

    fn mark_dirty(&mut self, range: Range<usize>) {
        self.dirty = Some(match self.dirty.take() {
            Some(dirty) => dirty.start.min(range.start)..dirty.end.max(range.end),
            None => range,
        });
    }

    /// Bring the device buffer in line with the transforms.
    ///
    /// Reallocates only when the count exceeds the capacity or drops below
    /// half of it, otherwise writes the dirty range in place.
    pub fn sync(&mut self, backend: &mut dyn GraphicsBackend) -> RenderResult<()> {
        let len = self.transforms.len();
        if len == 0 {
            return Ok(());
        }

        if self.instance_buffer.is_none() || len > self.capacity || len < self.capacity / 2 {
            return self.reallocate(backend, len.next_power_of_two());
        }

        if let Some(range) = self.dirty.take() {
            let end = range.end.min(len);
            if range.start < end {
                if let Some(buffer) = self.instance_buffer {
                    let bytes: &[u8] = bytemuck::cast_slice(&self.transforms[range.start..end]);
                    backend.write_buffer(buffer, (range.start * INSTANCE_STRIDE) as u64, bytes);
                }
            }
        }
        Ok(())
    }

    fn reallocate(&mut self, backend: &mut dyn GraphicsBackend, capacity: usize) -> RenderResult<()> {
        self.release(backend);

        let mut data = vec![0u8; capacity * INSTANCE_STRIDE];
        let used: &[u8] = bytemuck::cast_slice(&self.transforms);
        data[..used.len()].copy_from_slice(used);

        let desc = BufferDescriptor::new(BufferKind::Vertex, BufferUsage::Dynamic, data.len() as u64)
            .with_label(format!("{}.instances", self.mesh.label()));
        let buffer = backend.create_buffer(&desc, Some(&data))?;

        let mut attributes = self.mesh.vertex_buffer().attribute_bindings();
        for column in 0..4u32 {
            attributes.push(VertexAttributeBinding {
                location: INSTANCE_TRANSFORM_LOCATION + column,
                buffer,
                component_type: ComponentType::F32,
                components: 4,
                normalized: false,
                stride: INSTANCE_STRIDE as u32,
                offset: column * 16,
                divisor: 1,
            });
        }
        let vertex_array = match backend.create_vertex_array(&VertexArrayDescriptor {
            label: Some(format!("{}.instanced", self.mesh.label())),
            attributes,
            index_buffer: self.mesh.index_buffer().map(|i| i.handle()),
        }) {
            Ok(vertex_array) => vertex_array,
            Err(err) => {
                backend.destroy_buffer(buffer);
                return Err(err.into());
            }
        };

        log::debug!(
            "InstancedMesh '{}': capacity {} -> {} for {} instances",
            self.mesh.label(),
            self.capacity,
            capacity,
            self.transforms.len()
        );
        self.instance_buffer = Some(buffer);
        self.vertex_array = Some(vertex_array);
        self.capacity = capacity;
        self.dirty = None;
        self.reallocations += 1;
        Ok(())
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(vertex_array) = self.vertex_array.take() {
            backend.destroy_vertex_array(vertex_array);
        }
        if let Some(buffer) = self.instance_buffer.take() {
            backend.destroy_buffer(buffer);
        }
        self.capacity = 0;
    }

    /// Free the instance buffer; the mesh citation ends with `self`.
    pub fn destroy(mut self, backend: &mut dyn GraphicsBackend) {
        self.release(backend);
        log::trace!(
            "InstancedMesh over '{}' destroyed, {} citation(s) left",
            self.mesh.label(),
            self.citation.vertices().ref_count().saturating_sub(1)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::material::Material;

    fn quad_mesh(backend: &mut HeadlessBackend) -> Mesh {
        Mesh::new(backend, &Geometry::fullscreen_quad(), BufferFormat::Concatenated).unwrap()
    }

    #[test]
    fn test_submesh_citations_follow_lifetimes() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mut mesh = quad_mesh(&mut backend);
        assert_eq!(mesh.vertex_buffer().ref_count(), 1);

        mesh.add_submesh(0, 0, 3).unwrap();
        mesh.add_submesh(1, 3, 3).unwrap();
        assert_eq!(mesh.vertex_buffer().ref_count(), 3);
        assert_eq!(mesh.index_buffer().unwrap().ref_count(), 3);

        for expected in [2, 1, 0] {
            drop(mesh.remove_submesh(0));
            assert_eq!(mesh.vertex_buffer().ref_count(), expected);
        }
        mesh.destroy(&mut backend).unwrap();
        assert_eq!(backend.live_buffers(), 0);
        assert_eq!(backend.live_vertex_arrays(), 0);
    }

    #[test]
    fn test_out_of_range_submesh_is_rejected() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mut mesh = quad_mesh(&mut backend);
        assert!(mesh.add_submesh(0, 4, 6).is_err());
    }

    #[test]
    fn test_destroy_refused_while_instanced() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mesh = Rc::new(quad_mesh(&mut backend));
        let instanced = InstancedMesh::new(Rc::clone(&mesh), Material::empty().shared());

        let err = Mesh::destroy_shared(Rc::clone(&mesh), &mut backend).unwrap_err();
        assert!(err.to_string().contains("still shared"));

        let instanced_mesh = Rc::clone(instanced.mesh());
        instanced.destroy(&mut backend);
        drop(instanced_mesh);
        Mesh::destroy_shared(mesh, &mut backend).unwrap();
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn test_instance_buffer_hysteresis() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mesh = Rc::new(quad_mesh(&mut backend));
        let mut instanced = InstancedMesh::new(mesh, Material::empty().shared());

        for i in 0..3 {
            instanced.push(Mat4::from_translation(glam::Vec3::X * i as f32));
        }
        instanced.sync(&mut backend).unwrap();
        assert_eq!((instanced.capacity(), instanced.reallocations()), (4, 1));

        // Growing within capacity writes in place
        instanced.push(Mat4::IDENTITY);
        instanced.sync(&mut backend).unwrap();
        assert_eq!((instanced.capacity(), instanced.reallocations()), (4, 1));

        instanced.push(Mat4::IDENTITY);
        instanced.sync(&mut backend).unwrap();
        assert_eq!((instanced.capacity(), instanced.reallocations()), (8, 2));

        // Shrinking to half keeps the buffer, below half reallocates
        instanced.remove(0);
        instanced.sync(&mut backend).unwrap();
        assert_eq!(instanced.reallocations(), 2);
        instanced.remove(0);
        instanced.remove(0);
        instanced.sync(&mut backend).unwrap();
        assert_eq!((instanced.capacity(), instanced.reallocations()), (2, 3));
    }

    #[test]
    fn test_in_place_update_writes_dirty_transform() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mesh = Rc::new(quad_mesh(&mut backend));
        let mut instanced = InstancedMesh::new(mesh, Material::empty().shared());
        instanced.push(Mat4::IDENTITY);
        instanced.push(Mat4::IDENTITY);
        instanced.sync(&mut backend).unwrap();

        let moved = Mat4::from_scale(glam::Vec3::splat(2.0));
        instanced.set(1, moved);
        let writes = backend.counters().buffer_writes;
        instanced.sync(&mut backend).unwrap();
        assert_eq!(backend.counters().buffer_writes, writes + 1);
        assert_eq!(instanced.reallocations(), 1);
    }
}
