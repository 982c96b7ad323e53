//! CPU mirrors of std140 uniform blocks.
//!
//! Two blocks are shared by every program: `ubo_per_frame` on binding point 0
//! and `ubo_per_model` on binding point 1. Writes go to a CPU byte image and
//! are flushed with [`UniformBuffer::update`] before the next draw.

use std::ops::Range;

use glam::{Mat3, Mat4, Vec4};

use crate::backend::{
    BufferDescriptor, BufferHandle, BufferKind, BufferUsage, GraphicsBackend, UniformValue,
};
use crate::error::RenderResult;

pub const PER_FRAME_BLOCK: &str = "ubo_per_frame";
pub const PER_MODEL_BLOCK: &str = "ubo_per_model";
pub const PER_FRAME_BINDING: u32 = 0;
pub const PER_MODEL_BINDING: u32 = 1;

/// Type of a block member, arrays carry their length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberType {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
    FloatArray(usize),
    Vec4Array(usize),
    Mat4Array(usize),
}

impl MemberType {
    /// std140 base alignment and size in bytes.
    fn align_and_size(&self) -> (usize, usize) {
        match *self {
            MemberType::Float | MemberType::Int => (4, 4),
            MemberType::Vec2 => (8, 8),
            MemberType::Vec3 => (16, 12),
            MemberType::Vec4 => (16, 16),
            // Columns are padded to vec4
            MemberType::Mat3 => (16, 48),
            MemberType::Mat4 => (16, 64),
            // Array elements are padded to 16-byte rows
            MemberType::FloatArray(n) | MemberType::Vec4Array(n) => (16, 16 * n),
            MemberType::Mat4Array(n) => (16, 64 * n),
        }
    }
}

/// One member of a block with its resolved offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMember {
    pub name: String,
    pub ty: MemberType,
    pub offset: usize,
}

/// std140 layout of a named uniform block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    name: String,
    members: Vec<BlockMember>,
    size: usize,
}

impl BlockLayout {
    /// Lay out members in declaration order following std140.
    pub fn std140(name: &str, members: &[(&str, MemberType)]) -> Self {
        let mut offset: usize = 0;
        let mut resolved = Vec::with_capacity(members.len());
        for (member, ty) in members {
            let (align, size) = ty.align_and_size();
            offset = offset.next_multiple_of(align);
            resolved.push(BlockMember {
                name: member.to_string(),
                ty: *ty,
                offset,
            });
            offset += size;
        }
        Self {
            name: name.to_string(),
            members: resolved,
            size: offset.next_multiple_of(16),
        }
    }

    /// `ubo_per_frame { view, view_inverse, projection, view_projection, shadow_map_space }`
    pub fn per_frame() -> Self {
        Self::std140(
            PER_FRAME_BLOCK,
            &[
                ("view", MemberType::Mat4),
                ("view_inverse", MemberType::Mat4),
                ("projection", MemberType::Mat4),
                ("view_projection", MemberType::Mat4),
                ("shadow_map_space", MemberType::Mat4),
            ],
        )
    }

    /// `ubo_per_model { model, normal_view, mvp }`
    pub fn per_model() -> Self {
        Self::std140(
            PER_MODEL_BLOCK,
            &[
                ("model", MemberType::Mat4),
                ("normal_view", MemberType::Mat3),
                ("mvp", MemberType::Mat4),
            ],
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn member(&self, name: &str) -> Option<&BlockMember> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.member(name).map(|m| m.offset)
    }
}

/// Read a column-major `mat4` out of std140 bytes.
pub fn read_mat4(bytes: &[u8], offset: usize) -> Option<Mat4> {
    let slice = bytes.get(offset..offset + 64)?;
    let mut cols = [0.0f32; 16];
    for (dst, chunk) in cols.iter_mut().zip(slice.chunks_exact(4)) {
        *dst = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Some(Mat4::from_cols_array(&cols))
}

/// A uniform block's CPU mirror bound to a device buffer
#[derive(Debug)]
pub struct UniformBuffer {
    layout: BlockLayout,
    binding: u32,
    data: Vec<u8>,
    dirty: Option<Range<usize>>,
    buffer: BufferHandle,
}

impl UniformBuffer {
    /// Allocate the device buffer and attach it to `binding`.
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        layout: BlockLayout,
        binding: u32,
    ) -> RenderResult<Self> {
        let desc = BufferDescriptor::new(BufferKind::Uniform, BufferUsage::Dynamic, layout.size() as u64)
            .with_label(layout.name());
        let data = vec![0u8; layout.size()];
        let buffer = backend.create_buffer(&desc, Some(&data))?;
        backend.bind_uniform_buffer(binding, Some(buffer));
        log::debug!(
            "Uniform buffer '{}' ({} bytes) on binding {}",
            layout.name(),
            layout.size(),
            binding
        );
        Ok(Self {
            layout,
            binding,
            data,
            dirty: None,
            buffer,
        })
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn binding(&self) -> u32 {
        self.binding
    }

    pub fn handle(&self) -> BufferHandle {
        self.buffer
    }

    /// CPU copy of the block contents
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_some()
    }

    /// Write a member. Unknown members are ignored; returns whether anything was written.
    pub fn set(&mut self, name: &str, value: impl Into<UniformValue>) -> bool {
        let value = value.into();
        let Some(member) = self.layout.member(name) else {
            log::trace!("Block '{}' has no member '{}'", self.layout.name(), name);
            return false;
        };
        let (offset, ty) = (member.offset, member.ty);

        let written = match (ty, &value) {
            (MemberType::Float, UniformValue::Float(v)) => self.write(offset, &[*v]),
            (MemberType::Int, UniformValue::Int(v)) => {
                self.write_bytes(offset, bytemuck::bytes_of(v))
            }
            (MemberType::Vec2, UniformValue::Vec2(v)) => self.write(offset, &v.to_array()),
            (MemberType::Vec3, UniformValue::Vec3(v)) => self.write(offset, &v.to_array()),
            (MemberType::Vec4, UniformValue::Vec4(v)) => self.write(offset, &v.to_array()),
            (MemberType::Mat3, UniformValue::Mat3(m)) => self.write(offset, &pad_mat3(m)),
            (MemberType::Mat4, UniformValue::Mat4(m)) => self.write(offset, &m.to_cols_array()),
            (MemberType::FloatArray(len), UniformValue::FloatArray(values)) => {
                let rows: Vec<f32> = values
                    .iter()
                    .take(len)
                    .flat_map(|v| [*v, 0.0, 0.0, 0.0])
                    .collect();
                self.write(offset, &rows)
            }
            (MemberType::Vec4Array(len), UniformValue::Vec4Array(values)) => {
                let rows: Vec<f32> = values.iter().take(len).flat_map(Vec4::to_array).collect();
                self.write(offset, &rows)
            }
            (MemberType::Mat4Array(len), UniformValue::Mat4Array(values)) => {
                let rows: Vec<f32> = values
                    .iter()
                    .take(len)
                    .flat_map(Mat4::to_cols_array)
                    .collect();
                self.write(offset, &rows)
            }
            _ => false,
        };

        if !written {
            log::warn!(
                "Type mismatch writing '{}.{}': {:?} into {:?}",
                self.layout.name(),
                name,
                value,
                ty
            );
        }
        written
    }

    /// Flush the dirty byte range to the device buffer.
    pub fn update(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(range) = self.dirty.take() {
            backend.write_buffer(self.buffer, range.start as u64, &self.data[range]);
        }
    }

    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_buffer(self.buffer);
    }

    fn write(&mut self, offset: usize, values: &[f32]) -> bool {
        self.write_bytes(offset, bytemuck::cast_slice(values))
    }

    fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> bool {
        let end = offset + bytes.len();
        let Some(dst) = self.data.get_mut(offset..end) else {
            return false;
        };
        dst.copy_from_slice(bytes);
        self.dirty = Some(match self.dirty.take() {
            Some(range) => range.start.min(offset)..range.end.max(end),
            None => offset..end,
        });
        true
    }
}

fn pad_mat3(m: &Mat3) -> [f32; 12] {
    let [a, b, c] = [m.x_axis, m.y_axis, m.z_axis];
    [a.x, a.y, a.z, 0.0, b.x, b.y, b.z, 0.0, c.x, c.y, c.z, 0.0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use glam::Vec3;

    #[test]
    fn test_per_frame_layout() {
        let layout = BlockLayout::per_frame();
        assert_eq!(layout.offset_of("view"), Some(0));
        assert_eq!(layout.offset_of("view_inverse"), Some(64));
        assert_eq!(layout.offset_of("projection"), Some(128));
        assert_eq!(layout.offset_of("view_projection"), Some(192));
        assert_eq!(layout.offset_of("shadow_map_space"), Some(256));
        assert_eq!(layout.size(), 320);
    }

    #[test]
    fn test_per_model_layout_pads_mat3() {
        let layout = BlockLayout::per_model();
        assert_eq!(layout.offset_of("normal_view"), Some(64));
        assert_eq!(layout.offset_of("mvp"), Some(112));
        assert_eq!(layout.size(), 176);
    }

    #[test]
    fn test_std140_array_and_vec3_rules() {
        let layout = BlockLayout::std140(
            "lights",
            &[
                ("count", MemberType::Int),
                ("weights", MemberType::FloatArray(3)),
                ("tint", MemberType::Vec3),
                ("scale", MemberType::Float),
            ],
        );
        assert_eq!(layout.offset_of("weights"), Some(16));
        assert_eq!(layout.offset_of("tint"), Some(64));
        // A float packs into the tail of the vec3 row
        assert_eq!(layout.offset_of("scale"), Some(76));
        assert_eq!(layout.size(), 80);
    }

    #[test]
    fn test_set_then_update_flushes_dirty_range() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mut ubo = UniformBuffer::new(&mut backend, BlockLayout::per_frame(), 0).unwrap();
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));

        assert!(ubo.set("projection", m));
        assert!(!ubo.set("missing", m));
        assert!(ubo.is_dirty());
        ubo.update(&mut backend);
        assert!(!ubo.is_dirty());

        let device = backend.buffer_contents(ubo.handle()).unwrap();
        assert_eq!(read_mat4(device, 128), Some(m));
        assert_eq!(read_mat4(device, 0), Some(Mat4::ZERO));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mut ubo = UniformBuffer::new(&mut backend, BlockLayout::per_model(), 1).unwrap();
        assert!(!ubo.set("model", 1.0f32));
        assert!(!ubo.is_dirty());
    }
}
