//! GPU resources
//!
//! Geometry intake, reference-counted buffers, meshes and textures.

pub mod buffer;
pub mod geometry;
pub mod mesh;
pub mod texture;

pub use buffer::{BufferCitation, IndexBuffer, VertexBuffer};
pub use geometry::{
    attribute_location, Attribute, AttributeData, BufferFormat, Geometry, Group, IndexData,
    PackedVertices,
};
pub use mesh::{InstancedMesh, Materials, Mesh, MeshInstance, SubMesh};
pub use texture::{full_mip_chain, FallbackTextures, Texture2D, TextureCubeMap, TextureOptions};
