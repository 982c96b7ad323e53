//! The renderer context.
//!
//! [`Renderer`] owns the graphics backend and everything shared by all draws:
//! the two uniform buffers, the shader variant cache, the fallback textures
//! and the lazily baked BRDF lookup table. It also tracks the bound program,
//! material and vertex array so that redundant state changes are skipped.

use std::collections::HashMap;
use std::rc::Rc;

use glam::{Mat3, Mat4, Vec3};

use crate::backend::{
    DrawMode, GraphicsBackend, IndexType, ProgramHandle, RenderState, VertexArrayHandle,
};
use crate::error::{RenderResult, ResourceError};
use crate::ibl;
use crate::material::{Lighting, SharedMaterial};
use crate::resources::mesh::{InstancedMesh, Mesh, MeshInstance};
use crate::resources::texture::{FallbackTextures, Texture2D};
use crate::shader::{
    BlockLayout, Shader, ShaderFeatures, ShaderSource, UniformBuffer, PER_FRAME_BINDING,
    PER_MODEL_BINDING,
};
use crate::RendererConfig;

/// Counters for the current pass, reset by [`Renderer::set_per_frame_uniforms`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    pub shader_binds: u32,
    pub material_binds: u32,
    pub vertex_array_binds: u32,
    pub draw_calls: u32,
    pub vertices: u64,
    pub indices: u64,
    pub instances: u64,
}

/// Maps clip space [-1, 1] to texture space [0, 1].
pub fn shadow_bias() -> Mat4 {
    Mat4::from_translation(Vec3::splat(0.5)) * Mat4::from_scale(Vec3::splat(0.5))
}

/// Parameters of one draw
#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    pub mode: DrawMode,
    pub count: u32,
    /// First vertex, or first index for indexed draws
    pub offset: u32,
    pub index_type: Option<IndexType>,
    pub vertex_array: Option<VertexArrayHandle>,
    pub material: Option<&'a SharedMaterial>,
    /// Added to the material's requested features
    pub features: ShaderFeatures,
}

impl<'a> DrawCall<'a> {
    /// Non-indexed draw of `count` vertices.
    pub fn arrays(mode: DrawMode, count: u32) -> Self {
        Self {
            mode,
            count,
            offset: 0,
            index_type: None,
            vertex_array: None,
            material: None,
            features: ShaderFeatures::empty(),
        }
    }

    /// Indexed draw of `count` elements.
    pub fn elements(mode: DrawMode, count: u32, index_type: IndexType) -> Self {
        Self {
            index_type: Some(index_type),
            ..Self::arrays(mode, count)
        }
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_vertex_array(mut self, vertex_array: VertexArrayHandle) -> Self {
        self.vertex_array = Some(vertex_array);
        self
    }

    pub fn with_material(mut self, material: &'a SharedMaterial) -> Self {
        self.material = Some(material);
        self
    }

    pub fn with_features(mut self, features: ShaderFeatures) -> Self {
        self.features |= features;
        self
    }
}

/// Host-owned rendering context
pub struct Renderer {
    backend: Box<dyn GraphicsBackend>,
    config: RendererConfig,
    per_frame: UniformBuffer,
    per_model: UniformBuffer,
    shaders: HashMap<String, Rc<Shader>>,
    fallbacks: FallbackTextures,
    brdf_lut: Option<Rc<Texture2D>>,
    lighting: Lighting,
    frame_view: Mat4,
    frame_projection: Mat4,
    current_program: Option<ProgramHandle>,
    current_material: Option<SharedMaterial>,
    current_vertex_array: Option<VertexArrayHandle>,
    stats: RendererStats,
}

impl Renderer {
    pub fn new(mut backend: Box<dyn GraphicsBackend>, config: RendererConfig) -> RenderResult<Self> {
        let per_frame = UniformBuffer::new(backend.as_mut(), BlockLayout::per_frame(), PER_FRAME_BINDING)?;
        let per_model = UniformBuffer::new(backend.as_mut(), BlockLayout::per_model(), PER_MODEL_BINDING)?;
        let fallbacks = FallbackTextures::new(backend.as_mut())?;
        fallbacks.bind_all(backend.as_mut());
        backend.set_render_state(&RenderState::default());

        let (width, height) = backend.drawable_size();
        log::info!(
            "Renderer: {} backend, drawable {}x{}, {} MSAA samples",
            backend.name(),
            width,
            height,
            config.msaa_samples
        );

        Ok(Self {
            backend,
            config,
            per_frame,
            per_model,
            shaders: HashMap::new(),
            fallbacks,
            brdf_lut: None,
            lighting: Lighting::default(),
            frame_view: Mat4::IDENTITY,
            frame_projection: Mat4::IDENTITY,
            current_program: None,
            current_material: None,
            current_vertex_array: None,
            stats: RendererStats::default(),
        })
    }

    pub fn backend(&self) -> &dyn GraphicsBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn GraphicsBackend {
        self.backend.as_mut()
    }

    /// Downcast the backend, e.g. to inspect a `HeadlessBackend` in tests.
    pub fn backend_as<T: GraphicsBackend>(&self) -> Option<&T> {
        self.backend.as_any().downcast_ref::<T>()
    }

    pub fn backend_as_mut<T: GraphicsBackend>(&mut self) -> Option<&mut T> {
        self.backend.as_any_mut().downcast_mut::<T>()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn stats(&self) -> RendererStats {
        self.stats
    }

    pub fn fallbacks(&self) -> &FallbackTextures {
        &self.fallbacks
    }

    pub fn lighting(&self) -> &Lighting {
        &self.lighting
    }

    /// Replace the light. Materials are re-activated on their next draw.
    pub fn set_lighting(&mut self, lighting: Lighting) {
        self.lighting = lighting;
        self.current_material = None;
    }

    /// Number of compiled shader variants
    pub fn shader_count(&self) -> usize {
        self.shaders.len()
    }

    pub fn current_program(&self) -> Option<ProgramHandle> {
        self.current_program
    }

    /// View and projection of the last [`Renderer::set_per_frame_uniforms`] call.
    pub fn frame_matrices(&self) -> (Mat4, Mat4) {
        (self.frame_view, self.frame_projection)
    }

    /// Write the per-frame block and reset the stats.
    pub fn set_per_frame_uniforms(&mut self, view: Mat4, projection: Mat4, shadow: Option<Mat4>) {
        self.per_frame.set("view", view);
        self.per_frame.set("view_inverse", view.inverse());
        self.per_frame.set("projection", projection);
        self.per_frame.set("view_projection", projection * view);
        if let Some(shadow) = shadow {
            self.per_frame.set("shadow_map_space", shadow_bias() * shadow);
        }
        self.per_frame.update(self.backend.as_mut());

        self.frame_view = view;
        self.frame_projection = projection;
        self.stats = RendererStats::default();
    }

    /// Write the per-model block.
    ///
    /// Fails when the model-view matrix has no inverse.
    pub fn set_per_model_uniforms(
        &mut self,
        model: Mat4,
        view: Mat4,
        projection: Mat4,
    ) -> RenderResult<()> {
        let model_view = view * model;
        let upper = Mat3::from_mat4(model_view);
        if upper.determinant().abs() <= f32::EPSILON * f32::EPSILON {
            return Err(ResourceError::SingularMatrix.into());
        }
        self.per_model.set("model", model);
        self.per_model.set("normal_view", upper.inverse().transpose());
        self.per_model.set("mvp", projection * model_view);
        self.per_model.update(self.backend.as_mut());
        Ok(())
    }

    /// Cached variant of `source` for `requested`, compiled on first use.
    pub fn get_or_create_shader(
        &mut self,
        source: &ShaderSource,
        requested: ShaderFeatures,
    ) -> RenderResult<Rc<Shader>> {
        let name = source.specialized_name(requested);
        if let Some(shader) = self.shaders.get(&name) {
            return Ok(Rc::clone(shader));
        }

        let shader = Rc::new(Shader::new(self.backend.as_mut(), &source.specialize(requested))?);
        // Linking leaves no program bound
        self.current_program = None;
        self.shaders.insert(name, Rc::clone(&shader));
        Ok(shader)
    }

    /// Bind a program directly, for passes that draw without a material.
    pub fn use_shader(&mut self, shader: &Shader) {
        self.release_material();
        self.bind_program(shader.program());
    }

    /// Draw once.
    pub fn draw(&mut self, call: &DrawCall) -> RenderResult<()> {
        self.submit(call, 1)
    }

    /// Draw `instances` copies; the shader is specialized with `INSTANCED`.
    pub fn draw_instanced(&mut self, call: &DrawCall, instances: u32) -> RenderResult<()> {
        if instances == 0 {
            return Ok(());
        }
        let call = call.with_features(ShaderFeatures::INSTANCED);
        self.submit(&call, instances)
    }

    /// Draw all elements of `mesh` with the program in use.
    pub fn draw_mesh(&mut self, mesh: &Mesh) -> RenderResult<()> {
        let call = mesh_call(mesh.mode(), mesh.index_type(), mesh.element_count() as u32, 0)
            .with_vertex_array(mesh.vertex_array());
        self.draw(&call)
    }

    /// Upload the model transform and draw every sub-mesh with its material.
    pub fn render_mesh_instance(&mut self, instance: &MeshInstance) -> RenderResult<()> {
        let (view, projection) = (self.frame_view, self.frame_projection);
        self.set_per_model_uniforms(instance.transform(), view, projection)?;

        let mesh = instance.mesh();
        for submesh in mesh.submeshes() {
            let Some(material) = instance.materials().for_index(submesh.material_index()) else {
                log::trace!(
                    "Mesh '{}': no material for index {}",
                    mesh.label(),
                    submesh.material_index()
                );
                continue;
            };
            let call = mesh_call(mesh.mode(), mesh.index_type(), submesh.count(), submesh.offset())
                .with_vertex_array(mesh.vertex_array())
                .with_material(material);
            self.draw(&call)?;
        }
        Ok(())
    }

    /// Sync the instance transforms and draw every sub-mesh instanced.
    pub fn render_instanced_mesh(&mut self, instanced: &mut InstancedMesh) -> RenderResult<()> {
        if instanced.is_empty() {
            return Ok(());
        }
        instanced.sync(self.backend.as_mut())?;
        let Some(vertex_array) = instanced.vertex_array() else {
            return Ok(());
        };
        let (view, projection) = (self.frame_view, self.frame_projection);
        self.set_per_model_uniforms(Mat4::IDENTITY, view, projection)?;

        let count = instanced.len() as u32;
        let mesh = Rc::clone(instanced.mesh());
        for submesh in mesh.submeshes() {
            let Some(material) = instanced.materials().for_index(submesh.material_index()) else {
                continue;
            };
            let call = mesh_call(mesh.mode(), mesh.index_type(), submesh.count(), submesh.offset())
                .with_vertex_array(vertex_array)
                .with_material(material);
            self.draw_instanced(&call, count)?;
        }
        Ok(())
    }

    /// The BRDF integration table, baked on first request.
    pub fn brdf_lut(&mut self) -> RenderResult<Rc<Texture2D>> {
        if let Some(lut) = &self.brdf_lut {
            return Ok(Rc::clone(lut));
        }
        let size = self.config.ibl.brdf_lut_size;
        let lut = Rc::new(ibl::bake_brdf_lut(self, size)?);
        self.brdf_lut = Some(Rc::clone(&lut));
        Ok(lut)
    }

    /// Forget the tracked bindings and unbind program and vertex array.
    pub fn reset_state(&mut self) {
        self.release_material();
        self.backend.use_program(None);
        self.backend.bind_vertex_array(None);
        self.current_program = None;
        self.current_vertex_array = None;
    }

    /// Release everything owned by the renderer context.
    pub fn destroy(mut self) {
        self.reset_state();
        for shader in self.shaders.values() {
            shader.destroy(self.backend.as_mut());
        }
        if let Some(lut) = self.brdf_lut.take() {
            lut.destroy(self.backend.as_mut());
        }
        self.fallbacks.destroy(self.backend.as_mut());
        self.per_frame.destroy(self.backend.as_mut());
        self.per_model.destroy(self.backend.as_mut());
        log::debug!("Renderer destroyed");
    }

    fn submit(&mut self, call: &DrawCall, instances: u32) -> RenderResult<()> {
        let source = call
            .material
            .and_then(|material| {
                let material = material.borrow();
                material
                    .shader_source()
                    .map(|source| (source, material.requested_features() | call.features))
            });

        match (call.material, source) {
            (Some(material), Some((source, requested))) => {
                let shader = self.get_or_create_shader(&source, requested)?;
                let switched = self.bind_program(shader.program());
                self.bind_material(material, &shader, switched)?;
            }
            _ => {
                if self.current_program.is_none() {
                    return Err(ResourceError::NoProgramBound.into());
                }
            }
        }

        if self.current_vertex_array != call.vertex_array {
            self.backend.bind_vertex_array(call.vertex_array);
            self.current_vertex_array = call.vertex_array;
            self.stats.vertex_array_binds += 1;
        }

        match call.index_type {
            Some(index_type) => {
                self.backend
                    .draw_elements(call.mode, call.count, index_type, call.offset, instances);
                self.stats.indices += call.count as u64;
            }
            None => {
                self.backend.draw_arrays(call.mode, call.offset, call.count, instances);
                self.stats.vertices += call.count as u64;
            }
        }
        self.stats.draw_calls += 1;
        if instances > 1 {
            self.stats.instances += instances as u64;
        }
        Ok(())
    }

    /// Returns whether the program changed.
    fn bind_program(&mut self, program: ProgramHandle) -> bool {
        if self.current_program == Some(program) {
            return false;
        }
        log::trace!("Renderer: use program {:?}", program);
        self.backend.use_program(Some(program));
        self.current_program = Some(program);
        self.stats.shader_binds += 1;
        true
    }

    fn bind_material(
        &mut self,
        material: &SharedMaterial,
        shader: &Shader,
        program_switched: bool,
    ) -> RenderResult<()> {
        let same = self
            .current_material
            .as_ref()
            .is_some_and(|current| Rc::ptr_eq(current, material));
        if same && !program_switched {
            return Ok(());
        }
        if !same {
            self.release_material();
        }
        material.borrow_mut().activate(
            self.backend.as_mut(),
            shader,
            &self.fallbacks,
            &self.lighting,
        )?;
        self.current_material = Some(Rc::clone(material));
        self.stats.material_binds += 1;
        Ok(())
    }

    /// Run the current material's cleanup and stop tracking it.
    fn release_material(&mut self) {
        if let Some(previous) = self.current_material.take() {
            previous.borrow().cleanup(self.backend.as_mut());
        }
    }
}

fn mesh_call<'a>(mode: DrawMode, index_type: Option<IndexType>, count: u32, offset: u32) -> DrawCall<'a> {
    match index_type {
        Some(index_type) => DrawCall::elements(mode, count, index_type).with_offset(offset),
        None => DrawCall::arrays(mode, count).with_offset(offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::material::{Material, UnlitMaterial};
    use crate::shader::uniform_buffer::read_mat4;
    use crate::shader::ShaderKind;
    use glam::Vec4;

    fn renderer() -> Renderer {
        Renderer::new(Box::new(HeadlessBackend::new(8, 8)), RendererConfig::default()).unwrap()
    }

    #[test]
    fn test_per_frame_block_contents() {
        let mut renderer = renderer();
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_rh_gl(1.0, 1.0, 0.1, 100.0);
        renderer.set_per_frame_uniforms(view, projection, Some(Mat4::IDENTITY));

        let bytes = renderer.per_frame.bytes();
        let layout = BlockLayout::per_frame();
        let offset = |name| layout.offset_of(name).unwrap();
        assert_eq!(read_mat4(bytes, offset("view")), Some(view));
        assert_eq!(read_mat4(bytes, offset("view_projection")), Some(projection * view));
        assert_eq!(read_mat4(bytes, offset("shadow_map_space")), Some(shadow_bias()));

        let backend = renderer.backend_as::<HeadlessBackend>().unwrap();
        let device = backend.buffer_contents(renderer.per_frame.handle()).unwrap();
        assert_eq!(device, bytes);
    }

    #[test]
    fn test_shadow_bias_maps_clip_to_texture_space() {
        let bias = shadow_bias();
        assert_eq!(bias.transform_point3(Vec3::splat(-1.0)), Vec3::ZERO);
        assert_eq!(bias.transform_point3(Vec3::ONE), Vec3::ONE);
    }

    #[test]
    fn test_singular_model_view_is_rejected() {
        let mut renderer = renderer();
        let flat = Mat4::from_scale(Vec3::new(1.0, 0.0, 1.0));
        let err = renderer
            .set_per_model_uniforms(flat, Mat4::IDENTITY, Mat4::IDENTITY)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::RenderError::Resource(ResourceError::SingularMatrix)
        ));
    }

    #[test]
    fn test_draw_without_material_needs_program() {
        let mut renderer = renderer();
        let err = renderer
            .draw(&DrawCall::arrays(DrawMode::Triangles, 3))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::RenderError::Resource(ResourceError::NoProgramBound)
        ));

        let shader = renderer
            .get_or_create_shader(&ShaderKind::PostCopy.source(), ShaderFeatures::empty())
            .unwrap();
        renderer.use_shader(&shader);
        renderer.draw(&DrawCall::arrays(DrawMode::Triangles, 3)).unwrap();
        assert_eq!(renderer.stats().draw_calls, 1);
        assert_eq!(renderer.stats().vertices, 3);
    }

    #[test]
    fn test_instanced_draw_selects_instanced_variant() {
        let mut renderer = renderer();
        let material = Material::unlit(UnlitMaterial {
            color: Vec4::ONE,
            ..UnlitMaterial::default()
        })
        .shared();
        let call = DrawCall::elements(DrawMode::Triangles, 6, IndexType::U16).with_material(&material);
        renderer.draw_instanced(&call, 4).unwrap();

        let backend = renderer.backend_as::<HeadlessBackend>().unwrap();
        let record = backend.draw_log().last().unwrap();
        assert_eq!(record.program.as_deref(), Some("basic_unlit+INSTANCED"));
        assert_eq!(record.instances, 4);
        assert_eq!(renderer.stats().instances, 4);
    }
}
