//! Compiled shader programs and their uniform dispatch tables.
//!
//! A [`Shader`] is one linked variant of a [`ShaderSource`]. At link time the
//! active uniforms are introspected once and each gets a type-checked setter,
//! so pushing a value is a hash lookup plus one backend call.

pub mod source;
pub mod uniform_buffer;

use std::collections::HashMap;

pub use source::{inject_defines, ShaderFeatures, ShaderKind, ShaderSource, SpecializedSource};
pub use uniform_buffer::{
    BlockLayout, MemberType, UniformBuffer, PER_FRAME_BINDING, PER_FRAME_BLOCK,
    PER_MODEL_BINDING, PER_MODEL_BLOCK,
};

use crate::backend::{
    GraphicsBackend, ProgramDescriptor, ProgramHandle, UniformLocation, UniformType, UniformValue,
};
use crate::error::RenderResult;

/// Fixed texture unit of every sampler name used by the built-in shaders.
///
/// Samplers that never appear together may share a unit.
pub const SAMPLER_UNITS: &[(&str, u32)] = &[
    ("albedo_map", 0),
    ("input_texture", 0),
    ("equirectangular_map", 0),
    ("environment_map", 0),
    ("normal_map", 1),
    ("metallic_roughness_map", 2),
    ("occlusion_map", 3),
    ("emissive_map", 4),
    ("irradiance_map", 5),
    ("prefilter_map", 6),
    ("brdf_lut", 7),
    ("shadow_map", 8),
];

/// Units `0..RESERVED_TEXTURE_UNITS` are covered by [`SAMPLER_UNITS`].
pub const RESERVED_TEXTURE_UNITS: u32 = 9;

/// Unit a built-in sampler name is bound to.
pub fn sampler_unit(name: &str) -> Option<u32> {
    SAMPLER_UNITS
        .iter()
        .find(|(sampler, _)| *sampler == name)
        .map(|(_, unit)| *unit)
}

type UniformSetter = fn(&mut dyn GraphicsBackend, &UniformLocation, &UniformValue) -> bool;

/// One active uniform of a linked program
#[derive(Clone)]
pub struct Uniform {
    location: UniformLocation,
    ty: UniformType,
    size: u32,
    setter: UniformSetter,
}

impl std::fmt::Debug for Uniform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uniform")
            .field("location", &self.location)
            .field("ty", &self.ty)
            .field("size", &self.size)
            .finish()
    }
}

impl Uniform {
    fn new(location: UniformLocation, ty: UniformType, size: u32) -> Self {
        Self {
            location,
            ty,
            size,
            setter: setter_for(ty, size),
        }
    }

    pub fn location(&self) -> UniformLocation {
        self.location
    }

    pub fn ty(&self) -> UniformType {
        self.ty
    }

    /// Array length, 1 for plain uniforms
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Push a value, returns false when the value does not fit the declared type.
    pub fn set(&self, backend: &mut dyn GraphicsBackend, value: &UniformValue) -> bool {
        (self.setter)(backend, &self.location, value)
    }
}

fn setter_for(ty: UniformType, size: u32) -> UniformSetter {
    if size > 1 {
        return match ty {
            UniformType::Float => set_float_array,
            UniformType::Vec3 => set_vec3_array,
            UniformType::Vec4 => set_vec4_array,
            UniformType::Mat4 => set_mat4_array,
            _ => set_unsupported,
        };
    }
    match ty {
        UniformType::Float => set_float,
        UniformType::Vec2 => set_vec2,
        UniformType::Vec3 => set_vec3,
        UniformType::Vec4 => set_vec4,
        UniformType::Int | UniformType::Sampler2D | UniformType::SamplerCube => set_int,
        UniformType::Bool => set_bool,
        UniformType::Mat3 => set_mat3,
        UniformType::Mat4 => set_mat4,
    }
}

macro_rules! uniform_setter {
    ($name:ident, $($pattern:pat_param)|+) => {
        fn $name(
            backend: &mut dyn GraphicsBackend,
            location: &UniformLocation,
            value: &UniformValue,
        ) -> bool {
            match value {
                $($pattern)|+ => {
                    backend.set_uniform(location, value);
                    true
                }
                _ => false,
            }
        }
    };
}

uniform_setter!(set_float, UniformValue::Float(_));
uniform_setter!(set_vec2, UniformValue::Vec2(_));
uniform_setter!(set_vec3, UniformValue::Vec3(_));
uniform_setter!(set_vec4, UniformValue::Vec4(_));
uniform_setter!(set_int, UniformValue::Int(_));
uniform_setter!(set_bool, UniformValue::Bool(_) | UniformValue::Int(_));
uniform_setter!(set_mat3, UniformValue::Mat3(_));
uniform_setter!(set_mat4, UniformValue::Mat4(_));
uniform_setter!(set_float_array, UniformValue::FloatArray(_) | UniformValue::Float(_));
uniform_setter!(set_vec3_array, UniformValue::Vec3Array(_) | UniformValue::Vec3(_));
uniform_setter!(set_vec4_array, UniformValue::Vec4Array(_) | UniformValue::Vec4(_));
uniform_setter!(set_mat4_array, UniformValue::Mat4Array(_) | UniformValue::Mat4(_));

fn set_unsupported(_: &mut dyn GraphicsBackend, _: &UniformLocation, _: &UniformValue) -> bool {
    false
}

/// A linked program variant
#[derive(Debug)]
pub struct Shader {
    name: String,
    program: ProgramHandle,
    features: ShaderFeatures,
    uniforms: HashMap<String, Uniform>,
    sampler_units: HashMap<String, u32>,
}

impl Shader {
    /// Compile, link and introspect one specialized source.
    ///
    /// The shared uniform blocks are attached to their binding points and
    /// every sampler is pointed at its fixed unit. The program is left unbound.
    pub fn new(backend: &mut dyn GraphicsBackend, source: &SpecializedSource) -> RenderResult<Self> {
        let program = backend.create_program(&ProgramDescriptor {
            label: &source.name,
            vertex: &source.vertex,
            fragment: &source.fragment,
        })?;

        let mut uniforms = HashMap::new();
        for active in backend.active_uniforms(program) {
            match backend.uniform_location(program, &active.name) {
                Some(location) => {
                    uniforms.insert(active.name.clone(), Uniform::new(location, active.ty, active.size));
                }
                None => log::trace!("Shader '{}': '{}' has no location", source.name, active.name),
            }
        }

        for (block, binding) in [
            (PER_FRAME_BLOCK, PER_FRAME_BINDING),
            (PER_MODEL_BLOCK, PER_MODEL_BINDING),
        ] {
            if let Some(index) = backend.uniform_block_index(program, block) {
                backend.uniform_block_binding(program, index, binding);
            }
        }

        let mut samplers: Vec<&String> = uniforms
            .iter()
            .filter(|(_, uniform)| uniform.ty.is_sampler())
            .map(|(name, _)| name)
            .collect();
        samplers.sort();

        let mut sampler_units = HashMap::new();
        let mut next_free = RESERVED_TEXTURE_UNITS;
        for name in samplers {
            let unit = match sampler_unit(name) {
                Some(unit) => unit,
                None => {
                    next_free += 1;
                    next_free - 1
                }
            };
            sampler_units.insert(name.clone(), unit);
        }

        if !sampler_units.is_empty() {
            backend.use_program(Some(program));
            for (name, unit) in &sampler_units {
                if let Some(uniform) = uniforms.get(name) {
                    uniform.set(backend, &UniformValue::Int(*unit as i32));
                }
            }
            backend.use_program(None);
        }

        log::debug!(
            "Shader '{}' linked: {} uniforms, {} samplers",
            source.name,
            uniforms.len(),
            sampler_units.len()
        );

        Ok(Self {
            name: source.name.clone(),
            program,
            features: source.features,
            uniforms,
            sampler_units,
        })
    }

    /// Specialized name, the cache key of this variant
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    pub fn features(&self) -> ShaderFeatures {
        self.features
    }

    pub fn uniform(&self, name: &str) -> Option<&Uniform> {
        self.uniforms.get(name)
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.uniforms.contains_key(name)
    }

    pub fn uniform_names(&self) -> impl Iterator<Item = &str> {
        self.uniforms.keys().map(String::as_str)
    }

    /// Texture unit a sampler uniform reads from.
    pub fn sampler_unit(&self, name: &str) -> Option<u32> {
        self.sampler_units.get(name).copied()
    }

    /// Set a uniform of this program, which must be in use.
    ///
    /// Names the program does not declare are ignored.
    pub fn set(
        &self,
        backend: &mut dyn GraphicsBackend,
        name: &str,
        value: impl Into<UniformValue>,
    ) -> bool {
        let Some(uniform) = self.uniforms.get(name) else {
            return false;
        };
        let value = value.into();
        let accepted = uniform.set(backend, &value);
        if !accepted {
            log::warn!(
                "Shader '{}': value {:?} does not match uniform '{}' of type {:?}",
                self.name,
                value,
                name,
                uniform.ty
            );
        }
        accepted
    }

    pub fn destroy(&self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_program(self.program);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessBackend, UniformValue};
    use glam::{Vec3, Vec4};

    const VERTEX: &str = "#version 300 es\n\
        layout(std140) uniform ubo_per_model {\n    mat4 model;\n    mat3 normal_view;\n    mat4 mvp;\n};\n\
        layout(location = 0) in vec3 position;\n\
        void main() { gl_Position = mvp * vec4(position, 1.0); }\n";

    const FRAGMENT: &str = "#version 300 es\nprecision highp float;\n\
        uniform vec4 tint;\n\
        uniform float weights[4];\n\
        #ifdef ALBEDO_MAP\n\
        uniform sampler2D albedo_map;\n\
        #endif\n\
        uniform samplerCube reflections;\n\
        out vec4 color;\n\
        void main() { color = tint; }\n";

    fn compile(backend: &mut HeadlessBackend, features: ShaderFeatures) -> Shader {
        let source = ShaderSource::custom("test", VERTEX, FRAGMENT, ShaderFeatures::ALBEDO_MAP);
        Shader::new(backend, &source.specialize(features)).unwrap()
    }

    #[test]
    fn test_uniform_table_follows_defines() {
        let mut backend = HeadlessBackend::new(4, 4);
        let plain = compile(&mut backend, ShaderFeatures::empty());
        let textured = compile(&mut backend, ShaderFeatures::ALBEDO_MAP);

        assert!(!plain.has_uniform("albedo_map"));
        assert!(textured.has_uniform("albedo_map"));
        assert_eq!(textured.name(), "test+ALBEDO_MAP");
        assert_eq!(plain.uniform("weights").map(Uniform::size), Some(4));
        assert!(!plain.has_uniform("mvp"));
    }

    #[test]
    fn test_samplers_get_fixed_and_extra_units() {
        let mut backend = HeadlessBackend::new(4, 4);
        let shader = compile(&mut backend, ShaderFeatures::ALBEDO_MAP);

        assert_eq!(shader.sampler_unit("albedo_map"), Some(0));
        assert_eq!(shader.sampler_unit("reflections"), Some(RESERVED_TEXTURE_UNITS));
        assert_eq!(
            backend.uniform_value(shader.program(), "reflections"),
            Some(&UniformValue::Int(RESERVED_TEXTURE_UNITS as i32))
        );
        assert_eq!(backend.bound_program(), None);
    }

    #[test]
    fn test_setters_check_types() {
        let mut backend = HeadlessBackend::new(4, 4);
        let shader = compile(&mut backend, ShaderFeatures::empty());
        backend.use_program(Some(shader.program()));

        assert!(shader.set(&mut backend, "tint", Vec4::ONE));
        assert!(!shader.set(&mut backend, "tint", Vec3::ONE));
        assert!(!shader.set(&mut backend, "undeclared", 1.0f32));
        assert!(shader.set(&mut backend, "weights", UniformValue::FloatArray(vec![1.0, 2.0])));
        assert_eq!(
            backend.uniform_value(shader.program(), "tint"),
            Some(&UniformValue::Vec4(Vec4::ONE))
        );
    }
}
