//! Shader sources and variant specialization.
//!
//! A [`ShaderSource`] is an immutable (name, vertex, fragment, valid flags,
//! forced flags) descriptor. Specializing it with a requested feature set
//! keeps only the flags the source declares, adds the forced ones, and
//! injects one `#define` per flag right after the `#version` line.

use std::borrow::Cow;
use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Optional code paths of the built-in shaders, one `#define` each.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderFeatures: u32 {
        const ALBEDO_MAP = 1 << 0;
        const NORMAL_MAP = 1 << 1;
        const METALLIC_ROUGHNESS_MAP = 1 << 2;
        const OCCLUSION_MAP = 1 << 3;
        const EMISSIVE_MAP = 1 << 4;
        const IBL = 1 << 5;
        const SHADOWS = 1 << 6;
        const FLAT_SHADING = 1 << 7;
        const INSTANCED = 1 << 8;
        const VERTEX_COLORS = 1 << 9;
        const ALPHA_TEST = 1 << 10;
    }
}

impl ShaderFeatures {
    /// Flag names in alphabetical order.
    pub fn sorted_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.iter_names().map(|(name, _)| name).collect();
        names.sort_unstable();
        names
    }
}

/// Built-in shader programs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Basic,
    BasicUnlit,
    Pbr,
    Grid,
    Line,
    Toon,
    Skybox,
    EquirectToCube,
    Irradiance,
    Prefilter,
    BrdfLut,
    PostCopy,
    PostInvert,
    PostTonemap,
}

const MESH_VERT: &str = include_str!("../shaders/mesh.vert.glsl");
const CAPTURE_VERT: &str = include_str!("../shaders/capture.vert.glsl");
const FULLSCREEN_VERT: &str = include_str!("../shaders/fullscreen.vert.glsl");

const MESH_FEATURES: ShaderFeatures = ShaderFeatures::INSTANCED
    .union(ShaderFeatures::VERTEX_COLORS)
    .union(ShaderFeatures::FLAT_SHADING);

impl ShaderKind {
    pub const ALL: [ShaderKind; 14] = [
        ShaderKind::Basic,
        ShaderKind::BasicUnlit,
        ShaderKind::Pbr,
        ShaderKind::Grid,
        ShaderKind::Line,
        ShaderKind::Toon,
        ShaderKind::Skybox,
        ShaderKind::EquirectToCube,
        ShaderKind::Irradiance,
        ShaderKind::Prefilter,
        ShaderKind::BrdfLut,
        ShaderKind::PostCopy,
        ShaderKind::PostInvert,
        ShaderKind::PostTonemap,
    ];

    /// Base name, also the prefix of every specialized name.
    pub fn name(&self) -> &'static str {
        match self {
            ShaderKind::Basic => "basic",
            ShaderKind::BasicUnlit => "basic_unlit",
            ShaderKind::Pbr => "pbr",
            ShaderKind::Grid => "grid",
            ShaderKind::Line => "line",
            ShaderKind::Toon => "toon",
            ShaderKind::Skybox => "skybox",
            ShaderKind::EquirectToCube => "equirect_to_cube",
            ShaderKind::Irradiance => "irradiance",
            ShaderKind::Prefilter => "prefilter",
            ShaderKind::BrdfLut => "brdf_lut",
            ShaderKind::PostCopy => "post_copy",
            ShaderKind::PostInvert => "post_invert",
            ShaderKind::PostTonemap => "post_tonemap",
        }
    }

    /// Vertex text, fragment text and declared-valid features.
    fn parts(&self) -> (&'static str, &'static str, ShaderFeatures) {
        match self {
            ShaderKind::Basic => (
                MESH_VERT,
                include_str!("../shaders/basic.frag.glsl"),
                MESH_FEATURES | ShaderFeatures::ALBEDO_MAP | ShaderFeatures::SHADOWS,
            ),
            ShaderKind::BasicUnlit => (
                MESH_VERT,
                include_str!("../shaders/basic_unlit.frag.glsl"),
                MESH_FEATURES | ShaderFeatures::ALBEDO_MAP | ShaderFeatures::ALPHA_TEST,
            ),
            ShaderKind::Pbr => (
                MESH_VERT,
                include_str!("../shaders/pbr.frag.glsl"),
                MESH_FEATURES
                    | ShaderFeatures::ALBEDO_MAP
                    | ShaderFeatures::NORMAL_MAP
                    | ShaderFeatures::METALLIC_ROUGHNESS_MAP
                    | ShaderFeatures::OCCLUSION_MAP
                    | ShaderFeatures::EMISSIVE_MAP
                    | ShaderFeatures::IBL
                    | ShaderFeatures::SHADOWS
                    | ShaderFeatures::ALPHA_TEST,
            ),
            ShaderKind::Grid => (
                MESH_VERT,
                include_str!("../shaders/grid.frag.glsl"),
                ShaderFeatures::empty(),
            ),
            ShaderKind::Line => (
                include_str!("../shaders/line.vert.glsl"),
                include_str!("../shaders/line.frag.glsl"),
                ShaderFeatures::VERTEX_COLORS,
            ),
            ShaderKind::Toon => (
                MESH_VERT,
                include_str!("../shaders/toon.frag.glsl"),
                MESH_FEATURES | ShaderFeatures::ALBEDO_MAP,
            ),
            ShaderKind::Skybox => (
                include_str!("../shaders/skybox.vert.glsl"),
                include_str!("../shaders/skybox.frag.glsl"),
                ShaderFeatures::empty(),
            ),
            ShaderKind::EquirectToCube => (
                CAPTURE_VERT,
                include_str!("../shaders/equirect_to_cube.frag.glsl"),
                ShaderFeatures::empty(),
            ),
            ShaderKind::Irradiance => (
                CAPTURE_VERT,
                include_str!("../shaders/irradiance.frag.glsl"),
                ShaderFeatures::empty(),
            ),
            ShaderKind::Prefilter => (
                CAPTURE_VERT,
                include_str!("../shaders/prefilter.frag.glsl"),
                ShaderFeatures::empty(),
            ),
            ShaderKind::BrdfLut => (
                FULLSCREEN_VERT,
                include_str!("../shaders/brdf_lut.frag.glsl"),
                ShaderFeatures::empty(),
            ),
            ShaderKind::PostCopy => (
                FULLSCREEN_VERT,
                include_str!("../shaders/post_copy.frag.glsl"),
                ShaderFeatures::empty(),
            ),
            ShaderKind::PostInvert => (
                FULLSCREEN_VERT,
                include_str!("../shaders/post_invert.frag.glsl"),
                ShaderFeatures::empty(),
            ),
            ShaderKind::PostTonemap => (
                FULLSCREEN_VERT,
                include_str!("../shaders/post_tonemap.frag.glsl"),
                ShaderFeatures::empty(),
            ),
        }
    }

    pub fn source(&self) -> ShaderSource {
        let (vertex, fragment, valid) = self.parts();
        ShaderSource {
            name: Cow::Borrowed(self.name()),
            vertex: Cow::Borrowed(vertex),
            fragment: Cow::Borrowed(fragment),
            valid,
            forced: ShaderFeatures::empty(),
        }
    }
}

impl fmt::Display for ShaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable shader descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    name: Cow<'static, str>,
    vertex: Cow<'static, str>,
    fragment: Cow<'static, str>,
    valid: ShaderFeatures,
    forced: ShaderFeatures,
}

/// Source text of one variant, ready to compile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecializedSource {
    pub name: String,
    pub vertex: String,
    pub fragment: String,
    pub features: ShaderFeatures,
}

impl ShaderSource {
    /// A user-supplied source. The name must not collide with a built-in one.
    pub fn custom(
        name: impl Into<String>,
        vertex: impl Into<String>,
        fragment: impl Into<String>,
        valid: ShaderFeatures,
    ) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            vertex: Cow::Owned(vertex.into()),
            fragment: Cow::Owned(fragment.into()),
            valid,
            forced: ShaderFeatures::empty(),
        }
    }

    /// Force features on regardless of what callers request.
    pub fn with_forced(mut self, forced: ShaderFeatures) -> Self {
        self.forced |= forced;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertex(&self) -> &str {
        &self.vertex
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn valid(&self) -> ShaderFeatures {
        self.valid
    }

    pub fn forced(&self) -> ShaderFeatures {
        self.forced
    }

    /// `(requested ∩ valid) ∪ forced`
    pub fn effective_features(&self, requested: ShaderFeatures) -> ShaderFeatures {
        (requested & self.valid) | self.forced
    }

    /// Cache key, e.g. `pbr+ALBEDO_MAP+IBL`.
    pub fn specialized_name(&self, requested: ShaderFeatures) -> String {
        let features = self.effective_features(requested);
        let mut name = self.name.to_string();
        for flag in features.sorted_names() {
            name.push('+');
            name.push_str(flag);
        }
        name
    }

    pub fn specialize(&self, requested: ShaderFeatures) -> SpecializedSource {
        let features = self.effective_features(requested);
        SpecializedSource {
            name: self.specialized_name(requested),
            vertex: inject_defines(&self.vertex, features),
            fragment: inject_defines(&self.fragment, features),
            features,
        }
    }
}

impl From<ShaderKind> for ShaderSource {
    fn from(kind: ShaderKind) -> Self {
        kind.source()
    }
}

/// Insert `#define` lines directly after the `#version` line.
pub fn inject_defines(source: &str, features: ShaderFeatures) -> String {
    if features.is_empty() {
        return source.to_string();
    }
    let defines: String = features
        .sorted_names()
        .into_iter()
        .map(|name| format!("#define {name}\n"))
        .collect();

    let mut out = String::with_capacity(source.len() + defines.len());
    let mut injected = false;
    for line in source.split_inclusive('\n') {
        out.push_str(line);
        if !injected && line.trim_start().starts_with("#version") {
            if !line.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&defines);
            injected = true;
        }
    }
    if !injected {
        log::warn!("Shader source has no #version line, defines prepended");
        return defines + source;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::nothing(ShaderFeatures::empty(), "pbr")]
    #[case::sorted(ShaderFeatures::IBL | ShaderFeatures::ALBEDO_MAP, "pbr+ALBEDO_MAP+IBL")]
    #[case::normal_before_occlusion(
        ShaderFeatures::OCCLUSION_MAP | ShaderFeatures::NORMAL_MAP,
        "pbr+NORMAL_MAP+OCCLUSION_MAP"
    )]
    fn test_specialized_names(#[case] requested: ShaderFeatures, #[case] expected: &str) {
        assert_eq!(ShaderKind::Pbr.source().specialized_name(requested), expected);
    }

    #[test]
    fn test_undeclared_flags_are_dropped_and_forced_are_added() {
        let toon = ShaderKind::Toon.source().with_forced(ShaderFeatures::FLAT_SHADING);
        let requested = ShaderFeatures::IBL | ShaderFeatures::ALBEDO_MAP;
        assert_eq!(
            toon.effective_features(requested),
            ShaderFeatures::ALBEDO_MAP | ShaderFeatures::FLAT_SHADING
        );
        assert_eq!(toon.specialized_name(requested), "toon+ALBEDO_MAP+FLAT_SHADING");
        assert_eq!(
            toon.specialized_name(ShaderFeatures::ALBEDO_MAP | ShaderFeatures::FLAT_SHADING),
            toon.specialized_name(requested)
        );
    }

    #[test]
    fn test_defines_follow_version_line() {
        let source = "#version 300 es\nprecision highp float;\nvoid main() {}\n";
        let out = inject_defines(source, ShaderFeatures::IBL | ShaderFeatures::ALBEDO_MAP);
        assert_eq!(
            out,
            "#version 300 es\n#define ALBEDO_MAP\n#define IBL\nprecision highp float;\nvoid main() {}\n"
        );
    }

    #[test]
    fn test_every_builtin_starts_with_version() {
        for kind in ShaderKind::ALL {
            let source = kind.source();
            assert!(source.vertex().starts_with("#version 300 es"), "{kind} vertex");
            assert!(source.fragment().starts_with("#version 300 es"), "{kind} fragment");
        }
    }
}
