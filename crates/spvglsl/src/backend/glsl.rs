//! GLSL dialect: builtin spellings, image formats, reserved words.

use super::caps::{self, Feature, Support};
use super::Dialect;
use crate::error::{Error, Result};
use spirv::{BuiltIn, ImageFormat, StorageClass};

/// Reserved words that cannot be used as identifiers.
const KEYWORDS: &[&str] = &[
    "active", "asm", "atomic_uint", "attribute", "bool", "break", "buffer", "bvec2", "bvec3",
    "bvec4", "case", "cast", "centroid", "class", "coherent", "common", "const", "continue",
    "default", "discard", "dmat2", "dmat2x2", "dmat2x3", "dmat2x4", "dmat3", "dmat3x2",
    "dmat3x3", "dmat3x4", "dmat4", "dmat4x2", "dmat4x3", "dmat4x4", "do", "double", "dvec2",
    "dvec3", "dvec4", "else", "enum", "extern", "external", "false", "filter", "fixed", "flat",
    "float", "for", "fvec2", "fvec3", "fvec4", "goto", "half", "highp", "hvec2", "hvec3",
    "hvec4", "if", "iimage1D", "iimage2D", "iimage3D", "image1D", "image2D", "image3D", "in",
    "inline", "inout", "input", "int", "interface", "invariant", "isampler1D", "isampler2D",
    "isampler3D", "isamplerCube", "ivec2", "ivec3", "ivec4", "layout", "long", "lowp", "main",
    "mat2", "mat2x2", "mat2x3", "mat2x4", "mat3", "mat3x2", "mat3x3", "mat3x4", "mat4",
    "mat4x2", "mat4x3", "mat4x4", "mediump", "namespace", "noinline", "noperspective", "out",
    "output", "packed", "partition", "patch", "precise", "precision", "public", "readonly",
    "resource", "restrict", "return", "sample", "sampler", "sampler1D", "sampler1DShadow",
    "sampler2D", "sampler2DArray", "sampler2DShadow", "sampler3D", "samplerBuffer",
    "samplerCube", "samplerCubeShadow", "shared", "short", "sizeof", "smooth", "static",
    "struct", "subroutine", "superp", "switch", "template", "texture", "this", "true",
    "typedef", "uimage1D", "uimage2D", "uimage3D", "uint", "uniform", "union", "unsigned",
    "usampler1D", "usampler2D", "usampler3D", "usamplerCube", "using", "uvec2", "uvec3",
    "uvec4", "varying", "vec2", "vec3", "vec4", "void", "volatile", "while", "writeonly",
];

/// GLSL for OpenGL, OpenGL ES or Vulkan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlslDialect {
    pub version: u32,
    pub es: bool,
    pub vulkan: bool,
}

impl GlslDialect {
    pub fn new(version: u32, es: bool, vulkan: bool) -> Self {
        GlslDialect {
            version,
            es,
            vulkan,
        }
    }
}

impl Default for GlslDialect {
    fn default() -> Self {
        Self::new(450, false, false)
    }
}

impl Dialect for GlslDialect {
    fn version(&self) -> u32 {
        self.version
    }

    fn es(&self) -> bool {
        self.es
    }

    fn vulkan(&self) -> bool {
        self.vulkan
    }

    fn version_directive(&self) -> String {
        if self.es {
            format!("#version {} es", self.version)
        } else {
            format!("#version {}", self.version)
        }
    }

    fn support(&self, feature: Feature) -> Support {
        // Vulkan GLSL always accepts explicit layouts.
        if self.vulkan && matches!(feature, Feature::BindingLayout | Feature::ExplicitLocations) {
            return Support::Native;
        }
        caps::support(feature, self.version, self.es)
    }

    fn builtin_name(&self, builtin: BuiltIn, storage: StorageClass) -> Result<&'static str> {
        let name = match builtin {
            BuiltIn::Position => "gl_Position",
            BuiltIn::PointSize => "gl_PointSize",
            BuiltIn::ClipDistance => "gl_ClipDistance",
            BuiltIn::CullDistance => "gl_CullDistance",
            BuiltIn::VertexIndex if self.vulkan => "gl_VertexIndex",
            BuiltIn::VertexIndex | BuiltIn::VertexId => "gl_VertexID",
            BuiltIn::InstanceIndex if self.vulkan => "gl_InstanceIndex",
            BuiltIn::InstanceIndex | BuiltIn::InstanceId => "gl_InstanceID",
            BuiltIn::BaseVertex if self.vulkan => "gl_BaseVertex",
            BuiltIn::BaseVertex => "gl_BaseVertexARB",
            BuiltIn::BaseInstance if self.vulkan => "gl_BaseInstance",
            BuiltIn::BaseInstance => "gl_BaseInstanceARB",
            BuiltIn::DrawIndex if self.vulkan => "gl_DrawID",
            BuiltIn::DrawIndex => "gl_DrawIDARB",
            BuiltIn::PrimitiveId => "gl_PrimitiveID",
            BuiltIn::InvocationId => "gl_InvocationID",
            BuiltIn::Layer => "gl_Layer",
            BuiltIn::ViewportIndex => "gl_ViewportIndex",
            BuiltIn::TessLevelOuter => "gl_TessLevelOuter",
            BuiltIn::TessLevelInner => "gl_TessLevelInner",
            BuiltIn::TessCoord => "gl_TessCoord",
            BuiltIn::PatchVertices => "gl_PatchVerticesIn",
            BuiltIn::FragCoord => "gl_FragCoord",
            BuiltIn::PointCoord => "gl_PointCoord",
            BuiltIn::FrontFacing => "gl_FrontFacing",
            BuiltIn::SampleId => "gl_SampleID",
            BuiltIn::SamplePosition => "gl_SamplePosition",
            BuiltIn::SampleMask if storage == StorageClass::Input => "gl_SampleMaskIn",
            BuiltIn::SampleMask => "gl_SampleMask",
            BuiltIn::FragDepth => "gl_FragDepth",
            BuiltIn::HelperInvocation => "gl_HelperInvocation",
            BuiltIn::NumWorkgroups => "gl_NumWorkGroups",
            BuiltIn::WorkgroupSize => "gl_WorkGroupSize",
            BuiltIn::WorkgroupId => "gl_WorkGroupID",
            BuiltIn::LocalInvocationId => "gl_LocalInvocationID",
            BuiltIn::GlobalInvocationId => "gl_GlobalInvocationID",
            BuiltIn::LocalInvocationIndex => "gl_LocalInvocationIndex",
            other => {
                return Err(Error::unsupported(format!(
                    "builtin {other:?} has no GLSL equivalent"
                )))
            }
        };
        Ok(name)
    }

    fn builtin_feature(&self, builtin: BuiltIn) -> Option<Feature> {
        match builtin {
            BuiltIn::SampleId | BuiltIn::SamplePosition | BuiltIn::SampleMask => {
                Some(Feature::SampleShading)
            }
            BuiltIn::CullDistance => Some(Feature::CullDistance),
            BuiltIn::BaseVertex | BuiltIn::BaseInstance | BuiltIn::DrawIndex if !self.vulkan => {
                Some(Feature::DrawParameters)
            }
            BuiltIn::NumWorkgroups
            | BuiltIn::WorkgroupId
            | BuiltIn::LocalInvocationId
            | BuiltIn::GlobalInvocationId
            | BuiltIn::LocalInvocationIndex
            | BuiltIn::WorkgroupSize => Some(Feature::ComputeShader),
            _ => None,
        }
    }

    fn image_format(&self, format: ImageFormat) -> Option<&'static str> {
        let name = match format {
            ImageFormat::Rgba32f => "rgba32f",
            ImageFormat::Rgba16f => "rgba16f",
            ImageFormat::R32f => "r32f",
            ImageFormat::Rgba8 => "rgba8",
            ImageFormat::Rgba8Snorm => "rgba8_snorm",
            ImageFormat::Rg32f => "rg32f",
            ImageFormat::Rg16f => "rg16f",
            ImageFormat::R11fG11fB10f => "r11f_g11f_b10f",
            ImageFormat::R16f => "r16f",
            ImageFormat::Rgba16 => "rgba16",
            ImageFormat::Rgb10A2 => "rgb10_a2",
            ImageFormat::Rg16 => "rg16",
            ImageFormat::Rg8 => "rg8",
            ImageFormat::R16 => "r16",
            ImageFormat::R8 => "r8",
            ImageFormat::Rgba16Snorm => "rgba16_snorm",
            ImageFormat::Rg16Snorm => "rg16_snorm",
            ImageFormat::Rg8Snorm => "rg8_snorm",
            ImageFormat::R16Snorm => "r16_snorm",
            ImageFormat::R8Snorm => "r8_snorm",
            ImageFormat::Rgba32i => "rgba32i",
            ImageFormat::Rgba16i => "rgba16i",
            ImageFormat::Rgba8i => "rgba8i",
            ImageFormat::R32i => "r32i",
            ImageFormat::Rg32i => "rg32i",
            ImageFormat::Rg16i => "rg16i",
            ImageFormat::Rg8i => "rg8i",
            ImageFormat::R16i => "r16i",
            ImageFormat::R8i => "r8i",
            ImageFormat::Rgba32ui => "rgba32ui",
            ImageFormat::Rgba16ui => "rgba16ui",
            ImageFormat::Rgba8ui => "rgba8ui",
            ImageFormat::R32ui => "r32ui",
            ImageFormat::Rgb10a2ui => "rgb10_a2ui",
            ImageFormat::Rg32ui => "rg32ui",
            ImageFormat::Rg16ui => "rg16ui",
            ImageFormat::Rg8ui => "rg8ui",
            ImageFormat::R16ui => "r16ui",
            ImageFormat::R8ui => "r8ui",
            _ => return None,
        };
        Some(name)
    }

    fn is_keyword(&self, name: &str) -> bool {
        KEYWORDS.binary_search(&name).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_table_is_sorted() {
        let mut sorted = KEYWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, KEYWORDS);
    }

    #[test]
    fn vertex_index_spelling_depends_on_target() {
        let gl = GlslDialect::new(330, false, false);
        let vk = GlslDialect::new(450, false, true);
        assert_eq!(
            gl.builtin_name(BuiltIn::VertexIndex, StorageClass::Input).unwrap(),
            "gl_VertexID"
        );
        assert_eq!(
            vk.builtin_name(BuiltIn::VertexIndex, StorageClass::Input).unwrap(),
            "gl_VertexIndex"
        );
    }

    #[test]
    fn sample_mask_direction() {
        let d = GlslDialect::default();
        assert_eq!(
            d.builtin_name(BuiltIn::SampleMask, StorageClass::Input).unwrap(),
            "gl_SampleMaskIn"
        );
        assert_eq!(
            d.builtin_name(BuiltIn::SampleMask, StorageClass::Output).unwrap(),
            "gl_SampleMask"
        );
    }

    #[test]
    fn vulkan_layouts_are_always_native() {
        let d = GlslDialect::new(310, true, true);
        assert_eq!(d.support(Feature::BindingLayout), Support::Native);
        let d = GlslDialect::new(330, false, false);
        assert_eq!(
            d.support(Feature::BindingLayout),
            Support::Extension("GL_ARB_shading_language_420pack")
        );
    }

    #[test]
    fn directive_carries_profile() {
        assert_eq!(GlslDialect::new(310, true, false).version_directive(), "#version 310 es");
        assert_eq!(GlslDialect::default().version_directive(), "#version 450");
    }
}
