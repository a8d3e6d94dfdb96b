//! Version and extension requirements of optional language features.
//!
//! The table is plain data: each row names the first core version of the
//! desktop and ES profiles that carry the feature, and the desktop extension
//! that enables it on older versions. `None` means the profile never gained
//! the feature in core.

/// Language features whose availability depends on the target version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Feature {
    UnsignedIntegers,
    Switch,
    FlatInterpolation,
    NonSquareMatrices,
    TexelFetch,
    TextureSize,
    MatrixInverse,
    ExplicitLocations,
    BitcastFloat,
    Float64,
    BitfieldOps,
    SampleShading,
    BindingLayout,
    ImageLoadStore,
    AtomicCounters,
    EarlyFragmentTests,
    PackingFunctions,
    ComputeShader,
    StorageBuffer,
    ImageSize,
    CullDistance,
    DerivativeControl,
    DrawParameters,
    Int64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityRow {
    pub feature: Feature,
    pub min_desktop: Option<u32>,
    pub min_es: Option<u32>,
    pub extension: Option<&'static str>,
}

const fn row(
    feature: Feature,
    min_desktop: Option<u32>,
    min_es: Option<u32>,
    extension: Option<&'static str>,
) -> CapabilityRow {
    CapabilityRow {
        feature,
        min_desktop,
        min_es,
        extension,
    }
}

pub const CAPABILITY_TABLE: &[CapabilityRow] = &[
    row(Feature::UnsignedIntegers, Some(130), Some(300), None),
    row(Feature::Switch, Some(130), Some(300), None),
    row(Feature::FlatInterpolation, Some(130), Some(300), None),
    row(Feature::NonSquareMatrices, Some(120), Some(300), None),
    row(Feature::TexelFetch, Some(130), Some(300), None),
    row(Feature::TextureSize, Some(130), Some(300), None),
    row(Feature::MatrixInverse, Some(140), Some(300), None),
    row(
        Feature::ExplicitLocations,
        Some(330),
        Some(300),
        Some("GL_ARB_explicit_attrib_location"),
    ),
    row(
        Feature::BitcastFloat,
        Some(330),
        Some(300),
        Some("GL_ARB_shader_bit_encoding"),
    ),
    row(Feature::Float64, Some(400), None, Some("GL_ARB_gpu_shader_fp64")),
    row(Feature::BitfieldOps, Some(400), Some(310), Some("GL_ARB_gpu_shader5")),
    row(
        Feature::SampleShading,
        Some(400),
        Some(320),
        Some("GL_ARB_sample_shading"),
    ),
    row(
        Feature::BindingLayout,
        Some(420),
        Some(310),
        Some("GL_ARB_shading_language_420pack"),
    ),
    row(
        Feature::ImageLoadStore,
        Some(420),
        Some(310),
        Some("GL_ARB_shader_image_load_store"),
    ),
    row(
        Feature::AtomicCounters,
        Some(420),
        Some(310),
        Some("GL_ARB_shader_atomic_counters"),
    ),
    row(
        Feature::EarlyFragmentTests,
        Some(420),
        Some(310),
        Some("GL_ARB_shader_image_load_store"),
    ),
    row(
        Feature::PackingFunctions,
        Some(420),
        Some(300),
        Some("GL_ARB_shading_language_packing"),
    ),
    row(
        Feature::ComputeShader,
        Some(430),
        Some(310),
        Some("GL_ARB_compute_shader"),
    ),
    row(
        Feature::StorageBuffer,
        Some(430),
        Some(310),
        Some("GL_ARB_shader_storage_buffer_object"),
    ),
    row(Feature::ImageSize, Some(430), Some(310), Some("GL_ARB_shader_image_size")),
    row(Feature::CullDistance, Some(450), None, Some("GL_ARB_cull_distance")),
    row(
        Feature::DerivativeControl,
        Some(450),
        None,
        Some("GL_ARB_derivative_control"),
    ),
    row(
        Feature::DrawParameters,
        Some(460),
        None,
        Some("GL_ARB_shader_draw_parameters"),
    ),
    row(Feature::Int64, None, None, Some("GL_ARB_gpu_shader_int64")),
];

/// How a feature can be made available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    Native,
    Extension(&'static str),
    Unavailable,
}

pub fn lookup(feature: Feature) -> Option<&'static CapabilityRow> {
    CAPABILITY_TABLE.iter().find(|row| row.feature == feature)
}

/// Availability of `feature` at `version` of the desktop or ES profile.
pub fn support(feature: Feature, version: u32, es: bool) -> Support {
    let Some(row) = lookup(feature) else {
        return Support::Native;
    };
    let minimum = if es { row.min_es } else { row.min_desktop };
    match (minimum, row.extension) {
        (Some(min), _) if version >= min => Support::Native,
        (_, Some(extension)) if !es => Support::Extension(extension),
        _ => Support::Unavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_feature_has_exactly_one_row() {
        for (i, a) in CAPABILITY_TABLE.iter().enumerate() {
            for b in &CAPABILITY_TABLE[i + 1..] {
                assert_ne!(a.feature, b.feature, "duplicate row for {:?}", a.feature);
            }
        }
    }

    #[test]
    fn core_versions_are_native() {
        assert_eq!(support(Feature::StorageBuffer, 450, false), Support::Native);
        assert_eq!(support(Feature::StorageBuffer, 310, true), Support::Native);
        assert_eq!(support(Feature::Switch, 130, false), Support::Native);
    }

    #[test]
    fn older_desktop_versions_request_the_extension() {
        assert_eq!(
            support(Feature::ComputeShader, 330, false),
            Support::Extension("GL_ARB_compute_shader")
        );
        assert_eq!(
            support(Feature::Int64, 460, false),
            Support::Extension("GL_ARB_gpu_shader_int64")
        );
    }

    #[test]
    fn missing_es_support_is_unavailable() {
        assert_eq!(support(Feature::Float64, 320, true), Support::Unavailable);
        assert_eq!(support(Feature::ComputeShader, 300, true), Support::Unavailable);
        assert_eq!(support(Feature::Switch, 120, false), Support::Unavailable);
    }
}
